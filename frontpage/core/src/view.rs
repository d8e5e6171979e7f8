//! View Lifecycle
//!
//! Page components are built from small capabilities instead of a class
//! hierarchy:
//!
//! - [`Lifecycle`]: one-time setup against the page context
//! - [`Renderable`]: (re)draw into the component's element
//! - [`Destroyable`]: idempotent teardown
//!
//! A [`ViewScope`] owns everything that must die with a view: its bus
//! subscriptions (all registered under one [`ContextId`]), its timers and a
//! [`CancellationToken`] that in-flight work selects on. Destroying the scope
//! (explicitly or by dropping it) cancels the token, aborts the timers and
//! removes the subscriptions in one step.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{ContextId, EventKind, PageEvent};
use crate::page::PageContext;
use crate::pubsub::{DispatchReport, EventAggregator, EventMap, Handler, SubscriptionId};

/// One-time setup of a page component
pub trait Lifecycle {
    /// Bind to the page: create child scopes, register ad slots, subscribe
    fn initialize(&mut self, ctx: &PageContext) -> anyhow::Result<()>;
}

/// A component that draws into its element
pub trait Renderable {
    /// Draw the current state; components without output keep the default
    fn render(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Idempotent teardown
pub trait Destroyable {
    /// Release everything the component holds; a second call is a no-op
    fn destroy(&mut self);

    /// Whether `destroy` has run
    fn is_destroyed(&self) -> bool;
}

/// Owner of a view's subscriptions, timers and cancellation
pub struct ViewScope {
    context: ContextId,
    events: EventAggregator,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ViewScope {
    /// Create a root scope on `events`
    #[must_use]
    pub fn new(events: EventAggregator) -> Self {
        Self::with_token(events, CancellationToken::new())
    }

    fn with_token(events: EventAggregator, cancel: CancellationToken) -> Self {
        Self {
            context: ContextId::new(),
            events,
            cancel,
            tasks: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Create a scope that is cancelled whenever this one is
    ///
    /// The child has its own context, so destroying the child leaves the
    /// parent's subscriptions alone.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::with_token(self.events.clone(), self.cancel.child_token())
    }

    /// Context under which this scope's subscriptions are registered
    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The bus this scope subscribes to
    #[must_use]
    pub fn events(&self) -> &EventAggregator {
        &self.events
    }

    /// Token cancelled on teardown
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the scope was destroyed, or a parent scope cancelled it
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe under this scope's context
    pub fn listen(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        self.events.on(kind, handler, Some(self.context))
    }

    /// Subscribe to the next `kind` event under this scope's context
    pub fn listen_once(&self, kind: EventKind, handler: Handler) -> SubscriptionId {
        self.events.once(kind, handler, Some(self.context))
    }

    /// Subscribe a whole map under this scope's context
    pub fn attach(&self, map: &EventMap) -> Vec<SubscriptionId> {
        self.events.attach(map, Some(self.context))
    }

    /// Undo [`attach`](Self::attach)
    pub fn unattach(&self, map: &EventMap) -> usize {
        self.events.unattach(map, Some(self.context))
    }

    /// Publish on the scope's bus
    pub fn publish(&self, event: &PageEvent) -> DispatchReport {
        self.events.trigger(event)
    }

    // =========================================================================
    // Tasks and Timers
    // =========================================================================

    /// Run `future` until it finishes or the scope is torn down
    ///
    /// Returns `false` (and runs nothing) when the scope is already destroyed
    /// or there is no tokio runtime on this thread.
    pub fn spawn<F>(&self, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_destroyed() {
            tracing::debug!(context = %self.context, "Scope destroyed, not spawning");
            return false;
        }
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(context = %self.context, "No tokio runtime, task not started");
            return false;
        };

        let cancel = self.cancel.clone();
        let task = handle.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = future => {}
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        true
    }

    /// Call `tick` every `period` (first call after one period) until teardown
    pub fn spawn_interval<F>(&self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            tracing::warn!(context = %self.context, "Refusing zero-length interval");
            return false;
        }
        self.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                tick();
            }
        })
    }

    /// Call `fire` once after `delay` unless the scope is torn down first
    pub fn spawn_timeout<F>(&self, delay: Duration, fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        })
    }

    /// Number of tasks still running
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Cancel work, abort timers, drop subscriptions, announce the teardown
    ///
    /// Returns `true` the first time only.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        let removed = self.events.off(None, None, Some(self.context));

        tracing::debug!(
            context = %self.context,
            tasks = tasks.len(),
            subscriptions = removed,
            "View scope destroyed"
        );

        self.events.trigger(&PageEvent::ViewDestroyed {
            context: self.context,
        });
        true
    }
}

impl Destroyable for ViewScope {
    fn destroy(&mut self) {
        ViewScope::destroy(self);
    }

    fn is_destroyed(&self) -> bool {
        ViewScope::is_destroyed(self)
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        ViewScope::destroy(self);
    }
}

impl fmt::Debug for ViewScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewScope")
            .field("context", &self.context)
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::handler;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            count,
            handler(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
    }

    #[test]
    fn test_destroy_removes_scope_subscriptions_only() {
        let events = EventAggregator::new();
        let scope = ViewScope::new(events.clone());
        let (scoped, h1) = counter();
        let (global, h2) = counter();

        scope.listen(EventKind::custom("tick"), h1);
        events.on(EventKind::custom("tick"), h2, None);

        assert!(scope.destroy());
        assert!(!scope.destroy());

        events.trigger(&PageEvent::custom("tick", serde_json::Value::Null));
        assert_eq!(scoped.load(Ordering::SeqCst), 0);
        assert_eq!(global.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroy_announces() {
        let events = EventAggregator::new();
        let (seen, h) = counter();
        events.on(EventKind::ViewDestroyed, h, None);

        let scope = ViewScope::new(events.clone());
        drop(scope);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_child_cancelled_with_parent() {
        let parent = ViewScope::new(EventAggregator::new());
        let child = parent.child();
        assert_ne!(parent.context(), child.context());

        parent.destroy();
        assert!(child.is_destroyed());
    }

    #[test]
    fn test_child_destroy_leaves_parent() {
        let events = EventAggregator::new();
        let parent = ViewScope::new(events.clone());
        let child = parent.child();
        let (count, h) = counter();
        parent.listen(EventKind::custom("x"), h);

        child.destroy();
        assert!(!parent.is_destroyed());
        events.trigger(&PageEvent::custom("x", serde_json::Value::Null));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_without_runtime() {
        let scope = ViewScope::new(EventAggregator::new());
        assert!(!scope.spawn(async {}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_stops_after_destroy() {
        let scope = ViewScope::new(EventAggregator::new());
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();

        assert!(scope.spawn_interval(Duration::from_secs(1), move || {
            t.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        scope.destroy();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(scope.active_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancelled() {
        let scope = ViewScope::new(EventAggregator::new());
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();

        scope.spawn_timeout(Duration::from_secs(2), move || f.store(true, Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(1)).await;
        scope.destroy();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires() {
        let scope = ViewScope::new(EventAggregator::new());
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();

        scope.spawn_timeout(Duration::from_secs(2), move || f.store(true, Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_after_destroy_refused() {
        let scope = ViewScope::new(EventAggregator::new());
        scope.destroy();
        assert!(!scope.spawn(async {}));
        assert!(!scope.spawn_interval(Duration::from_secs(1), || {}));
    }
}
