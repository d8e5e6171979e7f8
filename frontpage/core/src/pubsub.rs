//! Event Aggregator - Page-Wide Publish/Subscribe
//!
//! Decouples page components from each other. A component publishes a
//! [`PageEvent`]; every handler subscribed to that event's [`EventKind`] runs
//! synchronously, in subscription order.
//!
//! # Failure Isolation
//!
//! A handler that returns `Err` or panics is logged and counted, and the
//! remaining handlers still run. Nothing propagates to the publisher: one
//! broken module must not take the page down with it.
//!
//! # Ownership
//!
//! The aggregator is an ordinary value. Clone it and hand the clone to every
//! component that needs it; all clones share the same subscription table.
//!
//! ```text
//!   component A ──trigger()──►  EventAggregator  ──►  handler 1 (ok)
//!                                 HashMap<Kind,   ──►  handler 2 (Err, logged)
//!                                   Vec<Sub>>      ──►  handler 3 (still runs)
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{ContextId, EventKind, PageEvent};

/// Callback invoked for a published event
///
/// Identity is pointer identity: keep the `Arc` around if you want to remove
/// exactly this handler later.
pub type Handler = Arc<dyn Fn(&PageEvent) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&PageEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Unique identifier for one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
    context: Option<ContextId>,
    once: bool,
}

/// A batch of event-kind/handler pairs registered together
#[derive(Clone, Default)]
pub struct EventMap {
    entries: Vec<(EventKind, Handler)>,
}

impl EventMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    #[must_use]
    pub fn with(mut self, kind: EventKind, handler: Handler) -> Self {
        self.entries.push((kind, handler));
        self
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for EventMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(kind, _)| kind))
            .finish()
    }
}

/// Result of a `trigger` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully
    pub delivered: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

impl DispatchReport {
    /// Check if every handler succeeded
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Total number of handlers invoked
    #[must_use]
    pub fn invoked(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Shared publish/subscribe bus
#[derive(Clone, Default)]
pub struct EventAggregator {
    inner: Arc<RwLock<HashMap<EventKind, Vec<Subscription>>>>,
}

impl EventAggregator {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `kind`
    pub fn on(
        &self,
        kind: EventKind,
        handler: Handler,
        context: Option<ContextId>,
    ) -> SubscriptionId {
        self.subscribe(kind, handler, context, false)
    }

    /// Subscribe `handler` to the next `kind` event only
    pub fn once(
        &self,
        kind: EventKind,
        handler: Handler,
        context: Option<ContextId>,
    ) -> SubscriptionId {
        self.subscribe(kind, handler, context, true)
    }

    fn subscribe(
        &self,
        kind: EventKind,
        handler: Handler,
        context: Option<ContextId>,
        once: bool,
    ) -> SubscriptionId {
        let id = SubscriptionId::next();
        tracing::trace!(event = %kind, subscription = %id, once, "Handler subscribed");
        self.inner.write().entry(kind).or_default().push(Subscription {
            id,
            handler,
            context,
            once,
        });
        id
    }

    /// Remove every subscription matching all of the given filters
    ///
    /// `None` matches anything, so `off(None, None, None)` clears the bus and
    /// `off(None, None, Some(ctx))` drops everything a context registered.
    /// Returns the number of subscriptions removed.
    pub fn off(
        &self,
        kind: Option<&EventKind>,
        handler: Option<&Handler>,
        context: Option<ContextId>,
    ) -> usize {
        let mut inner = self.inner.write();
        let mut removed = 0;

        for (subscribed_kind, subs) in inner.iter_mut() {
            if kind.is_some_and(|k| k != subscribed_kind) {
                continue;
            }
            let before = subs.len();
            subs.retain(|sub| {
                let handler_matches = handler.map_or(true, |h| Arc::ptr_eq(h, &sub.handler));
                let context_matches = context.map_or(true, |c| sub.context == Some(c));
                !(handler_matches && context_matches)
            });
            removed += before - subs.len();
        }
        inner.retain(|_, subs| !subs.is_empty());

        if removed > 0 {
            tracing::trace!(removed, "Handlers unsubscribed");
        }
        removed
    }

    /// Remove a single subscription by ID
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.write();
        let mut found = false;
        for subs in inner.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                found = true;
                break;
            }
        }
        inner.retain(|_, subs| !subs.is_empty());
        found
    }

    /// Register every entry of `map` under `context`
    pub fn attach(&self, map: &EventMap, context: Option<ContextId>) -> Vec<SubscriptionId> {
        map.entries
            .iter()
            .map(|(kind, handler)| self.on(kind.clone(), Arc::clone(handler), context))
            .collect()
    }

    /// Undo a previous [`attach`](Self::attach) with the same map and context
    pub fn unattach(&self, map: &EventMap, context: Option<ContextId>) -> usize {
        map.entries
            .iter()
            .map(|(kind, handler)| self.off(Some(kind), Some(handler), context))
            .sum()
    }

    /// Publish `event` to its subscribers, then to `EventKind::All` subscribers
    ///
    /// The subscriber list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while the event is being dispatched.
    pub fn trigger(&self, event: &PageEvent) -> DispatchReport {
        let kind = event.kind();
        let targets: Vec<(SubscriptionId, Handler, bool)> = {
            let inner = self.inner.read();
            let specific = inner.get(&kind).into_iter().flatten();
            let wildcard = inner.get(&EventKind::All).into_iter().flatten();
            specific
                .chain(wildcard)
                .map(|s| (s.id, Arc::clone(&s.handler), s.once))
                .collect()
        };

        let mut report = DispatchReport::default();
        for (id, handler, once) in targets {
            // Consumed by a re-entrant trigger already
            if once && !self.unsubscribe(id) {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::error!(
                        event = %kind,
                        subscription = %id,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    tracing::error!(
                        event = %kind,
                        subscription = %id,
                        panic = %panic_message(payload.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }
        report
    }

    /// Number of handlers subscribed to exactly `kind`
    #[must_use]
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.inner.read().get(kind).map_or(0, Vec::len)
    }

    /// Total number of subscriptions on the bus
    #[must_use]
    pub fn total_listeners(&self) -> usize {
        self.inner.read().values().map(Vec::len).sum()
    }
}

impl fmt::Debug for EventAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("EventAggregator")
            .field("kinds", &inner.keys().collect::<Vec<_>>())
            .field("listeners", &inner.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
