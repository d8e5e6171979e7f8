//! Ad Manager - One Request Per Placement
//!
//! Shared positions register here. Registrations that arrive together are
//! coalesced: the manager issues a single ad-server request per placement and
//! hands the returned creative to exactly one registered position.
//!
//! # Request Flow
//!
//! ```text
//! register(pos-1) ─┐
//! register(pos-2) ─┼─► pending {poster_front} ──batch window──► flush()
//! register(pos-3) ─┘                                              │
//!                                                  AdServer::request (1x)
//!                                                                 │
//!                         select: ad_type match ─► default ─► drop
//!                                                                 │
//!                                                      pos-2.deliver(creative)
//! ```
//!
//! # Cancellation
//!
//! Every request selects on two things besides the server's answer:
//!
//! - the manager's shutdown token, which a page-owned manager derives from
//!   the page scope
//! - the cancellation tokens of the positions waiting on the placement; once
//!   all of them are destroyed the request is dropped
//!
//! A position destroyed while its request was in flight is also no longer in
//! the table (and ignores deliveries anyway), so late responses never reach it.
//!
//! The generation check and the delivery of a response happen under one
//! lock, so a stale creative can never land after a fresher one.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::position::{PositionError, PositionInner};
use super::registry::{MatchKind, PlacementRegistry, RegistrySummary};
use super::server::AdServer;
use super::shared::SharedAdPosition;
use super::types::{AdPlacement, AdType, Creative, PositionId};
use crate::config::AdsConfig;
use crate::events::PageEvent;
use crate::pubsub::EventAggregator;

/// What happened to one placement during a flush
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A position received the creative
    Delivered {
        /// Placement that was filled
        placement: AdPlacement,
        /// Receiving position
        position: PositionId,
        /// How the receiver was chosen
        matched_by: MatchKind,
    },
    /// The creative matched no position and there was no default
    Dropped {
        /// Placement that was requested
        placement: AdPlacement,
        /// Type of the dropped creative
        ad_type: Option<AdType>,
    },
    /// The ad server had nothing for this placement
    Empty {
        /// Placement that was requested
        placement: AdPlacement,
    },
    /// Every position unregistered before the request went out
    NoPositions {
        /// Placement that was pending
        placement: AdPlacement,
    },
    /// The ad server call failed
    Failed {
        /// Placement that was requested
        placement: AdPlacement,
        /// Error description
        error: String,
    },
    /// A newer request for the placement was issued; this response was discarded
    Superseded {
        /// Placement that was requested
        placement: AdPlacement,
    },
    /// The manager shut down, or every waiting position was destroyed, while
    /// the request was in flight
    Cancelled {
        /// Placement that was requested
        placement: AdPlacement,
    },
}

impl DispatchOutcome {
    /// Placement this outcome is about
    #[must_use]
    pub fn placement(&self) -> &AdPlacement {
        match self {
            Self::Delivered { placement, .. }
            | Self::Dropped { placement, .. }
            | Self::Empty { placement }
            | Self::NoPositions { placement }
            | Self::Failed { placement, .. }
            | Self::Superseded { placement }
            | Self::Cancelled { placement } => placement,
        }
    }

    /// Receiving position, if the creative was delivered
    #[must_use]
    pub fn delivered_to(&self) -> Option<PositionId> {
        match self {
            Self::Delivered { position, .. } => Some(*position),
            _ => None,
        }
    }
}

struct ManagerInner {
    registry: PlacementRegistry,
    server: Arc<dyn AdServer>,
    events: EventAggregator,
    pending: Mutex<BTreeSet<AdPlacement>>,
    flush_scheduled: AtomicBool,
    generations: Mutex<HashMap<AdPlacement, u64>>,
    delivery: Mutex<()>,
    batch_window: Duration,
    shutdown: CancellationToken,
}

/// Coordinates shared positions against the ad server
///
/// Cloning is cheap; all clones share one registration table.
#[derive(Clone)]
pub struct AdManager {
    inner: Arc<ManagerInner>,
}

/// Non-owning reference to an [`AdManager`]
///
/// Positions hold this so they never keep the manager alive.
#[derive(Clone, Debug, Default)]
pub struct AdManagerHandle {
    inner: Weak<ManagerInner>,
}

impl AdManagerHandle {
    /// The manager, if it still exists
    #[must_use]
    pub fn upgrade(&self) -> Option<AdManager> {
        self.inner.upgrade().map(|inner| AdManager { inner })
    }
}

impl AdManager {
    /// Create a manager that flushes on the next scheduler turn
    pub fn new(server: Arc<dyn AdServer>, events: EventAggregator) -> Self {
        Self::with_config(server, events, &AdsConfig::default())
    }

    /// Create a manager using the `[ads]` configuration section
    pub fn with_config(server: Arc<dyn AdServer>, events: EventAggregator, config: &AdsConfig) -> Self {
        Self::with_shutdown_token(server, events, config, CancellationToken::new())
    }

    /// Create a manager that shuts down when `shutdown` is cancelled
    ///
    /// Pass a child of an owning scope's token to tie in-flight requests to
    /// that scope's lifetime.
    pub fn with_shutdown_token(
        server: Arc<dyn AdServer>,
        events: EventAggregator,
        config: &AdsConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry: PlacementRegistry::new(),
                server,
                events,
                pending: Mutex::new(BTreeSet::new()),
                flush_scheduled: AtomicBool::new(false),
                generations: Mutex::new(HashMap::new()),
                delivery: Mutex::new(()),
                batch_window: config.batch_window,
                shutdown,
            }),
        }
    }

    /// The bus ad events are published on
    #[must_use]
    pub fn events(&self) -> &EventAggregator {
        &self.inner.events
    }

    /// Weak handle for positions
    #[must_use]
    pub fn downgrade(&self) -> AdManagerHandle {
        AdManagerHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub(crate) fn register_shared_ad_position(
        &self,
        position: &Arc<PositionInner>,
    ) -> Result<(), PositionError> {
        if self.inner.registry.register(position)? {
            position.mark_registered();
            self.schedule(position.placement().clone());
        }
        Ok(())
    }

    /// Remove a shared position from the registration table
    ///
    /// Returns true if it was registered. The position itself is not touched;
    /// [`SharedAdPosition::destroy`] does the visual teardown first and then
    /// calls this.
    pub fn destroy_shared_ad_position(&self, position: &SharedAdPosition) -> bool {
        self.unregister(position.placement(), position.id())
    }

    pub(crate) fn unregister(&self, placement: &AdPlacement, id: PositionId) -> bool {
        let removed = self.inner.registry.unregister(placement, id);
        if removed && self.inner.registry.count(placement) == 0 {
            self.inner.pending.lock().remove(placement);
        }
        removed
    }

    /// Queue a new ad-server request for `placement`
    ///
    /// Returns false when no position is registered for it.
    pub fn refresh_shared_ad_position(&self, placement: &AdPlacement) -> bool {
        if self.inner.registry.count(placement) == 0 {
            tracing::debug!(placement = %placement, "Refresh ignored, nothing registered");
            return false;
        }
        self.inner.events.trigger(&PageEvent::PlacementRefreshed {
            placement: placement.clone(),
        });
        self.schedule(placement.clone());
        true
    }

    // ========================================================================
    // Batching
    // ========================================================================

    fn schedule(&self, placement: AdPlacement) {
        self.inner.pending.lock().insert(placement);

        if self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // No runtime: stay pending until someone calls flush()
            self.inner.flush_scheduled.store(false, Ordering::SeqCst);
            tracing::debug!("No async runtime, placements wait for an explicit flush");
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let window = self.inner.batch_window;
        let shutdown = self.inner.shutdown.clone();
        runtime.spawn(async move {
            if window.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = tokio::time::sleep(window) => {}
                }
            }
            if let Some(inner) = weak.upgrade() {
                AdManager { inner }.flush().await;
            }
        });
    }

    /// Issue one request per pending placement and dispatch the results
    ///
    /// Runs automatically after the batch window; calling it directly drains
    /// whatever is pending right now.
    pub async fn flush(&self) -> Vec<DispatchOutcome> {
        self.inner.flush_scheduled.store(false, Ordering::SeqCst);
        let placements: Vec<AdPlacement> =
            std::mem::take(&mut *self.inner.pending.lock()).into_iter().collect();

        if placements.is_empty() {
            return Vec::new();
        }
        tracing::debug!(count = placements.len(), "Flushing pending placements");

        join_all(placements.into_iter().map(|p| self.dispatch_placement(p))).await
    }

    fn next_generation(&self, placement: &AdPlacement) -> u64 {
        let mut generations = self.inner.generations.lock();
        let generation = generations.entry(placement.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    fn is_current_generation(&self, placement: &AdPlacement, generation: u64) -> bool {
        self.inner.generations.lock().get(placement).copied() == Some(generation)
    }

    /// Deliver `creative` unless a newer request for the placement was issued
    fn deliver_if_current(
        &self,
        placement: &AdPlacement,
        generation: u64,
        creative: &Creative,
    ) -> DispatchOutcome {
        let _delivery = self.inner.delivery.lock();
        if !self.is_current_generation(placement, generation) {
            tracing::debug!(placement = %placement, generation, "Discarding stale response");
            return DispatchOutcome::Superseded {
                placement: placement.clone(),
            };
        }
        self.dispatch_creative(placement, creative)
    }

    async fn dispatch_placement(&self, placement: AdPlacement) -> DispatchOutcome {
        let Some(request) = self.inner.registry.request_for(&placement) else {
            return DispatchOutcome::NoPositions { placement };
        };
        let waiting = self.inner.registry.cancellation_tokens(&placement);
        if waiting.is_empty() {
            return DispatchOutcome::NoPositions { placement };
        }
        let generation = self.next_generation(&placement);

        tracing::debug!(
            placement = %placement,
            generation,
            server = self.inner.server.name(),
            "Requesting creative"
        );

        let result = tokio::select! {
            biased;

            () = self.inner.shutdown.cancelled() => {
                tracing::debug!(placement = %placement, "Ad request cancelled");
                return DispatchOutcome::Cancelled { placement };
            }
            _ = join_all(waiting.iter().map(CancellationToken::cancelled)) => {
                tracing::debug!(placement = %placement, "Every waiting position destroyed, ad request cancelled");
                return DispatchOutcome::Cancelled { placement };
            }
            result = self.inner.server.request(&request) => result,
        };

        match result {
            Err(e) => {
                tracing::warn!(placement = %placement, error = %e, "Ad server request failed");
                DispatchOutcome::Failed {
                    placement,
                    error: e.to_string(),
                }
            }
            Ok(None) => {
                tracing::debug!(placement = %placement, "Ad server returned no creative");
                DispatchOutcome::Empty { placement }
            }
            Ok(Some(creative)) => self.deliver_if_current(&placement, generation, &creative),
        }
    }

    /// Hand `creative` to the matching position of `placement`
    ///
    /// Type match first, then the default position; with neither, the
    /// creative is dropped and no position is notified. A receiver destroyed
    /// between selection and delivery is skipped and selection runs once more.
    pub fn dispatch_creative(&self, placement: &AdPlacement, creative: &Creative) -> DispatchOutcome {
        let mut skip = None;
        for _ in 0..2 {
            let Some((position, matched_by)) =
                self.inner.registry.select(placement, creative.ad_type.as_ref(), skip)
            else {
                break;
            };
            if position.deliver(creative) {
                return DispatchOutcome::Delivered {
                    placement: placement.clone(),
                    position: position.id(),
                    matched_by,
                };
            }
            tracing::debug!(
                position_id = %position.id(),
                placement = %placement,
                "Selected position went away before delivery, selecting again"
            );
            skip = Some(position.id());
        }

        tracing::warn!(
            placement = %placement,
            ad_type = creative.ad_type.as_ref().map(AdType::as_str),
            "No position matched creative, dropping it"
        );
        self.inner.events.trigger(&PageEvent::AdDropped {
            placement: placement.clone(),
            ad_type: creative.ad_type.clone(),
        });
        DispatchOutcome::Dropped {
            placement: placement.clone(),
            ad_type: creative.ad_type.clone(),
        }
    }

    /// Cancel in-flight requests and stop scheduled flushes
    pub fn shutdown(&self) {
        tracing::info!("Ad manager shutting down");
        self.inner.shutdown.cancel();
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of positions registered for `placement`
    #[must_use]
    pub fn registered_count(&self, placement: &AdPlacement) -> usize {
        self.inner.registry.count(placement)
    }

    /// Total number of registered positions
    #[must_use]
    pub fn total_registered(&self) -> usize {
        self.inner.registry.total()
    }

    /// Whether the position with `id` is registered
    #[must_use]
    pub fn contains(&self, id: PositionId) -> bool {
        self.inner.registry.contains(id)
    }

    /// Placements with at least one registration
    #[must_use]
    pub fn placements(&self) -> Vec<AdPlacement> {
        self.inner.registry.placements()
    }

    /// Placements waiting for the next flush
    #[must_use]
    pub fn pending(&self) -> Vec<AdPlacement> {
        self.inner.pending.lock().iter().cloned().collect()
    }

    /// Summary of the registration table
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        self.inner.registry.summary()
    }
}

impl fmt::Debug for AdManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdManager")
            .field("registry", &self.inner.registry)
            .field("server", &self.inner.server.name())
            .field("batch_window", &self.inner.batch_window)
            .finish()
    }
}

impl fmt::Debug for ManagerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerInner")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::server::{AdRequest, AdServerError};
    use crate::ads::types::PositionOptions;
    use crate::slot::HeadlessSlot;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Serves a fixed creative and records every request
    #[derive(Default)]
    struct ScriptedServer {
        creative: Option<Creative>,
        requests: Mutex<Vec<AdRequest>>,
    }

    impl ScriptedServer {
        fn serving(creative: Option<Creative>) -> Arc<Self> {
            Arc::new(Self {
                creative,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AdServer for ScriptedServer {
        async fn request(&self, request: &AdRequest) -> Result<Option<Creative>, AdServerError> {
            self.requests.lock().push(request.clone());
            Ok(self.creative.clone())
        }
    }

    struct FailingServer;

    #[async_trait]
    impl AdServer for FailingServer {
        async fn request(&self, _request: &AdRequest) -> Result<Option<Creative>, AdServerError> {
            Err(AdServerError::Status(503))
        }
    }

    fn shared(manager: &AdManager, options: PositionOptions) -> SharedAdPosition {
        SharedAdPosition::new(options, HeadlessSlot::new("#slot"), manager).unwrap()
    }

    #[tokio::test]
    async fn test_registrations_coalesce_into_one_request() {
        let server = ScriptedServer::serving(None);
        let manager = AdManager::new(server.clone(), EventAggregator::new());

        let _a = shared(&manager, PositionOptions::new("poster_front").with_size("300x250"));
        let _b = shared(&manager, PositionOptions::new("poster_front").with_size("728x90"));
        let _c = shared(&manager, PositionOptions::new("high_impact"));

        let outcomes = manager.flush().await;
        assert_eq!(outcomes.len(), 2);

        let requests = server.requests.lock();
        assert_eq!(requests.len(), 2);
        let poster = requests
            .iter()
            .find(|r| r.placement.as_str() == "poster_front")
            .unwrap();
        assert_eq!(poster.sizes.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_delivers_matching_type() {
        let server = ScriptedServer::serving(Some(Creative::new("<logo>", Some(AdType::new("logo")))));
        let manager = AdManager::new(server, EventAggregator::new());

        let banner = shared(&manager, PositionOptions::new("sponsor").with_ad_type("banner"));
        let logo = shared(&manager, PositionOptions::new("sponsor").with_ad_type("logo"));

        let outcomes = manager.flush().await;
        assert_eq!(
            outcomes,
            vec![DispatchOutcome::Delivered {
                placement: AdPlacement::new("sponsor"),
                position: logo.id(),
                matched_by: MatchKind::AdType,
            }]
        );
        assert!(logo.state().is_ready());
        assert!(!banner.state().is_ready());
    }

    #[tokio::test]
    async fn test_empty_and_failed_responses() {
        let manager = AdManager::new(ScriptedServer::serving(None), EventAggregator::new());
        let _a = shared(&manager, PositionOptions::new("p"));
        assert_eq!(
            manager.flush().await,
            vec![DispatchOutcome::Empty {
                placement: AdPlacement::new("p")
            }]
        );

        let manager = AdManager::new(Arc::new(FailingServer), EventAggregator::new());
        let a = shared(&manager, PositionOptions::new("p"));
        let outcomes = manager.flush().await;
        assert!(matches!(outcomes[0], DispatchOutcome::Failed { .. }));
        assert!(!a.state().is_ready());
    }

    #[tokio::test]
    async fn test_unregistered_before_flush() {
        let server = ScriptedServer::serving(None);
        let manager = AdManager::new(server.clone(), EventAggregator::new());

        let a = shared(&manager, PositionOptions::new("p"));
        assert_eq!(manager.pending(), vec![AdPlacement::new("p")]);
        a.destroy(false);

        assert!(manager.pending().is_empty());
        assert!(manager.flush().await.is_empty());
        assert!(server.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_requires_registration() {
        let manager = AdManager::new(ScriptedServer::serving(None), EventAggregator::new());
        assert!(!manager.refresh_shared_ad_position(&AdPlacement::new("nothing")));

        let a = shared(&manager, PositionOptions::new("carousel"));
        manager.flush().await;
        assert!(manager.pending().is_empty());

        assert!(a.refresh_position().is_ok());
        assert_eq!(manager.pending(), vec![AdPlacement::new("carousel")]);
    }

    #[tokio::test]
    async fn test_scheduled_flush_runs_without_explicit_call() {
        let server = ScriptedServer::serving(Some(Creative::new("x", None)));
        let manager = AdManager::new(server.clone(), EventAggregator::new());
        let fallback = shared(&manager, PositionOptions::new("p").as_default());

        for _ in 0..10 {
            if fallback.state().is_ready() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(fallback.state().is_ready());
        assert_eq!(server.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        struct HangingServer;

        #[async_trait]
        impl AdServer for HangingServer {
            async fn request(&self, _r: &AdRequest) -> Result<Option<Creative>, AdServerError> {
                futures::future::pending().await
            }
        }

        let manager = AdManager::new(Arc::new(HangingServer), EventAggregator::new());
        let _a = shared(&manager, PositionOptions::new("p"));

        // First poll of flush() drains the placement, then shutdown fires
        let (outcomes, ()) = tokio::join!(manager.flush(), async {
            tokio::task::yield_now().await;
            manager.shutdown();
        });
        assert_eq!(
            outcomes,
            vec![DispatchOutcome::Cancelled {
                placement: AdPlacement::new("p")
            }]
        );
    }

    /// Flags when the future holding it is dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Never answers; records when a request starts and when it is dropped
    #[derive(Default)]
    struct StalledServer {
        started: AtomicBool,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AdServer for StalledServer {
        async fn request(&self, _r: &AdRequest) -> Result<Option<Creative>, AdServerError> {
            let _flag = DropFlag(Arc::clone(&self.dropped));
            self.started.store(true, Ordering::SeqCst);
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_destroying_waiting_positions_drops_request() {
        let server = Arc::new(StalledServer::default());
        let manager = AdManager::new(server.clone(), EventAggregator::new());
        let a = shared(&manager, PositionOptions::new("p").with_size("300x250"));
        let b = shared(&manager, PositionOptions::new("p").with_size("728x90"));

        let (outcomes, ()) = tokio::join!(manager.flush(), async {
            tokio::task::yield_now().await;
            assert!(server.started.load(Ordering::SeqCst));
            a.destroy(false);
            tokio::task::yield_now().await;
            assert!(!server.dropped.load(Ordering::SeqCst));
            b.destroy(false);
        });

        assert_eq!(
            outcomes,
            vec![DispatchOutcome::Cancelled {
                placement: AdPlacement::new("p")
            }]
        );
        assert!(server.dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_token_from_owner() {
        let owner = CancellationToken::new();
        let server = Arc::new(StalledServer::default());
        let manager = AdManager::with_shutdown_token(
            server.clone(),
            EventAggregator::new(),
            &AdsConfig::default(),
            owner.child_token(),
        );
        let _a = shared(&manager, PositionOptions::new("p"));

        let (outcomes, ()) = tokio::join!(manager.flush(), async {
            tokio::task::yield_now().await;
            owner.cancel();
        });

        assert!(matches!(outcomes[0], DispatchOutcome::Cancelled { .. }));
        assert!(server.dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stale_generation_never_overwrites_fresh_delivery() {
        let manager = AdManager::new(ScriptedServer::serving(None), EventAggregator::new());
        let logo = shared(&manager, PositionOptions::new("p").with_ad_type("logo"));
        let placement = AdPlacement::new("p");

        let stale = manager.next_generation(&placement);
        let fresh = manager.next_generation(&placement);

        let outcome = manager.deliver_if_current(
            &placement,
            fresh,
            &Creative::new("<fresh>", Some(AdType::new("logo"))),
        );
        assert_eq!(outcome.delivered_to(), Some(logo.id()));

        let outcome = manager.deliver_if_current(
            &placement,
            stale,
            &Creative::new("<stale>", Some(AdType::new("logo"))),
        );
        assert_eq!(
            outcome,
            DispatchOutcome::Superseded {
                placement: placement.clone()
            }
        );
        assert_eq!(logo.creative().unwrap().markup, "<fresh>");
    }

    #[test]
    fn test_schedule_without_runtime_waits_for_flush() {
        let manager = AdManager::new(ScriptedServer::serving(None), EventAggregator::new());
        let _a = shared(&manager, PositionOptions::new("p"));
        assert_eq!(manager.pending(), vec![AdPlacement::new("p")]);

        let outcomes = tokio_test::block_on(manager.flush());
        assert_eq!(outcomes.len(), 1);
    }
}
