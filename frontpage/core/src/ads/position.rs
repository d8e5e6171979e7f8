//! Ad Position - One Slot, One Lifecycle
//!
//! An [`AdPosition`] binds a [`SlotElement`] to a placement and tracks what
//! has happened to it:
//!
//! ```text
//! Unregistered ──register──► Registered ──deliver──► Ready ──show──► Shown
//!       │                         │                    │               │
//!       └─────────────────────────┴──────destroy───────┴───────────────┴──► Destroyed
//! ```
//!
//! `Destroyed` is terminal. Anything that reaches a destroyed position
//! (a late creative, a stray `show`) is ignored; that flag check is the guard
//! for work that was in flight when the owning view went away.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::types::{AdPlacement, AdSize, AdType, AdTypes, Creative, PositionId, PositionOptions};
use crate::events::PageEvent;
use crate::pubsub::EventAggregator;
use crate::slot::SlotElement;
use crate::view::Destroyable;

/// Errors raised while creating or driving a position
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PositionError {
    /// No placement was configured
    #[error("Ad position requires a non-empty adPlacement")]
    MissingPlacement,

    /// A size string could not be parsed
    #[error("Invalid ad size: {0:?}")]
    InvalidSize(String),

    /// A second default position was registered for a placement
    #[error("Placement {placement} already has a default position")]
    DuplicateDefault {
        /// The offending placement
        placement: AdPlacement,
    },

    /// The ad manager this position registered with no longer exists
    #[error("Ad manager is no longer available")]
    ManagerUnavailable,

    /// The position was already destroyed
    #[error("Ad position {0} has been destroyed")]
    Destroyed(PositionId),
}

/// Lifecycle state of a position
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PositionState {
    /// Created but not known to any manager
    Unregistered,
    /// Registered and waiting for a creative
    Registered,
    /// A creative has been rendered into the slot
    Ready,
    /// The creative is rendered and the slot is visible
    Shown,
    /// Torn down; terminal
    Destroyed,
}

impl PositionState {
    /// Whether a creative has been delivered
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Shown)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unregistered => "unregistered",
            Self::Registered => "registered",
            Self::Ready => "ready",
            Self::Shown => "shown",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct PositionStatus {
    state: PositionState,
    visible: bool,
    creative: Option<Creative>,
}

/// State shared between a position handle and the manager's registration table
pub(crate) struct PositionInner {
    id: PositionId,
    placement: AdPlacement,
    sizes: Vec<AdSize>,
    ad_types: AdTypes,
    default_position: bool,
    slot: Box<dyn SlotElement>,
    status: Mutex<PositionStatus>,
    cancel: CancellationToken,
    events: Option<EventAggregator>,
}

impl PositionInner {
    fn from_options(
        options: PositionOptions,
        slot: Box<dyn SlotElement>,
        events: Option<EventAggregator>,
    ) -> Result<Self, PositionError> {
        let placement = AdPlacement::new(options.ad_placement.trim());
        if placement.is_blank() {
            return Err(PositionError::MissingPlacement);
        }

        let sizes = options
            .ad_sizes
            .iter()
            .map(|s| s.parse::<AdSize>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: PositionId::new(),
            placement,
            sizes,
            ad_types: AdTypes::normalize(options.ad_type),
            default_position: options.default_position,
            slot,
            status: Mutex::new(PositionStatus {
                state: PositionState::Unregistered,
                visible: false,
                creative: None,
            }),
            cancel: CancellationToken::new(),
            events,
        })
    }

    pub(crate) fn id(&self) -> PositionId {
        self.id
    }

    pub(crate) fn placement(&self) -> &AdPlacement {
        &self.placement
    }

    pub(crate) fn sizes(&self) -> &[AdSize] {
        &self.sizes
    }

    pub(crate) fn ad_types(&self) -> &AdTypes {
        &self.ad_types
    }

    pub(crate) fn is_default(&self) -> bool {
        self.default_position
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn state(&self) -> PositionState {
        self.status.lock().state
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.state() == PositionState::Destroyed
    }

    pub(crate) fn mark_registered(&self) {
        let mut status = self.status.lock();
        if status.state == PositionState::Unregistered {
            status.state = PositionState::Registered;
        }
    }

    fn show(&self) {
        let mut status = self.status.lock();
        Self::show_locked(&mut status, self.slot.as_ref());
    }

    fn show_locked(status: &mut PositionStatus, slot: &dyn SlotElement) {
        if status.state == PositionState::Destroyed || status.visible {
            return;
        }
        status.visible = true;
        if status.state == PositionState::Ready {
            status.state = PositionState::Shown;
        }
        slot.show();
    }

    fn hide(&self) {
        let mut status = self.status.lock();
        if status.state == PositionState::Destroyed || !status.visible {
            return;
        }
        status.visible = false;
        self.slot.hide();
    }

    /// Returns true if this call performed the teardown
    pub(crate) fn destroy(&self, remove_el: bool) -> bool {
        let mut status = self.status.lock();
        if status.state == PositionState::Destroyed {
            return false;
        }
        if status.visible {
            status.visible = false;
            self.slot.hide();
        }
        self.cancel.cancel();
        if remove_el {
            self.slot.remove();
        }
        status.state = PositionState::Destroyed;
        drop(status);

        tracing::debug!(
            position_id = %self.id,
            placement = %self.placement,
            remove_el,
            "Ad position destroyed"
        );
        true
    }

    /// Render `creative`, reveal the slot and announce it on the bus
    ///
    /// Returns false (and does nothing) if the position is destroyed.
    pub(crate) fn deliver(&self, creative: &Creative) -> bool {
        {
            let mut status = self.status.lock();
            if status.state == PositionState::Destroyed {
                tracing::debug!(
                    position_id = %self.id,
                    placement = %self.placement,
                    "Ignoring creative for destroyed position"
                );
                return false;
            }
            self.slot.render(creative);
            status.creative = Some(creative.clone());
            status.state = PositionState::Ready;
            if status.visible {
                status.state = PositionState::Shown;
            } else {
                Self::show_locked(&mut status, self.slot.as_ref());
            }
        }

        tracing::info!(
            position_id = %self.id,
            placement = %self.placement,
            selector = self.slot.selector(),
            ad_type = creative.ad_type.as_ref().map(AdType::as_str),
            "Creative delivered"
        );

        // Published outside the lock: handlers may call back into this position
        if let Some(events) = &self.events {
            events.trigger(&PageEvent::AdReady {
                placement: self.placement.clone(),
                position: self.id,
                ad_type: creative.ad_type.clone(),
            });
        }
        true
    }
}

impl fmt::Debug for PositionInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionInner")
            .field("id", &self.id)
            .field("placement", &self.placement)
            .field("selector", &self.slot.selector())
            .field("default_position", &self.default_position)
            .field("state", &self.state())
            .finish()
    }
}

/// A single ad slot
///
/// Dropping the handle destroys the position (without removing the element).
#[derive(Debug)]
pub struct AdPosition {
    inner: Arc<PositionInner>,
}

impl AdPosition {
    /// Create a position bound to `slot`
    ///
    /// Fails fast when the placement is missing or a size is malformed.
    /// When `events` is given, deliveries publish [`PageEvent::AdReady`] on it.
    pub fn new(
        options: PositionOptions,
        slot: impl SlotElement + 'static,
        events: Option<EventAggregator>,
    ) -> Result<Self, PositionError> {
        let inner = PositionInner::from_options(options, Box::new(slot), events)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub(crate) fn inner(&self) -> &Arc<PositionInner> {
        &self.inner
    }

    /// Unique ID of this position
    #[must_use]
    pub fn id(&self) -> PositionId {
        self.inner.id()
    }

    /// Placement this position belongs to
    #[must_use]
    pub fn placement(&self) -> &AdPlacement {
        self.inner.placement()
    }

    /// Allowed creative sizes, in preference order
    #[must_use]
    pub fn sizes(&self) -> &[AdSize] {
        self.inner.sizes()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> PositionState {
        self.inner.state()
    }

    /// Whether the slot is currently visible
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.inner.status.lock().visible
    }

    /// Whether the position has been torn down
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    /// Last creative delivered to this position
    #[must_use]
    pub fn creative(&self) -> Option<Creative> {
        self.inner.status.lock().creative.clone()
    }

    /// Token cancelled when the position is destroyed
    ///
    /// Ad requests for this placement select on it and are dropped once
    /// every position waiting on them is destroyed.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Reveal the slot; calling it again has no effect
    pub fn show(&self) {
        self.inner.show();
    }

    /// Conceal the slot
    pub fn hide(&self) {
        self.inner.hide();
    }

    /// Deliver a creative directly (used for non-shared slots)
    pub fn deliver(&self, creative: &Creative) -> bool {
        self.inner.deliver(creative)
    }

    /// Release the position, optionally removing its element
    ///
    /// Safe to call at any point in the lifecycle and more than once.
    pub fn destroy(&self, remove_el: bool) {
        self.inner.destroy(remove_el);
    }
}

impl Destroyable for AdPosition {
    fn destroy(&mut self) {
        AdPosition::destroy(self, false);
    }

    fn is_destroyed(&self) -> bool {
        AdPosition::is_destroyed(self)
    }
}

impl Drop for AdPosition {
    fn drop(&mut self) {
        self.inner.destroy(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::pubsub::handler;
    use crate::slot::HeadlessSlot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn position(slot: &HeadlessSlot) -> AdPosition {
        AdPosition::new(
            PositionOptions::new("poster_front").with_size("300x250"),
            slot.clone(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_missing_placement_fails_fast() {
        let err = AdPosition::new(PositionOptions::new("  "), HeadlessSlot::new("#a"), None)
            .unwrap_err();
        assert_eq!(err, PositionError::MissingPlacement);
    }

    #[test]
    fn test_invalid_size_fails_fast() {
        let err = AdPosition::new(
            PositionOptions::new("x").with_size("wide"),
            HeadlessSlot::new("#a"),
            None,
        )
        .unwrap_err();
        assert_eq!(err, PositionError::InvalidSize("wide".to_string()));
    }

    #[test]
    fn test_show_is_idempotent() {
        let slot = HeadlessSlot::new("#ad");
        let pos = position(&slot);

        pos.show();
        pos.show();
        assert!(pos.is_visible());
        assert_eq!(slot.snapshot().show_calls, 1);

        pos.hide();
        assert!(!pos.is_visible());
        assert!(!slot.snapshot().visible);
    }

    #[test]
    fn test_deliver_renders_and_shows() {
        let slot = HeadlessSlot::new("#ad");
        let pos = position(&slot);

        assert!(pos.deliver(&Creative::new("<b>ad</b>", None)));
        assert_eq!(pos.state(), PositionState::Shown);
        assert!(pos.state().is_ready());

        let snap = slot.snapshot();
        assert!(snap.visible);
        assert_eq!(snap.markup.as_deref(), Some("<b>ad</b>"));
    }

    #[test]
    fn test_deliver_publishes_ad_ready() {
        let bus = EventAggregator::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.on(
            EventKind::AdReady,
            handler(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
        );

        let pos = AdPosition::new(
            PositionOptions::new("high_impact"),
            HeadlessSlot::new("#hi"),
            Some(bus),
        )
        .unwrap();
        pos.deliver(&Creative::new("x", Some(AdType::new("takeover"))));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroy_is_terminal() {
        let slot = HeadlessSlot::new("#ad");
        let pos = position(&slot);
        let token = pos.cancellation_token();

        pos.show();
        pos.destroy(true);
        pos.destroy(true);

        assert!(pos.is_destroyed());
        assert!(token.is_cancelled());
        assert!(slot.snapshot().removed);

        // Late creative is ignored
        assert!(!pos.deliver(&Creative::new("late", None)));
        assert_eq!(slot.snapshot().render_calls, 0);

        pos.show();
        assert!(!slot.snapshot().visible);
    }

    #[test]
    fn test_drop_destroys() {
        let slot = HeadlessSlot::new("#ad");
        let pos = position(&slot);
        let token = pos.cancellation_token();
        drop(pos);
        assert!(token.is_cancelled());
        assert!(!slot.snapshot().removed);
    }
}
