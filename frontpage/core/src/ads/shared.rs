//! Shared Ad Position
//!
//! A position that shares one ad-server request with its sibling slots in the
//! same placement. It composes a base [`AdPosition`] with a registration in
//! the [`AdManager`]:
//!
//! - construction validates the options and registers
//! - the manager later picks it by `ad_type` (or as the default position)
//! - destruction tears the slot down first and unregisters second, so the
//!   manager can never deliver into a half-destroyed slot
//!
//! Dropping the handle runs the same teardown, which covers views that go
//! away without calling `destroy` explicitly.

use super::manager::{AdManager, AdManagerHandle};
use super::position::{AdPosition, PositionError, PositionState};
use super::types::{AdPlacement, AdSize, AdTypes, Creative, PositionId, PositionOptions};
use crate::slot::SlotElement;
use crate::view::Destroyable;

/// Ad slot registered with an [`AdManager`]
#[derive(Debug)]
pub struct SharedAdPosition {
    base: AdPosition,
    manager: AdManagerHandle,
}

impl SharedAdPosition {
    /// Create the position and register it with `manager`
    ///
    /// `ad_type` may be a string or a list; `default_position` defaults to
    /// false. Registering a second default position for the same placement
    /// is an error.
    pub fn new(
        options: PositionOptions,
        slot: impl SlotElement + 'static,
        manager: &AdManager,
    ) -> Result<Self, PositionError> {
        let base = AdPosition::new(options, slot, Some(manager.events().clone()))?;
        manager.register_shared_ad_position(base.inner())?;
        Ok(Self {
            base,
            manager: manager.downgrade(),
        })
    }

    /// Whether this is the placement's fallback position
    #[must_use]
    pub fn is_default_position(&self) -> bool {
        self.base.inner().is_default()
    }

    /// Creative types this position accepts
    #[must_use]
    pub fn ad_type(&self) -> &AdTypes {
        self.base.inner().ad_types()
    }

    /// Unique ID of this position
    #[must_use]
    pub fn id(&self) -> PositionId {
        self.base.id()
    }

    /// Placement this position shares
    #[must_use]
    pub fn placement(&self) -> &AdPlacement {
        self.base.placement()
    }

    /// Allowed sizes
    #[must_use]
    pub fn sizes(&self) -> &[AdSize] {
        self.base.sizes()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> PositionState {
        self.base.state()
    }

    /// Last creative delivered here
    #[must_use]
    pub fn creative(&self) -> Option<Creative> {
        self.base.creative()
    }

    /// The underlying slot position
    #[must_use]
    pub fn position(&self) -> &AdPosition {
        &self.base
    }

    /// Reveal the slot
    pub fn show(&self) {
        self.base.show();
    }

    /// Conceal the slot
    pub fn hide(&self) {
        self.base.hide();
    }

    /// Ask the manager for a fresh creative for this placement
    ///
    /// Used when the surrounding content changes (a carousel slide, say)
    /// while the slot itself stays on the page.
    pub fn refresh_position(&self) -> Result<(), PositionError> {
        if self.base.is_destroyed() {
            return Err(PositionError::Destroyed(self.id()));
        }
        let manager = self
            .manager
            .upgrade()
            .ok_or(PositionError::ManagerUnavailable)?;
        manager.refresh_shared_ad_position(self.placement());
        Ok(())
    }

    /// Tear the slot down, then unregister it
    ///
    /// Unregistration happens even when the slot was already destroyed, so
    /// the table never keeps a dead entry.
    pub fn destroy(&self, remove_el: bool) {
        self.base.destroy(remove_el);
        if let Some(manager) = self.manager.upgrade() {
            manager.destroy_shared_ad_position(self);
        }
    }
}

impl Destroyable for SharedAdPosition {
    fn destroy(&mut self) {
        SharedAdPosition::destroy(self, false);
    }

    fn is_destroyed(&self) -> bool {
        self.base.is_destroyed()
    }
}

impl Drop for SharedAdPosition {
    fn drop(&mut self) {
        SharedAdPosition::destroy(self, false);
    }
}
