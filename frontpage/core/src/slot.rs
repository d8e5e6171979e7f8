//! Slot Elements
//!
//! The element an ad position is bound to. In a browser this is a DOM node;
//! here it is anything that can be shown, hidden, filled with markup and
//! removed.
//!
//! [`HeadlessSlot`] keeps all of that in memory. It backs headless page runs
//! and lets tests observe what a position did to its element.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::ads::types::Creative;

/// Rendering surface for a single ad slot
pub trait SlotElement: Send + Sync {
    /// Selector or other identifier of the element, for logs
    fn selector(&self) -> &str;

    /// Make the element visible
    fn show(&self);

    /// Hide the element
    fn hide(&self);

    /// Replace the element content with the creative
    fn render(&self, creative: &Creative);

    /// Detach the element from the page
    fn remove(&self);
}

/// Observable state of a [`HeadlessSlot`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotSnapshot {
    /// Whether the element is currently visible
    pub visible: bool,
    /// Whether the element has been removed
    pub removed: bool,
    /// Markup of the last rendered creative
    pub markup: Option<String>,
    /// Number of show calls that reached the element
    pub show_calls: u32,
    /// Number of render calls that reached the element
    pub render_calls: u32,
}

/// In-memory slot element
///
/// Cloning shares the underlying state, so a test can keep one clone and
/// give the other to a position.
#[derive(Clone, Debug)]
pub struct HeadlessSlot {
    selector: String,
    state: Arc<Mutex<SlotSnapshot>>,
}

impl HeadlessSlot {
    /// Create a hidden, empty slot
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            state: Arc::new(Mutex::new(SlotSnapshot::default())),
        }
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> SlotSnapshot {
        self.state.lock().clone()
    }
}

impl SlotElement for HeadlessSlot {
    fn selector(&self) -> &str {
        &self.selector
    }

    fn show(&self) {
        let mut state = self.state.lock();
        state.visible = true;
        state.show_calls += 1;
    }

    fn hide(&self) {
        self.state.lock().visible = false;
    }

    fn render(&self, creative: &Creative) {
        let mut state = self.state.lock();
        state.markup = Some(creative.markup.clone());
        state.render_calls += 1;
    }

    fn remove(&self) {
        let mut state = self.state.lock();
        state.visible = false;
        state.removed = true;
    }
}
