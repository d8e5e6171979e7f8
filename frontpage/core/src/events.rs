//! Page Events
//!
//! Typed events carried by the [`EventAggregator`](crate::pubsub::EventAggregator).
//! Page components publish these instead of free-form strings so that
//! subscribers get a checked payload.
//!
//! # Design Philosophy
//!
//! Publishers report what happened; they never know who is listening.
//! A sponsorship logo swap, an analytics beacon and a carousel can all react
//! to the same `AdReady` without the ad slot knowing about any of them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ads::types::{AdPlacement, AdType, PositionId};

/// Identifies the owner of a group of subscriptions
///
/// Every view scope gets one; tearing the scope down removes every handler
/// registered under its context in a single `off` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    /// Create a new unique context ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Events published on the page bus
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PageEvent {
    // ============================================
    // Ad Events
    // ============================================
    /// A creative was delivered to a position and the slot is now visible
    AdReady {
        /// Placement the creative was requested for
        placement: AdPlacement,
        /// Position that received the creative
        position: PositionId,
        /// Type of the delivered creative, if the ad server reported one
        ad_type: Option<AdType>,
    },

    /// The ad server answered but no registered position could take the creative
    AdDropped {
        /// Placement the creative was requested for
        placement: AdPlacement,
        /// Type of the dropped creative
        ad_type: Option<AdType>,
    },

    /// A placement was queued for a new ad-server request
    PlacementRefreshed {
        /// Placement being refreshed
        placement: AdPlacement,
    },

    // ============================================
    // Fragment Events
    // ============================================
    /// A polled content fragment arrived
    FragmentLoaded {
        /// Endpoint the fragment came from
        url: String,
    },

    /// A polled content fragment could not be fetched
    FragmentFailed {
        /// Endpoint that failed
        url: String,
        /// Human-readable failure reason
        error: String,
    },

    // ============================================
    // Lifecycle Events
    // ============================================
    /// A view scope was torn down
    ViewDestroyed {
        /// Context of the destroyed scope
        context: ContextId,
    },

    /// Application-defined event with a free-form payload
    Custom {
        /// Event name
        name: String,
        /// Arbitrary JSON payload
        payload: serde_json::Value,
    },
}

impl PageEvent {
    /// Build a custom event
    pub fn custom(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Custom {
            name: name.into(),
            payload,
        }
    }

    /// The subscription key this event is dispatched under
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AdReady { .. } => EventKind::AdReady,
            Self::AdDropped { .. } => EventKind::AdDropped,
            Self::PlacementRefreshed { .. } => EventKind::PlacementRefreshed,
            Self::FragmentLoaded { .. } => EventKind::FragmentLoaded,
            Self::FragmentFailed { .. } => EventKind::FragmentFailed,
            Self::ViewDestroyed { .. } => EventKind::ViewDestroyed,
            Self::Custom { name, .. } => EventKind::Custom(name.clone()),
        }
    }
}

/// Payload-free event discriminant used as the subscription key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// See [`PageEvent::AdReady`]
    AdReady,
    /// See [`PageEvent::AdDropped`]
    AdDropped,
    /// See [`PageEvent::PlacementRefreshed`]
    PlacementRefreshed,
    /// See [`PageEvent::FragmentLoaded`]
    FragmentLoaded,
    /// See [`PageEvent::FragmentFailed`]
    FragmentFailed,
    /// See [`PageEvent::ViewDestroyed`]
    ViewDestroyed,
    /// A named [`PageEvent::Custom`] event
    Custom(String),
    /// Every event, delivered after the kind-specific handlers
    All,
}

impl EventKind {
    /// Shorthand for a custom event kind
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Display name, used in log fields
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::AdReady => "ad:ready",
            Self::AdDropped => "ad:dropped",
            Self::PlacementRefreshed => "ad:refresh",
            Self::FragmentLoaded => "fragment:loaded",
            Self::FragmentFailed => "fragment:failed",
            Self::ViewDestroyed => "view:destroyed",
            Self::Custom(name) => name,
            Self::All => "all",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
