//! Placement Registry - Which Slots Share Which Request
//!
//! The registration table behind the [`AdManager`](super::manager::AdManager).
//! Every placement maps to the positions currently waiting on it:
//!
//! ```text
//!                      PlacementRegistry
//!                     ┌──────────────────────────────────────────────┐
//!                     │ HashMap<AdPlacement, Vec<Arc<PositionInner>>> │
//!                     │   - wrapped in Arc<RwLock<>>                 │
//!                     └───────────────┬──────────────────────────────┘
//!                                     │
//!              ┌──────────────────────┼──────────────────────┐
//!              │                      │                      │
//!       ┌──────▼──────┐       ┌───────▼──────┐       ┌───────▼──────┐
//!       │poster_front │       │ high_impact  │       │  sponsor     │
//!       │ pos-1 pos-2 │       │   pos-3      │       │ pos-4 (def)  │
//!       └─────────────┘       └──────────────┘       └──────────────┘
//! ```
//!
//! Only the manager mutates the table. Positions keep a weak handle to the
//! manager and never see the table itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::position::{PositionError, PositionInner};
use super::types::{AdPlacement, AdSize, AdType, PositionId};
use super::server::AdRequest;

/// Why a position was chosen for a creative
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// The creative's type is in the position's `ad_type` set
    AdType,
    /// No type matched; the placement's default position took it
    DefaultPosition,
}

/// Pick the receiver for a creative of type `ad_type`
///
/// First position (in registration order) whose type set contains the
/// creative's type; otherwise the default position; otherwise nobody.
/// Destroyed positions and `skip` are never chosen.
pub(crate) fn select_position<'a>(
    positions: &'a [Arc<PositionInner>],
    ad_type: Option<&AdType>,
    skip: Option<PositionId>,
) -> Option<(&'a Arc<PositionInner>, MatchKind)> {
    let live = || {
        positions
            .iter()
            .filter(move |p| !p.is_destroyed() && Some(p.id()) != skip)
    };

    if let Some(ad_type) = ad_type {
        if let Some(pos) = live().find(|p| p.ad_types().contains(ad_type)) {
            return Some((pos, MatchKind::AdType));
        }
    }
    live()
        .find(|p| p.is_default())
        .map(|pos| (pos, MatchKind::DefaultPosition))
}

/// Summary of the registration table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    /// Total number of registered positions
    pub total_positions: usize,
    /// Count by placement name
    pub by_placement: HashMap<String, usize>,
    /// Placements that have a default position
    pub with_default: Vec<String>,
}

/// Registration table keyed by placement
#[derive(Clone, Default)]
pub(crate) struct PlacementRegistry {
    inner: Arc<RwLock<HashMap<AdPlacement, Vec<Arc<PositionInner>>>>>,
}

impl PlacementRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a position under its placement
    ///
    /// Returns `Ok(false)` when this exact instance is already registered.
    /// A second default position for the same placement is rejected.
    pub(crate) fn register(&self, position: &Arc<PositionInner>) -> Result<bool, PositionError> {
        let placement = position.placement().clone();
        let mut inner = self.inner.write();
        let entries = inner.entry(placement.clone()).or_default();

        if entries.iter().any(|p| Arc::ptr_eq(p, position)) {
            tracing::debug!(
                position_id = %position.id(),
                placement = %placement,
                "Position already registered"
            );
            return Ok(false);
        }

        if position.is_default() && entries.iter().any(|p| p.is_default()) {
            tracing::error!(
                position_id = %position.id(),
                placement = %placement,
                "Rejected second default position"
            );
            return Err(PositionError::DuplicateDefault { placement });
        }

        entries.push(Arc::clone(position));
        tracing::info!(
            position_id = %position.id(),
            placement = %placement,
            default_position = position.is_default(),
            "Ad position registered"
        );
        Ok(true)
    }

    /// Remove a position; returns true if it was registered
    pub(crate) fn unregister(&self, placement: &AdPlacement, id: PositionId) -> bool {
        let mut inner = self.inner.write();
        let Some(entries) = inner.get_mut(placement) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|p| p.id() != id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            inner.remove(placement);
        }
        if removed {
            tracing::info!(
                position_id = %id,
                placement = %placement,
                "Ad position unregistered"
            );
        }
        removed
    }

    /// Number of positions registered for `placement`
    pub(crate) fn count(&self, placement: &AdPlacement) -> usize {
        self.inner.read().get(placement).map_or(0, Vec::len)
    }

    /// Total number of registered positions
    pub(crate) fn total(&self) -> usize {
        self.inner.read().values().map(Vec::len).sum()
    }

    /// Whether the position with `id` is registered anywhere
    pub(crate) fn contains(&self, id: PositionId) -> bool {
        self.inner
            .read()
            .values()
            .flatten()
            .any(|p| p.id() == id)
    }

    /// Placements with at least one registration, sorted
    pub(crate) fn placements(&self) -> Vec<AdPlacement> {
        let mut placements: Vec<_> = self.inner.read().keys().cloned().collect();
        placements.sort();
        placements
    }

    /// Build the ad-server request for a placement
    ///
    /// Sizes and types are the ordered, de-duplicated union over all
    /// registered positions. `None` when nothing is registered.
    pub(crate) fn request_for(&self, placement: &AdPlacement) -> Option<AdRequest> {
        let inner = self.inner.read();
        let entries = inner.get(placement).filter(|e| !e.is_empty())?;

        let mut sizes: Vec<AdSize> = Vec::new();
        let mut ad_types: Vec<AdType> = Vec::new();
        for position in entries {
            for size in position.sizes() {
                if !sizes.contains(size) {
                    sizes.push(*size);
                }
            }
            for ad_type in position.ad_types().iter() {
                if !ad_types.contains(ad_type) {
                    ad_types.push(ad_type.clone());
                }
            }
        }

        Some(AdRequest {
            placement: placement.clone(),
            sizes,
            ad_types,
        })
    }

    /// Choose the receiver for a creative under the read lock
    ///
    /// The returned `Arc` is delivered to after the lock is released.
    pub(crate) fn select(
        &self,
        placement: &AdPlacement,
        ad_type: Option<&AdType>,
        skip: Option<PositionId>,
    ) -> Option<(Arc<PositionInner>, MatchKind)> {
        let inner = self.inner.read();
        let entries = inner.get(placement)?;
        select_position(entries, ad_type, skip).map(|(pos, kind)| (Arc::clone(pos), kind))
    }

    /// Cancellation tokens of the positions waiting on `placement`
    pub(crate) fn cancellation_tokens(&self, placement: &AdPlacement) -> Vec<CancellationToken> {
        self.inner
            .read()
            .get(placement)
            .map(|entries| {
                entries
                    .iter()
                    .map(|p| p.cancellation_token().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn summary(&self) -> RegistrySummary {
        let inner = self.inner.read();
        let mut by_placement = HashMap::new();
        let mut with_default = Vec::new();

        for (placement, entries) in inner.iter() {
            by_placement.insert(placement.to_string(), entries.len());
            if entries.iter().any(|p| p.is_default()) {
                with_default.push(placement.to_string());
            }
        }
        with_default.sort();

        RegistrySummary {
            total_positions: inner.values().map(Vec::len).sum(),
            by_placement,
            with_default,
        }
    }
}

impl fmt::Debug for PlacementRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PlacementRegistry")
            .field("placement_count", &inner.len())
            .field("placements", &inner.keys().collect::<Vec<_>>())
            .finish()
    }
}
