//! Ad Slot Coordination
//!
//! Several slots on a page often belong to the same ad-server placement. The
//! modules here make them share a single request:
//!
//! - [`types`]: placements, sizes, ad types, creatives, position options
//! - [`position`]: one slot and its show/hide/destroy lifecycle
//! - [`shared`]: a position registered with the manager
//! - [`registry`]: the placement → positions table and the matching rule
//! - [`server`]: the ad-server boundary (trait + HTTP implementation)
//! - [`manager`]: batching, dispatch and cancellation

pub mod manager;
pub mod position;
pub mod registry;
pub mod server;
pub mod shared;
pub mod types;

pub use manager::{AdManager, AdManagerHandle, DispatchOutcome};
pub use position::{AdPosition, PositionError, PositionState};
pub use registry::{MatchKind, RegistrySummary};
pub use server::{ad_server_from_config, AdRequest, AdServer, AdServerError, HttpAdServer, NoAdServer};
pub use shared::SharedAdPosition;
pub use types::{
    AdPlacement, AdSize, AdType, AdTypes, Creative, OneOrMany, PositionId, PositionOptions,
};
