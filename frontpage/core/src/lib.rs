//! Frontpage Core - Ad Slot Coordination and Page Event Bus
//!
//! This crate is the coordination layer of a news-site page: it sits between
//! page components and the ad server, and provides the event bus those
//! components use to talk to each other. It has no rendering of its own;
//! slots are reached through the [`SlotElement`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Page Components                           │
//! │   ┌───────────┐  ┌──────────────┐  ┌──────────┐  ┌────────────┐  │
//! │   │ Carousel  │  │ Sponsor logo │  │ Live box │  │  ad-slots  │  │
//! │   └─────┬─────┘  └──────┬───────┘  └────┬─────┘  └─────┬──────┘  │
//! │         │  PageEvent    │                │ fragments    │ shared  │
//! │         └───────────────┴────────┬───────┘              │positions│
//! └──────────────────────────────────┼──────────────────────┼────────┘
//!                                    │                      │
//! ┌──────────────────────────────────┼──────────────────────┼────────┐
//! │                          FRONTPAGE CORE                  │        │
//! │   ┌──────────────────────────────┴───┐   ┌──────────────┴─────┐  │
//! │   │          EventAggregator          │◄──│     AdManager      │  │
//! │   │  (typed, injectable, isolated)    │   │ placement registry │  │
//! │   └──────────────────────────────────┘   │ batching, matching │  │
//! │                                           └─────────┬──────────┘  │
//! │   ViewScope: context + timers + cancellation        │ AdServer    │
//! │   Page: site config → module registry → lifecycle   ▼             │
//! └─────────────────────────────────────────────── ad server (HTTP) ──┘
//! ```
//!
//! # Key Types
//!
//! - [`SharedAdPosition`]: an ad slot sharing one request per placement
//! - [`AdManager`]: registration table, request batching, creative dispatch
//! - [`EventAggregator`]: publish/subscribe bus with per-handler isolation
//! - [`ViewScope`]: subscriptions, timers and cancellation tied to a view
//! - [`Page`]: the modules one app boots from the [`SiteConfig`]
//!
//! # Quick Start
//!
//! ```ignore
//! use frontpage_core::{
//!     AdManager, EventAggregator, EventKind, HeadlessSlot, PositionOptions,
//!     SharedAdPosition, ad_server_from_config, load_config, pubsub::handler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let events = EventAggregator::new();
//!     let server = ad_server_from_config(&config.ads);
//!     let ads = AdManager::with_config(server, events.clone(), &config.ads);
//!
//!     events.on(EventKind::AdReady, handler(|event| {
//!         println!("{event:?}");
//!         Ok(())
//!     }), None);
//!
//!     let _logo = SharedAdPosition::new(
//!         PositionOptions::new("poster_front").with_ad_type("logo"),
//!         HeadlessSlot::new("#poster-logo"),
//!         &ads,
//!     )?;
//!
//!     for outcome in ads.flush().await {
//!         println!("{outcome:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`ads`]: positions, the placement registry, the ad-server boundary and the manager
//! - [`events`]: typed page events and subscription keys
//! - [`pubsub`]: the event aggregator
//! - [`slot`]: the slot element abstraction and its headless implementation
//! - [`view`]: lifecycle capabilities and view scopes
//! - [`page`]: page context, module registry and page bootstrapping
//! - [`fragments`]: recurring HTML/JSON/JSONP fragment fetch
//! - [`config`]: TOML settings and the JSON site configuration
//! - [`logging`]: tracing subscriber setup

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ads;
pub mod config;
pub mod events;
pub mod fragments;
pub mod logging;
pub mod page;
pub mod pubsub;
pub mod slot;
pub mod view;

// Ad exports
pub use ads::{
    ad_server_from_config, AdManager, AdManagerHandle, AdPlacement, AdPosition, AdRequest,
    AdServer, AdServerError, AdSize, AdType, AdTypes, Creative, DispatchOutcome, HttpAdServer,
    MatchKind, NoAdServer, PositionError, PositionId, PositionOptions, PositionState,
    RegistrySummary, SharedAdPosition,
};

// Event bus exports
pub use events::{ContextId, EventKind, PageEvent};
pub use pubsub::{DispatchReport, EventAggregator, EventMap, Handler, SubscriptionId};

// Slot exports
pub use slot::{HeadlessSlot, SlotElement, SlotSnapshot};

// View and page exports
pub use page::{AdSlotsModule, ModuleFactory, ModuleRegistry, Page, PageContext, PageModule};
pub use view::{Destroyable, Lifecycle, Renderable, ViewScope};

// Fragment exports
pub use fragments::{
    recurring_fetch_html, FetchError, FetchRequest, Fragment, FragmentFormat, FragmentSource,
    HttpFragmentSource,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, AdsConfig, AppConfig, ConfigError,
    ConfigOverrides, ConfigSource, FragmentsConfig, FrontpageConfig, FrontpageToml, ModuleSpec,
    SiteConfig,
};
pub use logging::init_tracing;
