//! Page Bootstrapping
//!
//! A [`Page`] is the set of modules one app boots. The site configuration
//! names the modules (`init_modules`); the [`ModuleRegistry`] knows how to
//! build each one; the [`PageContext`] carries the shared services they
//! initialise against.
//!
//! # Boot Sequence
//!
//! ```text
//! AppConfig.init_modules ──► ModuleRegistry::build ──► Lifecycle::initialize ──► Renderable::render
//!        (in order)           unknown name: skipped     failure: destroyed,        failure: logged,
//!                                                       skipped                    module kept
//! ```
//!
//! A module that fails never stops the modules after it. Teardown runs in
//! reverse boot order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context as _;

use crate::ads::{ad_server_from_config, AdManager, OneOrMany, PositionOptions, SharedAdPosition};
use crate::config::{AppConfig, FragmentsConfig, FrontpageConfig, ModuleSpec, SiteConfig};
use crate::fragments::{FragmentSource, HttpFragmentSource};
use crate::pubsub::EventAggregator;
use crate::slot::HeadlessSlot;
use crate::view::{Destroyable, Lifecycle, Renderable, ViewScope};

// =============================================================================
// Page Context
// =============================================================================

/// Shared services handed to every module
#[derive(Clone)]
pub struct PageContext {
    events: EventAggregator,
    ads: AdManager,
    fragments: FragmentsConfig,
    fragment_source: Arc<dyn FragmentSource>,
    scope: Arc<ViewScope>,
}

impl PageContext {
    /// Build a context around an existing ad manager
    ///
    /// The manager's bus becomes the page bus. The manager may outlive the
    /// page; requests still in flight at teardown are cancelled through the
    /// tokens of the positions the page destroys.
    pub fn new(
        ads: AdManager,
        fragment_source: Arc<dyn FragmentSource>,
        fragments: FragmentsConfig,
    ) -> Self {
        let scope = ViewScope::new(ads.events().clone());
        Self::with_scope(ads, scope, fragment_source, fragments)
    }

    /// Build HTTP-backed services from the loaded configuration
    ///
    /// The ad manager belongs to the page and shuts down with the page
    /// scope. Without an ad server endpoint the page boots with ads disabled.
    pub fn from_config(config: &FrontpageConfig) -> anyhow::Result<Self> {
        let fragment_source = HttpFragmentSource::from_config(&config.fragments)
            .context("Failed to create fragment client")?;

        let events = EventAggregator::new();
        let scope = ViewScope::new(events.clone());
        let ads = AdManager::with_shutdown_token(
            ad_server_from_config(&config.ads),
            events,
            &config.ads,
            scope.cancellation_token().child_token(),
        );

        Ok(Self::with_scope(
            ads,
            scope,
            Arc::new(fragment_source),
            config.fragments.clone(),
        ))
    }

    fn with_scope(
        ads: AdManager,
        scope: ViewScope,
        fragment_source: Arc<dyn FragmentSource>,
        fragments: FragmentsConfig,
    ) -> Self {
        Self {
            events: ads.events().clone(),
            ads,
            fragments,
            fragment_source,
            scope: Arc::new(scope),
        }
    }

    /// Page bus
    #[must_use]
    pub fn events(&self) -> &EventAggregator {
        &self.events
    }

    /// Ad manager
    #[must_use]
    pub fn ads(&self) -> &AdManager {
        &self.ads
    }

    /// Fragment polling settings
    #[must_use]
    pub fn fragments_config(&self) -> &FragmentsConfig {
        &self.fragments
    }

    /// Fragment source for polling modules
    #[must_use]
    pub fn fragment_source(&self) -> Arc<dyn FragmentSource> {
        Arc::clone(&self.fragment_source)
    }

    /// The page-wide scope
    #[must_use]
    pub fn scope(&self) -> &ViewScope {
        &self.scope
    }

    /// A scope for one module, cancelled when the page goes away
    #[must_use]
    pub fn child_scope(&self) -> ViewScope {
        self.scope.child()
    }
}

impl fmt::Debug for PageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageContext")
            .field("events", &self.events)
            .field("ads", &self.ads)
            .field("fragments", &self.fragments)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Modules
// =============================================================================

/// A component that a page boots from configuration
pub trait PageModule: Lifecycle + Renderable + Destroyable + Send {
    /// Name used in logs
    fn name(&self) -> &str;
}

/// Builds a module from its `init_modules` entry
pub type ModuleFactory =
    Arc<dyn Fn(&ModuleSpec) -> anyhow::Result<Box<dyn PageModule>> + Send + Sync>;

/// Name → factory table
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the modules this crate ships (`ad-slots`)
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(AdSlotsModule::NAME, |spec| {
            Ok(Box::new(AdSlotsModule::from_spec(spec)?) as Box<dyn PageModule>)
        });
        registry
    }

    /// Register `factory` under `name`, returning the factory it replaced
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Option<ModuleFactory>
    where
        F: Fn(&ModuleSpec) -> anyhow::Result<Box<dyn PageModule>> + Send + Sync + 'static,
    {
        let name = name.into();
        let replaced = self.factories.insert(name.clone(), Arc::new(factory));
        if replaced.is_some() {
            tracing::warn!(module = %name, "Module factory replaced");
        }
        replaced
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the module `spec` names; `None` when the name is unknown
    pub fn build(&self, spec: &ModuleSpec) -> Option<anyhow::Result<Box<dyn PageModule>>> {
        self.factories.get(&spec.name).map(|factory| factory(spec))
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

// =============================================================================
// Page
// =============================================================================

/// The booted modules of one app
pub struct Page {
    app_name: String,
    ctx: PageContext,
    modules: Vec<Box<dyn PageModule>>,
    destroyed: bool,
}

impl Page {
    /// Build, initialise and render every module `app` lists
    pub fn boot(app: &AppConfig, registry: &ModuleRegistry, ctx: PageContext) -> Self {
        let mut modules: Vec<Box<dyn PageModule>> = Vec::with_capacity(app.init_modules().len());

        for spec in app.init_modules() {
            let Some(built) = registry.build(spec) else {
                tracing::warn!(app = %app.name(), module = %spec.name, "Unknown module, skipping");
                continue;
            };

            let mut module = match built {
                Ok(module) => module,
                Err(e) => {
                    tracing::error!(app = %app.name(), module = %spec.name, error = %e, "Module construction failed");
                    continue;
                }
            };

            if let Err(e) = module.initialize(&ctx) {
                tracing::error!(app = %app.name(), module = %spec.name, error = %e, "Module initialisation failed");
                module.destroy();
                continue;
            }

            if let Err(e) = module.render() {
                tracing::error!(app = %app.name(), module = %spec.name, error = %e, "Module render failed");
            }

            tracing::debug!(app = %app.name(), module = %module.name(), "Module booted");
            modules.push(module);
        }

        tracing::info!(
            app = %app.name(),
            booted = modules.len(),
            configured = app.init_modules().len(),
            "Page booted"
        );

        Self {
            app_name: app.name().to_string(),
            ctx,
            modules,
            destroyed: false,
        }
    }

    /// Route `path` through `site` and boot the matching app
    pub fn boot_path(
        site: &SiteConfig,
        path: &str,
        registry: &ModuleRegistry,
        ctx: PageContext,
    ) -> Option<Self> {
        site.route(path).map(|app| Self::boot(app, registry, ctx))
    }

    /// Name of the booted app
    #[must_use]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Shared services
    #[must_use]
    pub fn context(&self) -> &PageContext {
        &self.ctx
    }

    /// Names of the modules that booted, in boot order
    #[must_use]
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Re-render every module; returns how many failed
    pub fn render(&mut self) -> usize {
        let mut failed = 0;
        for module in &mut self.modules {
            if let Err(e) = module.render() {
                tracing::error!(app = %self.app_name, module = %module.name(), error = %e, "Module render failed");
                failed += 1;
            }
        }
        failed
    }
}

impl Destroyable for Page {
    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        while let Some(mut module) = self.modules.pop() {
            tracing::debug!(app = %self.app_name, module = %module.name(), "Destroying module");
            module.destroy();
        }
        self.ctx.scope().destroy();

        tracing::info!(app = %self.app_name, "Page destroyed");
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        Destroyable::destroy(self);
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("app_name", &self.app_name)
            .field("modules", &self.module_names())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

// =============================================================================
// Built-in: ad-slots
// =============================================================================

/// Registers one shared ad position per configured option bag
///
/// ```json
/// { "name": "ad-slots", "selector": "#sidebar",
///   "options": [{ "adPlacement": "poster_front", "adType": "logo" }] }
/// ```
///
/// `options` may be a single object or a list. Slots are headless and bound
/// to the module selector.
#[derive(Debug)]
pub struct AdSlotsModule {
    selector: String,
    options: Vec<PositionOptions>,
    positions: Vec<SharedAdPosition>,
    destroyed: bool,
}

impl AdSlotsModule {
    /// Registry name
    pub const NAME: &'static str = "ad-slots";

    /// Parse the module's options
    pub fn from_spec(spec: &ModuleSpec) -> anyhow::Result<Self> {
        let options = match &spec.options {
            Some(value) => serde_json::from_value::<OneOrMany<PositionOptions>>(value.clone())
                .context("Invalid ad-slots options")?
                .into_vec(),
            None => Vec::new(),
        };
        Ok(Self {
            selector: spec.selector.clone().unwrap_or_else(|| "body".to_string()),
            options,
            positions: Vec::new(),
            destroyed: false,
        })
    }

    /// Positions registered so far
    #[must_use]
    pub fn positions(&self) -> &[SharedAdPosition] {
        &self.positions
    }
}

impl Lifecycle for AdSlotsModule {
    fn initialize(&mut self, ctx: &PageContext) -> anyhow::Result<()> {
        for options in &self.options {
            let placement = options.ad_placement.clone();
            let position =
                SharedAdPosition::new(options.clone(), HeadlessSlot::new(&self.selector), ctx.ads())
                    .with_context(|| format!("Failed to register ad slot for '{placement}'"))?;
            self.positions.push(position);
        }
        Ok(())
    }
}

impl Renderable for AdSlotsModule {}

impl Destroyable for AdSlotsModule {
    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        for position in self.positions.drain(..) {
            position.destroy(true);
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl PageModule for AdSlotsModule {
    fn name(&self) -> &str {
        Self::NAME
    }
}
