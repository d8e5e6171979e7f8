//! Site Configuration
//!
//! JSON document that maps URL patterns to an app and the modules that app
//! boots:
//!
//! ```json
//! {
//!   "apps": [
//!     {
//!       "appName": "article",
//!       "urls": ["^/\\d{4}/\\d{2}/\\d{2}/"],
//!       "init_modules": [{ "name": "ad-slots", "selector": ".ad" }],
//!       "css": ["article.css"]
//!     }
//!   ]
//! }
//! ```
//!
//! An app with a missing `appName` or an invalid pattern is logged and
//! skipped; only a document that is not valid JSON fails the load.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// One entry of an app's `init_modules` list
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Registered module name
    pub name: String,

    /// Element the module binds to
    #[serde(default)]
    pub selector: Option<String>,

    /// Free-form module options
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

impl ModuleSpec {
    /// Spec with just a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: None,
            options: None,
        }
    }

    /// Bind to a selector
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Attach options
    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct SiteDocument {
    #[serde(default)]
    apps: Vec<AppEntry>,
}

#[derive(Debug, Deserialize)]
struct AppEntry {
    #[serde(rename = "appName", default)]
    app_name: Option<String>,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    init_modules: Vec<ModuleSpec>,
    #[serde(default)]
    css: Vec<String>,
}

/// A validated app entry
#[derive(Clone, Debug)]
pub struct AppConfig {
    name: String,
    patterns: Vec<Regex>,
    init_modules: Vec<ModuleSpec>,
    css: Vec<String>,
}

impl AppConfig {
    /// App name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Modules to boot, in order
    #[must_use]
    pub fn init_modules(&self) -> &[ModuleSpec] {
        &self.init_modules
    }

    /// CSS bundles the app needs
    #[must_use]
    pub fn css(&self) -> &[String] {
        &self.css
    }

    /// Whether any of the app's patterns matches `path`
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }

    fn from_entry(index: usize, entry: AppEntry) -> Option<Self> {
        let Some(name) = entry.app_name.filter(|n| !n.trim().is_empty()) else {
            tracing::error!(index, "Site config app has no appName, skipping");
            return None;
        };

        let mut patterns = Vec::with_capacity(entry.urls.len());
        for url in &entry.urls {
            match Regex::new(url) {
                Ok(re) => patterns.push(re),
                Err(e) => {
                    tracing::error!(app = %name, pattern = %url, error = %e, "Invalid URL pattern, skipping app");
                    return None;
                }
            }
        }
        if patterns.is_empty() {
            tracing::warn!(app = %name, "App has no URL patterns and will never be routed to");
        }

        let init_modules = entry
            .init_modules
            .into_iter()
            .filter(|m| {
                let keep = !m.name.trim().is_empty();
                if !keep {
                    tracing::warn!(app = %name, "Skipping init module with empty name");
                }
                keep
            })
            .collect();

        Some(Self {
            name,
            patterns,
            init_modules,
            css: entry.css,
        })
    }
}

/// All apps of a site, in document order
#[derive(Clone, Debug, Default)]
pub struct SiteConfig {
    apps: Vec<AppConfig>,
}

impl SiteConfig {
    /// Parse a JSON site configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let document: SiteDocument = serde_json::from_str(json)?;
        let apps = document
            .apps
            .into_iter()
            .enumerate()
            .filter_map(|(index, entry)| AppConfig::from_entry(index, entry))
            .collect::<Vec<_>>();

        tracing::debug!(apps = apps.len(), "Parsed site configuration");
        Ok(Self { apps })
    }

    /// Read and parse a JSON site configuration file
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), apps = config.len(), "Loaded site configuration");
        Ok(config)
    }

    /// First app whose patterns match `path`
    #[must_use]
    pub fn route(&self, path: &str) -> Option<&AppConfig> {
        let app = self.apps.iter().find(|app| app.matches(path));
        match app {
            Some(app) => tracing::debug!(path, app = %app.name, "Routed path"),
            None => tracing::debug!(path, "No app matches path"),
        }
        app
    }

    /// App by name
    #[must_use]
    pub fn app(&self, name: &str) -> Option<&AppConfig> {
        self.apps.iter().find(|app| app.name == name)
    }

    /// All valid apps
    #[must_use]
    pub fn apps(&self) -> &[AppConfig] {
        &self.apps
    }

    /// Number of valid apps
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// Whether no app survived validation
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
