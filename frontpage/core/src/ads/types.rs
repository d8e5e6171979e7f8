//! Ad Slot Types
//!
//! Value types shared by positions, the manager and the ad-server boundary.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::position::PositionError;

/// Logical ad-server slot group shared by one or more positions
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdPlacement(String);

impl AdPlacement {
    /// Create a placement key
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is empty (or only whitespace)
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AdPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AdPlacement {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Classification tag of a creative (e.g. `sponsor_logo`, `takeover`)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdType(String);

impl AdType {
    /// Create an ad type tag
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AdType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Either a single value or a list, as accepted in position options
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single value
    One(T),
    /// A list of values
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Flatten into a vector
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

/// Normalised set of ad types a position accepts
///
/// Blank entries are discarded; duplicates collapse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdTypes(BTreeSet<AdType>);

impl AdTypes {
    /// Normalise the raw option value
    #[must_use]
    pub fn normalize(raw: Option<OneOrMany<String>>) -> Self {
        let set = raw
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(AdType::new)
            .collect();
        Self(set)
    }

    /// Whether `ad_type` is in the set
    #[must_use]
    pub fn contains(&self, ad_type: &AdType) -> bool {
        self.0.contains(ad_type)
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &AdType> {
        self.0.iter()
    }
}

impl<T: Into<AdType>> FromIterator<T> for AdTypes {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Allowed creative size for a slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AdSize {
    /// Fixed pixel dimensions
    Fixed {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// Creative adapts to the container width
    Fluid,
}

impl AdSize {
    /// Fixed-size shorthand
    #[must_use]
    pub const fn fixed(width: u32, height: u32) -> Self {
        Self::Fixed { width, height }
    }
}

impl FromStr for AdSize {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("fluid") {
            return Ok(Self::Fluid);
        }
        let invalid = || PositionError::InvalidSize(s.to_string());
        let (w, h) = trimmed
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self::Fixed { width, height })
    }
}

impl TryFrom<String> for AdSize {
    type Error = PositionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AdSize> for String {
    fn from(size: AdSize) -> Self {
        size.to_string()
    }
}

impl fmt::Display for AdSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed { width, height } => write!(f, "{width}x{height}"),
            Self::Fluid => f.write_str("fluid"),
        }
    }
}

/// Unique identifier for a position instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(u64);

impl PositionId {
    /// Create a new unique position ID
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

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos-{}", self.0)
    }
}

/// A creative returned by the ad server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creative {
    /// Creative classification, used to pick the receiving position
    #[serde(default)]
    pub ad_type: Option<AdType>,
    /// Served size, if reported
    #[serde(default)]
    pub size: Option<AdSize>,
    /// Markup to inject into the slot
    #[serde(default)]
    pub markup: String,
    /// Click-through URL
    #[serde(default)]
    pub click_url: Option<String>,
}

impl Creative {
    /// Creative with markup and an optional type
    pub fn new(markup: impl Into<String>, ad_type: Option<AdType>) -> Self {
        Self {
            ad_type,
            size: None,
            markup: markup.into(),
            click_url: None,
        }
    }
}

/// Construction options for a position
///
/// Mirrors the option bag page components pass when they create a slot, so it
/// deserialises straight from JSON module configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionOptions {
    /// Placement key (required)
    #[serde(default)]
    pub ad_placement: String,
    /// Allowed sizes, in preference order
    #[serde(default)]
    pub ad_sizes: Vec<String>,
    /// Accepted creative type(s), a string or a list
    #[serde(default)]
    pub ad_type: Option<OneOrMany<String>>,
    /// Fallback receiver for unmatched creatives
    #[serde(default)]
    pub default_position: bool,
}

impl PositionOptions {
    /// Options for a placement with no sizes or types yet
    pub fn new(placement: impl Into<String>) -> Self {
        Self {
            ad_placement: placement.into(),
            ..Default::default()
        }
    }

    /// Add an allowed size
    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.ad_sizes.push(size.into());
        self
    }

    /// Set a single accepted ad type
    #[must_use]
    pub fn with_ad_type(mut self, ad_type: impl Into<String>) -> Self {
        self.ad_type = Some(OneOrMany::One(ad_type.into()));
        self
    }

    /// Set several accepted ad types
    #[must_use]
    pub fn with_ad_types<I, S>(mut self, ad_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ad_type = Some(OneOrMany::Many(
            ad_types.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Mark as the placement's default position
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.default_position = true;
        self
    }
}
