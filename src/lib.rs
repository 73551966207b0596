//! # Islands SSR
//!
//! Server-rendered pages with independently hydrated interactive fragments.
//!
//! The server renders complete HTML for first paint, marks interactive
//! fragments ("islands") with hydration metadata, and inlines a manifest that
//! maps logical module keys to build-specific asset locators. On the client,
//! the hydration runtime reads that manifest back and mounts each island when
//! its trigger policy fires. Live cart and product data flows through a
//! stale-while-revalidate cache with single-flight coalescing.
//!
//! Rendering itself belongs to an external library. This crate owns the
//! protocol around it: escaping, manifests, markers, scheduling, and data
//! caching.

pub mod cache;
pub mod cart;
pub mod catalog;
pub mod document;
pub mod island;
pub mod manifest;
pub mod route;
pub mod runtime;
pub mod search;
pub mod serialize;
pub mod telemetry;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{CacheConfig, CacheLookup, SwrCache};
pub use island::{AllowlistResolver, Island, Markup, ModuleResolver};
pub use manifest::{Manifest, ManifestConfig, ManifestProvider};
pub use runtime::{HydrationRuntime, IslandState, RuntimeOptions};

// ---------------------------------------------------------------------------
// Trigger Policy
// ---------------------------------------------------------------------------

/// When a deferred island stops waiting and begins hydrating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPolicy {
    /// Activate during the boot scan.
    Immediate,
    /// Activate once the host reports idle time.
    Idle,
    /// Activate on first intersection with the viewport.
    #[default]
    Visible,
    /// Activate on the first click, focus, or keydown inside the island.
    Interaction,
}

impl TriggerPolicy {
    /// Wire name used in the `data-hydrate` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerPolicy::Immediate => "immediate",
            TriggerPolicy::Idle => "idle",
            TriggerPolicy::Visible => "visible",
            TriggerPolicy::Interaction => "interaction",
        }
    }

    /// Parse an attribute value the way the client does: anything that is
    /// not a known policy (including a missing attribute) means `Visible`.
    pub fn from_attribute(raw: Option<&str>) -> Self {
        raw.and_then(|value| value.parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for TriggerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerPolicy {
    type Err = IslandsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(TriggerPolicy::Immediate),
            "idle" => Ok(TriggerPolicy::Idle),
            "visible" => Ok(TriggerPolicy::Visible),
            "interaction" => Ok(TriggerPolicy::Interaction),
            other => Err(IslandsError::Config(format!(
                "unknown hydrate policy '{other}' (expected immediate|idle|visible|interaction)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest Mode
// ---------------------------------------------------------------------------

/// Where module locators come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestMode {
    /// Locators point straight at the dev server.
    Dev,
    /// Locators come from the build-time manifest file.
    Prod,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that abort initialization or rendering.
///
/// These are wiring mistakes. Per-island resolution failures never surface
/// here; see [`runtime::ResolutionError`].
#[derive(Debug, Error)]
pub enum IslandsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl IslandsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IslandsError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Boxed error returned by host-supplied callbacks (loaders, sinks, mounts).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failed call across the commerce/CMS SDK boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct UpstreamError {
    /// SDK operation label, e.g. `carts.byId`.
    pub operation: String,
    /// HTTP status reported by the upstream, when there was one.
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}
