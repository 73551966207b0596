//! Server-side island markers.
//!
//! An [`Island`] wraps already-rendered fallback markup with the attributes
//! the client runtime scans for. Whether a fragment becomes interactive at
//! all is decided by a [`ModuleResolver`]: keys it does not know stay
//! SSR-only and render as their bare fallback.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::serialize::{escape_html_attribute, escape_html_text, serialize_for_attribute};
use crate::{IslandsError, TriggerPolicy};

/// Attribute naming the module key of a mount point.
pub const ISLAND_MODULE_ATTR: &str = "data-island-module";
/// Attribute carrying the trigger policy.
pub const HYDRATE_ATTR: &str = "data-hydrate";
/// Attribute carrying the escaped JSON props.
pub const PROPS_ATTR: &str = "data-props";

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

/// A fragment of trusted HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Markup(String);

impl Markup {
    /// Wrap HTML that is already safe to emit.
    pub fn raw(html: impl Into<String>) -> Self {
        Markup(html.into())
    }

    /// Escape plain text into markup.
    pub fn text(text: &str) -> Self {
        Markup(escape_html_text(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Markup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------------

/// Decides which island keys hydrate, and under which module key.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, island_key: &str) -> Option<String>;
}

impl<F> ModuleResolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, island_key: &str) -> Option<String> {
        self(island_key)
    }
}

/// Fixed `island key -> module key` allowlist.
#[derive(Debug, Clone, Default)]
pub struct AllowlistResolver {
    entries: HashMap<String, String>,
}

impl AllowlistResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, island_key: impl Into<String>, module_key: impl Into<String>) -> Self {
        self.entries.insert(island_key.into(), module_key.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AllowlistResolver {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl ModuleResolver for AllowlistResolver {
    fn resolve(&self, island_key: &str) -> Option<String> {
        self.entries.get(island_key).cloned()
    }
}

// ---------------------------------------------------------------------------
// Island
// ---------------------------------------------------------------------------

/// An interactive fragment awaiting hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct Island {
    pub island_key: String,
    pub hydrate: TriggerPolicy,
    pub props: Value,
    /// Server-rendered content shown until (and unless) the island mounts.
    pub fallback: Markup,
}

impl Island {
    pub fn new(island_key: impl Into<String>) -> Self {
        Self {
            island_key: island_key.into(),
            hydrate: TriggerPolicy::default(),
            props: Value::Null,
            fallback: Markup::default(),
        }
    }

    pub fn hydrate(mut self, policy: TriggerPolicy) -> Self {
        self.hydrate = policy;
        self
    }

    pub fn props<P: Serialize>(mut self, props: &P) -> Result<Self, IslandsError> {
        self.props = serde_json::to_value(props)?;
        Ok(self)
    }

    pub fn fallback(mut self, fallback: Markup) -> Self {
        self.fallback = fallback;
        self
    }

    /// Render the marker, or the bare fallback if the key is not hydratable.
    ///
    /// A missing resolver is a wiring bug and fails loudly.
    pub fn render(&self, resolver: Option<&dyn ModuleResolver>) -> Result<Markup, IslandsError> {
        let resolver = resolver.ok_or_else(|| {
            IslandsError::Config(format!(
                "Island '{}' requires a module resolver",
                self.island_key
            ))
        })?;

        let Some(module_key) = resolver.resolve(&self.island_key).filter(|k| !k.is_empty())
        else {
            return Ok(self.fallback.clone());
        };

        let props = serialize_for_attribute(&self.props)?;
        Ok(Markup(format!(
            r#"<div {ISLAND_MODULE_ATTR}="{}" {HYDRATE_ATTR}="{}" {PROPS_ATTR}="{}">{}</div>"#,
            escape_html_attribute(&module_key),
            self.hydrate,
            props,
            self.fallback
        )))
    }
}
