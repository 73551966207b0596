//! Module-key to asset-locator mapping shared by server and client.
//!
//! The server builds a [`ManifestProvider`] once at startup. It owns the
//! parsed [`Manifest`], the escaped JSON inlined into every page, and the
//! optional integrity digest of that JSON. Nothing here changes after
//! construction.

pub mod generate;
pub mod integrity;

use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::serialize::escape_for_inline_script;
use crate::{IslandsError, ManifestMode};

/// Manifest key holding the runtime bootstrap locator.
pub const RUNTIME_KEY: &str = "islands-runtime";

/// Locator used when a manifest does not name the runtime.
pub const DEFAULT_RUNTIME_SRC: &str = "/assets/islands-runtime.js";

/// Where the production build writes the islands manifest.
pub const DEFAULT_MANIFEST_PATH: &str = "dist/client/islands-manifest.json";

/// Dev server origin used when `ASSETS_ORIGIN` is unset.
pub const DEFAULT_DEV_ORIGIN: &str = "http://localhost:5173";

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// The mapping inlined into every page.
///
/// Serializes as `modules`, then `islands-runtime`, then extra fields in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub modules: IndexMap<String, String>,
    #[serde(
        rename = "islands-runtime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub runtime: Option<String>,
    /// Any other top-level field (e.g. `vite-client`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Look up the asset locator for a module key.
    pub fn resolve(&self, module_key: &str) -> Option<&str> {
        self.modules.get(module_key).map(String::as_str)
    }

    /// Runtime bootstrap locator, falling back to [`DEFAULT_RUNTIME_SRC`].
    pub fn runtime_src(&self) -> &str {
        self.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME_SRC)
    }

    /// A string-valued extra field such as `vite-client`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(Value::as_str)
    }

    /// Parse manifest JSON, merging `extra_fields` over the top level.
    ///
    /// Fails when the merged document has no `modules` object.
    fn from_value(
        mut root: Map<String, Value>,
        extra_fields: &IndexMap<String, Value>,
    ) -> Result<Self, IslandsError> {
        for (key, value) in extra_fields {
            root.insert(key.clone(), value.clone());
        }

        match root.get("modules") {
            Some(Value::Object(_)) => {}
            Some(other) => {
                return Err(IslandsError::Config(format!(
                    "Manifest key 'modules' must be an object, got {other}"
                )))
            }
            None => {
                return Err(IslandsError::Config(
                    "Manifest missing required key: modules".into(),
                ))
            }
        }

        serde_json::from_value(Value::Object(root))
            .map_err(|e| IslandsError::Config(format!("Invalid manifest: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where the provider takes its module mapping from.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestSource {
    /// Locators are handed over directly, usually pointing at a dev server.
    Dev {
        dev_modules: IndexMap<String, String>,
        runtime_dev_src: String,
    },
    /// Locators come from the JSON file the build emitted.
    Prod { manifest_path: PathBuf },
}

/// Options for [`ManifestProvider::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestConfig {
    pub source: ManifestSource,
    /// Attach a `sha256-` digest of the inline JSON. Defaults to true.
    pub include_integrity: bool,
    /// Top-level fields merged over the manifest. These win over file contents.
    pub extra_fields: IndexMap<String, Value>,
}

impl ManifestConfig {
    /// Dev mode with the default runtime locator.
    pub fn dev<K, V>(dev_modules: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            source: ManifestSource::Dev {
                dev_modules: dev_modules
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
                runtime_dev_src: DEFAULT_RUNTIME_SRC.to_string(),
            },
            include_integrity: true,
            extra_fields: IndexMap::new(),
        }
    }

    /// Prod mode reading the manifest at `manifest_path`.
    pub fn prod(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            source: ManifestSource::Prod {
                manifest_path: manifest_path.into(),
            },
            include_integrity: true,
            extra_fields: IndexMap::new(),
        }
    }

    /// Override the runtime locator. No effect in prod mode.
    pub fn with_runtime_src(mut self, src: impl Into<String>) -> Self {
        if let ManifestSource::Dev {
            runtime_dev_src, ..
        } = &mut self.source
        {
            *runtime_dev_src = src.into();
        }
        self
    }

    pub fn with_extra_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_fields.insert(key.into(), value.into());
        self
    }

    pub fn without_integrity(mut self) -> Self {
        self.include_integrity = false;
        self
    }

    pub fn mode(&self) -> ManifestMode {
        match self.source {
            ManifestSource::Dev { .. } => ManifestMode::Dev,
            ManifestSource::Prod { .. } => ManifestMode::Prod,
        }
    }

    /// Resolve dev vs prod from `NODE_ENV` and `ASSETS_ORIGIN`.
    ///
    /// `dev_entries` pairs a module key with a source path on the dev server,
    /// e.g. `("cart", "/src/app/islands/Cart.entry.jsx")`.
    pub fn from_env<'a>(dev_entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let node_env = std::env::var("NODE_ENV").ok();
        let assets_origin = std::env::var("ASSETS_ORIGIN").ok();
        Self::from_env_vars(node_env.as_deref(), assets_origin.as_deref(), dev_entries)
    }

    /// [`ManifestConfig::from_env`] with the variables passed in.
    pub fn from_env_vars<'a>(
        node_env: Option<&str>,
        assets_origin: Option<&str>,
        dev_entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        if node_env == Some("production") {
            return Self::prod(DEFAULT_MANIFEST_PATH);
        }

        let origin = assets_origin
            .filter(|o| !o.is_empty())
            .unwrap_or(DEFAULT_DEV_ORIGIN)
            .trim_end_matches('/');

        Self::dev(
            dev_entries
                .into_iter()
                .map(|(key, path)| (key.to_string(), format!("{origin}{path}"))),
        )
        .with_runtime_src(format!("{origin}/src/client/islands-runtime.entry.js"))
        .with_extra_field("vite-client", format!("{origin}/@vite/client"))
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Immutable manifest payload computed once at startup.
#[derive(Debug, Clone)]
pub struct ManifestProvider {
    mode: ManifestMode,
    manifest: Manifest,
    json: String,
    integrity: Option<String>,
}

impl ManifestProvider {
    /// Build the manifest and its inline payload.
    ///
    /// In prod mode the file is read and parsed here, so a missing or broken
    /// manifest fails startup rather than the first request.
    pub fn new(config: ManifestConfig) -> Result<Self, IslandsError> {
        let mode = config.mode();
        let manifest = match config.source {
            ManifestSource::Dev {
                dev_modules,
                runtime_dev_src,
            } => {
                let mut root = Map::new();
                root.insert("modules".into(), serde_json::to_value(dev_modules)?);
                root.insert(RUNTIME_KEY.into(), Value::String(runtime_dev_src));
                Manifest::from_value(root, &config.extra_fields)?
            }
            ManifestSource::Prod { manifest_path } => {
                if manifest_path.as_os_str().is_empty() {
                    return Err(IslandsError::Config(
                        "manifest_path is required in prod mode".into(),
                    ));
                }
                let raw = fs::read_to_string(&manifest_path)
                    .map_err(|e| IslandsError::io(&manifest_path, e))?;
                let root = match serde_json::from_str::<Value>(&raw)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(IslandsError::Config(format!(
                            "Manifest at {} is not a JSON object",
                            manifest_path.display()
                        )))
                    }
                };
                debug!(path = %manifest_path.display(), "Loaded islands manifest");
                Manifest::from_value(root, &config.extra_fields)?
            }
        };

        let json = escape_for_inline_script(&serde_json::to_string(&manifest)?);
        let integrity = config
            .include_integrity
            .then(|| integrity::digest(&json));

        info!(
            ?mode,
            modules = manifest.modules.len(),
            integrity = integrity.is_some(),
            "Manifest provider ready"
        );

        Ok(Self {
            mode,
            manifest,
            json,
            integrity,
        })
    }

    pub fn mode(&self) -> ManifestMode {
        self.mode
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Escaped JSON, ready to sit inside an inline `<script>` element.
    pub fn manifest_json(&self) -> &str {
        &self.json
    }

    /// `sha256-<base64>` over [`ManifestProvider::manifest_json`], if enabled.
    pub fn integrity(&self) -> Option<&str> {
        self.integrity.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn dev_manifest_orders_fields() {
        let provider = ManifestProvider::new(
            ManifestConfig::dev([("/x", "http://localhost:5173/x.js")])
                .with_extra_field("custom-extra", "/extra.js"),
        )
        .unwrap();

        assert_eq!(
            provider.manifest_json(),
            r#"{"modules":{"/x":"http://localhost:5173/x.js"},"islands-runtime":"/assets/islands-runtime.js","custom-extra":"/extra.js"}"#
        );
        assert_eq!(provider.mode(), ManifestMode::Dev);
    }

    #[test]
    fn integrity_covers_escaped_json() {
        let provider =
            ManifestProvider::new(ManifestConfig::dev([("a", "/a.js?x=1&y=<2>")])).unwrap();
        let json = provider.manifest_json();
        assert!(!json.contains('&'));
        assert_eq!(provider.integrity(), Some(integrity::digest(json).as_str()));
        assert_eq!(provider.manifest().resolve("a"), Some("/a.js?x=1&y=<2>"));
    }

    #[test]
    fn integrity_can_be_disabled() {
        let config = ManifestConfig::dev([("a", "/a.js")]).without_integrity();
        let provider = ManifestProvider::new(config).unwrap();
        assert_eq!(provider.integrity(), None);
    }

    #[test]
    fn extras_override_modules() {
        let provider = ManifestProvider::new(
            ManifestConfig::dev([("a", "/a.js")])
                .with_extra_field("modules", json!({"b": "/b.js"})),
        )
        .unwrap();
        assert_eq!(provider.manifest().resolve("a"), None);
        assert_eq!(provider.manifest().resolve("b"), Some("/b.js"));
    }

    #[test]
    fn empty_prod_path_is_config_error() {
        let err = ManifestProvider::new(ManifestConfig::prod("")).unwrap_err();
        assert!(matches!(err, IslandsError::Config(_)));
    }

    #[test]
    fn env_resolution() {
        let dev = ManifestConfig::from_env_vars(
            None,
            Some("http://assets.test/"),
            [("cart", "/src/app/islands/Cart.entry.jsx")],
        );
        assert_eq!(dev.mode(), ManifestMode::Dev);
        let provider = ManifestProvider::new(dev).unwrap();
        let manifest = provider.manifest();
        assert_eq!(
            manifest.resolve("cart"),
            Some("http://assets.test/src/app/islands/Cart.entry.jsx")
        );
        assert_eq!(
            manifest.runtime_src(),
            "http://assets.test/src/client/islands-runtime.entry.js"
        );
        assert_eq!(manifest.field("vite-client"), Some("http://assets.test/@vite/client"));

        let fallback = ManifestConfig::from_env_vars(Some("development"), None, []);
        assert_eq!(
            fallback.extra_fields.get("vite-client"),
            Some(&json!("http://localhost:5173/@vite/client"))
        );

        let prod = ManifestConfig::from_env_vars(Some("production"), Some("http://cdn"), []);
        assert_eq!(prod, ManifestConfig::prod(DEFAULT_MANIFEST_PATH));
    }

    #[test]
    fn runtime_src_falls_back() {
        let manifest: Manifest = serde_json::from_value(json!({"modules": {}})).unwrap();
        assert_eq!(manifest.runtime_src(), DEFAULT_RUNTIME_SRC);
    }
}
