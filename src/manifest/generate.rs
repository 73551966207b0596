//! Build-time conversion of a Vite `manifest.json` into an islands manifest.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Manifest;
use crate::IslandsError;

/// Vite manifest key of the runtime bootstrap entry.
pub const RUNTIME_ENTRY: &str = "src/client/islands-runtime.entry.js";

#[derive(Debug, Deserialize)]
struct ViteChunk {
    file: String,
}

fn island_entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^src/client/islands/(.+)\.entry\.(js|jsx)$").expect("valid island entry regex")
    })
}

/// Module specifier for a Vite manifest key, if the key is an island entry.
pub fn module_specifier(vite_key: &str) -> Option<String> {
    let caps = island_entry_pattern().captures(vite_key)?;
    Some(format!("/src/client/islands/{}.entry.{}", &caps[1], &caps[2]))
}

/// Map the entries of a parsed Vite manifest onto an islands manifest.
pub fn islands_manifest_from_vite(vite_json: &str) -> Result<Manifest, IslandsError> {
    let chunks: IndexMap<String, ViteChunk> = serde_json::from_str(vite_json)?;

    let mut modules = IndexMap::new();
    let mut runtime = None;
    for (key, chunk) in &chunks {
        if key == RUNTIME_ENTRY {
            runtime = Some(format!("/{}", chunk.file));
        } else if let Some(specifier) = module_specifier(key) {
            modules.insert(specifier, format!("/{}", chunk.file));
        }
    }

    let runtime = runtime.ok_or_else(|| {
        IslandsError::Config(format!(
            "Could not find runtime entry {RUNTIME_ENTRY} in Vite manifest"
        ))
    })?;

    Ok(Manifest {
        modules,
        runtime: Some(runtime),
        extra: Default::default(),
    })
}

/// Read the Vite manifest at `vite_manifest_path` and write the islands
/// manifest to `out_path` as tab-indented JSON.
pub fn build_islands_manifest(
    vite_manifest_path: &Path,
    out_path: &Path,
) -> Result<Manifest, IslandsError> {
    if !vite_manifest_path.exists() {
        return Err(IslandsError::Config(format!(
            "Vite manifest not found: {}",
            vite_manifest_path.display()
        )));
    }

    let raw = fs::read_to_string(vite_manifest_path)
        .map_err(|e| IslandsError::io(vite_manifest_path, e))?;
    let manifest = islands_manifest_from_vite(&raw)?;

    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| IslandsError::io(parent, e))?;
    }
    fs::write(out_path, to_tab_indented_json(&manifest)?)
        .map_err(|e| IslandsError::io(out_path, e))?;

    debug!(
        out = %out_path.display(),
        modules = manifest.modules.len(),
        "Wrote islands manifest"
    );
    Ok(manifest)
}

fn to_tab_indented_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    // serde_json only ever writes valid UTF-8.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
