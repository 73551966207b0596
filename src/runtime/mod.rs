//! Client-side hydration runtime.
//!
//! [`HydrationRuntime::boot`] reads the inline manifest, scans the host for
//! island nodes in one synchronous pass, and spawns one task per newly
//! claimed node. Immediate islands resolve their module key during the scan.
//! Every other task waits for its trigger and resolves afterwards. The task
//! then loads the module and mounts it:
//!
//! `Pending -> Waiting(policy) -> Resolving -> Mounted | Failed(reason)`
//!
//! Failures are per node. They are reported as security events and the
//! node keeps its server-rendered markup.

pub mod host;
pub mod registry;
mod schedule;

pub use host::{IslandHost, IslandNode, ManifestScript, NodeId, RenderTarget};
pub use registry::{
    Component, ImperativeMount, IslandModule, ModuleEntry, ModuleLoader, StaticRegistry,
};

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::document::MANIFEST_ELEMENT_ID;
use crate::manifest::integrity::{self, IntegrityCheck};
use crate::manifest::{Manifest, RUNTIME_KEY};
use crate::serialize::unescape_unicode;
use crate::telemetry::{SecurityEvent, SecurityEventKind, SecurityReporter, TracingReporter};
use crate::{BoxError, TriggerPolicy};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// What to do when the inline manifest fails its integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityPolicy {
    /// Report the mismatch and hydrate anyway.
    #[default]
    FailOpen,
    /// Report the mismatch and leave every island as server markup.
    FailClosed,
}

type ErrorHook = Arc<dyn Fn(&ResolutionError, NodeId) + Send + Sync>;

#[derive(Clone)]
pub struct RuntimeOptions {
    pub manifest_element_id: String,
    /// Upper bound on waiting for the host's idle signal.
    pub idle_timeout: Duration,
    /// Delay for idle islands when the host has no idle signal.
    pub idle_fallback: Duration,
    pub integrity_policy: IntegrityPolicy,
    on_error: Option<ErrorHook>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            manifest_element_id: MANIFEST_ELEMENT_ID.to_string(),
            idle_timeout: Duration::from_millis(2000),
            idle_fallback: Duration::from_millis(250),
            integrity_policy: IntegrityPolicy::default(),
            on_error: None,
        }
    }
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("manifest_element_id", &self.manifest_element_id)
            .field("idle_timeout", &self.idle_timeout)
            .field("idle_fallback", &self.idle_fallback)
            .field("integrity_policy", &self.integrity_policy)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl RuntimeOptions {
    pub fn with_integrity_policy(mut self, policy: IntegrityPolicy) -> Self {
        self.integrity_policy = policy;
        self
    }

    /// Called for every per-node failure, after it has been reported.
    pub fn on_error(
        mut self,
        hook: impl Fn(&ResolutionError, NodeId) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Why a node stayed as server markup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("module '{module_key}' is not in the manifest")]
    ModuleMissing { module_key: String },

    #[error("failed to import '{locator}': {message}")]
    ImportFailed {
        module_key: String,
        locator: String,
        message: String,
    },

    #[error("'{locator}' exports neither a component nor mount()")]
    ExportMissing { module_key: String, locator: String },

    #[error("mounting '{module_key}' failed: {message}")]
    MountFailed {
        module_key: String,
        locator: String,
        message: String,
        imperative: bool,
    },

    #[error("manifest failed its integrity check")]
    IntegrityRejected,
}

impl ResolutionError {
    fn event_kind(&self) -> Option<SecurityEventKind> {
        match self {
            ResolutionError::ModuleMissing { .. } => Some(SecurityEventKind::IslandModuleMissing),
            ResolutionError::ImportFailed { .. } => Some(SecurityEventKind::IslandImportFailed),
            ResolutionError::ExportMissing { .. } => {
                Some(SecurityEventKind::IslandDefaultExportMissing)
            }
            ResolutionError::MountFailed { .. } => Some(SecurityEventKind::IslandMountFailed),
            // Already reported once as a manifest event.
            ResolutionError::IntegrityRejected => None,
        }
    }

    fn detail(&self) -> Map<String, Value> {
        let value = match self {
            ResolutionError::ModuleMissing { module_key } => {
                json!({ "moduleSpecifier": module_key })
            }
            ResolutionError::ImportFailed {
                module_key,
                locator,
                message,
            } => json!({
                "moduleSpecifier": module_key,
                "resolved": locator,
                "message": message,
            }),
            ResolutionError::ExportMissing { module_key, locator } => {
                json!({ "moduleSpecifier": module_key, "resolved": locator })
            }
            ResolutionError::MountFailed {
                module_key,
                locator,
                message,
                imperative,
            } => {
                let mut detail = json!({
                    "moduleSpecifier": module_key,
                    "resolved": locator,
                    "message": message,
                });
                if *imperative {
                    detail["mode"] = json!("mount-fallback");
                }
                detail
            }
            ResolutionError::IntegrityRejected => json!({}),
        };
        object(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IslandState {
    Pending,
    Waiting(TriggerPolicy),
    Resolving,
    Mounted,
    Failed(ResolutionError),
}

/// An island as read during the scan.
#[derive(Debug, Clone)]
struct ScannedIsland {
    id: NodeId,
    module_key: String,
    policy: TriggerPolicy,
    props: Value,
    target: RenderTarget,
}

/// Parse `data-props`. Anything unparseable becomes `null`.
pub fn parse_props(raw: Option<&str>) -> Value {
    let raw = raw.filter(|r| !r.is_empty()).unwrap_or("null");
    serde_json::from_str(&unescape_unicode(raw)).unwrap_or(Value::Null)
}

/// Parse the inline manifest text leniently: invalid JSON or a missing
/// `modules` object yields an empty mapping.
pub fn parse_manifest_text(text: &str) -> Manifest {
    let Ok(Value::Object(mut root)) = serde_json::from_str::<Value>(text) else {
        return Manifest::default();
    };

    let modules: IndexMap<String, String> = match root.remove("modules") {
        Some(Value::Object(modules)) => modules
            .into_iter()
            .filter_map(|(key, locator)| match locator {
                Value::String(locator) => Some((key, locator)),
                _ => None,
            })
            .collect(),
        _ => Default::default(),
    };
    let runtime = match root.remove(RUNTIME_KEY) {
        Some(Value::String(src)) => Some(src),
        _ => None,
    };

    Manifest {
        modules,
        runtime,
        extra: root,
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

struct LoadedManifest {
    manifest: Manifest,
    /// False only under `FailClosed` after a failed check.
    trusted: bool,
}

struct RuntimeInner {
    host: Arc<dyn IslandHost>,
    loader: Arc<dyn ModuleLoader>,
    reporter: Arc<dyn SecurityReporter>,
    options: RuntimeOptions,
    manifest: OnceLock<Arc<LoadedManifest>>,
    states: DashMap<NodeId, IslandState>,
}

/// Handle on the tasks spawned by one [`HydrationRuntime::boot`].
#[derive(Debug)]
pub struct BootHandle {
    claimed: Vec<NodeId>,
    tasks: Vec<JoinHandle<()>>,
}

impl BootHandle {
    /// Nodes this boot claimed, in document order.
    pub fn claimed(&self) -> &[NodeId] {
        &self.claimed
    }

    /// Wait for every claimed island to mount, fail, or lose its trigger.
    ///
    /// Islands whose trigger never fires keep this pending.
    pub async fn settled(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Island task aborted");
            }
        }
    }

    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Clone)]
pub struct HydrationRuntime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for HydrationRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydrationRuntime")
            .field("options", &self.inner.options)
            .field("islands", &self.inner.states.len())
            .finish()
    }
}

impl HydrationRuntime {
    pub fn new(
        host: impl IslandHost,
        loader: impl ModuleLoader,
        options: RuntimeOptions,
    ) -> Self {
        Self::with_reporter(host, loader, TracingReporter, options)
    }

    pub fn with_reporter(
        host: impl IslandHost,
        loader: impl ModuleLoader,
        reporter: impl SecurityReporter + 'static,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                host: Arc::new(host),
                loader: Arc::new(loader),
                reporter: Arc::new(reporter),
                options,
                manifest: OnceLock::new(),
                states: DashMap::new(),
            }),
        }
    }

    /// Scan the host and schedule every island not claimed by an earlier
    /// boot. Must run inside a Tokio runtime.
    pub fn boot(&self) -> BootHandle {
        let loaded = self.inner.loaded_manifest();
        let nodes = self.inner.host.island_nodes();

        if nodes.is_empty() {
            self.inner.report(SecurityEventKind::IslandsNotFound, Map::new());
        }

        let mut claimed = Vec::new();
        let mut scanned = Vec::new();
        for node in nodes {
            match self.inner.states.entry(node.id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(IslandState::Pending);
                }
            }

            let island = ScannedIsland {
                id: node.id,
                policy: TriggerPolicy::from_attribute(node.hydrate.as_deref()),
                props: parse_props(node.props.as_deref()),
                target: RenderTarget::for_node(&node),
                module_key: node.module_key,
            };
            claimed.push(island.id);

            if !loaded.trusted {
                let rejected = IslandState::Failed(ResolutionError::IntegrityRejected);
                self.inner.set_state(island.id, rejected);
                continue;
            }

            if island.policy != TriggerPolicy::Immediate {
                self.inner.set_state(island.id, IslandState::Waiting(island.policy));
                scanned.push((island, None));
                continue;
            }

            self.inner.set_state(island.id, IslandState::Resolving);
            match resolve_locator(&island, &loaded.manifest) {
                Ok(locator) => scanned.push((island, Some(locator))),
                Err(err) => self.inner.fail(island.id, err),
            }
        }

        info!(
            islands = claimed.len(),
            scheduled = scanned.len(),
            "Islands scanned"
        );

        let tasks = scanned
            .into_iter()
            .map(|(island, locator)| {
                let inner = Arc::clone(&self.inner);
                let loaded = Arc::clone(&loaded);
                tokio::spawn(async move {
                    inner.run_island(island, locator, &loaded.manifest).await
                })
            })
            .collect();

        BootHandle { claimed, tasks }
    }

    pub fn state(&self, node: NodeId) -> Option<IslandState> {
        self.inner.states.get(&node).map(|state| state.clone())
    }

    /// The manifest in effect, parsing it on first use.
    pub fn manifest(&self) -> Manifest {
        self.inner.loaded_manifest().manifest.clone()
    }
}

impl RuntimeInner {
    fn loaded_manifest(&self) -> Arc<LoadedManifest> {
        Arc::clone(self.manifest.get_or_init(|| Arc::new(self.read_manifest())))
    }

    fn read_manifest(&self) -> LoadedManifest {
        let Some(script) = self.host.manifest_script(&self.options.manifest_element_id) else {
            debug!(
                id = %self.options.manifest_element_id,
                "No manifest element, using empty manifest"
            );
            return LoadedManifest {
                manifest: Manifest::default(),
                trusted: true,
            };
        };

        let text = if script.text.is_empty() { "{}" } else { script.text.as_str() };
        let trusted = match script.integrity.as_deref().filter(|i| !i.is_empty()) {
            Some(expected) => self.check_integrity(text, expected),
            None => true,
        };

        LoadedManifest {
            manifest: parse_manifest_text(text),
            trusted,
        }
    }

    /// Report integrity problems. Returns whether islands may still mount.
    fn check_integrity(&self, text: &str, expected: &str) -> bool {
        let fail_open = self.options.integrity_policy == IntegrityPolicy::FailOpen;
        match integrity::verify(text, expected) {
            IntegrityCheck::Verified => true,
            IntegrityCheck::Mismatch { expected, actual } => {
                error!(%expected, %actual, "Islands manifest integrity check failed");
                self.report(
                    SecurityEventKind::ManifestIntegrityFailed,
                    object(json!({ "expectedIntegrity": expected, "actualIntegrity": actual })),
                );
                if fail_open {
                    warn!("Proceeding with manifest despite integrity mismatch (fail-open mode)");
                }
                fail_open
            }
            IntegrityCheck::Unsupported { expected } => {
                error!(%expected, "Islands manifest integrity check errored");
                self.report(
                    SecurityEventKind::ManifestIntegrityError,
                    object(json!({
                        "message": format!("unsupported integrity value: {expected}"),
                    })),
                );
                fail_open
            }
        }
    }

    /// `locator` is already resolved for immediate islands.
    async fn run_island(
        &self,
        island: ScannedIsland,
        locator: Option<String>,
        manifest: &Manifest,
    ) {
        let locator = match locator {
            Some(locator) => locator,
            None => {
                let fired = schedule::wait_for_trigger(
                    self.host.as_ref(),
                    island.id,
                    island.policy,
                    &self.options,
                )
                .await;
                if !fired {
                    debug!(
                        node = ?island.id,
                        policy = %island.policy,
                        "Trigger source closed before firing"
                    );
                    return;
                }
                self.set_state(island.id, IslandState::Resolving);
                match resolve_locator(&island, manifest) {
                    Ok(locator) => locator,
                    Err(err) => return self.fail(island.id, err),
                }
            }
        };

        match self.activate(&island, locator).await {
            Ok(()) => {
                debug!(node = ?island.id, module = %island.module_key, "Island mounted");
                self.set_state(island.id, IslandState::Mounted);
            }
            Err(err) => self.fail(island.id, err),
        }
    }

    /// Load the module and hand it the node. Panics in module code count as
    /// import or mount failures.
    async fn activate(
        &self,
        island: &ScannedIsland,
        locator: String,
    ) -> Result<(), ResolutionError> {
        let module_key = &island.module_key;

        let loaded = AssertUnwindSafe(self.loader.load(&locator))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_message(panic).into()));
        let module = loaded.map_err(|err| ResolutionError::ImportFailed {
            module_key: module_key.clone(),
            locator: locator.clone(),
            message: err.to_string(),
        })?;

        let mount_failed = |message: String, imperative: bool| ResolutionError::MountFailed {
            module_key: module_key.clone(),
            locator: locator.clone(),
            message,
            imperative,
        };

        match module.entry() {
            Some(ModuleEntry::Component(component)) => {
                let mounted = contain(|| {
                    let markup = component.render(&island.props)?;
                    match island.target {
                        RenderTarget::Prerendered => self.host.attach(island.id, markup),
                        RenderTarget::Empty => self.host.mount(island.id, markup),
                    }
                });
                mounted.map_err(|message| mount_failed(message, false))
            }
            Some(ModuleEntry::Imperative(mount)) => {
                contain(|| mount.mount(island.id, &island.props))
                    .map_err(|message| mount_failed(message, true))
            }
            None => Err(ResolutionError::ExportMissing {
                module_key: module_key.clone(),
                locator: locator.clone(),
            }),
        }
    }

    /// Report a per-node failure and leave the node as server markup.
    fn fail(&self, node: NodeId, err: ResolutionError) {
        warn!(node = ?node, error = %err, "Island left as server markup");
        if let Some(kind) = err.event_kind() {
            self.report(kind, err.detail());
        }
        if let Some(hook) = &self.options.on_error {
            hook(&err, node);
        }
        self.set_state(node, IslandState::Failed(err));
    }

    fn set_state(&self, node: NodeId, state: IslandState) {
        self.states.insert(node, state);
    }

    fn report(&self, kind: SecurityEventKind, detail: Map<String, Value>) {
        let event = SecurityEvent::new(kind, detail, self.host.location_path());
        self.reporter.report(event);
    }
}

fn resolve_locator(island: &ScannedIsland, manifest: &Manifest) -> Result<String, ResolutionError> {
    manifest
        .resolve(&island.module_key)
        .map(str::to_string)
        .ok_or_else(|| ResolutionError::ModuleMissing {
            module_key: island.module_key.clone(),
        })
}

/// Run module code, turning both errors and panics into a message.
fn contain(f: impl FnOnce() -> Result<(), BoxError>) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(panic) => Err(panic_message(panic)),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("panicked: {message}")
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
