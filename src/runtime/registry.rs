//! Island modules and the loaders that produce them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use serde_json::Value;

use super::host::NodeId;
use crate::island::Markup;
use crate::BoxError;

/// A declarative component: props in, markup out.
pub trait Component: Send + Sync {
    fn render(&self, props: &Value) -> Result<Markup, BoxError>;
}

impl<F> Component for F
where
    F: Fn(&Value) -> Result<Markup, BoxError> + Send + Sync,
{
    fn render(&self, props: &Value) -> Result<Markup, BoxError> {
        self(props)
    }
}

/// Imperative escape hatch for modules that manage their node directly.
pub trait ImperativeMount: Send + Sync {
    fn mount(&self, node: NodeId, props: &Value) -> Result<(), BoxError>;
}

/// What a loaded module exports.
#[derive(Clone, Default)]
pub struct IslandModule {
    pub default: Option<Arc<dyn Component>>,
    pub mount: Option<Arc<dyn ImperativeMount>>,
}

impl fmt::Debug for IslandModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IslandModule")
            .field("default", &self.default.is_some())
            .field("mount", &self.mount.is_some())
            .finish()
    }
}

/// The export the runtime will use.
#[derive(Clone)]
pub enum ModuleEntry {
    Component(Arc<dyn Component>),
    Imperative(Arc<dyn ImperativeMount>),
}

impl IslandModule {
    pub fn component(component: impl Component + 'static) -> Self {
        Self {
            default: Some(Arc::new(component)),
            mount: None,
        }
    }

    pub fn imperative(mount: impl ImperativeMount + 'static) -> Self {
        Self {
            default: None,
            mount: Some(Arc::new(mount)),
        }
    }

    /// The default component if there is one, else the imperative mounter.
    pub fn entry(&self) -> Option<ModuleEntry> {
        match (&self.default, &self.mount) {
            (Some(component), _) => Some(ModuleEntry::Component(Arc::clone(component))),
            (None, Some(mount)) => Some(ModuleEntry::Imperative(Arc::clone(mount))),
            (None, None) => None,
        }
    }
}

/// Turns an asset locator into a module.
pub trait ModuleLoader: Send + Sync + 'static {
    fn load(&self, locator: &str) -> BoxFuture<'static, Result<IslandModule, BoxError>>;
}

type ModuleFactory = Arc<dyn Fn() -> IslandModule + Send + Sync>;

/// Modules compiled into the binary, keyed by locator.
#[derive(Clone, Default)]
pub struct StaticRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl fmt::Debug for StaticRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut locators: Vec<_> = self.factories.keys().collect();
        locators.sort();
        f.debug_struct("StaticRegistry")
            .field("locators", &locators)
            .finish()
    }
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        locator: impl Into<String>,
        factory: impl Fn() -> IslandModule + Send + Sync + 'static,
    ) -> Self {
        self.factories.insert(locator.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.factories.contains_key(locator)
    }
}

impl ModuleLoader for StaticRegistry {
    fn load(&self, locator: &str) -> BoxFuture<'static, Result<IslandModule, BoxError>> {
        let result = match self.factories.get(locator) {
            Some(factory) => Ok(factory()),
            None => Err(format!("no module registered for {locator}").into()),
        };
        Box::pin(future::ready(result))
    }
}
