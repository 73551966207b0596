//! Capabilities the runtime needs from the page it runs in.
//!
//! A browser binding implements [`IslandHost`] over the DOM; tests use an
//! in-memory host. Trigger sources are channels: dropping the receiver is
//! how the runtime disconnects an observer or removes a listener.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::island::Markup;
use crate::BoxError;

/// Stable identity of a scanned island node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Raw attributes of one `[data-island-module]` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IslandNode {
    pub id: NodeId,
    /// Value of `data-island-module`.
    pub module_key: String,
    /// Value of `data-hydrate`, if present.
    pub hydrate: Option<String>,
    /// Value of `data-props`, if present.
    pub props: Option<String>,
    /// Whether the element had child nodes when scanned.
    pub has_children: bool,
}

/// Text and `data-integrity` of the inline manifest element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestScript {
    pub text: String,
    pub integrity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionEvent {
    Click,
    Focus,
    Keydown,
}

/// How a component is put into its node, fixed at scan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    /// No server markup; render fresh.
    Empty,
    /// Server markup present; attach to it.
    Prerendered,
}

impl RenderTarget {
    pub fn for_node(node: &IslandNode) -> Self {
        if node.has_children {
            RenderTarget::Prerendered
        } else {
            RenderTarget::Empty
        }
    }
}

pub trait IslandHost: Send + Sync + 'static {
    /// The inline manifest element with the given `id`.
    fn manifest_script(&self, element_id: &str) -> Option<ManifestScript>;

    /// Every island mount point, in document order.
    fn island_nodes(&self) -> Vec<IslandNode>;

    /// Resolves when the host is idle or `timeout` elapses. `None` when the
    /// host has no idle callback.
    fn idle_signal(&self, timeout: Duration) -> Option<BoxFuture<'static, ()>>;

    /// Intersection updates for `node`. `None` when the host has no
    /// intersection observer.
    fn observe_visibility(&self, node: NodeId) -> Option<mpsc::UnboundedReceiver<bool>>;

    /// One capturing listener on `node` for click, focus and keydown.
    fn listen_interaction(&self, node: NodeId) -> mpsc::UnboundedReceiver<InteractionEvent>;

    /// Reconcile rendered markup with the server markup already in `node`.
    fn attach(&self, node: NodeId, markup: Markup) -> Result<(), BoxError>;

    /// Replace the (empty) contents of `node` with rendered markup.
    fn mount(&self, node: NodeId, markup: Markup) -> Result<(), BoxError>;

    /// Current page path, attached to security reports.
    fn location_path(&self) -> String;
}
