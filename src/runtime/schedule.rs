//! Waiting for an island's trigger.

use tracing::trace;

use super::host::{IslandHost, NodeId};
use super::RuntimeOptions;
use crate::TriggerPolicy;

/// Wait until `policy` fires for `node`.
///
/// Returns `false` if the trigger source went away without firing, in which
/// case the island never activates.
pub(crate) async fn wait_for_trigger(
    host: &dyn IslandHost,
    node: NodeId,
    policy: TriggerPolicy,
    options: &RuntimeOptions,
) -> bool {
    match policy {
        TriggerPolicy::Immediate => true,
        TriggerPolicy::Idle => {
            match host.idle_signal(options.idle_timeout) {
                Some(signal) => {
                    // The host bounds the wait too; this covers hosts that don't.
                    let _ = tokio::time::timeout(options.idle_timeout, signal).await;
                }
                None => tokio::time::sleep(options.idle_fallback).await,
            }
            true
        }
        TriggerPolicy::Visible => {
            let Some(mut updates) = host.observe_visibility(node) else {
                trace!(?node, "No visibility observer, activating now");
                return true;
            };
            // Returning drops the receiver, which disconnects the observer.
            while let Some(visible) = updates.recv().await {
                if visible {
                    return true;
                }
            }
            false
        }
        TriggerPolicy::Interaction => {
            let mut events = host.listen_interaction(node);
            match events.recv().await {
                Some(event) => {
                    trace!(?node, ?event, "Interaction trigger fired");
                    true
                }
                None => false,
            }
        }
    }
}
