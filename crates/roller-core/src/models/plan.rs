//! Plan model definition and target lookup helpers.

use serde::{Deserialize, Serialize};

use super::{Status, Target};

/// An ordered group of targets upgraded together. Never empty and never larger
/// than the plan's parallelism.
pub type Batch = Vec<Target>;

/// The rollout definition plus live progress, persisted as shared state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Maximum number of targets disrupted concurrently within one batch
    pub parallelism: usize,

    /// Continue with the next node when a node fails
    #[serde(default)]
    pub ignore_errors: bool,

    /// Recreate mounts instead of hot-reloading them
    #[serde(default)]
    pub recreate: bool,

    /// Node filter the plan was built with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,

    /// Logical-volume filter the plan was built with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Ordered batches of targets
    #[serde(default)]
    pub batches: Vec<Batch>,

    /// Overall status of the run
    #[serde(default)]
    pub status: Status,
}

impl Plan {
    /// Iterates over every target in batch order.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.batches.iter().flatten()
    }

    /// Iterates mutably over every target in batch order.
    pub fn targets_mut(&mut self) -> impl Iterator<Item = &mut Target> {
        self.batches.iter_mut().flatten()
    }

    /// Total number of targets.
    pub fn target_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Looks up a target by name.
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets().find(|t| t.name == name)
    }

    /// Looks up a target by name for mutation.
    pub fn target_mut(&mut self, name: &str) -> Option<&mut Target> {
        self.targets_mut().find(|t| t.name == name)
    }

    /// Distinct nodes in order of first appearance in the batches.
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = Vec::new();
        for target in self.targets() {
            if !nodes.iter().any(|n| n == &target.node) {
                nodes.push(target.node.clone());
            }
        }
        nodes
    }

    /// Targets owned by `node`, in batch order.
    pub fn node_targets<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Target> + 'a {
        self.targets().filter(move |t| t.node == node)
    }

    /// Name of the agent responsible for `node`, if any target recorded one.
    pub fn agent_for(&self, node: &str) -> Option<&str> {
        self.targets()
            .filter(|t| t.node == node)
            .map(|t| t.agent.as_str())
            .find(|agent| !agent.is_empty())
    }

    /// Applies `status` to every target of `node` that accepts the transition.
    /// Returns the number of targets that changed.
    pub fn advance_node(&mut self, node: &str, status: Status) -> usize {
        self.targets_mut()
            .filter(|t| t.node == node && !t.status.is_terminal())
            .map(|t| t.advance(status))
            .filter(|changed| *changed)
            .count()
    }
}
