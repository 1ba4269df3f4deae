//! Target model definition.

use log::warn;
use serde::{Deserialize, Serialize};

use super::Status;

/// A single mount instance scheduled for upgrade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Unique name of the mount instance
    pub name: String,

    /// Node the mount runs on
    pub node: String,

    /// Logical-volume identifier the mount serves
    #[serde(default)]
    pub unique_id: String,

    /// Name of the agent responsible for `node` (empty when none was found)
    #[serde(default)]
    pub agent: String,

    /// Current upgrade status
    #[serde(default)]
    pub status: Status,
}

impl Target {
    /// Moves the target to `next` if the transition is monotonic.
    ///
    /// Returns whether the status changed. Rejected transitions are logged and
    /// leave the target untouched.
    pub fn advance(&mut self, next: Status) -> bool {
        if self.status == next {
            return false;
        }
        if !self.status.can_transition_to(next) {
            warn!(
                "Ignoring status change {} -> {} for target {}",
                self.status, next, self.name
            );
            return false;
        }
        self.status = next;
        true
    }
}
