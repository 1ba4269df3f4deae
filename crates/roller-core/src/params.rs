//! Parameter structures for roller operations
//!
//! These structures are shared by every interface (the CLI today) and carry no
//! framework-specific derives. Interface layers define their own argument types
//! and convert into these with `From`:
//!
//! ```text
//! CLI Args (clap) → Core Params → Partitioner / Agent
//! ```

use serde::{Deserialize, Serialize};

/// Upper bound on targets disrupted at once on a node.
pub const MAX_PARALLELISM: usize = 50;

/// Options for building an upgrade plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    /// Maximum targets per batch (1..=MAX_PARALLELISM)
    pub parallelism: usize,
    /// Keep going when a node fails
    #[serde(default)]
    pub ignore_errors: bool,
    /// Recreate mounts instead of reloading them
    #[serde(default)]
    pub recreate: bool,
    /// Restrict the plan to one node
    #[serde(default)]
    pub node: Option<String>,
    /// Restrict the plan to one logical volume
    #[serde(default)]
    pub unique_id: Option<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            ignore_errors: false,
            recreate: false,
            node: None,
            unique_id: None,
        }
    }
}

/// Which of a node's targets an agent should upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSelection {
    /// Every target the plan assigns to the node
    All,
    /// A single named target
    Target(String),
}

impl BatchSelection {
    /// Parses the agent's positional argument; `batch` (any case) selects all.
    ///
    /// ```rust
    /// use roller_core::params::BatchSelection;
    ///
    /// assert_eq!(BatchSelection::parse("BATCH"), BatchSelection::All);
    /// assert_eq!(
    ///     BatchSelection::parse("mount-a"),
    ///     BatchSelection::Target("mount-a".to_string())
    /// );
    /// ```
    pub fn parse(arg: &str) -> Self {
        if arg.eq_ignore_ascii_case("batch") {
            Self::All
        } else {
            Self::Target(arg.to_string())
        }
    }

    /// Whether `name` is part of the selection.
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Target(target) => target == name,
        }
    }
}
