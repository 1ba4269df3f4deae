use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::{PlanArgs, RolloutArgs, ShowArgs, UpgradeArgs};

/// Rolling upgrades for node-local mount agents
///
/// Roller splits the mounts found on a cluster into bounded, per-node batches,
/// persists the resulting plan and walks it node by node, asking each node's
/// agent to upgrade its own mounts. Progress is written back to the stored
/// plan, so an interrupted rollout can be resumed.
#[derive(Parser)]
#[command(version, about, name = "roller")]
pub struct Args {
    /// Path to the SQLite database file. Defaults to
    /// $XDG_DATA_HOME/roller/roller.db
    #[arg(long, global = true)]
    pub database_file: Option<PathBuf>,

    /// Namespace holding the plan record
    #[arg(long, global = true, env = "ROLLER_NAMESPACE")]
    pub namespace: Option<String>,

    /// Disable colored output and use plain text
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
///
/// - `plan` and `show` work on the stored plan only
/// - `rollout` drives the upgrade from the operator's side
/// - `upgrade` runs inside a node's agent
#[derive(Subcommand)]
pub enum Commands {
    /// Build and store an upgrade plan from an inventory file
    #[command(alias = "p")]
    Plan(PlanArgs),
    /// Build (or resume) a plan and dispatch it node by node
    #[command(alias = "r")]
    Rollout(RolloutArgs),
    /// Show the stored plan and its progress
    #[command(alias = "s")]
    Show(ShowArgs),
    /// Upgrade this node's targets (runs inside the agent)
    #[command(alias = "u")]
    Upgrade(UpgradeArgs),
}
