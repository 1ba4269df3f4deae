//! Core library for rolling upgrades of node-local mount agents.
//!
//! A rollout has four moving parts:
//!
//! - [`partitioner`]: turns a discovery snapshot into a deterministic
//!   [`Plan`] of bounded batches
//! - [`store`]: persists the plan as shared state, every write a
//!   compare-and-swap retry loop
//! - [`dispatch`]: walks the plan node by node and asks each node's agent to
//!   apply its batch over an exec channel
//! - [`agent`]: the agent side, upgrading its node's targets and writing
//!   statuses back
//!
//! [`aggregate`] folds target statuses into the run status, [`locks`] guards
//! per-target critical sections inside one process and [`display`] formats
//! everything as markdown for the CLI.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use roller_core::{
//!     build_plan, MemoryConfigStore, MountInstance, PlanOptions, PlanStore, Status,
//! };
//!
//! # async fn example() -> roller_core::Result<()> {
//! let mounts = vec![
//!     MountInstance::new("mount-a", "node-1", "vol-1"),
//!     MountInstance::new("mount-b", "node-2", "vol-1"),
//! ];
//! let plan = build_plan(mounts, &PlanOptions { parallelism: 2, ..Default::default() }, &[])?;
//!
//! let store = PlanStore::new(Arc::new(MemoryConfigStore::new()), "kube-system");
//! store.save("roller-upgrade", &plan).await?;
//!
//! let loaded = store.load("roller-upgrade").await?;
//! assert_eq!(loaded.status, Status::Pending);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod aggregate;
pub mod config;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod locks;
pub mod models;
pub mod params;
pub mod partitioner;
pub mod store;

// Re-export commonly used types
pub use agent::{BatchOutcome, CommandUpgrader, MountUpgrader, NodeAgent, UpgradeMode};
pub use aggregate::{aggregate, Progress};
pub use config::RetryPolicy;
pub use dispatch::{
    AgentExec, DispatchSettings, Dispatcher, ExecRequest, KubectlExec, NodeReport, NodeState,
    OutputSink, PauseSwitch, RunReport,
};
pub use display::{LocalDateTime, OperationStatus};
pub use error::{Result, RollerError};
pub use locks::ShardLocks;
pub use models::{AgentInstance, Inventory, MountInstance, Plan, Status, Target};
pub use params::{BatchSelection, PlanOptions, MAX_PARALLELISM};
pub use partitioner::build_plan;
pub use store::{
    ConfigRecord, ConfigStore, MemoryConfigStore, PlanStore, PlanStoreBuilder, SqliteConfigStore,
    StoredPlan,
};
