//! Data models for upgrade plans.
//!
//! A [`Plan`] is an ordered list of batches, each batch a list of [`Target`]s.
//! Targets and the plan itself share the [`Status`] enumeration. The plan is
//! serialized to JSON with camelCase keys and lowercase statuses, and that
//! encoding is the persisted wire format shared with node agents.
//!
//! Display implementations live in [`crate::display`].
//!
//! # Examples
//!
//! ```rust
//! use roller_core::models::{Plan, Status, Target};
//!
//! let plan = Plan {
//!     parallelism: 1,
//!     ignore_errors: false,
//!     recreate: true,
//!     node: None,
//!     unique_id: None,
//!     batches: vec![vec![Target {
//!         name: "mount-a".to_string(),
//!         node: "node-1".to_string(),
//!         unique_id: "vol-1".to_string(),
//!         agent: "agent-1".to_string(),
//!         status: Status::Pending,
//!     }]],
//!     status: Status::Pending,
//! };
//! assert_eq!(plan.nodes(), vec!["node-1".to_string()]);
//! assert_eq!(plan.agent_for("node-1"), Some("agent-1"));
//! ```

pub mod inventory;
pub mod plan;
pub mod status;
pub mod target;


pub use inventory::{AgentInstance, Inventory, MountInstance};
pub use plan::{Batch, Plan};
pub use status::Status;
pub use target::Target;
