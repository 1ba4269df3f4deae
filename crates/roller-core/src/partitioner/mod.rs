//! Deterministic partitioning of mount targets into bounded batches.
//!
//! [`build_plan`] is a pure function: the same discovery snapshot (in the same
//! order) and the same options always produce an identical [`Plan`]. Targets
//! are ordered by `(node, unique_id)` with a stable sort, so mounts that share a
//! key keep their discovery order, and then chunked into batches of
//! `parallelism` targets. Only the last batch may be short.
//!
//! ```rust
//! use roller_core::{
//!     models::{AgentInstance, MountInstance},
//!     params::PlanOptions,
//!     partitioner::build_plan,
//! };
//!
//! let mounts = vec![
//!     MountInstance::new("m-2", "n2", "vol"),
//!     MountInstance::new("m-1", "n1", "vol"),
//! ];
//! let agents = vec![AgentInstance::new("agent-n1", "n1")];
//! let options = PlanOptions { parallelism: 1, ..Default::default() };
//!
//! let plan = build_plan(mounts, &options, &agents).unwrap();
//! assert_eq!(plan.batches.len(), 2);
//! assert_eq!(plan.batches[0][0].name, "m-1");
//! assert_eq!(plan.batches[0][0].agent, "agent-n1");
//! assert_eq!(plan.batches[1][0].agent, "");
//! ```

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::{
    error::{Result, RollerError},
    models::{AgentInstance, MountInstance, Plan, Status, Target},
    params::{PlanOptions, MAX_PARALLELISM},
};


/// Builds an upgrade plan from a discovery snapshot.
///
/// # Errors
///
/// Returns `RollerError::InvalidArgument` when `parallelism` is outside
/// `1..=MAX_PARALLELISM`, when two different agents claim the same node, or
/// when two mounts share a name.
pub fn build_plan(
    mounts: Vec<MountInstance>,
    options: &PlanOptions,
    agents: &[AgentInstance],
) -> Result<Plan> {
    validate_parallelism(options.parallelism)?;
    let node_agents = node_agent_map(agents)?;

    let mut mounts: Vec<MountInstance> = mounts
        .into_iter()
        .filter(|m| options.node.as_deref().map_or(true, |node| m.node == node))
        .filter(|m| {
            options
                .unique_id
                .as_deref()
                .map_or(true, |id| m.unique_id == id)
        })
        .collect();

    let mut seen = HashSet::with_capacity(mounts.len());
    for mount in &mounts {
        if !seen.insert(mount.name.as_str()) {
            return Err(RollerError::invalid_argument("targets")
                .with_reason(format!("duplicate target name '{}'", mount.name)));
        }
    }

    // `sort_by` is stable: equal keys keep their discovery order.
    mounts.sort_by(|a, b| (&a.node, &a.unique_id).cmp(&(&b.node, &b.unique_id)));

    let batches: Vec<Vec<Target>> = mounts
        .chunks(options.parallelism)
        .map(|chunk| {
            chunk
                .iter()
                .map(|m| Target {
                    name: m.name.clone(),
                    node: m.node.clone(),
                    unique_id: m.unique_id.clone(),
                    agent: node_agents
                        .get(m.node.as_str())
                        .map(|agent| agent.to_string())
                        .unwrap_or_default(),
                    status: Status::Pending,
                })
                .collect()
        })
        .collect();

    debug!(
        "Partitioned {} target(s) into {} batch(es) of at most {}",
        mounts.len(),
        batches.len(),
        options.parallelism
    );

    Ok(Plan {
        parallelism: options.parallelism,
        ignore_errors: options.ignore_errors,
        recreate: options.recreate,
        node: options.node.clone(),
        unique_id: options.unique_id.clone(),
        batches,
        status: Status::Pending,
    })
}

/// Checks that `parallelism` is within `1..=MAX_PARALLELISM`.
pub fn validate_parallelism(parallelism: usize) -> Result<()> {
    if parallelism == 0 {
        return Err(RollerError::invalid_argument("parallelism")
            .with_reason("must be at least 1"));
    }
    if parallelism > MAX_PARALLELISM {
        return Err(RollerError::invalid_argument("parallelism")
            .with_reason(format!("must not exceed {MAX_PARALLELISM}")));
    }
    Ok(())
}

/// Maps each node to its single agent. A node claimed by two different agents
/// is rejected; repeating the same claim is harmless.
fn node_agent_map(agents: &[AgentInstance]) -> Result<BTreeMap<&str, &str>> {
    let mut map: BTreeMap<&str, &str> = BTreeMap::new();
    for agent in agents {
        match map.get(agent.node.as_str()) {
            Some(existing) if *existing != agent.name => {
                return Err(RollerError::invalid_argument("agents").with_reason(format!(
                    "node '{}' is claimed by both '{}' and '{}'",
                    agent.node, existing, agent.name
                )));
            }
            _ => {
                map.insert(agent.node.as_str(), agent.name.as_str());
            }
        }
    }
    Ok(map)
}
