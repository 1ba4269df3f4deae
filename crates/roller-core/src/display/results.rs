//! Display implementations for dispatch and agent results.

use std::fmt;

use crate::{
    agent::BatchOutcome,
    dispatch::{NodeReport, NodeState, RunReport},
};

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.state {
            NodeState::Completed => "✓",
            NodeState::Failed => "✗",
            NodeState::Dispatched => "➤",
            NodeState::NotStarted => "○",
        };
        write!(f, "- {icon} **{}**", self.node)?;
        if let Some(agent) = &self.agent {
            write!(f, " via {agent}")?;
        }
        write!(f, ": {}", self.state)?;
        if self.skipped {
            write!(f, " (already upgraded)")?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {error}")?;
        }
        writeln!(f)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Rollout of {}", self.plan_name)?;
        writeln!(f)?;
        writeln!(f, "- Result: {}", self.status.with_icon())?;
        writeln!(f, "- Nodes: {}", self.nodes.len())?;
        writeln!(f, "- Failed nodes: {}", self.failed_nodes().count())?;
        if !self.nodes.is_empty() {
            writeln!(f, "\n## Nodes")?;
            writeln!(f)?;
            for node in &self.nodes {
                write!(f, "{node}")?;
            }
        }
        Ok(())
    }
}

/// Writes `- label: a, b, c` when `names` is non-empty.
fn write_names(f: &mut fmt::Formatter<'_>, label: &str, names: &[String]) -> fmt::Result {
    if names.is_empty() {
        return Ok(());
    }
    writeln!(f, "- {label}: {}", names.join(", "))
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_names(f, "Succeeded", &self.succeeded)?;
        write_names(f, "Failed", &self.failed)?;
        write_names(f, "Skipped", &self.skipped)?;
        write_names(f, "Not started", &self.not_started)?;
        if self.succeeded.is_empty()
            && self.failed.is_empty()
            && self.skipped.is_empty()
            && self.not_started.is_empty()
        {
            writeln!(f, "- Nothing to upgrade")?;
        }
        Ok(())
    }
}
