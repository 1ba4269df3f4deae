//! Display implementations for plans, targets and statuses.
//!
//! Output is markdown, rendered by the CLI's terminal renderer.

use std::fmt;

use super::datetime::LocalDateTime;
use crate::{
    aggregate::{aggregate, Progress},
    models::{Plan, Status, Target},
    store::StoredPlan,
};

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "- **{}** on {}", self.name, self.node)?;
        if !self.unique_id.is_empty() {
            write!(f, ", volume `{}`", self.unique_id)?;
        }
        if self.agent.is_empty() {
            write!(f, ", no agent")?;
        } else {
            write!(f, ", agent {}", self.agent)?;
        }
        writeln!(f, ": {}", self.status.with_icon())
    }
}

impl Plan {
    fn fmt_details(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let progress = Progress::of(self);

        writeln!(f, "- Status: {}", self.status.with_icon())?;
        writeln!(f, "- Outcome so far: {}", aggregate(self).with_icon())?;
        writeln!(f, "- Parallelism: {}", self.parallelism)?;
        writeln!(
            f,
            "- Mode: {}",
            if self.recreate { "recreate" } else { "reload" }
        )?;
        writeln!(
            f,
            "- On node failure: {}",
            if self.ignore_errors { "continue" } else { "abort" }
        )?;
        if let Some(node) = &self.node {
            writeln!(f, "- Node filter: {node}")?;
        }
        if let Some(unique_id) = &self.unique_id {
            writeln!(f, "- Volume filter: {unique_id}")?;
        }
        writeln!(
            f,
            "- Progress: {}/{} done ({}%), {} failed",
            progress.success + progress.fail,
            progress.total(),
            progress.percent_done(),
            progress.fail
        )?;

        if self.batches.is_empty() {
            writeln!(f, "\nNo targets in this plan.")?;
            return Ok(());
        }

        for (index, batch) in self.batches.iter().enumerate() {
            writeln!(f, "\n## Batch {}", index + 1)?;
            writeln!(f)?;
            for target in batch {
                write!(f, "{target}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Upgrade plan")?;
        writeln!(f)?;
        self.fmt_details(f)
    }
}

impl fmt::Display for StoredPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {}", self.name)?;
        writeln!(f)?;
        writeln!(f, "- Namespace: {}", self.namespace)?;
        writeln!(f, "- Version: {}", self.version)?;
        writeln!(f, "- Updated: {}", LocalDateTime(&self.updated_at))?;
        self.plan.fmt_details(f)
    }
}
