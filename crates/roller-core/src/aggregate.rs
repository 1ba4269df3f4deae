//! Folding per-target statuses into an overall run status.

use serde::Serialize;

use crate::models::{Plan, Status};

/// Overall status of a plan.
///
/// `Running` while any target is still pending or running, otherwise `Fail`
/// if any target failed, otherwise `Success`. A plan without targets is
/// `Success`.
///
/// ```rust
/// use roller_core::{aggregate::aggregate, models::{Plan, Status}};
///
/// let plan = Plan {
///     parallelism: 1,
///     ignore_errors: false,
///     recreate: false,
///     node: None,
///     unique_id: None,
///     batches: Vec::new(),
///     status: Status::Pending,
/// };
/// assert_eq!(aggregate(&plan), Status::Success);
/// ```
pub fn aggregate(plan: &Plan) -> Status {
    let mut failed = false;
    for target in plan.targets() {
        match target.status {
            Status::Pending | Status::Running => return Status::Running,
            Status::Fail => failed = true,
            Status::Success => {}
        }
    }
    if failed {
        Status::Fail
    } else {
        Status::Success
    }
}

/// Whether the dispatcher may start another node.
pub fn should_dispatch(failed_so_far: usize, ignore_errors: bool) -> bool {
    ignore_errors || failed_so_far == 0
}

/// Target counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub fail: usize,
}

impl Progress {
    /// Counts the targets of `plan` by status.
    pub fn of(plan: &Plan) -> Self {
        plan.targets().fold(Self::default(), |mut progress, target| {
            match target.status {
                Status::Pending => progress.pending += 1,
                Status::Running => progress.running += 1,
                Status::Success => progress.success += 1,
                Status::Fail => progress.fail += 1,
            }
            progress
        })
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.success + self.fail
    }

    /// Terminal targets over total, 100 for an empty plan.
    pub fn percent_done(&self) -> u8 {
        match self.total() {
            0 => 100,
            total => ((self.success + self.fail) * 100 / total) as u8,
        }
    }
}
