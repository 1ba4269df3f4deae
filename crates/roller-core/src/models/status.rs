//! Status enumeration shared by targets and plans.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Type-safe enumeration of upgrade statuses.
///
/// Transitions are monotonic: a status may only move to a strictly higher rank
/// (`Pending` < `Running` < `Success`/`Fail`) and terminal statuses never
/// change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not started yet
    #[default]
    Pending,

    /// Upgrade in progress
    Running,

    /// Upgrade finished successfully
    Success,

    /// Upgrade failed
    Fail,
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "running" => Ok(Status::Running),
            "success" => Ok(Status::Success),
            "fail" | "failed" => Ok(Status::Fail),
            _ => Err(format!("Invalid status: {s}")),
        }
    }
}

impl Status {
    /// Lowercase wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Success => "success",
            Status::Fail => "fail",
        }
    }

    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Fail)
    }

    fn rank(&self) -> u8 {
        match self {
            Status::Pending => 0,
            Status::Running => 1,
            Status::Success | Status::Fail => 2,
        }
    }

    /// Whether moving from `self` to `next` respects monotonicity.
    ///
    /// Staying in the same status is accepted so that repeated reports are
    /// idempotent.
    ///
    /// ```rust
    /// use roller_core::models::Status;
    ///
    /// assert!(Status::Pending.can_transition_to(Status::Running));
    /// assert!(Status::Running.can_transition_to(Status::Fail));
    /// assert!(Status::Success.can_transition_to(Status::Success));
    /// assert!(!Status::Success.can_transition_to(Status::Fail));
    /// assert!(!Status::Running.can_transition_to(Status::Pending));
    /// ```
    pub fn can_transition_to(&self, next: Status) -> bool {
        *self == next || (!self.is_terminal() && next.rank() > self.rank())
    }

    /// Get status with a consistent icon for display.
    pub fn with_icon(&self) -> &'static str {
        match self {
            Status::Pending => "○ Pending",
            Status::Running => "➤ Running",
            Status::Success => "✓ Success",
            Status::Fail => "✗ Fail",
        }
    }
}
