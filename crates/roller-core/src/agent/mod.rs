//! Agent-side execution of a node's share of a plan.
//!
//! A [`NodeAgent`] runs on one node. It loads the shared plan, picks the
//! targets assigned to its node and upgrades them batch by batch, all targets
//! of a batch concurrently. Every status change is written back through the
//! plan store's compare-and-swap loop, so agents on different nodes can update
//! the same record without losing each other's writes.
//!
//! Progress is reported as marker lines on the output sink, which the
//! dispatcher parses on the other end of the exec channel:
//!
//! ```text
//! POD-START [mount-a]
//! POD-SUCCESS [mount-a]
//! POD-START [mount-b]
//! POD-FAIL [mount-b]
//! BATCH-FAIL
//! ```

use std::{
    future::Future,
    process::Stdio,
    sync::{Arc, Mutex},
};

use futures::future::join_all;
use log::{debug, error, info};
use serde::Serialize;
use tokio::process::Command;

use crate::{
    dispatch::output::{Marker, OutputSink},
    error::{Result, RollerError},
    locks::ShardLocks,
    models::{Plan, Status, Target},
    params::BatchSelection,
    store::{ConfigStore, PlanStore},
};


/// How a mount is brought onto the new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeMode {
    /// Replace the mount process
    Recreate,
    /// Hot-reload the mount in place
    Reload,
}

impl UpgradeMode {
    pub fn from_recreate(recreate: bool) -> Self {
        if recreate {
            Self::Recreate
        } else {
            Self::Reload
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recreate => "recreate",
            Self::Reload => "reload",
        }
    }
}

/// Performs the physical upgrade of a single mount.
pub trait MountUpgrader: Send + Sync {
    fn upgrade(
        &self,
        target: &Target,
        mode: UpgradeMode,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Runs a hook program per target: `PROGRAM <target> <recreate|reload>`.
///
/// The target's node and volume id are exported as `ROLLER_TARGET_NODE` and
/// `ROLLER_TARGET_UNIQUE_ID`. A non-zero exit fails the target.
#[derive(Debug, Clone)]
pub struct CommandUpgrader {
    program: String,
}

impl CommandUpgrader {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl MountUpgrader for CommandUpgrader {
    async fn upgrade(&self, target: &Target, mode: UpgradeMode) -> Result<()> {
        let failure = |reason: String| RollerError::ExecutionFailure {
            node: target.node.clone(),
            reason,
        };

        let status = Command::new(&self.program)
            .arg(&target.name)
            .arg(mode.as_str())
            .env("ROLLER_TARGET_NODE", &target.node)
            .env("ROLLER_TARGET_UNIQUE_ID", &target.unique_id)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| failure(format!("failed to start hook {}: {e}", self.program)))?;

        if status.success() {
            Ok(())
        } else {
            Err(failure(format!(
                "hook for {} exited with {status}",
                target.name
            )))
        }
    }
}

/// What an agent did with its selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Already terminal when the agent reached them
    pub skipped: Vec<String>,
    /// Left untouched because an earlier batch failed
    pub not_started: Vec<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.not_started.is_empty()
    }
}

type SharedSink<'a> = Mutex<&'a mut dyn OutputSink>;

/// Upgrades the targets of one node.
pub struct NodeAgent<U, S> {
    node: String,
    store: PlanStore<S>,
    upgrader: U,
    locks: Arc<ShardLocks>,
    force_recreate: bool,
}

impl<U: MountUpgrader, S: ConfigStore> NodeAgent<U, S> {
    pub fn new(
        node: impl Into<String>,
        store: PlanStore<S>,
        upgrader: U,
        locks: Arc<ShardLocks>,
    ) -> Self {
        Self {
            node: node.into(),
            store,
            upgrader,
            locks,
            force_recreate: false,
        }
    }

    /// Recreate mounts even if the plan asks for a reload.
    pub fn with_recreate(mut self, recreate: bool) -> Self {
        self.force_recreate = recreate;
        self
    }

    /// Applies the selected targets of this node from the plan `plan_name`.
    ///
    /// # Errors
    ///
    /// Returns `RollerError::NotFound` if the plan is missing or the selected
    /// target is not assigned to this node, `RollerError::Decode` for an
    /// unreadable plan and any error from writing statuses back. A failing
    /// upgrade is not an error; it is reported in the outcome.
    pub async fn apply_batch(
        &self,
        plan_name: &str,
        selection: &BatchSelection,
        sink: &mut dyn OutputSink,
    ) -> Result<BatchOutcome> {
        let plan = self.store.load(plan_name).await?;

        if let BatchSelection::Target(name) = selection {
            if !plan.node_targets(&self.node).any(|t| &t.name == name) {
                return Err(RollerError::NotFound {
                    kind: "Target on this node",
                    name: name.clone(),
                });
            }
        }

        let mode = UpgradeMode::from_recreate(self.force_recreate || plan.recreate);
        let batches: Vec<Vec<Target>> = plan
            .batches
            .iter()
            .map(|batch| {
                batch
                    .iter()
                    .filter(|t| t.node == self.node && selection.includes(&t.name))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|batch| !batch.is_empty())
            .collect();
        info!(
            "Node {} applying {} batch(es) of plan '{plan_name}' in {} mode",
            self.node,
            batches.len(),
            mode.as_str()
        );

        let sink: SharedSink<'_> = Mutex::new(sink);
        let mut outcome = BatchOutcome::default();
        let mut halted = false;

        for batch in batches {
            if halted {
                outcome.not_started.extend(
                    batch
                        .into_iter()
                        .filter(|t| !t.status.is_terminal())
                        .map(|t| t.name),
                );
                continue;
            }

            let (done, pending): (Vec<Target>, Vec<Target>) =
                batch.into_iter().partition(|t| t.status.is_terminal());
            outcome.skipped.extend(done.into_iter().map(|t| t.name));

            let results = join_all(
                pending
                    .iter()
                    .map(|target| self.upgrade_target(plan_name, target, mode, &sink)),
            )
            .await;

            for (target, result) in pending.into_iter().zip(results) {
                match result? {
                    None => outcome.skipped.push(target.name),
                    Some(Status::Success) => outcome.succeeded.push(target.name),
                    Some(_) => outcome.failed.push(target.name),
                }
            }

            if !outcome.failed.is_empty() && !plan.ignore_errors {
                halted = true;
            }
        }

        let summary = if outcome.is_success() {
            Marker::BatchSucceeded
        } else {
            Marker::BatchFailed
        };
        emit(&sink, &self.node, &summary);
        info!(
            "Node {} finished: {} succeeded, {} failed, {} skipped, {} not started",
            self.node,
            outcome.succeeded.len(),
            outcome.failed.len(),
            outcome.skipped.len(),
            outcome.not_started.len()
        );
        Ok(outcome)
    }

    /// Upgrades one target under its shard lock. Returns `None` when another
    /// writer already finished it, otherwise the terminal status reached.
    async fn upgrade_target(
        &self,
        plan_name: &str,
        target: &Target,
        mode: UpgradeMode,
        sink: &SharedSink<'_>,
    ) -> Result<Option<Status>> {
        let _guard = self.locks.lock_for(&target.name).lock().await;

        if !self.claim(plan_name, &target.name).await? {
            debug!("Target {} already finished elsewhere", target.name);
            return Ok(None);
        }
        emit(sink, &self.node, &Marker::TargetStarted(target.name.clone()));

        let status = match self.upgrader.upgrade(target, mode).await {
            Ok(()) => Status::Success,
            Err(e) => {
                error!("Upgrade of {} failed: {e}", target.name);
                Status::Fail
            }
        };

        self.store
            .update(plan_name, |plan| {
                target_in(plan, &target.name)?.advance(status);
                Ok(())
            })
            .await?;

        let marker = match status {
            Status::Success => Marker::TargetSucceeded(target.name.clone()),
            _ => Marker::TargetFailed(target.name.clone()),
        };
        emit(sink, &self.node, &marker);
        Ok(Some(status))
    }

    /// Marks the target running unless it is already terminal in the store.
    async fn claim(&self, plan_name: &str, name: &str) -> Result<bool> {
        let mut claimed = false;
        self.store
            .update(plan_name, |plan| {
                let target = target_in(plan, name)?;
                claimed = !target.status.is_terminal();
                target.advance(Status::Running);
                Ok(())
            })
            .await?;
        Ok(claimed)
    }
}

fn target_in<'a>(plan: &'a mut Plan, name: &str) -> Result<&'a mut Target> {
    plan.target_mut(name).ok_or_else(|| RollerError::NotFound {
        kind: "Target",
        name: name.to_string(),
    })
}

fn emit(sink: &SharedSink<'_>, node: &str, marker: &Marker) {
    let mut sink = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    sink.write_line(node, &marker.to_string());
}
