//! Node-by-node dispatch of a stored plan.
//!
//! The [`Dispatcher`] walks the plan's nodes in order of first appearance and,
//! for each one, asks that node's agent to apply its batch over an
//! [`AgentExec`] channel. Nodes are handled one at a time; concurrency lives
//! inside each agent, bounded by the plan's parallelism.
//!
//! Each node moves through a small state machine:
//!
//! ```text
//! NotStarted ──▶ Dispatched ──▶ Completed
//!      │              │
//!      │              └───────▶ Failed
//!      └─────── (already done) ──▶ Completed
//! ```
//!
//! When a node fails, the plan's `ignore_errors` flag decides whether the next
//! node is started or the run stops and the error is returned. A
//! [`PauseSwitch`] holds the run between nodes until it is released. Every
//! change to the stored plan goes through [`PlanStore::update`].

use std::fmt;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    aggregate::{aggregate, should_dispatch},
    error::{Result, RollerError},
    models::{Plan, Status},
    store::{ConfigStore, PlanStore},
};

pub mod exec;
pub mod output;
pub mod pause;

#[cfg(test)]
mod tests;

pub use exec::{AgentExec, ExecRequest, KubectlExec};
pub use output::{Marker, MarkerSink, NullSink, OutputSink};
pub use pause::PauseSwitch;

/// Container inside the agent that runs the upgrade command.
pub const DEFAULT_CONTAINER: &str = "roller-agent";
/// Agent-side binary invoked inside the container.
pub const DEFAULT_AGENT_COMMAND: &str = "roller";

/// Dispatch state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    NotStarted,
    Dispatched,
    Completed,
    Failed,
}

impl NodeState {
    /// Whether `self -> next` is an edge of the node state machine.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (NodeState::NotStarted, NodeState::Dispatched)
                | (NodeState::NotStarted, NodeState::Completed)
                | (NodeState::Dispatched, NodeState::Completed)
                | (NodeState::Dispatched, NodeState::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::NotStarted => "not started",
            NodeState::Dispatched => "dispatched",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of dispatching one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub agent: Option<String>,
    pub state: NodeState,
    /// True when the node was already finished and no command was run
    pub skipped: bool,
    pub error: Option<String>,
}

impl NodeReport {
    fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            agent: None,
            state: NodeState::NotStarted,
            skipped: false,
            error: None,
        }
    }

    fn advance(&mut self, next: NodeState) {
        if self.state.can_transition_to(next) {
            debug!("Node {}: {} -> {}", self.node, self.state, next);
            self.state = next;
        } else {
            warn!(
                "Ignoring node transition {} -> {} for {}",
                self.state, next, self.node
            );
        }
    }
}

/// Result of a full dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub plan_name: String,
    pub nodes: Vec<NodeReport>,
    /// Aggregate status persisted at the end of the run
    pub status: Status,
}

impl RunReport {
    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.state == NodeState::Failed)
    }
}

/// How the agent command is invoked inside each node's agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub container: String,
    pub agent_command: String,
    /// Upgrade hook passed to the agent as `--hook`. When unset the agent
    /// falls back to its own `ROLLER_HOOK`.
    pub hook: Option<String>,
    pub tty: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            container: DEFAULT_CONTAINER.to_string(),
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
            hook: None,
            tty: true,
        }
    }
}

/// Drives a stored plan across its nodes.
pub struct Dispatcher<E, S> {
    exec: E,
    store: PlanStore<S>,
    settings: DispatchSettings,
    cancel: CancellationToken,
    pause: PauseSwitch,
}

impl<E: AgentExec, S: ConfigStore> Dispatcher<E, S> {
    pub fn new(exec: E, store: PlanStore<S>) -> Self {
        Self {
            exec,
            store,
            settings: DispatchSettings::default(),
            cancel: CancellationToken::new(),
            pause: PauseSwitch::new(),
        }
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stops the run, and any command in flight, when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Holds the run before the next node while `pause` is set.
    pub fn with_pause(mut self, pause: PauseSwitch) -> Self {
        self.pause = pause;
        self
    }

    /// Command executed inside the agent of `node`.
    pub fn agent_command(&self, plan_name: &str, node: &str, recreate: bool) -> Vec<String> {
        let mut command = vec![
            self.settings.agent_command.clone(),
            "upgrade".to_string(),
            "BATCH".to_string(),
            "--plan".to_string(),
            plan_name.to_string(),
            "--namespace".to_string(),
            self.store.namespace().to_string(),
            "--node-name".to_string(),
            node.to_string(),
        ];
        if let Some(hook) = &self.settings.hook {
            command.push("--hook".to_string());
            command.push(hook.clone());
        }
        if recreate {
            command.push("--recreate".to_string());
        }
        command
    }

    /// Runs the plan stored under `plan_name`.
    ///
    /// Nodes whose targets already all succeeded are skipped, so calling this
    /// again after an interrupted run resumes it. Output from every node is
    /// forwarded to `sink`.
    ///
    /// # Errors
    ///
    /// Returns the node's error when a node fails and the plan does not ignore
    /// errors, `RollerError::Cancelled` when the run is cancelled, and any
    /// plan store error. The plan keeps whatever progress was recorded.
    pub async fn run_upgrade(
        &self,
        plan_name: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<RunReport> {
        let plan = self
            .store
            .update(plan_name, |plan| {
                plan.status = Status::Running;
                Ok(())
            })
            .await?;

        let nodes = plan.nodes();
        info!(
            "Dispatching plan '{plan_name}' to {} node(s), {} target(s)",
            nodes.len(),
            plan.target_count()
        );

        let mut reports: Vec<NodeReport> = Vec::with_capacity(nodes.len());
        let mut failed = 0;

        for node in &nodes {
            if self.cancel.is_cancelled() {
                return self.abort(plan_name, RollerError::Cancelled, false).await;
            }
            if !should_dispatch(failed, plan.ignore_errors) {
                break;
            }
            if self.pause.is_paused() {
                info!("Rollout paused before node {node}");
                if !self.pause.wait_until_resumed(&self.cancel).await {
                    return self.abort(plan_name, RollerError::Cancelled, false).await;
                }
                info!("Rollout resumed");
            }

            let mut report = NodeReport::new(node);
            report.agent = plan.agent_for(node).map(String::from);

            if plan.node_targets(node).all(|t| t.status == Status::Success) {
                info!("Node {node} already upgraded, skipping");
                report.skipped = true;
                report.advance(NodeState::Completed);
                reports.push(report);
                continue;
            }

            report.advance(NodeState::Dispatched);
            let outcome = self.dispatch_node(plan_name, &plan, node, sink).await;

            match outcome {
                Ok(()) => {
                    self.settle_node(plan_name, node, Status::Success).await?;
                    report.advance(NodeState::Completed);
                    info!("Node {node} completed");
                }
                Err(RollerError::Cancelled) => {
                    return self.abort(plan_name, RollerError::Cancelled, false).await;
                }
                Err(e) => {
                    error!("Node {node} failed: {e}");
                    self.settle_node(plan_name, node, Status::Fail).await?;
                    report.advance(NodeState::Failed);
                    report.error = Some(e.to_string());
                    failed += 1;
                    if !plan.ignore_errors {
                        return self.abort(plan_name, e, true).await;
                    }
                }
            }
            reports.push(report);
        }

        let status = self.finish(plan_name, false).await?;
        info!("Plan '{plan_name}' finished: {status}");
        Ok(RunReport {
            plan_name: plan_name.to_string(),
            nodes: reports,
            status,
        })
    }

    async fn dispatch_node(
        &self,
        plan_name: &str,
        plan: &Plan,
        node: &str,
        sink: &mut dyn OutputSink,
    ) -> Result<()> {
        let agent = plan.agent_for(node).ok_or_else(|| RollerError::NotFound {
            kind: "Agent for node",
            name: node.to_string(),
        })?;

        let request = ExecRequest {
            namespace: self.store.namespace().to_string(),
            agent: agent.to_string(),
            node: node.to_string(),
            container: self.settings.container.clone(),
            command: self.agent_command(plan_name, node, plan.recreate),
            tty: self.settings.tty,
        };

        info!("Upgrading node {node} through agent {agent}");
        let mut markers = MarkerSink::new(sink);
        let result = self.exec.exec(&request, &mut markers, &self.cancel).await;
        let markers = markers.into_markers();

        self.apply_markers(plan_name, node, &markers).await?;
        result
    }

    /// Records the statuses reported by markers for targets on `node`.
    async fn apply_markers(&self, plan_name: &str, node: &str, markers: &[Marker]) -> Result<()> {
        let reported: Vec<(&str, Status)> =
            markers.iter().filter_map(Marker::target_status).collect();
        if reported.is_empty() {
            return Ok(());
        }

        let mut changed = 0;
        self.store
            .update(plan_name, |plan| {
                changed = 0;
                for (name, status) in &reported {
                    match plan.target_mut(name) {
                        Some(target) if target.node == node => {
                            if target.advance(*status) {
                                changed += 1;
                            }
                        }
                        Some(_) => warn!("Ignoring marker for {name}: not on node {node}"),
                        None => warn!("Ignoring marker for unknown target {name}"),
                    }
                }
                Ok(())
            })
            .await?;
        debug!("Applied {changed} status change(s) from node {node} output");
        Ok(())
    }

    /// Moves every non-terminal target of `node` to `status`.
    async fn settle_node(&self, plan_name: &str, node: &str, status: Status) -> Result<()> {
        self.store
            .update(plan_name, |plan| {
                plan.advance_node(node, status);
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Persists the final plan status. An aborted run is recorded as failed
    /// even if later nodes never started.
    async fn finish(&self, plan_name: &str, aborted: bool) -> Result<Status> {
        let plan = self
            .store
            .update(plan_name, |plan| {
                plan.status = if aborted { Status::Fail } else { aggregate(plan) };
                Ok(())
            })
            .await?;
        Ok(plan.status)
    }

    async fn abort(&self, plan_name: &str, cause: RollerError, failed: bool) -> Result<RunReport> {
        match self.finish(plan_name, failed).await {
            Ok(status) => warn!("Plan '{plan_name}' stopped with status {status}"),
            Err(e) => warn!("Failed to record final status of plan '{plan_name}': {e}"),
        }
        Err(cause)
    }
}
