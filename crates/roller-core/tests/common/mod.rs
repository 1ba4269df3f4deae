use std::{collections::HashSet, sync::Arc};

use roller_core::{
    AgentExec, BatchSelection, ExecRequest, MountUpgrader, NodeAgent, OutputSink, PlanStore,
    PlanStoreBuilder, Result, RetryPolicy, RollerError, ShardLocks, SqliteConfigStore, Target,
    UpgradeMode,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Helper function to create a plan store over a temporary database
pub async fn create_test_store() -> (TempDir, PlanStore<SqliteConfigStore>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let store = PlanStoreBuilder::new()
        .with_database_path(Some(&db_path))
        .with_namespace(Some("roller-test"))
        .with_policy(RetryPolicy {
            initial_interval: std::time::Duration::from_millis(1),
            max_interval: std::time::Duration::from_millis(20),
            multiplier: 2.0,
            max_attempts: 100,
        })
        .build()
        .await
        .expect("Failed to create plan store");
    (temp_dir, store)
}

/// Upgrader that fails the named targets.
#[derive(Clone, Default)]
pub struct FlakyUpgrader {
    pub failing: HashSet<String>,
}

impl FlakyUpgrader {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl MountUpgrader for FlakyUpgrader {
    async fn upgrade(&self, target: &Target, _mode: UpgradeMode) -> Result<()> {
        if self.failing.contains(&target.name) {
            Err(RollerError::ExecutionFailure {
                node: target.node.clone(),
                reason: "mount did not come back".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Exec channel that runs the node agent in-process instead of in a
/// container, sharing the same plan store.
pub struct InProcessExec {
    pub store: PlanStore<SqliteConfigStore>,
    pub upgrader: FlakyUpgrader,
    pub locks: Arc<ShardLocks>,
}

impl InProcessExec {
    pub fn new(store: PlanStore<SqliteConfigStore>, upgrader: FlakyUpgrader) -> Self {
        Self {
            store,
            upgrader,
            locks: Arc::new(ShardLocks::new()),
        }
    }
}

/// Value following `flag` in an agent command line.
fn flag_value<'a>(command: &'a [String], flag: &str) -> Option<&'a str> {
    command
        .iter()
        .position(|arg| arg == flag)
        .and_then(|i| command.get(i + 1))
        .map(String::as_str)
}

impl AgentExec for InProcessExec {
    async fn exec(
        &self,
        request: &ExecRequest,
        sink: &mut dyn OutputSink,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let plan = flag_value(&request.command, "--plan").unwrap_or("roller-upgrade");
        let node = flag_value(&request.command, "--node-name").unwrap_or(&request.node);
        let recreate = request.command.iter().any(|arg| arg == "--recreate");

        let agent = NodeAgent::new(
            node,
            self.store.clone(),
            self.upgrader.clone(),
            Arc::clone(&self.locks),
        )
        .with_recreate(recreate);

        let outcome = agent.apply_batch(plan, &BatchSelection::All, sink).await?;
        if outcome.is_success() {
            Ok(())
        } else {
            Err(RollerError::ExecutionFailure {
                node: node.to_string(),
                reason: format!("{} target(s) failed", outcome.failed.len()),
            })
        }
    }
}
