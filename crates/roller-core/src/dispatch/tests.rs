use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use super::*;
use crate::{
    config::RetryPolicy,
    models::Target,
    store::MemoryConfigStore,
};

const PLAN: &str = "roller-upgrade";

#[derive(Debug, Clone)]
enum Script {
    Succeed(Vec<&'static str>),
    Fail(Vec<&'static str>),
    WaitForCancel,
}

/// Exec channel that plays back a script per node.
#[derive(Default)]
struct ScriptedExec {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExec {
    fn with(mut self, node: &str, script: Script) -> Self {
        self.scripts.insert(node.to_string(), script);
        self
    }

    fn called_nodes(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.node.clone())
            .collect()
    }
}

impl AgentExec for ScriptedExec {
    async fn exec(
        &self,
        request: &ExecRequest,
        sink: &mut dyn OutputSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .get(&request.node)
            .cloned()
            .unwrap_or(Script::Succeed(Vec::new()));

        match script {
            Script::Succeed(lines) => {
                for line in lines {
                    sink.write_line(&request.node, line);
                }
                Ok(())
            }
            Script::Fail(lines) => {
                for line in lines {
                    sink.write_line(&request.node, line);
                }
                Err(RollerError::ExecutionFailure {
                    node: request.node.clone(),
                    reason: "agent command exited with exit status: 1".to_string(),
                })
            }
            Script::WaitForCancel => {
                cancel.cancelled().await;
                Err(RollerError::Cancelled)
            }
        }
    }
}

fn target(name: &str, node: &str, status: Status) -> Target {
    Target {
        name: name.to_string(),
        node: node.to_string(),
        unique_id: "vol".to_string(),
        agent: format!("agent-{node}"),
        status,
    }
}

fn two_node_plan(ignore_errors: bool) -> Plan {
    Plan {
        parallelism: 2,
        ignore_errors,
        recreate: false,
        node: None,
        unique_id: None,
        batches: vec![
            vec![
                target("m-1", "n1", Status::Pending),
                target("m-2", "n1", Status::Pending),
            ],
            vec![target("m-3", "n2", Status::Pending)],
        ],
        status: Status::Pending,
    }
}

async fn store_with(plan: &Plan) -> PlanStore<MemoryConfigStore> {
    let store = PlanStore::new(Arc::new(MemoryConfigStore::new()), "kube-system")
        .with_policy(RetryPolicy::immediate(10));
    store.save(PLAN, plan).await.expect("Failed to save plan");
    store
}

fn status_of(plan: &Plan, name: &str) -> Option<Status> {
    plan.target(name).map(|t| t.status)
}

#[tokio::test]
async fn test_all_nodes_succeed() {
    let store = store_with(&two_node_plan(false)).await;
    let dispatcher = Dispatcher::new(ScriptedExec::default(), store.clone());
    let mut lines: Vec<String> = Vec::new();

    let report = dispatcher
        .run_upgrade(PLAN, &mut lines)
        .await
        .expect("run should succeed");

    assert_eq!(report.status, Status::Success);
    assert!(report.nodes.iter().all(|n| n.state == NodeState::Completed));
    assert_eq!(dispatcher.exec.called_nodes(), vec!["n1", "n2"]);

    let plan = store.load(PLAN).await.unwrap();
    assert_eq!(plan.status, Status::Success);
    assert!(plan.targets().all(|t| t.status == Status::Success));
}

#[tokio::test]
async fn test_exec_request_carries_agent_and_command() {
    let mut plan = two_node_plan(false);
    plan.recreate = true;
    let store = store_with(&plan).await;
    let dispatcher = Dispatcher::new(ScriptedExec::default(), store).with_settings(DispatchSettings {
        container: "plugin".to_string(),
        agent_command: "/bin/roller".to_string(),
        hook: Some("/usr/local/bin/remount".to_string()),
        tty: false,
    });

    dispatcher
        .run_upgrade(PLAN, &mut NullSink)
        .await
        .expect("run should succeed");

    let calls = dispatcher.exec.calls.lock().unwrap().clone();
    assert_eq!(calls[0].agent, "agent-n1");
    assert_eq!(calls[0].container, "plugin");
    assert!(!calls[0].tty);
    assert_eq!(
        calls[0].command,
        vec![
            "/bin/roller",
            "upgrade",
            "BATCH",
            "--plan",
            PLAN,
            "--namespace",
            "kube-system",
            "--node-name",
            "n1",
            "--hook",
            "/usr/local/bin/remount",
            "--recreate"
        ]
    );
}

#[tokio::test]
async fn test_failure_aborts_without_ignore_errors() {
    let store = store_with(&two_node_plan(false)).await;
    let exec = ScriptedExec::default().with("n1", Script::Fail(vec!["boom"]));
    let dispatcher = Dispatcher::new(exec, store.clone());

    let err = dispatcher.run_upgrade(PLAN, &mut NullSink).await.unwrap_err();

    assert!(matches!(err, RollerError::ExecutionFailure { ref node, .. } if node == "n1"));
    assert_eq!(dispatcher.exec.called_nodes(), vec!["n1"]);

    let plan = store.load(PLAN).await.unwrap();
    assert_eq!(status_of(&plan, "m-1"), Some(Status::Fail));
    assert_eq!(status_of(&plan, "m-2"), Some(Status::Fail));
    assert_eq!(status_of(&plan, "m-3"), Some(Status::Pending));
    assert_eq!(plan.status, Status::Fail);
}

#[tokio::test]
async fn test_failure_is_recorded_with_ignore_errors() {
    let store = store_with(&two_node_plan(true)).await;
    let exec = ScriptedExec::default().with("n1", Script::Fail(Vec::new()));
    let dispatcher = Dispatcher::new(exec, store.clone());

    let report = dispatcher
        .run_upgrade(PLAN, &mut NullSink)
        .await
        .expect("run should continue past the failure");

    assert_eq!(dispatcher.exec.called_nodes(), vec!["n1", "n2"]);
    assert_eq!(report.nodes[0].state, NodeState::Failed);
    assert!(report.nodes[0].error.is_some());
    assert_eq!(report.nodes[1].state, NodeState::Completed);
    assert_eq!(report.failed_nodes().count(), 1);
    assert_eq!(report.status, Status::Fail);

    let plan = store.load(PLAN).await.unwrap();
    assert_eq!(status_of(&plan, "m-3"), Some(Status::Success));
    assert_eq!(plan.status, Status::Fail);
}

#[tokio::test]
async fn test_markers_update_target_statuses() {
    let store = store_with(&two_node_plan(true)).await;
    let exec = ScriptedExec::default().with(
        "n1",
        Script::Fail(vec![
            "POD-START [m-1]",
            "POD-SUCCESS [m-1]",
            "POD-START [m-2]",
            "POD-FAIL [m-2]",
            // Not owned by n1, must be ignored.
            "POD-FAIL [m-3]",
            "BATCH-FAIL",
        ]),
    );
    let dispatcher = Dispatcher::new(exec, store.clone());
    let mut lines: Vec<String> = Vec::new();

    dispatcher
        .run_upgrade(PLAN, &mut lines)
        .await
        .expect("run should continue");

    let plan = store.load(PLAN).await.unwrap();
    assert_eq!(status_of(&plan, "m-1"), Some(Status::Success));
    assert_eq!(status_of(&plan, "m-2"), Some(Status::Fail));
    assert_eq!(status_of(&plan, "m-3"), Some(Status::Success));
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "[n1] POD-START [m-1]");
}

#[tokio::test]
async fn test_missing_agent_fails_node_without_exec() {
    let mut plan = two_node_plan(true);
    plan.batches[1][0].agent = String::new();
    let store = store_with(&plan).await;
    let dispatcher = Dispatcher::new(ScriptedExec::default(), store.clone());

    let report = dispatcher.run_upgrade(PLAN, &mut NullSink).await.unwrap();

    assert_eq!(dispatcher.exec.called_nodes(), vec!["n1"]);
    assert_eq!(report.nodes[1].state, NodeState::Failed);
    assert_eq!(report.nodes[1].agent, None);

    let plan = store.load(PLAN).await.unwrap();
    assert_eq!(status_of(&plan, "m-3"), Some(Status::Fail));
}

#[tokio::test]
async fn test_resume_skips_finished_nodes() {
    let mut plan = two_node_plan(false);
    plan.batches[0][0].status = Status::Success;
    plan.batches[0][1].status = Status::Success;
    plan.status = Status::Running;
    let store = store_with(&plan).await;
    let dispatcher = Dispatcher::new(ScriptedExec::default(), store);

    let report = dispatcher.run_upgrade(PLAN, &mut NullSink).await.unwrap();

    assert_eq!(dispatcher.exec.called_nodes(), vec!["n2"]);
    assert!(report.nodes[0].skipped);
    assert_eq!(report.nodes[0].state, NodeState::Completed);
    assert_eq!(report.status, Status::Success);
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let store = store_with(&two_node_plan(true)).await;
    let cancel = CancellationToken::new();
    let exec = ScriptedExec::default().with("n1", Script::WaitForCancel);
    let dispatcher = Dispatcher::new(exec, store.clone()).with_cancellation(cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let err = dispatcher.run_upgrade(PLAN, &mut NullSink).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, RollerError::Cancelled));
    assert_eq!(dispatcher.exec.called_nodes(), vec!["n1"]);

    let plan = store.load(PLAN).await.unwrap();
    assert_eq!(plan.status, Status::Running);
    assert_eq!(status_of(&plan, "m-3"), Some(Status::Pending));
}

/// Sink that pauses the rollout as soon as a node prints anything.
struct PausingSink(PauseSwitch);

impl OutputSink for PausingSink {
    fn write_line(&mut self, _node: &str, _line: &str) {
        self.0.pause();
    }
}

#[tokio::test]
async fn test_pause_holds_the_next_node_until_resumed() {
    let store = store_with(&two_node_plan(false)).await;
    let pause = PauseSwitch::new();
    let exec = ScriptedExec::default().with("n1", Script::Succeed(vec!["upgrading"]));
    let dispatcher = Dispatcher::new(exec, store.clone()).with_pause(pause.clone());
    let mut sink = PausingSink(pause.clone());

    let (report, ()) = tokio::join!(dispatcher.run_upgrade(PLAN, &mut sink), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pause.is_paused());
        assert_eq!(dispatcher.exec.called_nodes(), vec!["n1"]);
        pause.resume();
    });

    assert_eq!(report.expect("run should finish").status, Status::Success);
    assert_eq!(dispatcher.exec.called_nodes(), vec!["n1", "n2"]);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let store = store_with(&two_node_plan(false)).await;
    let pause = PauseSwitch::new();
    pause.pause();
    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(ScriptedExec::default(), store.clone())
        .with_pause(pause)
        .with_cancellation(cancel.clone());

    let mut sink = NullSink;
    let (result, ()) = tokio::join!(dispatcher.run_upgrade(PLAN, &mut sink), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    assert!(matches!(result.unwrap_err(), RollerError::Cancelled));
    assert!(dispatcher.exec.called_nodes().is_empty());
    assert_eq!(store.load(PLAN).await.unwrap().status, Status::Running);
}

#[test]
fn test_pause_switch_toggle() {
    let pause = PauseSwitch::default();
    assert!(!pause.is_paused());
    assert!(pause.toggle());
    assert!(!pause.toggle());
}

#[tokio::test]
async fn test_missing_plan_is_not_found() {
    let store = PlanStore::new(Arc::new(MemoryConfigStore::new()), "kube-system");
    let dispatcher = Dispatcher::new(ScriptedExec::default(), store);

    let err = dispatcher.run_upgrade(PLAN, &mut NullSink).await.unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_node_state_machine_edges() {
    assert!(NodeState::NotStarted.can_transition_to(NodeState::Dispatched));
    assert!(NodeState::NotStarted.can_transition_to(NodeState::Completed));
    assert!(NodeState::Dispatched.can_transition_to(NodeState::Failed));
    assert!(!NodeState::NotStarted.can_transition_to(NodeState::Failed));
    assert!(!NodeState::Failed.can_transition_to(NodeState::Completed));
    assert!(!NodeState::Completed.can_transition_to(NodeState::Dispatched));
}
