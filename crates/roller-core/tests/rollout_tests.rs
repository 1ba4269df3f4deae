mod common;

use std::io::Write;

use roller_core::{
    build_plan, AgentInstance, Dispatcher, Inventory, MountInstance, NodeState, PlanOptions,
    RollerError, Status,
};

use common::{create_test_store, FlakyUpgrader, InProcessExec};

const PLAN: &str = "nightly-upgrade";

fn inventory() -> Inventory {
    Inventory {
        mounts: vec![
            MountInstance::new("n2-a", "n2", "vol-1"),
            MountInstance::new("n1-a", "n1", "vol-1"),
            MountInstance::new("n1-b", "n1", "vol-2"),
            MountInstance::new("n3-a", "n3", "vol-1"),
            MountInstance::new("n1-c", "n1", "vol-2"),
        ],
        agents: vec![
            AgentInstance::new("agent-n1", "n1"),
            AgentInstance::new("agent-n2", "n2"),
            AgentInstance::new("agent-n3", "n3"),
        ],
    }
}

fn options(ignore_errors: bool) -> PlanOptions {
    PlanOptions {
        parallelism: 2,
        ignore_errors,
        recreate: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_rollout_end_to_end() {
    let (_temp_dir, store) = create_test_store().await;
    let inventory = inventory();
    let plan = build_plan(inventory.mounts, &options(false), &inventory.agents)
        .expect("Failed to build plan");
    store.save(PLAN, &plan).await.expect("Failed to save plan");

    let exec = InProcessExec::new(store.clone(), FlakyUpgrader::default());
    let dispatcher = Dispatcher::new(exec, store.clone());
    let mut lines: Vec<String> = Vec::new();

    let report = dispatcher
        .run_upgrade(PLAN, &mut lines)
        .await
        .expect("rollout should succeed");

    assert_eq!(report.status, Status::Success);
    let nodes: Vec<&str> = report.nodes.iter().map(|n| n.node.as_str()).collect();
    assert_eq!(nodes, vec!["n1", "n2", "n3"]);

    let stored = store.load_record(PLAN).await.expect("Failed to load plan");
    assert_eq!(stored.namespace, "roller-test");
    assert_eq!(stored.plan.status, Status::Success);
    assert!(stored.plan.targets().all(|t| t.status == Status::Success));
    assert!(lines.contains(&"[n1] POD-SUCCESS [n1-c]".to_string()));
    assert!(lines.contains(&"[n3] BATCH-SUCCESS".to_string()));
}

#[tokio::test]
async fn test_failed_node_aborts_and_resume_finishes() {
    let (_temp_dir, store) = create_test_store().await;
    let inventory = inventory();
    let plan = build_plan(inventory.mounts, &options(false), &inventory.agents)
        .expect("Failed to build plan");
    store.save(PLAN, &plan).await.expect("Failed to save plan");

    let exec = InProcessExec::new(store.clone(), FlakyUpgrader::failing(&["n2-a"]));
    let err = Dispatcher::new(exec, store.clone())
        .run_upgrade(PLAN, &mut Vec::<String>::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RollerError::ExecutionFailure { ref node, .. } if node == "n2"));

    let stored = store.load(PLAN).await.unwrap();
    assert_eq!(stored.status, Status::Fail);
    assert_eq!(stored.target("n1-a").map(|t| t.status), Some(Status::Success));
    assert_eq!(stored.target("n2-a").map(|t| t.status), Some(Status::Fail));
    assert_eq!(stored.target("n3-a").map(|t| t.status), Some(Status::Pending));

    // A rerun skips n1, leaves the failed target failed and finishes n3.
    let exec = InProcessExec::new(store.clone(), FlakyUpgrader::default());
    let report = Dispatcher::new(exec, store.clone())
        .run_upgrade(PLAN, &mut Vec::<String>::new())
        .await
        .expect("rerun should complete");

    assert!(report.nodes[0].skipped);
    assert_eq!(report.nodes[1].state, NodeState::Completed);
    assert_eq!(report.status, Status::Fail);

    let stored = store.load(PLAN).await.unwrap();
    assert_eq!(stored.target("n2-a").map(|t| t.status), Some(Status::Fail));
    assert_eq!(stored.target("n3-a").map(|t| t.status), Some(Status::Success));
}

#[tokio::test]
async fn test_ignore_errors_visits_every_node() {
    let (_temp_dir, store) = create_test_store().await;
    let inventory = inventory();
    let plan = build_plan(inventory.mounts, &options(true), &inventory.agents)
        .expect("Failed to build plan");
    store.save(PLAN, &plan).await.expect("Failed to save plan");

    let exec = InProcessExec::new(store.clone(), FlakyUpgrader::failing(&["n1-b"]));
    let report = Dispatcher::new(exec, store.clone())
        .run_upgrade(PLAN, &mut Vec::<String>::new())
        .await
        .expect("rollout should continue past failures");

    assert_eq!(report.status, Status::Fail);
    assert_eq!(report.nodes[0].state, NodeState::Failed);
    assert_eq!(report.nodes[2].state, NodeState::Completed);

    let stored = store.load(PLAN).await.unwrap();
    assert_eq!(stored.target("n1-b").map(|t| t.status), Some(Status::Fail));
    assert_eq!(stored.target("n1-a").map(|t| t.status), Some(Status::Success));
    assert_eq!(stored.target("n3-a").map(|t| t.status), Some(Status::Success));
}

#[tokio::test]
async fn test_inventory_file_round_trip_into_plan() {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    write!(
        file,
        r#"{{
            "mounts": [
                {{"name": "m-2", "node": "n1", "uniqueId": "vol-b"}},
                {{"name": "m-1", "node": "n1", "uniqueId": "vol-a"}}
            ],
            "agents": [{{"name": "agent-n1", "node": "n1"}}]
        }}"#
    )
    .expect("Failed to write inventory");

    let inventory = Inventory::from_path(file.path()).expect("Failed to read inventory");
    let plan = build_plan(inventory.mounts, &PlanOptions::default(), &inventory.agents)
        .expect("Failed to build plan");

    assert_eq!(plan.batches.len(), 2);
    assert_eq!(plan.batches[0][0].name, "m-1");
    assert_eq!(plan.batches[0][0].agent, "agent-n1");
}

#[tokio::test]
async fn test_malformed_inventory_is_decode_error() {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    write!(file, "not json").expect("Failed to write inventory");

    let err = Inventory::from_path(file.path()).unwrap_err();
    assert!(matches!(err, RollerError::Decode { .. }));
}
