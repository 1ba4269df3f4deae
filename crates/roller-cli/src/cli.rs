//! Command argument types and their handlers.
//!
//! Argument structs carry the clap derives and convert into the core
//! parameter types with `From`, keeping the core crate free of CLI concerns:
//!
//! ```text
//! User Input → CLI Args (clap) → Core Params → Partitioner / Dispatcher / Agent
//! ```

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::Args;
use log::info;
use roller_core::{
    build_plan,
    config::resolve_record_name,
    dispatch::{DEFAULT_AGENT_COMMAND, DEFAULT_CONTAINER},
    BatchSelection, CommandUpgrader, DispatchSettings, Dispatcher, Inventory, KubectlExec,
    NodeAgent, OperationStatus, PauseSwitch, Plan, PlanOptions, PlanStore, ShardLocks,
    SqliteConfigStore, Status,
};
use tokio_util::sync::CancellationToken;

use crate::{
    renderer::TerminalRenderer,
    sink::{AgentSink, ConsoleSink},
};

/// Plan-shaping options shared by `plan` and `rollout`.
#[derive(Args)]
pub struct PlanOptionArgs {
    #[arg(
        short,
        long,
        default_value_t = 1,
        help = "Maximum mounts upgraded at once on a node (1-50)"
    )]
    pub parallelism: usize,
    #[arg(long, help = "Keep going when a node fails")]
    pub ignore_errors: bool,
    #[arg(long, help = "Recreate mounts instead of reloading them")]
    pub recreate: bool,
    #[arg(long, help = "Only upgrade mounts on this node")]
    pub node: Option<String>,
    #[arg(long, help = "Only upgrade mounts of this volume")]
    pub unique_id: Option<String>,
    #[arg(
        long,
        help = "Name of the plan record (defaults to $ROLLER_UPGRADE_CONFIG or roller-upgrade)"
    )]
    pub name: Option<String>,
}

impl From<&PlanOptionArgs> for PlanOptions {
    fn from(val: &PlanOptionArgs) -> Self {
        PlanOptions {
            parallelism: val.parallelism,
            ignore_errors: val.ignore_errors,
            recreate: val.recreate,
            node: val.node.clone(),
            unique_id: val.unique_id.clone(),
        }
    }
}

/// Build and store a plan.
#[derive(Args)]
pub struct PlanArgs {
    #[arg(long, help = "JSON inventory file listing mounts and agents")]
    pub inventory: PathBuf,
    #[command(flatten)]
    pub options: PlanOptionArgs,
}

/// Build (or resume) a plan and dispatch it.
#[derive(Args)]
pub struct RolloutArgs {
    #[arg(
        long,
        required_unless_present = "resume",
        help = "JSON inventory file listing mounts and agents"
    )]
    pub inventory: Option<PathBuf>,
    #[command(flatten)]
    pub options: PlanOptionArgs,
    #[arg(long, help = "Continue the stored plan instead of building a new one")]
    pub resume: bool,
    #[arg(long, default_value = "kubectl", help = "Binary used to exec into agents")]
    pub kubectl: String,
    #[arg(long, default_value = DEFAULT_CONTAINER, help = "Agent container name")]
    pub container: String,
    #[arg(
        long,
        default_value = DEFAULT_AGENT_COMMAND,
        help = "Command run inside the agent container"
    )]
    pub agent_command: String,
    #[arg(long, help = "Do not allocate a TTY for the exec session")]
    pub no_tty: bool,
    #[arg(
        long,
        help = "Hook the agents run per target (agents fall back to their own $ROLLER_HOOK)"
    )]
    pub hook: Option<String>,
}

impl From<&RolloutArgs> for DispatchSettings {
    fn from(val: &RolloutArgs) -> Self {
        DispatchSettings {
            container: val.container.clone(),
            agent_command: val.agent_command.clone(),
            tty: !val.no_tty,
            hook: val.hook.clone(),
        }
    }
}

/// Show the stored plan.
#[derive(Args)]
pub struct ShowArgs {
    #[arg(long, help = "Name of the plan record")]
    pub name: Option<String>,
}

/// Agent-side upgrade of this node's targets.
#[derive(Args)]
pub struct UpgradeArgs {
    #[arg(help = "Target name, or BATCH for every target on this node")]
    pub target: String,
    #[arg(long, env = "NODE_NAME", help = "Node this agent runs on")]
    pub node_name: String,
    #[arg(
        long,
        env = "ROLLER_HOOK",
        help = "Program run for each target as `HOOK <target> <recreate|reload>`"
    )]
    pub hook: String,
    #[arg(long, help = "Name of the plan record")]
    pub plan: Option<String>,
    #[arg(long, help = "Recreate mounts even if the plan asks for a reload")]
    pub recreate: bool,
}

/// Runs commands against one plan store.
pub struct Cli {
    store: PlanStore<SqliteConfigStore>,
    renderer: TerminalRenderer,
    cancel: CancellationToken,
    pause: PauseSwitch,
}

impl Cli {
    pub fn new(
        store: PlanStore<SqliteConfigStore>,
        renderer: TerminalRenderer,
        cancel: CancellationToken,
        pause: PauseSwitch,
    ) -> Self {
        Self {
            store,
            renderer,
            cancel,
            pause,
        }
    }

    pub async fn handle_plan(&self, args: PlanArgs) -> Result<()> {
        let name = resolve_record_name(args.options.name.as_deref());
        let plan = self
            .build_and_save(&name, &args.inventory, &PlanOptions::from(&args.options))
            .await?;

        self.renderer.render(&plan.to_string())?;
        self.renderer.render(
            &OperationStatus::success(format!(
                "Saved plan '{name}' in namespace {}",
                self.store.namespace()
            ))
            .to_string(),
        )
    }

    pub async fn handle_rollout(&self, args: RolloutArgs) -> Result<()> {
        let name = resolve_record_name(args.options.name.as_deref());

        if args.resume {
            let stored = self
                .store
                .load_record(&name)
                .await
                .with_context(|| format!("Failed to resume plan '{name}'"))?;
            info!("Resuming plan '{name}' at version {}", stored.version);
        } else if let Some(inventory) = &args.inventory {
            self.build_and_save(&name, inventory, &PlanOptions::from(&args.options))
                .await?;
        }

        let exec = KubectlExec::new(args.kubectl.as_str());
        let dispatcher = Dispatcher::new(exec, self.store.clone())
            .with_settings(DispatchSettings::from(&args))
            .with_cancellation(self.cancel.clone())
            .with_pause(self.pause.clone());

        let report = dispatcher
            .run_upgrade(&name, &mut ConsoleSink)
            .await
            .with_context(|| format!("Rollout of plan '{name}' stopped"))?;

        self.renderer.render(&report.to_string())?;
        if report.status == Status::Fail {
            let failed = report.failed_nodes().count();
            self.renderer.render(
                &OperationStatus::failure(format!("Failed nodes: {failed}")).to_string(),
            )?;
            bail!("Rollout of plan '{name}' finished with {failed} failed node(s)");
        }
        Ok(())
    }

    pub async fn handle_show(&self, args: ShowArgs) -> Result<()> {
        let name = resolve_record_name(args.name.as_deref());
        let stored = self
            .store
            .load_record(&name)
            .await
            .with_context(|| format!("Failed to load plan '{name}'"))?;
        self.renderer.render(&stored.to_string())
    }

    /// Output goes to stdout unrendered: the dispatcher parses it for
    /// markers.
    pub async fn handle_upgrade(&self, args: UpgradeArgs) -> Result<()> {
        let name = resolve_record_name(args.plan.as_deref());
        let agent = NodeAgent::new(
            args.node_name.as_str(),
            self.store.clone(),
            CommandUpgrader::new(args.hook.as_str()),
            Arc::new(ShardLocks::new()),
        )
        .with_recreate(args.recreate);

        let outcome = agent
            .apply_batch(&name, &BatchSelection::parse(&args.target), &mut AgentSink)
            .await
            .with_context(|| format!("Failed to upgrade node {}", args.node_name))?;
        info!("Batch on node {} finished:\n{outcome}", args.node_name);

        if !outcome.is_success() {
            bail!(
                "Upgrade on node {} failed for: {}",
                args.node_name,
                outcome.failed.join(", ")
            );
        }
        Ok(())
    }

    async fn build_and_save(
        &self,
        name: &str,
        inventory: &Path,
        options: &PlanOptions,
    ) -> Result<Plan> {
        let inventory = Inventory::from_path(inventory).context("Failed to read inventory")?;
        let plan = build_plan(inventory.mounts, options, &inventory.agents)
            .context("Failed to build plan")?;
        self.store
            .save(name, &plan)
            .await
            .with_context(|| format!("Failed to save plan '{name}'"))
    }
}
