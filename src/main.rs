use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use bulkmint::cli::{Cli, Command, TreeArgs};
use bulkmint::config::BulkmintConfig;
use bulkmint::gateway::Gateway;
use bulkmint::ledger::RpcLedgerClient;
use bulkmint::planner::{CapacityPlanner, PlanRequest};
use bulkmint::state_machine::{AuditRecord, JobOptions, Record};
use bulkmint::store::FileJobStore;
use bulkmint::{Orchestrator, ui};

type CliOrchestrator = Orchestrator<RpcLedgerClient, FileJobStore>;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => BulkmintConfig::load_from(path)?,
        None => BulkmintConfig::load()?,
    };

    match cli.command {
        Command::Plan { tree } => {
            let plan = CapacityPlanner::plan(&plan_request(&tree), None)?;
            ui::print_plan(&plan);
        }
        Command::Mint {
            records,
            tree,
            batch_size,
            max_failed,
        } => {
            let orch = build(&config).await?;
            if let Err(err) = orch.refresh_fee().await {
                warn!("could not sample the mint fee, planning with the default: {err}");
            }
            let records = read_records(&records)?;
            let defaults = config.orchestrator_config().job_options;
            let options = JobOptions {
                batch_size: batch_size.unwrap_or(defaults.batch_size).max(1),
                max_failed_items: max_failed.or(defaults.max_failed_items),
            };

            let id = orch
                .create_job_with(records, plan_request(&tree), options)
                .await?;
            orch.start(&id).await?;
            let job = orch.get_status(&id).await?;
            if let Some(params) = job.tree_params {
                println!(
                    "job {id}: depth {} buffer {} canopy {}",
                    params.depth, params.buffer_width, params.canopy_depth
                );
            }
            follow(&orch, &id).await?;
        }
        Command::Status { job_id } => {
            let orch = build(&config).await?;
            orch.recover().await?;
            match job_id {
                Some(id) => {
                    let job = orch.get_status(&id).await?;
                    ui::print_job_line(&job, &orch.progress(&id).await?);
                    ui::print_audit(&AuditRecord::from_job(&job));
                }
                None => {
                    for job in orch.list_jobs().await {
                        ui::print_job_line(&job, &orch.progress(&job.id).await?);
                    }
                }
            }
        }
        Command::Resume { job_id } => {
            let orch = build(&config).await?;
            orch.recover().await?;
            orch.resume(&job_id).await?;
            follow(&orch, &job_id).await?;
        }
        Command::Cancel { job_id } => {
            let orch = build(&config).await?;
            orch.recover().await?;
            orch.cancel(&job_id).await?;
            let job = orch.get_status(&job_id).await?;
            ui::print_audit(&AuditRecord::from_job(&job));
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "bulkmint=debug" } else { "bulkmint=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Logs go to stderr so they do not tear the progress bar on stdout.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn build(config: &BulkmintConfig) -> Result<CliOrchestrator> {
    let client = RpcLedgerClient::new(config.rpc_url.clone(), config.api_key())?;
    let store = FileJobStore::open(&config.store_dir)
        .await
        .with_context(|| format!("opening job store at {}", config.store_dir.display()))?;
    Ok(Orchestrator::new(
        Arc::new(client),
        Arc::new(Gateway::new(config.gateway_config())),
        Arc::new(store),
        config.orchestrator_config(),
    ))
}

fn plan_request(tree: &TreeArgs) -> PlanRequest {
    PlanRequest {
        target_capacity: tree.capacity,
        buffer_width: tree.buffer,
        canopy_depth: tree.canopy,
    }
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<Record> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing records from {}", path.display()))?;
    if records.is_empty() {
        bail!("{} contains no records", path.display());
    }
    Ok(records)
}

/// Render progress until the job is terminal. Ctrl-C pauses the job at the
/// next batch boundary and returns once the in-flight batch has drained.
async fn follow(orch: &CliOrchestrator, id: &str) -> Result<()> {
    let job = orch.get_status(id).await?;
    let progress = ui::JobProgress::start(id, job.total_items);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                progress.notice("interrupted, pausing at the next batch boundary");
                if let Err(err) = orch.pause(id).await {
                    warn!("could not pause job {id}: {err}");
                }
                let job = orch.quiesce(id).await?;
                progress.complete(&job);
                return Ok(());
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                progress.update(&orch.progress(id).await?);
                let job = orch.get_status(id).await?;
                if job.status.is_terminal() {
                    progress.complete(&job);
                    ui::print_audit(&AuditRecord::from_job(&job));
                    return Ok(());
                }
            }
        }
    }
}
