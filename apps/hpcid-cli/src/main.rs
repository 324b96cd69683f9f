//! hpcid - provisioning passes for the HPC cluster
//!
//! Each subcommand runs one reconciliation pass against the backends named
//! in the configuration directory and reports the outcome. Nothing is
//! changed unless `--execute` is given.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use hpcid_provisioning::reconciliation::{
    resolve_membership, AssociationReconciler, HomeDirReconciler, HomeRepairReconciler,
    MembershipSelection, PassReport, ReconciliationConfig, ReconciliationEngine,
    SymlinkReconciler,
};
use hpcid_provisioning::settings::DEFAULT_CONFIG_DIR;
use hpcid_provisioning::{CapabilitySet, ClientRegistry, RunMode};

mod error;
mod logging;

use error::{CliError, CliResult};
use logging::LogFormat;

/// hpcid - HPC identity provisioning
#[derive(Debug, Parser)]
#[command(name = "hpcid")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding the per-backend YAML files
    #[arg(long, global = true, env = "HPCID_CONFIGDIR", default_value = DEFAULT_CONFIG_DIR)]
    configdir: PathBuf,

    /// Cluster the pass runs for
    #[arg(long, global = true, default_value = "m3")]
    cluster: String,

    /// Apply changes. Without this flag every pass is a dry run.
    #[arg(long, global = true)]
    execute: bool,

    /// Maximum number of items converged in one pass
    #[arg(short = 'n', long = "number", global = true, default_value_t = 10)]
    number: usize,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create scheduler accounts and project storage for eligible projects
    Provisionproject,

    /// Add missing scheduler associations for project members
    Provisionslurmassocs(SelectionArgs),

    /// Create project links in members' home directories
    Provisionsymlinks(SelectionArgs),

    /// Create links and scheduler associations from one membership lookup
    Userlinks(SelectionArgs),

    /// Create missing home directories for the cluster's users
    Nfs,

    /// Fix ownership, skeleton and SSH keys of existing home directories
    Home,
}

/// Narrows association and link passes to one user or one group.
#[derive(Debug, Args)]
struct SelectionArgs {
    /// Only the projects this user belongs to
    #[arg(long, conflicts_with = "groupid")]
    username: Option<String>,

    /// Only this project group
    #[arg(long)]
    groupid: Option<String>,
}

impl SelectionArgs {
    fn selection(&self) -> MembershipSelection {
        MembershipSelection::from_args(self.username.clone(), self.groupid.clone())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.log_format) {
        e.print();
        std::process::exit(e.exit_code());
    }

    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "Pass aborted");
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let mode = RunMode::from_execute(cli.execute);
    let config = ReconciliationConfig::new(cli.cluster.clone(), cli.number);
    if config.batch_limit == 0 {
        return Err(CliError::Config("--number must be at least 1".to_string()));
    }
    info!(
        command = ?cli.command,
        cluster = %config.cluster,
        dry_run = mode.is_dry_run(),
        limit = config.batch_limit,
        "Starting pass"
    );

    let build = |capabilities: &CapabilitySet| {
        ClientRegistry::build(&cli.configdir, capabilities, mode, &cli.cluster)
    };

    let reports = match &cli.command {
        Commands::Provisionproject => {
            let registry = build(&ReconciliationEngine::capabilities())?;
            let report = ReconciliationEngine::new(&registry, config).run().await?;
            deliver(&registry, &report).await;
            vec![report]
        }
        Commands::Provisionslurmassocs(args) => {
            let registry = build(&AssociationReconciler::capabilities())?;
            let report = AssociationReconciler::new(&registry, config)
                .run(&args.selection())
                .await?;
            deliver(&registry, &report).await;
            vec![report]
        }
        Commands::Provisionsymlinks(args) => {
            let registry = build(&SymlinkReconciler::capabilities())?;
            let report = SymlinkReconciler::new(&registry, config)
                .run(&args.selection())
                .await?;
            deliver(&registry, &report).await;
            vec![report]
        }
        Commands::Userlinks(args) => {
            let capabilities =
                SymlinkReconciler::capabilities().union(&AssociationReconciler::capabilities());
            let registry = build(&capabilities)?;
            let desired = resolve_membership(
                &args.selection(),
                registry.allocations()?,
                registry.directory()?,
                config.family(),
            )
            .await?;

            let links = SymlinkReconciler::new(&registry, config.clone())
                .reconcile(&desired)
                .await?;
            deliver(&registry, &links).await;
            let associations = AssociationReconciler::new(&registry, config)
                .reconcile(&desired)
                .await?;
            deliver(&registry, &associations).await;
            vec![links, associations]
        }
        Commands::Nfs => {
            let registry = build(&HomeDirReconciler::capabilities())?;
            let report = HomeDirReconciler::new(&registry, config).run().await?;
            deliver(&registry, &report).await;
            vec![report]
        }
        Commands::Home => {
            let registry = build(&HomeRepairReconciler::capabilities())?;
            let report = HomeRepairReconciler::new(&registry, config).run().await?;
            deliver(&registry, &report).await;
            vec![report]
        }
    };

    check_reports(&reports)
}

/// Send the pass notification. A failed delivery is logged and does not
/// change the exit code.
async fn deliver(registry: &ClientRegistry, report: &PassReport) {
    let notification = report.to_notification();
    let result = match registry.reporter() {
        Ok(reporter) => reporter.report(&notification).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(true) => info!(job = %notification.job_name, "Notification sent"),
        Ok(false) => {}
        Err(e) => error!(
            job = %notification.job_name,
            error = %e,
            error_code = e.error_code(),
            "Failed to deliver notification"
        ),
    }
}

/// First report with failed items, as an error.
fn check_reports(reports: &[PassReport]) -> CliResult<()> {
    match reports.iter().find(|report| report.has_failures()) {
        Some(report) => Err(CliError::PassFailed {
            job: report.kind.job_name().to_string(),
            count: report.failed.len(),
        }),
        None => Ok(()),
    }
}
