//! tframework CLI entry point

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tframework::catalog::Summary;
use tframework::config::cli::{Cli, ExecutionMode};
use tframework::config::{Config, Isolation, ReportFormat};
use tframework::coordinator::StandaloneScheduler;
use tframework::distributed::{master, MasterCoordinator, SlaveCoordinator};
use tframework::output::{
    ConsoleStatusSink, JsonReport, MultiReportSink, NullReportSink, NullStatusSink, ReportSink,
    StatusSink, TextReport,
};
use tframework::worker::supervisor::ProcessSupervisorConfig;
use tframework::worker::{InProcessSupervisor, ProcessSupervisor, Supervisor};

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli.validate()?;

    if cli.mode == ExecutionMode::Worker {
        init_logging(cli.debug, None)?;
        return run_worker(&cli);
    }

    println!("tframework v{}", env!("CARGO_PKG_VERSION"));
    println!("Mode: {}", cli.mode.name());
    println!();

    let config = load_config(&cli)?;
    init_logging(cli.debug, config.output.log_file.as_deref())?;

    tframework::config::validator::validate_config(&config)
        .context("Configuration validation failed")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    let summary = match cli.mode {
        ExecutionMode::Standalone => runtime.block_on(run_standalone(&cli, config))?,
        ExecutionMode::Slave => runtime.block_on(run_slave(&cli, config))?,
        ExecutionMode::Master => {
            runtime.block_on(run_master(&cli, config))?;
            return Ok(());
        }
        ExecutionMode::Worker => anyhow::bail!("Worker mode does not load a test catalog"),
    };

    println!();
    println!(
        "Done: {} passed, {} failed, {} timed out, {} errors, \
         {} cases not found, {} suites not found",
        summary.passed,
        summary.failed,
        summary.timed_out,
        summary.errors,
        summary.cases_not_found,
        summary.suites_not_found
    );

    if summary.failed + summary.timed_out + summary.errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Set up tracing; `--debug` raises the default level, RUST_LOG still wins
fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = tframework::config::toml::parse_toml_file(&cli.config)?;
    tframework::config::toml::merge_cli_with_config(cli, config)
}

/// Worker process: serve run requests from the supervisor
fn run_worker(cli: &Cli) -> Result<()> {
    let fd = cli
        .channel_fd
        .context("--channel-fd is required in worker mode")?;
    let registry = tframework::demo::registry();

    tframework::worker::run_worker(fd, &registry).context("Worker failed")
}

fn build_supervisor(cli: &Cli, config: &Config) -> Result<Box<dyn Supervisor>> {
    match config.supervisor.isolation {
        Isolation::Process => {
            let mut supervisor_config = ProcessSupervisorConfig::current_exe()?;
            supervisor_config.hard_kill_grace = config.supervisor.hard_kill_grace();
            if cli.debug {
                supervisor_config.extra_args.push("--debug".to_string());
            }
            let supervisor = ProcessSupervisor::spawn(supervisor_config)
                .context("Failed to start worker process")?;
            Ok(Box::new(supervisor))
        }
        Isolation::InProcess => {
            let mut supervisor = InProcessSupervisor::new();
            if let Some(grace) = config.supervisor.hard_kill_grace() {
                supervisor = supervisor.with_hard_kill_grace(grace);
            }
            Ok(Box::new(supervisor))
        }
    }
}

fn build_status_sink(config: &Config) -> Box<dyn StatusSink> {
    if config.output.console {
        Box::new(ConsoleStatusSink)
    } else {
        Box::new(NullStatusSink)
    }
}

fn build_report_sink(cli: &Cli, config: &Config) -> Box<dyn ReportSink> {
    match config.output.report_format {
        ReportFormat::Json => {
            let mut sinks = MultiReportSink::new();
            if config.output.console {
                sinks.push(Box::new(TextReport));
            }
            sinks.push(Box::new(JsonReport::new(
                config.output.report_dir.clone(),
                cli.mode.name(),
            )));
            Box::new(sinks)
        }
        ReportFormat::Text => Box::new(TextReport),
        ReportFormat::None => Box::new(NullReportSink),
    }
}

/// Run the whole catalog locally
async fn run_standalone(cli: &Cli, config: Config) -> Result<Summary> {
    let registry = tframework::demo::registry();
    let catalog = tframework::catalog::Catalog::build(&config.suites, &registry)
        .context("Failed to build test catalog")?;
    println!(
        "Catalog ready: {} suites, {} cases",
        catalog.summary().suites,
        catalog.summary().cases
    );
    println!();

    let mut scheduler = StandaloneScheduler::new(
        catalog,
        build_supervisor(cli, &config)?,
        build_status_sink(&config),
        build_report_sink(cli, &config),
    )
    .with_poll_interval(config.framework.poll_interval())
    .with_cleanup_timeout(config.supervisor.cleanup_timeout());

    scheduler.run().await
}

/// Wait for a slave and serve its session
async fn run_master(cli: &Cli, config: Config) -> Result<()> {
    let listener = master::bind(config.framework.listen_port).await?;
    let addr = listener
        .local_addr()
        .context("Failed to read listener address")?;
    println!("Master listening on port {}", addr.port());
    println!("Waiting for slave connection...");

    let mut coordinator = MasterCoordinator::new(
        config.framework.peer_id,
        config.suites.clone(),
        Arc::new(tframework::demo::registry()),
        build_supervisor(cli, &config)?,
        build_status_sink(&config),
    )
    .with_poll_interval(config.framework.poll_interval())
    .with_cleanup_timeout(config.supervisor.cleanup_timeout());

    coordinator.run(listener).await?;
    println!("Session closed");
    Ok(())
}

/// Connect to the master and drive the session
async fn run_slave(cli: &Cli, config: Config) -> Result<Summary> {
    let mut coordinator = SlaveCoordinator::new(
        config.framework.peer_id,
        config.suites.clone(),
        Arc::new(tframework::demo::registry()),
        build_supervisor(cli, &config)?,
        build_status_sink(&config),
        build_report_sink(cli, &config),
    )
    .with_poll_interval(config.framework.poll_interval())
    .with_response_timeout(config.framework.response_timeout())
    .with_cleanup_timeout(config.supervisor.cleanup_timeout());

    coordinator
        .connect_and_run(&config.framework.master_addr)
        .await
}
