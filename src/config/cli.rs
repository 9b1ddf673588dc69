//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// Standalone mode (default) - run the whole catalog locally
    Standalone,
    /// Master mode - wait for a slave and run the cases it asks for
    Master,
    /// Slave mode - connect to a master and drive the session
    Slave,
    /// Worker mode - internal, started by the supervisor
    #[value(hide = true)]
    Worker,
}

impl ExecutionMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Standalone => "Standalone",
            ExecutionMode::Master => "Master",
            ExecutionMode::Slave => "Slave",
            ExecutionMode::Worker => "Worker",
        }
    }
}

/// Report format override
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormatArg {
    Json,
    Text,
    None,
}

/// Supervisor isolation override
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IsolationArg {
    Process,
    InProcess,
}

/// tframework - master/slave test coordination framework
#[derive(Parser, Debug)]
#[command(name = "tframework")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Execution mode: standalone, master, or slave
    #[arg(long, value_enum, default_value = "standalone")]
    pub mode: ExecutionMode,

    /// TOML configuration file with the test catalog
    #[arg(short = 'c', long, env = "TFRAMEWORK_CONFIG", default_value = "tframework.toml")]
    pub config: PathBuf,

    /// Port for the master to listen on (0 picks a free port)
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Master address for slave mode (e.g., "10.0.1.10:5555")
    #[arg(long)]
    pub master_addr: Option<String>,

    /// Peer id sent in every handshake frame
    #[arg(long)]
    pub peer_id: Option<u8>,

    /// Directory for report files
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Report format
    #[arg(long, value_enum)]
    pub report_format: Option<ReportFormatArg>,

    /// Where test code runs
    #[arg(long, value_enum)]
    pub isolation: Option<IsolationArg>,

    /// Disable live per-case status lines
    #[arg(long)]
    pub no_console: bool,

    /// Write debug logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Inherited worker channel descriptor (worker mode only)
    #[arg(long, hide = true)]
    pub channel_fd: Option<i32>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.mode == ExecutionMode::Worker && self.channel_fd.is_none() {
            anyhow::bail!("--channel-fd is required in worker mode");
        }
        if self.mode != ExecutionMode::Worker && self.channel_fd.is_some() {
            anyhow::bail!("--channel-fd is only valid in worker mode");
        }
        if self.master_addr.is_some() && self.mode != ExecutionMode::Slave {
            anyhow::bail!("--master-addr is only valid in slave mode");
        }
        if self.listen_port.is_some() && self.mode != ExecutionMode::Master {
            anyhow::bail!("--listen-port is only valid in master mode");
        }
        Ok(())
    }
}
