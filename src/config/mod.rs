//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::catalog::SuiteDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Complete framework configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub framework: FrameworkConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Test catalog, in execution order
    #[serde(default)]
    pub suites: Vec<SuiteDescriptor>,
}

/// Session and coordination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Peer id carried in every handshake frame
    #[serde(default = "default_peer_id")]
    pub peer_id: u8,
    /// Coordinator loop interval (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long the slave waits for any single reply (milliseconds)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Port the master listens on (0 = any free port)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Master address the slave connects to
    #[serde(default = "default_master_addr")]
    pub master_addr: String,
}

fn default_peer_id() -> u8 {
    1
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_response_timeout_ms() -> u64 {
    60_000
}

fn default_listen_port() -> u16 {
    5555
}

fn default_master_addr() -> String {
    "127.0.0.1:5555".to_string()
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            peer_id: default_peer_id(),
            poll_interval_ms: default_poll_interval_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            listen_port: default_listen_port(),
            master_addr: default_master_addr(),
        }
    }
}

impl FrameworkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Where test code runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Isolation {
    /// Dedicated worker process (default)
    #[default]
    Process,
    /// Thread inside the coordinator process
    InProcess,
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isolation::Process => write!(f, "process"),
            Isolation::InProcess => write!(f, "in-process"),
        }
    }
}

/// Execution supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub isolation: Isolation,
    /// Kill a case this long after cancellation if it keeps running (milliseconds)
    #[serde(default)]
    pub hard_kill_grace_ms: Option<u64>,
    /// Time budget for suite cleanup hooks (milliseconds)
    #[serde(default = "default_cleanup_timeout_ms")]
    pub cleanup_timeout_ms: u64,
}

fn default_cleanup_timeout_ms() -> u64 {
    10_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::default(),
            hard_kill_grace_ms: None,
            cleanup_timeout_ms: default_cleanup_timeout_ms(),
        }
    }
}

impl SupervisorConfig {
    pub fn hard_kill_grace(&self) -> Option<Duration> {
        self.hard_kill_grace_ms.map(Duration::from_millis)
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Text,
    None,
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Print live per-case status lines
    #[serde(default = "default_console")]
    pub console: bool,
    /// Directory for report files
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    #[serde(default)]
    pub report_format: ReportFormat,
    /// Debug log file (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_console() -> bool {
    true
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            console: default_console(),
            report_dir: default_report_dir(),
            report_format: ReportFormat::default(),
            log_file: None,
        }
    }
}
