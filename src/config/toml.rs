//! TOML configuration file parsing

use super::*;
use crate::config::cli::{Cli, IsolationArg, ReportFormatArg};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    if let Some(port) = cli.listen_port {
        config.framework.listen_port = port;
    }
    if let Some(addr) = &cli.master_addr {
        config.framework.master_addr = addr.clone();
    }
    if let Some(peer_id) = cli.peer_id {
        config.framework.peer_id = peer_id;
    }

    if let Some(isolation) = cli.isolation {
        config.supervisor.isolation = match isolation {
            IsolationArg::Process => Isolation::Process,
            IsolationArg::InProcess => Isolation::InProcess,
        };
    }

    if let Some(dir) = &cli.report_dir {
        config.output.report_dir = dir.clone();
    }
    if let Some(format) = cli.report_format {
        config.output.report_format = match format {
            ReportFormatArg::Json => ReportFormat::Json,
            ReportFormatArg::Text => ReportFormat::Text,
            ReportFormatArg::None => ReportFormat::None,
        };
    }
    if cli.no_console {
        config.output.console = false;
    }
    if let Some(log_file) = &cli.log_file {
        config.output.log_file = Some(log_file.clone());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    const SAMPLE: &str = r#"
[framework]
peer_id = 3
poll_interval_ms = 5

[supervisor]
isolation = "in-process"
hard_kill_grace_ms = 2000

[output]
report_format = "text"
console = false

[[suites]]
name = "TESTSUIT_1"
cleanup = "cleanup"

[[suites.cases]]
name = "TESTCASE_1"
timeout_ms = 10000
entry = "testFunc1"

[[suites.cases]]
name = "TESTCASE_2"
timeout_ms = 10000
entry = "testFunc2"

[[suites]]
name = "TESTSUIT_2"

[[suites.cases]]
name = "TESTCASE_1"
timeout_ms = 5000
entry = "testFunc3"
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_toml_string(SAMPLE).unwrap();
        assert_eq!(config.framework.peer_id, 3);
        assert_eq!(config.framework.poll_interval_ms, 5);
        assert_eq!(config.framework.listen_port, 5555);
        assert_eq!(config.supervisor.isolation, Isolation::InProcess);
        assert_eq!(config.supervisor.hard_kill_grace(), Some(Duration::from_secs(2)));
        assert_eq!(config.output.report_format, ReportFormat::Text);
        assert!(!config.output.console);

        assert_eq!(config.suites.len(), 2);
        assert_eq!(config.suites[0].cleanup.as_deref(), Some("cleanup"));
        assert_eq!(config.suites[0].cases.len(), 2);
        assert_eq!(config.suites[1].cases[0].timeout_ms, 5000);
        assert_eq!(config.suites[1].cases[0].entry, "testFunc3");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config.framework.poll_interval_ms, 10);
        assert_eq!(config.supervisor.isolation, Isolation::Process);
        assert_eq!(config.output.report_format, ReportFormat::Json);
        assert!(config.suites.is_empty());
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.suites[0].name, "TESTSUIT_1");

        assert!(parse_toml_file(Path::new("/nonexistent/tframework.toml")).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = parse_toml_string(SAMPLE).unwrap();
        let cli = Cli::try_parse_from([
            "tframework",
            "--mode",
            "master",
            "--listen-port",
            "0",
            "--isolation",
            "process",
            "--report-format",
            "none",
        ])
        .unwrap();

        let merged = merge_cli_with_config(&cli, config).unwrap();
        assert_eq!(merged.framework.listen_port, 0);
        assert_eq!(merged.framework.peer_id, 3);
        assert_eq!(merged.supervisor.isolation, Isolation::Process);
        assert_eq!(merged.output.report_format, ReportFormat::None);
    }
}
