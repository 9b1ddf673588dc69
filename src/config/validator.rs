//! Configuration validation

use super::*;
use crate::catalog::{MAX_NAME_LEN, SENTINEL};
use anyhow::Result;
use std::collections::HashSet;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_framework(&config.framework)?;
    validate_supervisor(&config.supervisor)?;
    validate_suites(&config.suites)?;

    Ok(())
}

/// Validate framework settings
pub fn validate_framework(framework: &FrameworkConfig) -> Result<()> {
    if framework.poll_interval_ms == 0 || framework.poll_interval_ms > 1000 {
        anyhow::bail!(
            "poll_interval_ms must be between 1 and 1000, got {}",
            framework.poll_interval_ms
        );
    }

    if framework.response_timeout_ms < framework.poll_interval_ms {
        anyhow::bail!(
            "response_timeout_ms ({}) must not be shorter than poll_interval_ms ({})",
            framework.response_timeout_ms,
            framework.poll_interval_ms
        );
    }

    if framework.master_addr.is_empty() {
        anyhow::bail!("master_addr cannot be empty");
    }

    Ok(())
}

/// Validate supervisor settings
pub fn validate_supervisor(supervisor: &SupervisorConfig) -> Result<()> {
    if supervisor.cleanup_timeout_ms == 0 {
        anyhow::bail!("cleanup_timeout_ms must be greater than 0");
    }
    Ok(())
}

/// Validate the test catalog description
///
/// Sentinel entries are allowed; everything after them is ignored when the
/// catalog is built, so only entries before the first sentinel are checked.
pub fn validate_suites(suites: &[SuiteDescriptor]) -> Result<()> {
    let mut suite_names = HashSet::new();

    for suite in suites.iter().take_while(|s| s.name != SENTINEL) {
        validate_name("suite", &suite.name)?;
        if !suite_names.insert(suite.name.as_str()) {
            tracing::warn!(
                suite = %suite.name,
                "Suite defined more than once; the last definition wins"
            );
        }

        if let Some(cleanup) = &suite.cleanup {
            if cleanup.is_empty() {
                anyhow::bail!("Suite '{}' has an empty cleanup entry name", suite.name);
            }
        }

        for case in suite.cases.iter().take_while(|c| c.name != SENTINEL) {
            validate_name("case", &case.name)?;
            if case.timeout_ms == 0 {
                anyhow::bail!(
                    "Case '{}' in suite '{}' must have a timeout greater than 0",
                    case.name,
                    suite.name
                );
            }
            if case.entry.is_empty() {
                anyhow::bail!("Case '{}' in suite '{}' has no entry point", case.name, suite.name);
            }
        }
    }

    Ok(())
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("{} name cannot be empty", kind);
    }
    if name.len() > MAX_NAME_LEN {
        anyhow::bail!(
            "{} name '{}' is {} bytes, the protocol allows at most {}",
            kind,
            name,
            name.len(),
            MAX_NAME_LEN
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CaseDescriptor;

    fn valid() -> Config {
        Config {
            suites: vec![SuiteDescriptor::new(
                "S1",
                vec![CaseDescriptor::new("C1", 1000, "testFunc1")],
            )],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        validate_config(&valid()).unwrap();
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid();
        config.suites[0].cases[0].timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_long_name_rejected() {
        let mut config = valid();
        config.suites[0].cases[0].name = "C".repeat(MAX_NAME_LEN + 1);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_entries_after_sentinel_ignored() {
        let mut config = valid();
        config.suites[0]
            .cases
            .push(CaseDescriptor::new(SENTINEL, 0, ""));
        config.suites[0]
            .cases
            .push(CaseDescriptor::new("", 0, ""));
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_poll_interval_bounds() {
        let mut config = valid();
        config.framework.poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());
        config.framework.poll_interval_ms = 50;
        validate_config(&config).unwrap();
    }
}
