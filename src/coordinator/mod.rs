//! Shared coordinator logic
//!
//! Verdict reconciliation, the async run-to-completion helper and the
//! standalone scheduler. The networked coordinators live in
//! [`crate::distributed`].

pub mod standalone;

pub use standalone::StandaloneScheduler;

use crate::catalog::{Catalog, TestCase, TestStatus};
use crate::worker::{Completion, RunRequest, Supervisor};
use anyhow::Result;
use std::time::Duration;

/// Default coordinator loop interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Merge the local outcome with the one reported by the peer
///
/// Timeout on either side wins, then Failed; two passes make a pass and
/// anything else is an error.
pub fn reconcile(local: TestStatus, peer: TestStatus) -> TestStatus {
    use TestStatus::*;

    if local == Timeout || peer == Timeout {
        Timeout
    } else if local == Failed || peer == Failed {
        Failed
    } else if local == Passed && peer == Passed {
        Passed
    } else {
        Error
    }
}

/// Build a supervisor request for a catalog case
pub fn run_request(case: &TestCase) -> RunRequest {
    RunRequest {
        case_id: case.id,
        name: case.name.clone(),
        entry_name: case.entry_name.clone(),
        entry: case.entry.clone(),
        timeout: case.timeout,
    }
}

/// Launch a case and poll until it completes
pub async fn run_to_completion(
    supervisor: &mut dyn Supervisor,
    request: RunRequest,
    poll_interval: Duration,
) -> Result<Completion> {
    supervisor.launch(request)?;
    loop {
        if let Some(completion) = supervisor.poll()? {
            return Ok(completion);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Supervisor request for a suite's cleanup hook, if it has a resolved one
pub fn cleanup_request(
    catalog: &Catalog,
    suite_name: &str,
    timeout: Duration,
) -> Option<RunRequest> {
    let suite = catalog.suite(suite_name)?;
    let (Some(name), Some(entry)) = (&suite.cleanup_name, &suite.cleanup) else {
        return None;
    };

    Some(RunRequest {
        case_id: 0,
        name: format!("{}::{}", suite.name, name),
        entry_name: name.clone(),
        entry: Some(entry.clone()),
        timeout,
    })
}

/// Run a suite's cleanup hook to completion
///
/// Cleanup outcomes are logged but never counted in the summary.
pub async fn run_cleanup(
    catalog: &Catalog,
    suite_name: &str,
    supervisor: &mut dyn Supervisor,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Option<TestStatus>> {
    let Some(request) = cleanup_request(catalog, suite_name, timeout) else {
        return Ok(None);
    };

    tracing::debug!(cleanup = %request.name, "Running suite cleanup");
    let completion = run_to_completion(supervisor, request, poll_interval).await?;
    if completion.status != TestStatus::Passed {
        tracing::warn!(
            suite = %suite_name,
            status = %completion.status,
            "Suite cleanup did not pass"
        );
    }

    Ok(Some(completion.status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use TestStatus::*;

    #[test]
    fn test_reconcile_precedence() {
        assert_eq!(reconcile(Passed, Passed), Passed);
        assert_eq!(reconcile(Passed, Failed), Failed);
        assert_eq!(reconcile(Failed, Passed), Failed);
        assert_eq!(reconcile(Failed, Timeout), Timeout);
        assert_eq!(reconcile(Timeout, Passed), Timeout);
        assert_eq!(reconcile(Passed, Timeout), Timeout);
        assert_eq!(reconcile(Passed, Error), Error);
        assert_eq!(reconcile(Error, Failed), Failed);
        assert_eq!(reconcile(Running, Passed), Error);
        assert_eq!(reconcile(Passed, NotFound), Error);
    }

    #[test]
    fn test_cleanup_request_only_for_resolved_hooks() {
        use crate::catalog::{CaseDescriptor, Registry, SuiteDescriptor};
        use crate::worker::CancellationToken;

        let registry = Registry::new()
            .register("pass", |_: &CancellationToken| TestStatus::Passed)
            .register("cleanup", |_: &CancellationToken| TestStatus::Passed);
        let descs = vec![
            SuiteDescriptor::new("S1", vec![CaseDescriptor::new("C1", 100, "pass")])
                .with_cleanup("cleanup"),
            SuiteDescriptor::new("S2", vec![CaseDescriptor::new("C1", 100, "pass")])
                .with_cleanup("missing"),
            SuiteDescriptor::new("S3", vec![CaseDescriptor::new("C1", 100, "pass")]),
        ];
        let catalog = Catalog::build(&descs, &registry).unwrap();

        let request = cleanup_request(&catalog, "S1", Duration::from_secs(3)).unwrap();
        assert_eq!(request.name, "S1::cleanup");
        assert_eq!(request.timeout, Duration::from_secs(3));
        assert!(request.entry.is_some());
        assert!(cleanup_request(&catalog, "S2", Duration::from_secs(3)).is_none());
        assert!(cleanup_request(&catalog, "S3", Duration::from_secs(3)).is_none());
        assert!(cleanup_request(&catalog, "NOPE", Duration::from_secs(3)).is_none());
    }

    #[test]
    fn test_reconcile_is_symmetric() {
        let all = [Passed, Failed, Timeout, Running, Error, NotFound, Found];
        for a in all {
            for b in all {
                assert_eq!(reconcile(a, b), reconcile(b, a), "{:?} vs {:?}", a, b);
            }
        }
    }
}
