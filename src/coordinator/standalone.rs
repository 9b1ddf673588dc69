//! Standalone scheduler
//!
//! Walks the whole catalog without a peer: every resolved case is run through
//! the supervisor and its local outcome is final.

use super::{run_cleanup, run_request, run_to_completion, DEFAULT_POLL_INTERVAL};
use crate::catalog::{Catalog, Summary, TestStatus};
use crate::output::{ReportSink, StatusSink};
use crate::worker::Supervisor;
use anyhow::{Context, Result};
use std::time::Duration;

/// Scheduler states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandaloneState {
    Initialized,
    SuiteFound,
    CaseFound,
    CaseExecuting,
    CaseExecuted,
    CaseListCompleted,
    SuiteListCompleted,
    ReportReady,
}

/// Runs every case of a catalog locally
pub struct StandaloneScheduler {
    catalog: Catalog,
    supervisor: Box<dyn Supervisor>,
    status_sink: Box<dyn StatusSink>,
    report_sink: Box<dyn ReportSink>,
    poll_interval: Duration,
    cleanup_timeout: Duration,
    state: StandaloneState,
}

impl StandaloneScheduler {
    pub fn new(
        catalog: Catalog,
        supervisor: Box<dyn Supervisor>,
        status_sink: Box<dyn StatusSink>,
        report_sink: Box<dyn ReportSink>,
    ) -> Self {
        Self {
            catalog,
            supervisor,
            status_sink,
            report_sink,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cleanup_timeout: Duration::from_secs(10),
            state: StandaloneState::Initialized,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    pub fn state(&self) -> StandaloneState {
        self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn transition(&mut self, next: StandaloneState) {
        tracing::debug!(from = ?self.state, to = ?next, "Standalone state change");
        self.state = next;
    }

    /// Run every suite, write the report and return the summary
    pub async fn run(&mut self) -> Result<Summary> {
        let result = self.run_catalog().await;
        let shutdown = self.supervisor.shutdown();
        result?;
        shutdown.context("Failed to stop worker")?;

        Ok(*self.catalog.summary())
    }

    async fn run_catalog(&mut self) -> Result<()> {
        for si in 0..self.catalog.suites().len() {
            let suite_name = self.catalog.suites()[si].name.clone();
            self.catalog.suites_mut()[si].status = TestStatus::Found;
            self.transition(StandaloneState::SuiteFound);
            tracing::info!(suite = %suite_name, "Running suite");

            for ci in 0..self.catalog.suites()[si].len() {
                let case = &self.catalog.suites()[si].cases()[ci];
                let case_label = format!("{}::{}", suite_name, case.name);

                if !case.is_resolved() {
                    tracing::warn!(case = %case_label, "Entry point not found, skipping");
                    self.catalog.summary_mut().record_case(TestStatus::NotFound);
                    self.status_sink.update(&case_label, 0.0, TestStatus::NotFound);
                    continue;
                }

                let request = run_request(case);
                self.transition(StandaloneState::CaseFound);
                self.status_sink.update(&case_label, 0.0, TestStatus::Running);

                self.transition(StandaloneState::CaseExecuting);
                let completion =
                    run_to_completion(self.supervisor.as_mut(), request, self.poll_interval).await?;

                let case = &mut self.catalog.suites_mut()[si].cases_mut()[ci];
                if case.finish(completion.status, completion.elapsed) {
                    self.catalog.summary_mut().record_case(completion.status);
                }
                tracing::info!(
                    case = %case_label,
                    status = %completion.status,
                    elapsed = ?completion.elapsed,
                    "Case finished"
                );
                self.status_sink
                    .update(&case_label, completion.elapsed.as_secs_f64(), completion.status);
                self.transition(StandaloneState::CaseExecuted);
            }

            self.transition(StandaloneState::CaseListCompleted);
            run_cleanup(
                &self.catalog,
                &suite_name,
                self.supervisor.as_mut(),
                self.cleanup_timeout,
                self.poll_interval,
            )
            .await?;
        }

        self.transition(StandaloneState::SuiteListCompleted);
        self.report_sink
            .write(&self.catalog, self.catalog.summary())
            .context("Failed to write report")?;
        self.transition(StandaloneState::ReportReady);

        Ok(())
    }
}
