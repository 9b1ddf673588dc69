//! Master coordinator
//!
//! The master is the passive side of a session. It accepts one slave
//! connection, answers every request according to its state machine, and runs
//! the cases the slave asks for on its own supervisor. The slave drives the
//! walk; the master only ever reacts.
//!
//! # States
//!
//! ```text
//! Idle -> HelloReceived -> FrameworkInitialized <-> SuiteNameReceived
//!                                                      |      ^
//!                                                      v      |
//!                                               TestNameReceived -> TestRunReceived
//! ```
//!
//! `caseListCompleted` passes through `CleanupRunning` while the suite's
//! cleanup hook runs; the ack is sent once it completes.
//!
//! `close` ends the session from any state. `status` is answered in any state
//! with the current execution status. Anything else arriving in the wrong
//! state, or while a case or cleanup hook is executing, is answered with `nack`.

use super::protocol::{HandshakeMessage, MessageBody};
use super::transport::{send_message, FrameReader};
use crate::catalog::{Catalog, ModuleResolver, SuiteDescriptor, Summary, TestStatus};
use crate::coordinator::{cleanup_request, run_request, DEFAULT_POLL_INTERVAL};
use crate::output::StatusSink;
use crate::worker::Supervisor;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::time::sleep;

/// Master states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    HelloReceived,
    FrameworkInitialized,
    SuiteNameReceived,
    TestNameReceived,
    TestRunReceived,
    CleanupRunning,
    Closed,
}

/// Passive side of a master/slave session
pub struct MasterCoordinator {
    peer_id: u8,
    descriptors: Vec<SuiteDescriptor>,
    resolver: Arc<dyn ModuleResolver>,
    supervisor: Box<dyn Supervisor>,
    status_sink: Box<dyn StatusSink>,
    poll_interval: Duration,
    cleanup_timeout: Duration,

    state: MasterState,
    execution_status: TestStatus,
    catalog: Option<Catalog>,
    current_suite: Option<String>,
    current_case: Option<String>,
}

impl MasterCoordinator {
    pub fn new(
        peer_id: u8,
        descriptors: Vec<SuiteDescriptor>,
        resolver: Arc<dyn ModuleResolver>,
        supervisor: Box<dyn Supervisor>,
        status_sink: Box<dyn StatusSink>,
    ) -> Self {
        Self {
            peer_id,
            descriptors,
            resolver,
            supervisor,
            status_sink,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cleanup_timeout: Duration::from_secs(10),
            state: MasterState::Idle,
            execution_status: TestStatus::NotFound,
            catalog: None,
            current_suite: None,
            current_case: None,
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

    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Catalog built on `frameworkInit`, if any
    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    pub fn summary(&self) -> Option<Summary> {
        self.catalog.as_ref().map(|c| *c.summary())
    }

    /// Accept one slave on `listener` and serve it until `close`
    pub async fn run(&mut self, listener: TcpListener) -> Result<()> {
        let (stream, addr) = listener
            .accept()
            .await
            .context("Failed to accept slave connection")?;
        stream.set_nodelay(true).ok();
        println!("Slave connected from: {}", addr);

        let (reader, writer) = stream.into_split();
        self.serve(reader, writer).await
    }

    /// Serve one session over an arbitrary byte stream
    pub async fn serve<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut frames = FrameReader::new(reader);

        let result = async {
            while self.state != MasterState::Closed {
                tokio::select! {
                    msg = frames.read_message() => {
                        let msg = msg?;
                        self.handle(msg, &mut writer).await?;
                    }
                    _ = sleep(self.poll_interval) => {}
                }
                self.poll_supervisor(&mut writer).await?;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        let shutdown = self.supervisor.shutdown();
        result?;
        shutdown.context("Failed to stop worker")?;

        if let Some(summary) = self.summary() {
            tracing::info!(
                passed = summary.passed,
                failed = summary.failed,
                timed_out = summary.timed_out,
                errors = summary.errors,
                "Master session closed"
            );
        }

        Ok(())
    }

    fn transition(&mut self, next: MasterState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "Master state change");
            self.state = next;
        }
    }

    async fn reply<W: AsyncWrite + Unpin>(&self, writer: &mut W, body: MessageBody) -> Result<()> {
        let msg = HandshakeMessage::new(self.peer_id, body);
        tracing::debug!("Send >> {}", msg.body);
        send_message(writer, &msg).await
    }

    async fn handle<W: AsyncWrite + Unpin>(
        &mut self,
        msg: HandshakeMessage,
        writer: &mut W,
    ) -> Result<()> {
        tracing::debug!(peer = msg.peer_id, state = ?self.state, "Received << {}", msg.body);

        match msg.body {
            MessageBody::Status(_) => {
                return self
                    .reply(writer, MessageBody::Status(self.execution_status))
                    .await;
            }
            MessageBody::Close => {
                self.reply(writer, MessageBody::Ack).await?;
                self.transition(MasterState::Closed);
                return Ok(());
            }
            _ => {}
        }

        if matches!(self.state, MasterState::TestRunReceived | MasterState::CleanupRunning) {
            tracing::warn!(state = ?self.state, "Still executing, rejecting {}", msg.body);
            return self.reply(writer, MessageBody::Nack).await;
        }

        match (self.state, msg.body) {
            (MasterState::Idle, MessageBody::Hello) => {
                self.reply(writer, MessageBody::Ack).await?;
                self.transition(MasterState::HelloReceived);
            }
            (MasterState::HelloReceived, MessageBody::FrameworkInit) => {
                self.reply(writer, MessageBody::Ack).await?;
                self.initialize();
            }
            (MasterState::FrameworkInitialized, MessageBody::SuiteName(name)) => {
                self.reply(writer, MessageBody::Ack).await?;
                self.select_suite(name);
            }
            (MasterState::FrameworkInitialized, MessageBody::SuiteListCompleted) => {
                self.reply(writer, MessageBody::Ack).await?;
                tracing::info!("Suite list completed");
            }
            (MasterState::SuiteNameReceived, MessageBody::CaseName(name)) => {
                self.reply(writer, MessageBody::Ack).await?;
                self.select_case(name);
            }
            (MasterState::TestNameReceived, MessageBody::Run) => {
                self.reply(writer, MessageBody::Ack).await?;
                self.launch_case();
            }
            (MasterState::SuiteNameReceived, MessageBody::CaseListCompleted) => {
                if self.launch_cleanup() {
                    self.transition(MasterState::CleanupRunning);
                } else {
                    self.reply(writer, MessageBody::Ack).await?;
                    self.end_suite();
                }
            }
            (state, body) => {
                tracing::warn!(?state, "Unexpected {} in current state", body);
                self.reply(writer, MessageBody::Nack).await?;
            }
        }

        Ok(())
    }

    fn initialize(&mut self) {
        match Catalog::build(&self.descriptors, self.resolver.as_ref()) {
            Ok(catalog) => {
                println!(
                    "Catalog ready: {} suites, {} cases",
                    catalog.summary().suites,
                    catalog.summary().cases
                );
                self.catalog = Some(catalog);
                self.execution_status = TestStatus::Passed;
                self.transition(MasterState::FrameworkInitialized);
            }
            Err(e) => {
                tracing::error!("Failed to build catalog: {:#}", e);
                self.execution_status = TestStatus::Failed;
            }
        }
    }

    fn select_suite(&mut self, name: String) {
        let found = match self.catalog.as_mut().and_then(|c| c.suite_mut(&name)) {
            Some(suite) => {
                suite.status = TestStatus::Found;
                true
            }
            None => false,
        };

        if found {
            tracing::info!(suite = %name, "Suite found");
            self.execution_status = TestStatus::Found;
            self.current_suite = Some(name);
            self.transition(MasterState::SuiteNameReceived);
        } else {
            tracing::info!(suite = %name, "Suite not found");
            self.execution_status = TestStatus::NotFound;
        }
    }

    fn select_case(&mut self, name: String) {
        let resolved = self
            .current_suite
            .as_deref()
            .and_then(|suite| self.catalog.as_ref()?.suite(suite))
            .and_then(|suite| suite.case(&name))
            .map(|case| case.is_resolved())
            .unwrap_or(false);

        if resolved {
            tracing::info!(case = %name, "Case found");
            self.execution_status = TestStatus::Found;
            self.current_case = Some(name);
            self.transition(MasterState::TestNameReceived);
        } else {
            tracing::info!(case = %name, "Case not found");
            self.execution_status = TestStatus::NotFound;
            self.current_case = None;
        }
    }

    fn display_name(&self) -> String {
        format!(
            "{}::{}",
            self.current_suite.as_deref().unwrap_or("?"),
            self.current_case.as_deref().unwrap_or("?")
        )
    }

    fn launch_case(&mut self) {
        let case_label = self.display_name();
        let request = match (&self.catalog, &self.current_suite, &self.current_case) {
            (Some(catalog), Some(suite), Some(case)) => catalog
                .suite(suite)
                .and_then(|s| s.case(case))
                .map(run_request),
            _ => None,
        };

        let launched = match request {
            Some(request) => self.supervisor.launch(request),
            None => Err(anyhow::anyhow!("No case selected")),
        };

        match launched {
            Ok(()) => {
                self.execution_status = TestStatus::Running;
                self.status_sink.update(&case_label, 0.0, TestStatus::Running);
                self.transition(MasterState::TestRunReceived);
            }
            Err(e) => {
                tracing::error!(case = %case_label, "Failed to launch case: {:#}", e);
                self.record_outcome(TestStatus::Error, Duration::ZERO);
            }
        }
    }

    async fn poll_supervisor<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<()> {
        match self.state {
            MasterState::TestRunReceived => {
                if let Some(completion) = self.supervisor.poll()? {
                    self.record_outcome(completion.status, completion.elapsed);
                }
            }
            MasterState::CleanupRunning => {
                if let Some(completion) = self.supervisor.poll()? {
                    if completion.status != TestStatus::Passed {
                        tracing::warn!(status = %completion.status, "Suite cleanup did not pass");
                    }
                    self.reply(writer, MessageBody::Ack).await?;
                    self.end_suite();
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Store a case outcome and return to waiting for the next case
    fn record_outcome(&mut self, status: TestStatus, elapsed: Duration) {
        let case_label = self.display_name();
        if let (Some(catalog), Some(suite), Some(case)) =
            (self.catalog.as_mut(), self.current_suite.as_deref(), self.current_case.as_deref())
        {
            let applied = catalog
                .suite_mut(suite)
                .and_then(|s| s.case_mut(case))
                .map(|c| c.finish(status, elapsed))
                .unwrap_or(false);
            if applied {
                catalog.summary_mut().record_case(status);
            }
        }

        tracing::info!(case = %case_label, %status, ?elapsed, "Case finished");
        self.status_sink.update(&case_label, elapsed.as_secs_f64(), status);
        self.execution_status = status;
        self.current_case = None;
        self.transition(MasterState::SuiteNameReceived);
    }

    /// Start the current suite's cleanup hook; false when there is nothing to run
    fn launch_cleanup(&mut self) -> bool {
        let request = match (&self.catalog, &self.current_suite) {
            (Some(catalog), Some(suite)) => cleanup_request(catalog, suite, self.cleanup_timeout),
            _ => None,
        };
        let Some(request) = request else {
            return false;
        };

        tracing::debug!(cleanup = %request.name, "Running suite cleanup");
        match self.supervisor.launch(request) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to launch suite cleanup: {:#}", e);
                false
            }
        }
    }

    fn end_suite(&mut self) {
        self.current_suite = None;
        self.transition(MasterState::FrameworkInitialized);
    }
}

/// Bind the master listener; port 0 lets the OS choose
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind master on {}", addr))?;
    Ok(listener)
}
