//! Slave coordinator
//!
//! The slave is the active side of a session. It connects to the master,
//! performs the handshake, then walks its own catalog in order, asking the
//! master about every suite and case before running anything. Cases that both
//! sides know are run on both sides at the same time; the slave then merges
//! its local outcome with the one the master reports.
//!
//! A `nack` from the master at any point ends the session: the slave sends
//! `close` and returns an error.

use super::protocol::{HandshakeMessage, MessageBody};
use super::transport::{send_message, FrameReader};
use crate::catalog::{Catalog, ModuleResolver, SuiteDescriptor, Summary, TestStatus};
use crate::coordinator::{
    reconcile, run_cleanup, run_request, run_to_completion, DEFAULT_POLL_INTERVAL,
};
use crate::output::{ReportSink, StatusSink};
use crate::worker::Supervisor;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// Slave states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Idle,
    HelloSent,
    HelloAcked,
    InitSent,
    InitAcked,
    StatusSent,
    FrameworkInitialized,
    SuiteNameSent,
    SuiteFound,
    CaseNameSent,
    RunSent,
    CaseExecuted,
    CaseListCompletedSent,
    SuiteListCompletedSent,
    CloseSent,
    Closed,
}

/// Active side of a master/slave session
pub struct SlaveCoordinator {
    peer_id: u8,
    descriptors: Vec<SuiteDescriptor>,
    resolver: Arc<dyn ModuleResolver>,
    supervisor: Box<dyn Supervisor>,
    status_sink: Box<dyn StatusSink>,
    report_sink: Box<dyn ReportSink>,
    poll_interval: Duration,
    response_timeout: Duration,
    cleanup_timeout: Duration,

    state: SlaveState,
    catalog: Option<Catalog>,
}

/// Connected session halves
struct Session<R, W> {
    frames: FrameReader<R>,
    writer: W,
}

impl SlaveCoordinator {
    pub fn new(
        peer_id: u8,
        descriptors: Vec<SuiteDescriptor>,
        resolver: Arc<dyn ModuleResolver>,
        supervisor: Box<dyn Supervisor>,
        status_sink: Box<dyn StatusSink>,
        report_sink: Box<dyn ReportSink>,
    ) -> Self {
        Self {
            peer_id,
            descriptors,
            resolver,
            supervisor,
            status_sink,
            report_sink,
            poll_interval: DEFAULT_POLL_INTERVAL,
            response_timeout: Duration::from_secs(60),
            cleanup_timeout: Duration::from_secs(10),
            state: SlaveState::Idle,
            catalog: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Connect to the master at `addr` and run the session
    pub async fn connect_and_run(&mut self, addr: &str) -> Result<Summary> {
        println!("Connecting to master at {}...", addr);
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to master at {}", addr))?;
        stream.set_nodelay(true).ok();
        println!("Connected to master");

        let (reader, writer) = stream.into_split();
        self.run(reader, writer).await
    }

    /// Run the whole session over an arbitrary byte stream
    pub async fn run<R, W>(&mut self, reader: R, writer: W) -> Result<Summary>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut session = Session {
            frames: FrameReader::new(reader),
            writer,
        };

        let result = self.drive(&mut session).await;
        let shutdown = self.supervisor.shutdown();
        result?;
        shutdown.context("Failed to stop worker")?;

        let catalog = self
            .catalog
            .as_ref()
            .context("Session finished without a catalog")?;
        self.report_sink
            .write(catalog, catalog.summary())
            .context("Failed to write report")?;

        Ok(*catalog.summary())
    }

    fn transition(&mut self, next: SlaveState) {
        tracing::debug!(from = ?self.state, to = ?next, "Slave state change");
        self.state = next;
    }

    async fn drive<R, W>(&mut self, session: &mut Session<R, W>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.handshake(session).await?;

        for si in 0..self.catalog_ref()?.suites().len() {
            self.run_suite(session, si).await?;
        }

        self.send_expect_ack(
            session,
            MessageBody::SuiteListCompleted,
            SlaveState::SuiteListCompletedSent,
        )
        .await?;
        self.send_expect_ack(session, MessageBody::Close, SlaveState::CloseSent)
            .await?;
        self.transition(SlaveState::Closed);

        Ok(())
    }

    fn catalog_ref(&self) -> Result<&Catalog> {
        self.catalog.as_ref().context("Catalog not initialized")
    }

    fn catalog_mut(&mut self) -> Result<&mut Catalog> {
        self.catalog.as_mut().context("Catalog not initialized")
    }

    async fn handshake<R, W>(&mut self, session: &mut Session<R, W>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.send_expect_ack(session, MessageBody::Hello, SlaveState::HelloSent).await?;
        self.transition(SlaveState::HelloAcked);

        self.send_expect_ack(session, MessageBody::FrameworkInit, SlaveState::InitSent)
            .await?;
        self.transition(SlaveState::InitAcked);

        let catalog = match Catalog::build(&self.descriptors, self.resolver.as_ref()) {
            Ok(catalog) => catalog,
            Err(e) => {
                self.close(session).await;
                return Err(e).context("Failed to build local catalog");
            }
        };
        println!(
            "Catalog ready: {} suites, {} cases",
            catalog.summary().suites,
            catalog.summary().cases
        );
        self.catalog = Some(catalog);

        self.transition(SlaveState::StatusSent);
        let master_status = self
            .poll_status(session, TestStatus::Running, |s| {
                matches!(s, TestStatus::Passed | TestStatus::Failed)
            })
            .await?;
        if master_status == TestStatus::Failed {
            self.close(session).await;
            anyhow::bail!("Master failed to initialize its catalog");
        }

        self.transition(SlaveState::FrameworkInitialized);
        Ok(())
    }

    async fn run_suite<R, W>(&mut self, session: &mut Session<R, W>, si: usize) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let suite_name = self.catalog_ref()?.suites()[si].name.clone();

        self.send_expect_ack(
            session,
            MessageBody::SuiteName(suite_name.clone()),
            SlaveState::SuiteNameSent,
        )
        .await?;
        let found = self
            .poll_status(session, TestStatus::Running, |s| {
                matches!(s, TestStatus::Found | TestStatus::NotFound)
            })
            .await?;

        if found == TestStatus::NotFound {
            println!("Suite {} not found on master, skipping", suite_name);
            let catalog = self.catalog_mut()?;
            catalog.suites_mut()[si].status = TestStatus::NotFound;
            catalog.summary_mut().record_suite_not_found();
            self.transition(SlaveState::FrameworkInitialized);
            return Ok(());
        }

        self.catalog_mut()?.suites_mut()[si].status = TestStatus::Found;
        self.transition(SlaveState::SuiteFound);
        tracing::info!(suite = %suite_name, "Running suite");

        for ci in 0..self.catalog_ref()?.suites()[si].len() {
            self.run_case(session, si, ci, &suite_name).await?;
        }

        self.send_expect_ack(
            session,
            MessageBody::CaseListCompleted,
            SlaveState::CaseListCompletedSent,
        )
        .await?;
        let catalog = self.catalog.as_ref().context("Catalog not initialized")?;
        run_cleanup(
            catalog,
            &suite_name,
            self.supervisor.as_mut(),
            self.cleanup_timeout,
            self.poll_interval,
        )
        .await?;
        self.transition(SlaveState::FrameworkInitialized);

        Ok(())
    }

    async fn run_case<R, W>(
        &mut self,
        session: &mut Session<R, W>,
        si: usize,
        ci: usize,
        suite_name: &str,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let case = &self.catalog_ref()?.suites()[si].cases()[ci];
        let case_name = case.name.clone();
        let case_label = format!("{}::{}", suite_name, case_name);

        if !case.is_resolved() {
            tracing::warn!(case = %case_label, "Entry point not found locally, skipping");
            self.mark_not_found(si, ci, &case_label)?;
            return Ok(());
        }
        let request = run_request(case);

        self.send_expect_ack(session, MessageBody::CaseName(case_name), SlaveState::CaseNameSent)
            .await?;
        let found = self
            .poll_status(session, TestStatus::Running, |s| {
                matches!(s, TestStatus::Found | TestStatus::NotFound)
            })
            .await?;
        if found == TestStatus::NotFound {
            tracing::info!(case = %case_label, "Case not found on master");
            self.mark_not_found(si, ci, &case_label)?;
            return Ok(());
        }

        self.send_expect_ack(session, MessageBody::Run, SlaveState::RunSent).await?;
        self.status_sink.update(&case_label, 0.0, TestStatus::Running);

        let local = run_to_completion(self.supervisor.as_mut(), request, self.poll_interval).await?;
        tracing::debug!(case = %case_label, status = %local.status, "Local run finished");

        let peer = self
            .poll_status(session, local.status, TestStatus::is_outcome)
            .await?;
        let verdict = reconcile(local.status, peer);
        tracing::info!(case = %case_label, local = %local.status, %peer, %verdict, "Case finished");

        let catalog = self.catalog_mut()?;
        if catalog.suites_mut()[si].cases_mut()[ci].finish(verdict, local.elapsed) {
            catalog.summary_mut().record_case(verdict);
        }
        self.status_sink
            .update(&case_label, local.elapsed.as_secs_f64(), verdict);
        self.transition(SlaveState::CaseExecuted);

        Ok(())
    }

    fn mark_not_found(&mut self, si: usize, ci: usize, case_label: &str) -> Result<()> {
        let catalog = self.catalog_mut()?;
        catalog.suites_mut()[si].cases_mut()[ci].status = TestStatus::NotFound;
        catalog.summary_mut().record_case(TestStatus::NotFound);
        self.status_sink.update(case_label, 0.0, TestStatus::NotFound);
        Ok(())
    }

    async fn send<R, W>(&self, session: &mut Session<R, W>, body: MessageBody) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let msg = HandshakeMessage::new(self.peer_id, body);
        tracing::debug!("Send >> {}", msg.body);
        send_message(&mut session.writer, &msg).await
    }

    async fn receive<R, W>(&self, session: &mut Session<R, W>) -> Result<MessageBody>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let msg = timeout(self.response_timeout, session.frames.read_message())
            .await
            .with_context(|| format!("No reply from master within {:?}", self.response_timeout))??;
        tracing::debug!(peer = msg.peer_id, "Received << {}", msg.body);
        Ok(msg.body)
    }

    /// Send `body` and require an ack; a nack closes the session
    async fn send_expect_ack<R, W>(
        &mut self,
        session: &mut Session<R, W>,
        body: MessageBody,
        sent_state: SlaveState,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let label = body.to_string();
        self.send(session, body).await?;
        self.transition(sent_state);

        match self.receive(session).await? {
            MessageBody::Ack => Ok(()),
            MessageBody::Nack => {
                tracing::warn!("Master rejected {}", label);
                if sent_state != SlaveState::CloseSent {
                    self.close(session).await;
                }
                anyhow::bail!("Master rejected {}", label)
            }
            other => anyhow::bail!("Expected ack for {}, got {}", label, other),
        }
    }

    /// Send `status` carrying `local` until the reply satisfies `done`
    async fn poll_status<R, W, F>(
        &mut self,
        session: &mut Session<R, W>,
        local: TestStatus,
        done: F,
    ) -> Result<TestStatus>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Fn(TestStatus) -> bool,
    {
        loop {
            self.send(session, MessageBody::Status(local)).await?;
            match self.receive(session).await? {
                MessageBody::Status(status) if done(status) => return Ok(status),
                MessageBody::Status(status) => {
                    tracing::trace!(%status, "Master not ready yet");
                    sleep(self.poll_interval).await;
                }
                other => anyhow::bail!("Expected status reply, got {}", other),
            }
        }
    }

    /// Best-effort close after a failure
    async fn close<R, W>(&mut self, session: &mut Session<R, W>)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.transition(SlaveState::CloseSent);
        if let Err(e) = self.send(session, MessageBody::Close).await {
            tracing::debug!("Failed to send close: {:#}", e);
            return;
        }
        if let Err(e) = self.receive(session).await {
            tracing::debug!("No close ack: {:#}", e);
        }
        self.transition(SlaveState::Closed);
    }
}
