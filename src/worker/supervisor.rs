//! Execution supervisor
//!
//! A [`Supervisor`] runs one case at a time against a deadline. Coordinators
//! drive it without blocking: [`Supervisor::launch`] hands the case over and
//! [`Supervisor::poll`] is called on every loop iteration until it yields a
//! [`Completion`]. Deadline enforcement happens inside `poll`, so the poll rate
//! bounds how late a cancellation can be delivered.
//!
//! # Lifecycle
//!
//! 1. Create the supervisor (the process supervisor spawns its worker here)
//! 2. `launch()` a case, then `poll()` until a completion arrives
//! 3. Repeat for every case; the same worker is reused
//! 4. `shutdown()` when the coordinator is done

use super::{read_frame, write_frame, WorkerReply, WorkerRequest};
use crate::catalog::{TestEntryPoint, TestStatus};
use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long a freshly spawned worker has to report ready
const WORKER_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// One case handed to a supervisor
#[derive(Clone)]
pub struct RunRequest {
    pub case_id: u32,
    /// Display name for logs
    pub name: String,
    /// Registry name of the entry point
    pub entry_name: String,
    pub entry: Option<Arc<dyn TestEntryPoint>>,
    pub timeout: Duration,
}

impl std::fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRequest")
            .field("case_id", &self.case_id)
            .field("name", &self.name)
            .field("entry_name", &self.entry_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Outcome of one supervised run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub case_id: u32,
    pub status: TestStatus,
    /// Time spent, never more than the case timeout
    pub elapsed: Duration,
}

/// Non-blocking executor of test cases
pub trait Supervisor: Send {
    /// Start running a case; fails if one is already in flight
    fn launch(&mut self, request: RunRequest) -> Result<()>;

    /// Check for completion and enforce the deadline
    fn poll(&mut self) -> Result<Option<Completion>>;

    /// True while a launched case has not completed
    fn is_busy(&self) -> bool;

    /// Stop the worker; no further launches are possible
    fn shutdown(&mut self) -> Result<()>;
}

/// Monotonic per-case deadline
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    pub fn start(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.timeout
    }

    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started.elapsed())
    }

    /// Timeout minus remaining: actual run time capped at the timeout
    pub fn elapsed(&self) -> Duration {
        self.timeout - self.remaining()
    }
}

/// Bookkeeping for the case currently running
#[derive(Debug)]
pub(crate) struct InFlight {
    pub case_id: u32,
    pub name: String,
    pub deadline: Deadline,
    pub cancelled_at: Option<Instant>,
}

impl InFlight {
    pub fn new(request: &RunRequest) -> Self {
        Self {
            case_id: request.case_id,
            name: request.name.clone(),
            deadline: Deadline::start(request.timeout),
            cancelled_at: None,
        }
    }

    /// Final status: a case that had to be cancelled is a timeout whatever it returned
    pub fn complete(&self, status: TestStatus) -> Completion {
        let status = if self.cancelled_at.is_some() {
            TestStatus::Timeout
        } else {
            status
        };
        Completion {
            case_id: self.case_id,
            status,
            elapsed: self.deadline.elapsed(),
        }
    }

    /// True once the deadline passes and cancellation has not yet been requested
    pub fn needs_cancel(&self) -> bool {
        self.cancelled_at.is_none() && self.deadline.expired()
    }

    /// True when cancellation was requested more than `grace` ago
    pub fn grace_exceeded(&self, grace: Option<Duration>) -> bool {
        match (self.cancelled_at, grace) {
            (Some(at), Some(grace)) => at.elapsed() >= grace,
            _ => false,
        }
    }
}

/// Process supervisor settings
#[derive(Debug, Clone)]
pub struct ProcessSupervisorConfig {
    /// Executable started in worker mode
    pub exe: PathBuf,
    /// Extra arguments passed after `--mode worker --channel-fd N`
    pub extra_args: Vec<String>,
    /// Kill the worker this long after cancellation if it still has not replied
    pub hard_kill_grace: Option<Duration>,
}

impl ProcessSupervisorConfig {
    /// Worker is the current executable
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to get current executable path")?;
        Ok(Self {
            exe,
            extra_args: Vec::new(),
            hard_kill_grace: None,
        })
    }
}

enum ChannelEvent {
    Reply(WorkerReply),
    Closed(Option<String>),
}

struct WorkerHandle {
    child: Child,
    writer: UnixStream,
    events: Receiver<ChannelEvent>,
    reader_thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn spawn(config: &ProcessSupervisorConfig) -> Result<Self> {
        let (parent, child_end) = UnixStream::pair().context("Failed to create worker channel")?;
        let child_fd = child_end.as_raw_fd();

        let mut cmd = Command::new(&config.exe);
        cmd.arg("--mode")
            .arg("worker")
            .arg("--channel-fd")
            .arg(child_fd.to_string())
            .args(&config.extra_args);

        // SAFETY: only async-signal-safe fcntl calls between fork and exec
        unsafe {
            cmd.pre_exec(move || {
                let flags = libc::fcntl(child_fd, libc::F_GETFD);
                if flags < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::fcntl(child_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn worker: {}", config.exe.display()))?;
        drop(child_end);

        let mut reader = parent.try_clone().context("Failed to clone worker channel")?;
        let (tx, events) = channel::unbounded();
        let reader_thread = std::thread::Builder::new()
            .name("worker-channel".to_string())
            .spawn(move || loop {
                match read_frame::<_, WorkerReply>(&mut reader) {
                    Ok(Some(reply)) => {
                        if tx.send(ChannelEvent::Reply(reply)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(ChannelEvent::Closed(None));
                        return;
                    }
                    Err(e) => {
                        let _ = tx.send(ChannelEvent::Closed(Some(format!("{:#}", e))));
                        return;
                    }
                }
            })
            .context("Failed to start worker channel reader")?;

        let mut handle = Self {
            child,
            writer: parent,
            events,
            reader_thread: Some(reader_thread),
        };

        match handle.events.recv_timeout(WORKER_STARTUP_TIMEOUT) {
            Ok(ChannelEvent::Reply(WorkerReply::Ready { pid })) => {
                tracing::debug!(pid, "Worker ready");
                Ok(handle)
            }
            Ok(ChannelEvent::Reply(other)) => {
                handle.kill();
                anyhow::bail!("Unexpected first message from worker: {:?}", other)
            }
            Ok(ChannelEvent::Closed(reason)) => {
                handle.kill();
                anyhow::bail!(
                    "Worker exited during startup{}",
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                )
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                handle.kill();
                anyhow::bail!("Worker did not become ready within {:?}", WORKER_STARTUP_TIMEOUT)
            }
        }
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn send(&mut self, request: &WorkerRequest) -> Result<()> {
        write_frame(&mut self.writer, request).context("Failed to send request to worker")
    }

    fn signal_cancel(&self) -> Result<()> {
        let rc = unsafe { libc::kill(self.pid() as libc::pid_t, libc::SIGUSR1) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error()).context("Failed to signal worker");
        }
        Ok(())
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!("Worker kill: {}", e);
        }
        let _ = self.child.wait();
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
        if let Some(thread) = self.reader_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Runs cases in a dedicated worker process
pub struct ProcessSupervisor {
    config: ProcessSupervisorConfig,
    worker: Option<WorkerHandle>,
    in_flight: Option<InFlight>,
    stopped: bool,
}

impl ProcessSupervisor {
    /// Spawn the worker process and wait for it to report ready
    pub fn spawn(config: ProcessSupervisorConfig) -> Result<Self> {
        let worker = WorkerHandle::spawn(&config)?;
        tracing::info!(pid = worker.pid(), "Worker process started");

        Ok(Self {
            config,
            worker: Some(worker),
            in_flight: None,
            stopped: false,
        })
    }

    /// Pid of the current worker process, if one is running
    pub fn worker_pid(&self) -> Option<u32> {
        self.worker.as_ref().map(WorkerHandle::pid)
    }

    fn discard_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.kill();
        }
    }
}

impl Supervisor for ProcessSupervisor {
    fn launch(&mut self, request: RunRequest) -> Result<()> {
        if self.stopped {
            anyhow::bail!("Supervisor has been shut down");
        }
        if self.in_flight.is_some() {
            anyhow::bail!("A case is already running");
        }
        if request.entry.is_none() {
            anyhow::bail!("Case {} has no resolved entry point", request.name);
        }

        if self.worker.is_none() {
            tracing::info!("Respawning worker process");
            self.worker = Some(WorkerHandle::spawn(&self.config)?);
        }
        let worker = match self.worker.as_mut() {
            Some(worker) => worker,
            None => anyhow::bail!("No worker process available"),
        };

        worker.send(&WorkerRequest::Run {
            case_id: request.case_id,
            entry: request.entry_name.clone(),
        })?;
        tracing::debug!(
            case_id = request.case_id,
            case = %request.name,
            timeout = ?request.timeout,
            "Case launched"
        );
        self.in_flight = Some(InFlight::new(&request));

        Ok(())
    }

    fn poll(&mut self) -> Result<Option<Completion>> {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return Ok(None);
        };
        let Some(worker) = self.worker.as_ref() else {
            anyhow::bail!("Case {} in flight without a worker", in_flight.name);
        };

        let event = match worker.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(ChannelEvent::Closed(None)),
        };

        match event {
            Some(ChannelEvent::Reply(WorkerReply::Done { case_id, status }))
                if case_id == in_flight.case_id =>
            {
                let completion = in_flight.complete(status);
                self.in_flight = None;
                return Ok(Some(completion));
            }
            Some(ChannelEvent::Reply(other)) => {
                tracing::warn!(?other, "Ignoring unexpected worker reply");
            }
            Some(ChannelEvent::Closed(reason)) => {
                tracing::error!(
                    case = %in_flight.name,
                    reason = reason.as_deref().unwrap_or("end of stream"),
                    "Worker process died while running case"
                );
                let completion = in_flight.complete(TestStatus::Error);
                self.in_flight = None;
                self.discard_worker();
                return Ok(Some(completion));
            }
            None => {}
        }

        if in_flight.needs_cancel() {
            tracing::info!(case = %in_flight.name, "Case timed out, requesting cancellation");
            worker.signal_cancel()?;
            in_flight.cancelled_at = Some(Instant::now());
        } else if in_flight.grace_exceeded(self.config.hard_kill_grace) {
            tracing::warn!(case = %in_flight.name, "Worker ignored cancellation, killing it");
            let completion = in_flight.complete(TestStatus::Timeout);
            self.in_flight = None;
            self.discard_worker();
            return Ok(Some(completion));
        }

        Ok(None)
    }

    fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stopped = true;
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };

        if self.in_flight.take().is_some() {
            worker.kill();
            return Ok(());
        }

        if let Err(e) = worker.send(&WorkerRequest::Shutdown) {
            tracing::debug!("Worker already gone: {:#}", e);
        }
        let status = worker.child.wait().context("Failed to wait for worker")?;
        tracing::debug!(?status, "Worker exited");
        let _ = worker.writer.shutdown(std::net::Shutdown::Both);
        if let Some(thread) = worker.reader_thread.take() {
            let _ = thread.join();
        }

        Ok(())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.discard_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_elapsed_is_capped() {
        let deadline = Deadline::start(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert_eq!(deadline.elapsed(), Duration::from_millis(10));
    }

    #[test]
    fn test_deadline_not_expired() {
        let deadline = Deadline::start(Duration::from_secs(60));
        assert!(!deadline.expired());
        assert!(deadline.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_cancelled_case_completes_as_timeout() {
        let request = RunRequest {
            case_id: 4,
            name: "slow".into(),
            entry_name: "slow".into(),
            entry: None,
            timeout: Duration::from_millis(5),
        };
        let mut in_flight = InFlight::new(&request);
        assert_eq!(in_flight.complete(TestStatus::Passed).status, TestStatus::Passed);

        std::thread::sleep(Duration::from_millis(10));
        assert!(in_flight.needs_cancel());
        in_flight.cancelled_at = Some(Instant::now());
        assert!(!in_flight.needs_cancel());
        assert!(!in_flight.grace_exceeded(None));
        assert!(in_flight.grace_exceeded(Some(Duration::ZERO)));

        let completion = in_flight.complete(TestStatus::Passed);
        assert_eq!(completion.status, TestStatus::Timeout);
        assert_eq!(completion.elapsed, Duration::from_millis(5));
    }

    #[test]
    fn test_spawn_missing_executable_fails() {
        let config = ProcessSupervisorConfig {
            exe: PathBuf::from("/nonexistent/tframework-worker"),
            extra_args: Vec::new(),
            hard_kill_grace: None,
        };
        assert!(ProcessSupervisor::spawn(config).is_err());
    }

    #[test]
    fn test_spawn_non_worker_executable_fails() {
        // `true` exits immediately without ever reporting ready
        let config = ProcessSupervisorConfig {
            exe: PathBuf::from("true"),
            extra_args: Vec::new(),
            hard_kill_grace: None,
        };
        assert!(ProcessSupervisor::spawn(config).is_err());
    }
}
