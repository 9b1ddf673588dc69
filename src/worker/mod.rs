//! Test execution worker
//!
//! Test code runs outside the coordinator so that a crashing or hanging case
//! cannot take the coordination loop down with it. The worker is the same
//! executable started with `--mode worker --channel-fd N`; it inherits one end of
//! a Unix socket pair and serves run requests on it until told to shut down or
//! until the coordinator goes away.
//!
//! # Channel Framing
//!
//! Requests and replies are MessagePack-encoded and length-prefixed:
//!
//! ```text
//! [4 bytes: message length (LE u32)][N bytes: rmp-serde message]
//! ```
//!
//! # Cancellation
//!
//! When a case overruns its timeout the supervisor sends `SIGUSR1` to the worker.
//! The handler only flips the flag behind the worker's [`CancellationToken`];
//! the running entry point is expected to notice and return.

pub mod inline;
pub mod supervisor;

pub use inline::InProcessSupervisor;
pub use supervisor::{Completion, Deadline, ProcessSupervisor, RunRequest, Supervisor};

use crate::catalog::{ModuleResolver, TestEntryPoint, TestStatus};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Largest channel message accepted
const MAX_CHANNEL_MESSAGE: usize = 64 * 1024;

/// Cooperative cancellation flag handed to every entry point
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag before the next case
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Token flipped by the SIGUSR1 handler
static SIGNAL_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

extern "C" fn on_cancel_signal(_sig: libc::c_int) {
    if let Some(token) = SIGNAL_TOKEN.get() {
        token.cancel();
    }
}

/// Install the SIGUSR1 handler and return the token it drives
pub fn install_cancel_handler() -> Result<CancellationToken> {
    let token = SIGNAL_TOKEN.get_or_init(CancellationToken::new).clone();

    let result = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_cancel_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGUSR1, &action, std::ptr::null_mut())
    };
    if result != 0 {
        return Err(std::io::Error::last_os_error()).context("Failed to install SIGUSR1 handler");
    }

    Ok(token)
}

/// Coordinator to worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerRequest {
    /// Run the entry point registered under `entry`
    Run { case_id: u32, entry: String },
    Shutdown,
}

/// Worker to coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerReply {
    Ready { pid: u32 },
    Done { case_id: u32, status: TestStatus },
}

/// Write one length-prefixed message
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let data = rmp_serde::to_vec(msg).context("Failed to serialize channel message")?;

    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(&data)?;
    writer.flush()?;

    Ok(())
}

/// Read one length-prefixed message; `Ok(None)` on clean end of stream
pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read channel message length"),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_CHANNEL_MESSAGE {
        anyhow::bail!("Channel message too large: {} bytes", len);
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .context("Failed to read channel message body")?;

    let msg = rmp_serde::from_slice(&buf).context("Failed to deserialize channel message")?;
    Ok(Some(msg))
}

/// Run an entry point, turning panics and non-outcome returns into `Error`
pub fn invoke_guarded(entry: &dyn TestEntryPoint, token: &CancellationToken) -> TestStatus {
    match panic::catch_unwind(AssertUnwindSafe(|| entry.invoke(token))) {
        Ok(status) if status.is_outcome() => status,
        Ok(status) => {
            tracing::warn!(%status, "Entry point returned a non-final status");
            TestStatus::Error
        }
        Err(_) => {
            tracing::error!("Entry point panicked");
            TestStatus::Error
        }
    }
}

/// Serve run requests until shutdown or end of stream
pub fn serve<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    resolver: &dyn ModuleResolver,
    token: &CancellationToken,
) -> Result<()> {
    write_frame(&mut writer, &WorkerReply::Ready { pid: std::process::id() })?;

    while let Some(request) = read_frame::<_, WorkerRequest>(&mut reader)? {
        match request {
            WorkerRequest::Run { case_id, entry } => {
                token.reset();
                let status = match resolver.resolve(&entry) {
                    Some(entry_point) => invoke_guarded(entry_point.as_ref(), token),
                    None => {
                        tracing::error!(
                            case_id,
                            entry = %entry,
                            "Worker could not resolve entry point"
                        );
                        TestStatus::Error
                    }
                };
                tracing::debug!(case_id, %status, "Case finished in worker");
                write_frame(&mut writer, &WorkerReply::Done { case_id, status })?;
            }
            WorkerRequest::Shutdown => {
                tracing::debug!("Worker shutting down");
                return Ok(());
            }
        }
    }

    tracing::debug!("Coordinator closed the worker channel");
    Ok(())
}

/// Worker process entry: serve on the inherited socket descriptor
pub fn run_worker(channel_fd: RawFd, resolver: &dyn ModuleResolver) -> Result<()> {
    // SAFETY: the descriptor was created for us by the supervisor and is not
    // otherwise owned in this process
    let stream = unsafe { UnixStream::from_raw_fd(channel_fd) };
    let reader = stream
        .try_clone()
        .context("Failed to clone worker channel")?;
    let token = install_cancel_handler()?;

    serve(reader, stream, resolver, &token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Registry;
    use std::io::Cursor;

    #[test]
    fn test_frame_round_trip() {
        let mut buf = Vec::new();
        let run = WorkerRequest::Run {
            case_id: 7,
            entry: "testFunc1".into(),
        };
        write_frame(&mut buf, &run).unwrap();
        write_frame(&mut buf, &WorkerRequest::Shutdown).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: WorkerRequest = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(first, run);
        let second: WorkerRequest = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(second, WorkerRequest::Shutdown);
        assert!(read_frame::<_, WorkerRequest>(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = ((MAX_CHANNEL_MESSAGE + 1) as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 8]);
        assert!(read_frame::<_, WorkerReply>(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_invoke_guarded_maps_panics_and_non_final() {
        let token = CancellationToken::new();
        let panicking = |_: &CancellationToken| -> TestStatus { panic!("boom") };
        assert_eq!(invoke_guarded(&panicking, &token), TestStatus::Error);

        let running = |_: &CancellationToken| TestStatus::Running;
        assert_eq!(invoke_guarded(&running, &token), TestStatus::Error);

        let failed = |_: &CancellationToken| TestStatus::Failed;
        assert_eq!(invoke_guarded(&failed, &token), TestStatus::Failed);
    }

    #[test]
    fn test_serve_over_socket_pair() {
        let registry = Registry::new()
            .register("pass", |_: &CancellationToken| TestStatus::Passed)
            .register("fail", |_: &CancellationToken| TestStatus::Failed);

        let (parent, child) = UnixStream::pair().unwrap();
        let child_reader = child.try_clone().unwrap();
        let handle = std::thread::spawn(move || {
            let token = CancellationToken::new();
            serve(child_reader, child, &registry, &token)
        });

        let mut reader = parent.try_clone().unwrap();
        let mut writer = parent;

        let ready: WorkerReply = read_frame(&mut reader).unwrap().unwrap();
        assert!(matches!(ready, WorkerReply::Ready { .. }));

        for (id, entry, expected) in [
            (1, "pass", TestStatus::Passed),
            (2, "fail", TestStatus::Failed),
            (3, "missing", TestStatus::Error),
        ] {
            let run = WorkerRequest::Run {
                case_id: id,
                entry: entry.into(),
            };
            write_frame(&mut writer, &run).unwrap();
            let reply: WorkerReply = read_frame(&mut reader).unwrap().unwrap();
            assert_eq!(reply, WorkerReply::Done { case_id: id, status: expected });
        }

        write_frame(&mut writer, &WorkerRequest::Shutdown).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_token_reset() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }
}
