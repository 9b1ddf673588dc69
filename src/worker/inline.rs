//! In-process supervisor
//!
//! Runs each case on its own thread inside the coordinator process. There is no
//! crash isolation, so this is meant for embedding and tests; the deadline and
//! cancellation semantics match [`ProcessSupervisor`](super::ProcessSupervisor).
//! A case that ignores cancellation past the hard-kill grace period is abandoned
//! (its thread is detached and its eventual result discarded).

use super::supervisor::{Completion, InFlight, RunRequest, Supervisor};
use super::{invoke_guarded, CancellationToken};
use crate::catalog::TestStatus;
use anyhow::Result;
use crossbeam::channel::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

struct Running {
    in_flight: InFlight,
    token: CancellationToken,
    result: Receiver<TestStatus>,
}

/// Thread-per-case supervisor
#[derive(Default)]
pub struct InProcessSupervisor {
    running: Option<Running>,
    hard_kill_grace: Option<Duration>,
    stopped: bool,
}

impl InProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hard_kill_grace(mut self, grace: Duration) -> Self {
        self.hard_kill_grace = Some(grace);
        self
    }
}

impl Supervisor for InProcessSupervisor {
    fn launch(&mut self, request: RunRequest) -> Result<()> {
        if self.stopped {
            anyhow::bail!("Supervisor has been shut down");
        }
        if self.running.is_some() {
            anyhow::bail!("A case is already running");
        }
        let Some(entry) = request.entry.clone() else {
            anyhow::bail!("Case {} has no resolved entry point", request.name);
        };

        let token = CancellationToken::new();
        let (tx, result) = channel::bounded(1);
        let thread_token = token.clone();
        std::thread::Builder::new()
            .name(format!("case-{}", request.case_id))
            .spawn(move || {
                let status = invoke_guarded(entry.as_ref(), &thread_token);
                let _ = tx.send(status);
            })?;

        tracing::debug!(
            case_id = request.case_id,
            case = %request.name,
            "Case launched in-process"
        );
        self.running = Some(Running {
            in_flight: InFlight::new(&request),
            token,
            result,
        });

        Ok(())
    }

    fn poll(&mut self) -> Result<Option<Completion>> {
        let Some(running) = self.running.as_mut() else {
            return Ok(None);
        };

        match running.result.try_recv() {
            Ok(status) => {
                let completion = running.in_flight.complete(status);
                self.running = None;
                return Ok(Some(completion));
            }
            Err(TryRecvError::Disconnected) => {
                let completion = running.in_flight.complete(TestStatus::Error);
                self.running = None;
                return Ok(Some(completion));
            }
            Err(TryRecvError::Empty) => {}
        }

        if running.in_flight.needs_cancel() {
            tracing::info!(
                case = %running.in_flight.name,
                "Case timed out, requesting cancellation"
            );
            running.token.cancel();
            running.in_flight.cancelled_at = Some(Instant::now());
        } else if running.in_flight.grace_exceeded(self.hard_kill_grace) {
            tracing::warn!(
                case = %running.in_flight.name,
                "Case ignored cancellation, abandoning it"
            );
            let completion = running.in_flight.complete(TestStatus::Timeout);
            self.running = None;
            return Ok(Some(completion));
        }

        Ok(None)
    }

    fn is_busy(&self) -> bool {
        self.running.is_some()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stopped = true;
        if let Some(running) = self.running.take() {
            running.token.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TestEntryPoint;
    use std::sync::Arc;

    fn request(id: u32, timeout_ms: u64, entry: Arc<dyn TestEntryPoint>) -> RunRequest {
        RunRequest {
            case_id: id,
            name: format!("case{}", id),
            entry_name: format!("case{}", id),
            entry: Some(entry),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn wait(supervisor: &mut InProcessSupervisor) -> Completion {
        loop {
            if let Some(c) = supervisor.poll().unwrap() {
                return c;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_passing_case() {
        let mut supervisor = InProcessSupervisor::new();
        supervisor
            .launch(request(1, 1000, Arc::new(|_: &CancellationToken| TestStatus::Passed)))
            .unwrap();
        assert!(supervisor.is_busy());
        let completion = wait(&mut supervisor);
        assert_eq!(completion.case_id, 1);
        assert_eq!(completion.status, TestStatus::Passed);
        assert!(completion.elapsed < Duration::from_millis(1000));
        assert!(!supervisor.is_busy());
    }

    #[test]
    fn test_cooperative_timeout() {
        let mut supervisor = InProcessSupervisor::new();
        let looping = |c: &CancellationToken| {
            while !c.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            TestStatus::Timeout
        };
        supervisor.launch(request(2, 20, Arc::new(looping))).unwrap();
        let completion = wait(&mut supervisor);
        assert_eq!(completion.status, TestStatus::Timeout);
        assert_eq!(completion.elapsed, Duration::from_millis(20));
    }

    #[test]
    fn test_late_pass_is_still_timeout() {
        let mut supervisor = InProcessSupervisor::new();
        let stubborn = |c: &CancellationToken| {
            while !c.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            TestStatus::Passed
        };
        supervisor.launch(request(3, 10, Arc::new(stubborn))).unwrap();
        assert_eq!(wait(&mut supervisor).status, TestStatus::Timeout);
    }

    #[test]
    fn test_hard_kill_grace_abandons_case() {
        let mut supervisor =
            InProcessSupervisor::new().with_hard_kill_grace(Duration::from_millis(10));
        let deaf = |_: &CancellationToken| {
            std::thread::sleep(Duration::from_millis(500));
            TestStatus::Passed
        };
        supervisor.launch(request(4, 10, Arc::new(deaf))).unwrap();
        let completion = wait(&mut supervisor);
        assert_eq!(completion.status, TestStatus::Timeout);

        // supervisor is free for the next case right away
        supervisor
            .launch(request(5, 1000, Arc::new(|_: &CancellationToken| TestStatus::Failed)))
            .unwrap();
        assert_eq!(wait(&mut supervisor).status, TestStatus::Failed);
    }

    #[test]
    fn test_launch_while_busy_fails() {
        let mut supervisor = InProcessSupervisor::new();
        let slow = |c: &CancellationToken| {
            while !c.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            TestStatus::Timeout
        };
        supervisor.launch(request(6, 50, Arc::new(slow))).unwrap();
        assert!(supervisor
            .launch(request(7, 50, Arc::new(|_: &CancellationToken| TestStatus::Passed)))
            .is_err());
        supervisor.shutdown().unwrap();
        assert!(!supervisor.is_busy());
    }

    #[test]
    fn test_unresolved_entry_rejected() {
        let mut supervisor = InProcessSupervisor::new();
        let mut req = request(8, 10, Arc::new(|_: &CancellationToken| TestStatus::Passed));
        req.entry = None;
        assert!(supervisor.launch(req).is_err());
    }
}
