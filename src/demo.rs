//! Demo test entry points
//!
//! The binary registers these under the names used by `tframework.toml`, so a
//! fresh checkout can run standalone or master/slave sessions out of the box.

use crate::catalog::{Registry, TestStatus};
use crate::worker::CancellationToken;
use std::time::{Duration, Instant};

/// Sleep for `total`, waking early if the case is cancelled
fn cooperative_sleep(total: Duration, cancel: &CancellationToken) -> bool {
    let start = Instant::now();
    while start.elapsed() < total {
        if cancel.is_cancelled() {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    true
}

/// Works for a while, then passes
pub fn test_func1(cancel: &CancellationToken) -> TestStatus {
    println!("testFunc1: working...");
    if cooperative_sleep(Duration::from_secs(5), cancel) {
        TestStatus::Passed
    } else {
        TestStatus::Timeout
    }
}

/// Always fails
pub fn test_func2(_cancel: &CancellationToken) -> TestStatus {
    println!("testFunc2: failing on purpose");
    TestStatus::Failed
}

/// Never finishes on its own; waits for the timeout signal
pub fn test_func3(cancel: &CancellationToken) -> TestStatus {
    while !cancel.is_cancelled() {
        std::thread::sleep(Duration::from_millis(10));
    }
    println!("testFunc3: timeout, cleaning up...");
    TestStatus::Timeout
}

/// Ignores cancellation and passes after a long sleep
pub fn test_func4(_cancel: &CancellationToken) -> TestStatus {
    println!("testFunc4: not listening for timeouts");
    std::thread::sleep(Duration::from_secs(30));
    TestStatus::Passed
}

/// Suite cleanup hook
pub fn cleanup(_cancel: &CancellationToken) -> TestStatus {
    println!("cleanup: releasing suite resources");
    TestStatus::Passed
}

/// Registry with every demo entry point
pub fn registry() -> Registry {
    Registry::new()
        .register("testFunc1", test_func1)
        .register("testFunc2", test_func2)
        .register("testFunc3", test_func3)
        .register("testFunc4", test_func4)
        .register("cleanup", cleanup)
}
