//! Entry point resolution
//!
//! Test code is reached through symbolic names. A [`ModuleResolver`] maps a name
//! to something invocable; the catalog resolves every case once at build time and
//! the worker resolves again by name on its side of the process boundary.

use super::TestStatus;
use crate::worker::CancellationToken;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A runnable test body
///
/// Implementations should poll `cancel` in long-running loops and return
/// promptly once it is set; the supervisor never forcibly interrupts them
/// unless a hard-kill grace period is configured.
pub trait TestEntryPoint: Send + Sync {
    fn invoke(&self, cancel: &CancellationToken) -> TestStatus;
}

impl<F> TestEntryPoint for F
where
    F: Fn(&CancellationToken) -> TestStatus + Send + Sync,
{
    fn invoke(&self, cancel: &CancellationToken) -> TestStatus {
        self(cancel)
    }
}

/// Name to entry point lookup
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn TestEntryPoint>>;
}

/// In-memory resolver populated at startup
#[derive(Clone, Default)]
pub struct Registry {
    entries: HashMap<String, Arc<dyn TestEntryPoint>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point under `name`, replacing any previous one
    pub fn register<F>(mut self, name: impl Into<String>, entry: F) -> Self
    where
        F: Fn(&CancellationToken) -> TestStatus + Send + Sync + 'static,
    {
        self.insert(name, Arc::new(entry));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: Arc<dyn TestEntryPoint>) {
        self.entries.insert(name.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ModuleResolver for Registry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn TestEntryPoint>> {
        self.entries.get(name).cloned()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("entries", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolve() {
        let registry = Registry::new()
            .register("ok", |_: &CancellationToken| TestStatus::Passed)
            .register("cancel_aware", |c: &CancellationToken| {
                if c.is_cancelled() {
                    TestStatus::Timeout
                } else {
                    TestStatus::Passed
                }
            });

        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("missing").is_none());

        let token = CancellationToken::new();
        let entry = registry.resolve("cancel_aware").unwrap();
        assert_eq!(entry.invoke(&token), TestStatus::Passed);
        token.cancel();
        assert_eq!(entry.invoke(&token), TestStatus::Timeout);
    }
}
