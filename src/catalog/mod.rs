//! Test catalog
//!
//! The catalog is the ordered, name-keyed collection of test suites and their
//! cases that every coordinator walks. It is built once per process from a list
//! of [`SuiteDescriptor`]s and never grows afterwards; coordinators only mutate
//! per-case status and elapsed time as execution progresses.
//!
//! # Building
//!
//! Descriptor lists may be terminated early by the [`SENTINEL`] name, both at
//! the suite level and inside a suite's case list. Suites that end up without
//! cases are dropped with a notice. Every surviving case receives the next id
//! from a run-wide counter starting at 1, and its entry point is resolved once
//! through a [`ModuleResolver`].

pub mod resolver;

pub use resolver::{ModuleResolver, Registry, TestEntryPoint};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Name terminating a suite or case list before its physical end
pub const SENTINEL: &str = "EOL";

/// Longest suite or case name that fits in a handshake frame
pub const MAX_NAME_LEN: usize = 29;

/// Status of a suite, a case, or the master's current execution
///
/// The discriminants are the one-byte codes carried in `status` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TestStatus {
    Passed = 1,
    Failed = 2,
    Timeout = 3,
    Running = 4,
    Error = 5,
    NotFound = 6,
    Found = 7,
}

impl TestStatus {
    /// Wire code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TestStatus::Passed),
            2 => Some(TestStatus::Failed),
            3 => Some(TestStatus::Timeout),
            4 => Some(TestStatus::Running),
            5 => Some(TestStatus::Error),
            6 => Some(TestStatus::NotFound),
            7 => Some(TestStatus::Found),
            _ => None,
        }
    }

    /// True for the result of running a case (Passed/Failed/Timeout/Error)
    pub fn is_outcome(self) -> bool {
        matches!(
            self,
            TestStatus::Passed | TestStatus::Failed | TestStatus::Timeout | TestStatus::Error
        )
    }

    /// True once a case can no longer change status within a run
    pub fn is_terminal(self) -> bool {
        self.is_outcome() || self == TestStatus::NotFound
    }

    /// Human-readable label used by status and report sinks
    pub fn label(self) -> &'static str {
        match self {
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Timeout => "TIMEOUT",
            TestStatus::Running => "RUNNING",
            TestStatus::Error => "ERROR",
            TestStatus::NotFound => "NOT FOUND",
            TestStatus::Found => "FOUND",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Description of one test case as supplied by configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseDescriptor {
    /// Case name, unique within its suite
    pub name: String,
    /// Time budget in milliseconds
    pub timeout_ms: u64,
    /// Symbolic entry point name handed to the resolver
    pub entry: String,
}

impl CaseDescriptor {
    pub fn new(name: impl Into<String>, timeout_ms: u64, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout_ms,
            entry: entry.into(),
        }
    }
}

/// Description of one test suite as supplied by configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuiteDescriptor {
    pub name: String,
    /// Optional cleanup entry point, run after the suite's case list completes
    #[serde(default)]
    pub cleanup: Option<String>,
    #[serde(default)]
    pub cases: Vec<CaseDescriptor>,
}

impl SuiteDescriptor {
    pub fn new(name: impl Into<String>, cases: Vec<CaseDescriptor>) -> Self {
        Self {
            name: name.into(),
            cleanup: None,
            cases,
        }
    }

    pub fn with_cleanup(mut self, cleanup: impl Into<String>) -> Self {
        self.cleanup = Some(cleanup.into());
        self
    }
}

/// A single test case
#[derive(Clone)]
pub struct TestCase {
    pub id: u32,
    pub name: String,
    pub timeout: Duration,
    /// Symbolic entry point name (what the worker resolves)
    pub entry_name: String,
    /// Resolved entry point; `None` when the resolver did not know the name
    pub entry: Option<Arc<dyn TestEntryPoint>>,
    pub status: TestStatus,
    pub elapsed: Duration,
}

impl TestCase {
    pub fn is_resolved(&self) -> bool {
        self.entry.is_some()
    }

    /// Record a terminal status; a status that is already terminal is kept
    ///
    /// Returns true when the status was applied.
    pub fn finish(&mut self, status: TestStatus, elapsed: Duration) -> bool {
        if self.status.is_outcome() {
            tracing::warn!(
                case = %self.name,
                current = %self.status,
                ignored = %status,
                "Case already has a final status"
            );
            return false;
        }
        self.status = status;
        self.elapsed = elapsed;
        true
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("entry_name", &self.entry_name)
            .field("resolved", &self.entry.is_some())
            .field("status", &self.status)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// A test suite: an ordered, name-keyed set of cases
#[derive(Clone)]
pub struct TestSuite {
    pub name: String,
    pub status: TestStatus,
    pub cleanup_name: Option<String>,
    pub cleanup: Option<Arc<dyn TestEntryPoint>>,
    cases: Vec<TestCase>,
    index: HashMap<String, usize>,
}

impl TestSuite {
    fn new(name: String) -> Self {
        Self {
            name,
            status: TestStatus::NotFound,
            cleanup_name: None,
            cleanup: None,
            cases: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a case, replacing any case with the same name in place
    fn insert(&mut self, case: TestCase) -> Option<TestCase> {
        match self.index.get(&case.name) {
            Some(&pos) => Some(std::mem::replace(&mut self.cases[pos], case)),
            None => {
                self.index.insert(case.name.clone(), self.cases.len());
                self.cases.push(case);
                None
            }
        }
    }

    /// Cases in insertion order
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn cases_mut(&mut self) -> &mut [TestCase] {
        &mut self.cases
    }

    pub fn case(&self, name: &str) -> Option<&TestCase> {
        self.index.get(name).map(|&i| &self.cases[i])
    }

    pub fn case_mut(&mut self, name: &str) -> Option<&mut TestCase> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.cases[i]),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl fmt::Debug for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSuite")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("cleanup_name", &self.cleanup_name)
            .field("cases", &self.cases)
            .finish()
    }
}

/// Run-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub suites: u32,
    pub cases: u32,
    pub passed: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub errors: u32,
    pub cases_not_found: u32,
    pub suites_not_found: u32,
}

impl Summary {
    /// Count one case reaching a terminal status
    pub fn record_case(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Timeout => self.timed_out += 1,
            TestStatus::Error => self.errors += 1,
            TestStatus::NotFound => self.cases_not_found += 1,
            TestStatus::Running | TestStatus::Found => {
                tracing::warn!(%status, "Ignoring non-terminal status in summary");
            }
        }
    }

    pub fn record_suite_not_found(&mut self) {
        self.suites_not_found += 1;
    }

    /// Cases that reached a terminal status
    pub fn accounted(&self) -> u32 {
        self.passed + self.failed + self.timed_out + self.errors + self.cases_not_found
    }

    /// True when every case passed and nothing was missing
    pub fn all_passed(&self) -> bool {
        self.passed == self.cases && self.suites_not_found == 0
    }
}

/// The full set of suites for one run
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    suites: Vec<TestSuite>,
    index: HashMap<String, usize>,
    next_case_id: u32,
    summary: Summary,
}

impl Catalog {
    /// Build a catalog from descriptors, resolving entry points via `resolver`
    pub fn build(descriptors: &[SuiteDescriptor], resolver: &dyn ModuleResolver) -> Result<Self> {
        let mut catalog = Catalog {
            next_case_id: 1,
            ..Default::default()
        };

        for desc in descriptors {
            if desc.name == SENTINEL {
                break;
            }
            validate_name("suite", &desc.name)?;

            let cases: Vec<&CaseDescriptor> = desc
                .cases
                .iter()
                .take_while(|c| c.name != SENTINEL)
                .collect();
            if cases.is_empty() {
                tracing::info!(suite = %desc.name, "No test cases in suite, skipping");
                continue;
            }

            let mut suite = TestSuite::new(desc.name.clone());
            if let Some(cleanup) = &desc.cleanup {
                suite.cleanup = resolver.resolve(cleanup);
                if suite.cleanup.is_none() {
                    tracing::warn!(
                        suite = %desc.name,
                        cleanup = %cleanup,
                        "Cleanup entry point not found"
                    );
                }
                suite.cleanup_name = Some(cleanup.clone());
            }

            for case_desc in cases {
                validate_name("case", &case_desc.name)?;
                let entry = resolver.resolve(&case_desc.entry);
                if entry.is_none() {
                    tracing::warn!(
                        suite = %desc.name,
                        case = %case_desc.name,
                        entry = %case_desc.entry,
                        "Entry point not found"
                    );
                }

                let case = TestCase {
                    id: catalog.next_case_id,
                    name: case_desc.name.clone(),
                    timeout: Duration::from_millis(case_desc.timeout_ms),
                    entry_name: case_desc.entry.clone(),
                    entry,
                    status: TestStatus::NotFound,
                    elapsed: Duration::ZERO,
                };
                catalog.next_case_id += 1;

                if let Some(old) = suite.insert(case) {
                    tracing::warn!(
                        suite = %desc.name,
                        case = %old.name,
                        replaced_id = old.id,
                        "Duplicate case name, keeping the last definition"
                    );
                } else {
                    catalog.summary.cases += 1;
                }
            }

            tracing::debug!(suite = %suite.name, cases = suite.len(), "Suite added to catalog");
            match catalog.index.get(&suite.name) {
                Some(&pos) => {
                    tracing::warn!(
                        suite = %suite.name,
                        "Duplicate suite name, keeping the last definition"
                    );
                    let old = std::mem::replace(&mut catalog.suites[pos], suite);
                    catalog.summary.cases -= old.len() as u32;
                }
                None => {
                    catalog.index.insert(suite.name.clone(), catalog.suites.len());
                    catalog.suites.push(suite);
                    catalog.summary.suites += 1;
                }
            }
        }

        if catalog.suites.is_empty() {
            anyhow::bail!("No test suites/cases supplied");
        }

        Ok(catalog)
    }

    /// Suites in insertion order
    pub fn suites(&self) -> &[TestSuite] {
        &self.suites
    }

    pub fn suites_mut(&mut self) -> &mut [TestSuite] {
        &mut self.suites
    }

    pub fn suite(&self, name: &str) -> Option<&TestSuite> {
        self.index.get(name).map(|&i| &self.suites[i])
    }

    pub fn suite_mut(&mut self, name: &str) -> Option<&mut TestSuite> {
        match self.index.get(name) {
            Some(&i) => Some(&mut self.suites[i]),
            None => None,
        }
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn summary_mut(&mut self) -> &mut Summary {
        &mut self.summary
    }

    /// Next id that would be handed out (ids are never reused)
    pub fn next_case_id(&self) -> u32 {
        self.next_case_id
    }
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("Empty {} name", kind);
    }
    if name.len() > MAX_NAME_LEN {
        anyhow::bail!(
            "{} name '{}' is {} bytes (max {})",
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

    fn registry() -> Registry {
        Registry::new()
            .register("pass", |_: &crate::worker::CancellationToken| TestStatus::Passed)
            .register("fail", |_: &crate::worker::CancellationToken| TestStatus::Failed)
            .register("cleanup", |_: &crate::worker::CancellationToken| TestStatus::Passed)
    }

    #[test]
    fn test_status_codes() {
        for code in 1..=7u8 {
            let status = TestStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert_eq!(TestStatus::from_code(0), None);
        assert_eq!(TestStatus::from_code(8), None);
        assert!(TestStatus::NotFound.is_terminal());
        assert!(!TestStatus::NotFound.is_outcome());
        assert!(!TestStatus::Running.is_terminal());
        assert!(!TestStatus::Found.is_terminal());
    }

    #[test]
    fn test_build_assigns_sequential_ids() {
        let descs = vec![
            SuiteDescriptor::new(
                "SUITE_1",
                vec![
                    CaseDescriptor::new("CASE_1", 1000, "pass"),
                    CaseDescriptor::new("CASE_2", 1000, "fail"),
                ],
            ),
            SuiteDescriptor::new("SUITE_2", vec![CaseDescriptor::new("CASE_1", 500, "pass")]),
        ];

        let catalog = Catalog::build(&descs, &registry()).unwrap();
        let ids: Vec<u32> = catalog
            .suites()
            .iter()
            .flat_map(|s| s.cases().iter().map(|c| c.id))
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(catalog.summary().suites, 2);
        assert_eq!(catalog.summary().cases, 3);
        let case = catalog.suite("SUITE_2").unwrap().case("CASE_1").unwrap();
        assert_eq!(case.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_build_drops_empty_suite() {
        let descs = vec![
            SuiteDescriptor::new("EMPTY", vec![CaseDescriptor::new(SENTINEL, 0, "")]),
            SuiteDescriptor::new(
                "FULL",
                vec![
                    CaseDescriptor::new("A", 100, "pass"),
                    CaseDescriptor::new("B", 100, "pass"),
                    CaseDescriptor::new("C", 100, "pass"),
                ],
            ),
        ];

        let catalog = Catalog::build(&descs, &registry()).unwrap();
        assert_eq!(catalog.suites().len(), 1);
        assert!(catalog.suite("EMPTY").is_none());
        let full = catalog.suite("FULL").unwrap();
        let ids: Vec<u32> = full.cases().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(catalog.summary().suites, 1);
        assert_eq!(catalog.summary().cases, 3);
    }

    #[test]
    fn test_build_stops_at_sentinel() {
        let descs = vec![
            SuiteDescriptor::new(
                "S",
                vec![
                    CaseDescriptor::new("A", 100, "pass"),
                    CaseDescriptor::new(SENTINEL, 0, ""),
                    CaseDescriptor::new("HIDDEN", 100, "pass"),
                ],
            ),
            SuiteDescriptor::new(SENTINEL, vec![]),
            SuiteDescriptor::new("AFTER", vec![CaseDescriptor::new("A", 100, "pass")]),
        ];

        let catalog = Catalog::build(&descs, &registry()).unwrap();
        assert_eq!(catalog.suites().len(), 1);
        assert_eq!(catalog.suite("S").unwrap().len(), 1);
    }

    #[test]
    fn test_build_empty_is_error() {
        assert!(Catalog::build(&[], &registry()).is_err());
        let descs = vec![SuiteDescriptor::new(SENTINEL, vec![])];
        assert!(Catalog::build(&descs, &registry()).is_err());
    }

    #[test]
    fn test_build_rejects_long_names() {
        let long = "X".repeat(MAX_NAME_LEN + 1);
        let descs = vec![SuiteDescriptor::new(long, vec![CaseDescriptor::new("A", 1, "pass")])];
        assert!(Catalog::build(&descs, &registry()).is_err());
    }

    #[test]
    fn test_unresolved_entry_is_not_found() {
        let descs = vec![SuiteDescriptor::new(
            "S",
            vec![CaseDescriptor::new("A", 100, "missing")],
        )
        .with_cleanup("cleanup")];

        let catalog = Catalog::build(&descs, &registry()).unwrap();
        let suite = catalog.suite("S").unwrap();
        let case = suite.case("A").unwrap();
        assert!(!case.is_resolved());
        assert_eq!(case.status, TestStatus::NotFound);
        assert!(suite.cleanup.is_some());
    }

    #[test]
    fn test_duplicate_case_last_write_wins() {
        let descs = vec![SuiteDescriptor::new(
            "S",
            vec![
                CaseDescriptor::new("A", 100, "pass"),
                CaseDescriptor::new("A", 200, "fail"),
            ],
        )];

        let catalog = Catalog::build(&descs, &registry()).unwrap();
        let suite = catalog.suite("S").unwrap();
        assert_eq!(suite.len(), 1);
        let case = suite.case("A").unwrap();
        assert_eq!(case.id, 2);
        assert_eq!(case.entry_name, "fail");
        assert_eq!(catalog.summary().cases, 1);
        assert_eq!(catalog.next_case_id(), 3);
    }

    #[test]
    fn test_finish_keeps_terminal_status() {
        let descs = vec![SuiteDescriptor::new("S", vec![CaseDescriptor::new("A", 100, "pass")])];
        let mut catalog = Catalog::build(&descs, &registry()).unwrap();
        let case = catalog.suite_mut("S").unwrap().case_mut("A").unwrap();

        assert!(case.finish(TestStatus::Passed, Duration::from_millis(5)));
        assert!(!case.finish(TestStatus::Failed, Duration::from_millis(9)));
        assert_eq!(case.status, TestStatus::Passed);
        assert_eq!(case.elapsed, Duration::from_millis(5));
    }

    #[test]
    fn test_summary_record() {
        let mut summary = Summary::default();
        summary.cases = 5;
        for status in [
            TestStatus::Passed,
            TestStatus::Failed,
            TestStatus::Timeout,
            TestStatus::Error,
            TestStatus::NotFound,
        ] {
            summary.record_case(status);
        }
        summary.record_case(TestStatus::Running);
        assert_eq!(summary.accounted(), 5);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.errors, 1);
        assert!(!summary.all_passed());
    }
}
