//! Status and report output
//!
//! Coordinators publish progress through a [`StatusSink`] while cases run and
//! hand the final catalog to a [`ReportSink`] once the run is over. Both are
//! replaceable; the CLI picks console/JSON/text implementations from config.

pub mod json;
pub mod text;

pub use json::JsonReport;
pub use text::TextReport;

use crate::catalog::{Catalog, Summary, TestStatus};
use crate::Result;
use std::sync::{Arc, Mutex};

/// Receives live per-case progress
pub trait StatusSink: Send {
    fn update(&self, display_name: &str, elapsed_secs: f64, status: TestStatus);
}

/// Renders the final catalog and counters
pub trait ReportSink: Send {
    fn write(&self, catalog: &Catalog, summary: &Summary) -> Result<()>;
}

/// Discards status updates
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn update(&self, _display_name: &str, _elapsed_secs: f64, _status: TestStatus) {}
}

/// One line per update on stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleStatusSink;

impl StatusSink for ConsoleStatusSink {
    fn update(&self, display_name: &str, elapsed_secs: f64, status: TestStatus) {
        if status == TestStatus::Running {
            println!("  {:<40} {:>10}", display_name, status.label());
        } else {
            println!("  {:<40} {:>10}  {:>8.3}s", display_name, status.label(), elapsed_secs);
        }
    }
}

/// Writes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReportSink;

impl ReportSink for NullReportSink {
    fn write(&self, _catalog: &Catalog, _summary: &Summary) -> Result<()> {
        Ok(())
    }
}

/// Several report sinks behind one
#[derive(Default)]
pub struct MultiReportSink {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl MultiReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn ReportSink>) {
        self.sinks.push(sink);
    }
}

impl ReportSink for MultiReportSink {
    fn write(&self, catalog: &Catalog, summary: &Summary) -> Result<()> {
        for sink in &self.sinks {
            sink.write(catalog, summary)?;
        }
        Ok(())
    }
}

/// Keeps every update in memory (for embedding and tests)
#[derive(Debug, Clone, Default)]
pub struct MemoryStatusSink {
    updates: Arc<Mutex<Vec<(String, f64, TestStatus)>>>,
}

impl MemoryStatusSink {
    pub fn updates(&self) -> Vec<(String, f64, TestStatus)> {
        match self.updates.lock() {
            Ok(updates) => updates.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl StatusSink for MemoryStatusSink {
    fn update(&self, display_name: &str, elapsed_secs: f64, status: TestStatus) {
        let mut updates = match self.updates.lock() {
            Ok(updates) => updates,
            Err(poisoned) => poisoned.into_inner(),
        };
        updates.push((display_name.to_string(), elapsed_secs, status));
    }
}

/// Keeps every reported summary in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReportSink {
    reports: Arc<Mutex<Vec<Summary>>>,
}

impl MemoryReportSink {
    pub fn reports(&self) -> Vec<Summary> {
        match self.reports.lock() {
            Ok(reports) => reports.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ReportSink for MemoryReportSink {
    fn write(&self, _catalog: &Catalog, summary: &Summary) -> Result<()> {
        let mut reports = match self.reports.lock() {
            Ok(reports) => reports,
            Err(poisoned) => poisoned.into_inner(),
        };
        reports.push(*summary);
        Ok(())
    }
}
