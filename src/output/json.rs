//! JSON report
//!
//! Writes one `Test_Report_<timestamp>.json` file per run into the configured
//! report directory. The document carries the host, the run mode, every suite
//! with its cases and the summary counters.

use super::ReportSink;
use crate::catalog::{Catalog, Summary};
use crate::util::time::{format_duration_human, report_file_name};
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Elapsed time in seconds plus a readable rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonElapsed {
    pub seconds: f64,
    pub human: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCase {
    pub id: u32,
    pub name: String,
    pub entry: String,
    pub timeout_ms: u64,
    pub result: String,
    pub elapsed: JsonElapsed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSuite {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
    pub cases: Vec<JsonCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReportDocument {
    pub host: String,
    pub mode: String,
    pub generated_at: String,
    pub suites: Vec<JsonSuite>,
    pub summary: Summary,
}

/// Build the report document for a finished run
pub fn build_report(
    catalog: &Catalog,
    summary: &Summary,
    host: &str,
    mode: &str,
) -> JsonReportDocument {
    let suites = catalog
        .suites()
        .iter()
        .map(|suite| JsonSuite {
            name: suite.name.clone(),
            status: suite.status.label().to_string(),
            cleanup: suite.cleanup_name.clone(),
            cases: suite
                .cases()
                .iter()
                .map(|case| JsonCase {
                    id: case.id,
                    name: case.name.clone(),
                    entry: case.entry_name.clone(),
                    timeout_ms: case.timeout.as_millis() as u64,
                    result: case.status.label().to_string(),
                    elapsed: JsonElapsed {
                        seconds: case.elapsed.as_secs_f64(),
                        human: format_duration_human(case.elapsed),
                    },
                })
                .collect(),
        })
        .collect();

    JsonReportDocument {
        host: host.to_string(),
        mode: mode.to_string(),
        generated_at: chrono::Local::now().to_rfc3339(),
        suites,
        summary: *summary,
    }
}

/// Write a report document to `path`
pub fn write_json_report(path: &Path, document: &JsonReportDocument) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), document)?;

    Ok(())
}

/// Report sink producing a timestamped JSON file
pub struct JsonReport {
    dir: PathBuf,
    mode: String,
    written: Mutex<Option<PathBuf>>,
}

impl JsonReport {
    pub fn new(dir: impl Into<PathBuf>, mode: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            mode: mode.into(),
            written: Mutex::new(None),
        }
    }

    /// Path of the last report written
    pub fn written_path(&self) -> Option<PathBuf> {
        match self.written.lock() {
            Ok(path) => path.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ReportSink for JsonReport {
    fn write(&self, catalog: &Catalog, summary: &Summary) -> Result<()> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create report directory: {}", self.dir.display()))?;
        let path = self.dir.join(report_file_name(chrono::Local::now(), "json"));

        let document = build_report(catalog, summary, &host, &self.mode);
        write_json_report(&path, &document)?;
        println!("Test report written to {}", path.display());

        match self.written.lock() {
            Ok(mut written) => *written = Some(path),
            Err(poisoned) => *poisoned.into_inner() = Some(path),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CaseDescriptor, Registry, SuiteDescriptor, TestStatus};
    use crate::worker::CancellationToken;
    use std::time::Duration;

    fn finished_catalog() -> Catalog {
        let registry = Registry::new().register("pass", |_: &CancellationToken| TestStatus::Passed);
        let descs = vec![SuiteDescriptor::new(
            "TESTSUIT_1",
            vec![
                CaseDescriptor::new("TESTCASE_1", 10000, "pass"),
                CaseDescriptor::new("TESTCASE_2", 10000, "pass"),
            ],
        )
        .with_cleanup("cleanup")];
        let mut catalog = Catalog::build(&descs, &registry).unwrap();

        let suite = catalog.suite_mut("TESTSUIT_1").unwrap();
        suite.status = TestStatus::Found;
        suite
            .case_mut("TESTCASE_1")
            .unwrap()
            .finish(TestStatus::Passed, Duration::from_millis(1500));
        suite.case_mut("TESTCASE_2").unwrap().finish(TestStatus::Failed, Duration::from_millis(3));
        catalog.summary_mut().record_case(TestStatus::Passed);
        catalog.summary_mut().record_case(TestStatus::Failed);
        catalog
    }

    #[test]
    fn test_build_report() {
        let catalog = finished_catalog();
        let doc = build_report(&catalog, catalog.summary(), "host1", "standalone");

        assert_eq!(doc.host, "host1");
        assert_eq!(doc.suites.len(), 1);
        assert_eq!(doc.suites[0].cleanup.as_deref(), Some("cleanup"));
        assert_eq!(doc.suites[0].cases[0].result, "PASSED");
        assert_eq!(doc.suites[0].cases[0].elapsed.human, "1.500s");
        assert_eq!(doc.suites[0].cases[1].result, "FAILED");
        assert_eq!(doc.summary.passed, 1);
        assert_eq!(doc.summary.failed, 1);
    }

    #[test]
    fn test_json_report_written_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = finished_catalog();
        let report = JsonReport::new(dir.path(), "slave");

        report.write(&catalog, catalog.summary()).unwrap();

        let path = report.written_path().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Test_Report_"));
        assert!(name.ends_with(".json"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["mode"], "slave");
        assert_eq!(value["summary"]["cases"], 2);
        assert_eq!(value["summary"]["failed"], 1);
        assert_eq!(value["suites"][0]["cases"][1]["name"], "TESTCASE_2");
    }
}
