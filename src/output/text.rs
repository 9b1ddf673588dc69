//! Human-readable text report

use super::ReportSink;
use crate::catalog::{Catalog, Summary};
use crate::util::time::format_duration_human;
use crate::Result;

/// Render the final report as lines of text
pub fn render_report(catalog: &Catalog, summary: &Summary) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push("═══════════════════════════════════════════════════════════".to_string());
    lines.push("                    TEST REPORT".to_string());
    lines.push("═══════════════════════════════════════════════════════════".to_string());

    for suite in catalog.suites() {
        lines.push(String::new());
        lines.push(format!("Suite: {} [{}]", suite.name, suite.status));
        for case in suite.cases() {
            lines.push(format!(
                "  {:>3}  {:<30} {:>10}  {}",
                case.id,
                case.name,
                case.status.label(),
                format_duration_human(case.elapsed)
            ));
        }
    }

    lines.push(String::new());
    lines.push("Summary:".to_string());
    lines.push(format!("  Suites:           {}", summary.suites));
    lines.push(format!("  Cases:            {}", summary.cases));
    lines.push(format!("  Passed:           {}", summary.passed));
    lines.push(format!("  Failed:           {}", summary.failed));
    lines.push(format!("  Timed out:        {}", summary.timed_out));
    lines.push(format!("  Errors:           {}", summary.errors));
    lines.push(format!("  Cases not found:  {}", summary.cases_not_found));
    lines.push(format!("  Suites not found: {}", summary.suites_not_found));

    lines
}

/// Prints the report to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReport;

impl ReportSink for TextReport {
    fn write(&self, catalog: &Catalog, summary: &Summary) -> Result<()> {
        println!();
        for line in render_report(catalog, summary) {
            println!("{}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CaseDescriptor, Registry, SuiteDescriptor, TestStatus};

    #[test]
    fn test_render_lists_cases_and_counters() {
        let registry = Registry::new();
        let descs = vec![SuiteDescriptor::new("S", vec![CaseDescriptor::new("C", 100, "missing")])];
        let mut catalog = Catalog::build(&descs, &registry).unwrap();
        catalog.summary_mut().record_case(TestStatus::NotFound);
        catalog.summary_mut().record_suite_not_found();

        let lines = render_report(&catalog, catalog.summary());
        assert!(lines.iter().any(|l| l.starts_with("Suite: S")));
        assert!(lines.iter().any(|l| l.contains("NOT FOUND")));
        assert!(lines.iter().any(|l| l.trim() == "Cases not found:  1"));
        assert!(lines.iter().any(|l| l.trim() == "Suites not found: 1"));
    }
}
