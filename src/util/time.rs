//! Time formatting helpers

use chrono::{DateTime, Local};
use std::time::Duration;

/// Format duration in human-readable format
pub fn format_duration_human(d: Duration) -> String {
    let micros = d.as_micros() as u64;

    if micros == 0 {
        return "0µs".to_string();
    }

    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1000.0)
    } else if micros < 60_000_000 {
        format!("{:.3}s", micros as f64 / 1_000_000.0)
    } else if micros < 3_600_000_000 {
        format!("{:.2}m", micros as f64 / 60_000_000.0)
    } else {
        format!("{:.2}h", micros as f64 / 3_600_000_000.0)
    }
}

/// Report file name for a run started at `time`, e.g. `Test_Report_10172026_142501.json`
pub fn report_file_name(time: DateTime<Local>, extension: &str) -> String {
    format!("Test_Report_{}.{}", time.format("%m%d%Y_%H%M%S"), extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_duration_human() {
        assert_eq!(format_duration_human(Duration::ZERO), "0µs");
        assert_eq!(format_duration_human(Duration::from_micros(250)), "250µs");
        assert_eq!(format_duration_human(Duration::from_millis(5)), "5.000ms");
        assert_eq!(format_duration_human(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_duration_human(Duration::from_secs(90)), "1.50m");
    }

    #[test]
    fn test_report_file_name() {
        let time = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(report_file_name(time, "json"), "Test_Report_03072026_090501.json");
    }
}
