use crate::runner::executor::TestRunResult;
use crate::runner::result::{TestRecord, TestStatus};

/// Format a status label for terminal output.
fn status_label(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "PASSED",
        TestStatus::Failed => "FAILED",
        TestStatus::Skipped => "SKIPPED",
        TestStatus::Error => "ERROR",
    }
}

/// Format one reported record.
pub fn format_record(record: &TestRecord) -> String {
    let status = status_label(record.status);
    let mut line = format!("  [{status}] {}", record.display_name());
    if let Some(message) = &record.message {
        line.push_str(&format!("\n         → {message}"));
    }
    if let Some(output) = &record.output {
        line.push_str("\n         output:");
        for text in output.lines() {
            line.push_str(&format!("\n           {text}"));
        }
    }
    line
}

/// Format the final summary after the run completes.
pub fn format_summary(result: &TestRunResult) -> String {
    let duration_secs = result.duration.as_secs_f64();
    let mut parts = Vec::new();

    if result.summary.passed > 0 {
        parts.push(format!("{} passed", result.summary.passed));
    }
    if result.summary.failed > 0 {
        parts.push(format!("{} failed", result.summary.failed));
    }
    if result.summary.skipped > 0 {
        parts.push(format!("{} skipped", result.summary.skipped));
    }
    if result.summary.errors > 0 {
        parts.push(format!("{} errors", result.summary.errors));
    }

    if parts.is_empty() {
        parts.push("0 tests".into());
    }

    let passes = if result.passes == 1 { "pass" } else { "passes" };
    format!(
        "\nResults: {} in {} {passes} ({:.1}s)",
        parts.join(", "),
        result.passes,
        duration_secs
    )
}

/// Format the run header line.
pub fn format_run_header(suite: &str, tests: usize) -> String {
    format!("Running {suite} ({tests} tests)...\n")
}
