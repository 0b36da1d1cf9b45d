use serde::{Deserialize, Serialize};

use crate::runner::executor::TestRunResult;

/// Serializable run result for emitter output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunReport {
    pub suite: String,
    pub run: RunMetadata,
    pub results: Vec<RecordReport>,
    pub summary: SummaryReport,
}

/// Metadata about the run execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub passes: usize,
    pub duration_ms: u64,
}

/// One reported record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordReport {
    pub order: usize,
    pub source: String,
    pub kind: String,
    /// Run names joined with `, `; omitted for the root run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Summary statistics in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub success: bool,
}

/// Convert a [`TestRunResult`] into a serializable [`TestRunReport`].
pub fn to_report(result: &TestRunResult) -> TestRunReport {
    let results = result
        .records
        .iter()
        .enumerate()
        .map(|(i, record)| RecordReport {
            order: i + 1,
            source: record.source.clone(),
            kind: record.kind.to_string(),
            run: run_label(&record.qualifier),
            status: record.status.to_string(),
            message: record.message.clone(),
            output: record.output.clone(),
        })
        .collect();

    TestRunReport {
        suite: result.suite.clone(),
        run: RunMetadata {
            passes: result.passes,
            duration_ms: result.duration.as_millis() as u64,
        },
        results,
        summary: SummaryReport {
            total: result.summary.total,
            passed: result.summary.passed,
            failed: result.summary.failed,
            skipped: result.summary.skipped,
            errors: result.summary.errors,
            success: result.summary.success(),
        },
    }
}

/// `" (a, b)"` → `Some("a, b")`.
fn run_label(qualifier: &str) -> Option<String> {
    qualifier
        .trim_start()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::runner::executor::RunSummary;
    use crate::runner::result::{RecordKind, TestRecord, TestStatus};

    fn make_run_result(records: Vec<TestRecord>) -> TestRunResult {
        let summary = RunSummary::from_records(&records);
        TestRunResult {
            suite: "Checkout".into(),
            passes: 2,
            duration: Duration::from_millis(500),
            records,
            summary,
        }
    }

    fn record(source: &str, qualifier: &str, status: TestStatus) -> TestRecord {
        TestRecord::new(source, RecordKind::Test, "", qualifier, status, None)
    }

    #[test]
    fn report_from_all_passed_run() {
        let result = make_run_result(vec![
            record("a", "", TestStatus::Passed),
            record("b", "", TestStatus::Passed),
        ]);
        let report = to_report(&result);
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| r.status == "passed"));
        assert!(report.summary.success);
    }

    #[test]
    fn report_run_label_from_qualifier() {
        let result = make_run_result(vec![
            record("db::t", " (sqlite, v2)", TestStatus::Passed),
            record("t", "", TestStatus::Passed),
        ]);
        let report = to_report(&result);
        assert_eq!(report.results[0].run.as_deref(), Some("sqlite, v2"));
        assert_eq!(report.results[1].run, None);
    }

    #[test]
    fn report_summary_failure_when_any_errored() {
        let mut dependency = record("ghost", "", TestStatus::Error);
        dependency.kind = RecordKind::Dependency;
        dependency.message = Some("never run".into());
        let result = make_run_result(vec![record("a", "", TestStatus::Skipped), dependency]);
        let report = to_report(&result);
        assert!(!report.summary.success);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.results[1].kind, "dependency");
        assert_eq!(report.results[1].message.as_deref(), Some("never run"));
    }

    #[test]
    fn report_carries_captured_output() {
        let mut failed = record("t", "", TestStatus::Failed);
        failed.output = Some("hello\n".into());
        let report = to_report(&make_run_result(vec![failed, record("u", "", TestStatus::Passed)]));
        assert_eq!(report.results[0].output.as_deref(), Some("hello\n"));
        assert_eq!(report.results[1].output, None);
    }

    #[test]
    fn report_includes_run_metadata() {
        let report = to_report(&make_run_result(vec![]));
        assert_eq!(report.suite, "Checkout");
        assert_eq!(report.run.passes, 2);
        assert_eq!(report.run.duration_ms, 500);
        assert_eq!(report.summary.total, 0);
    }

    #[test]
    fn report_record_ordering() {
        let result = make_run_result(vec![
            record("first", "", TestStatus::Passed),
            record("second", "", TestStatus::Passed),
            record("third", "", TestStatus::Passed),
        ]);
        let report = to_report(&result);
        let orders: Vec<usize> = report.results.iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }
}
