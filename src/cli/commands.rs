use std::path::PathBuf;

use crate::emit::run_result::{emit_run_json, emit_run_yaml};
use crate::runner::display::{format_record, format_run_header, format_summary};
use crate::runner::executor::{RunConfig, Scheduler, TestRunResult};
use crate::runner::logger::EventLog;
use crate::runner::report::to_report;
use crate::suite::load_tree;
use crate::tree::TestTree;

/// Output formats accepted by `run`.
const FORMATS: &[&str] = &["text", "json", "yaml"];

/// Options for the `run` command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub format: String,
    pub output: Option<PathBuf>,
    pub max_passes: usize,
    pub capture_output: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        let config = RunConfig::default();
        Self {
            format: "text".to_owned(),
            output: None,
            max_passes: config.max_passes,
            capture_output: config.capture_output,
        }
    }
}

/// What a `run` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Text for stdout; empty when results went to `--output`.
    pub output: String,
    /// `true` iff every suite ran without failures or errors.
    pub success: bool,
}

fn load_trees(files: &[PathBuf]) -> Result<Vec<TestTree>, String> {
    files
        .iter()
        .map(|file| load_tree(file).map_err(|e| e.to_string()))
        .collect()
}

/// Copy each failed or errored source's captured output onto its record.
fn attach_output(result: &mut TestRunResult, log: &EventLog) {
    for record in result.records.iter_mut().filter(|r| r.is_failure()) {
        record.output = log.output(&record.display_name()).map(str::to_owned);
    }
}

fn render(result: &TestRunResult, tests: usize, format: &str) -> String {
    match format {
        "json" => emit_run_json(&to_report(result)) + "\n",
        "yaml" => emit_run_yaml(&to_report(result)),
        _ => {
            let mut out = format_run_header(&result.suite, tests);
            for record in &result.records {
                out.push_str(&format_record(record));
                out.push('\n');
            }
            out.push_str(&format_summary(result));
            out.push('\n');
            out
        }
    }
}

/// Run the `run` command: load suites, schedule them to a fixpoint and
/// render the results.
///
/// # Errors
///
/// Returns an error string if the format is unknown, a suite fails to load,
/// or the output file cannot be written.
pub fn run_run(files: &[PathBuf], options: &RunOptions) -> Result<RunOutcome, String> {
    if !FORMATS.contains(&options.format.as_str()) {
        return Err(format!(
            "unknown format '{}' (expected: {})",
            options.format,
            FORMATS.join(", ")
        ));
    }
    if options.max_passes == 0 {
        return Err("--max-passes must be at least 1".to_owned());
    }

    let trees = load_trees(files)?;
    let mut output = String::new();
    let mut success = true;

    for tree in &trees {
        let mut scheduler = Scheduler::new(RunConfig {
            max_passes: options.max_passes,
            capture_output: options.capture_output,
        });
        let mut result = scheduler.run(tree);
        attach_output(&mut result, scheduler.logger());
        output.push_str(&render(&result, tree.tests().len(), &options.format));
        if !result.summary.success() {
            success = false;
        }
    }

    if let Some(out_path) = &options.output {
        std::fs::write(out_path, &output)
            .map_err(|e| format!("failed to write {}: {e}", out_path.display()))?;
        output.clear();
    }

    Ok(RunOutcome { output, success })
}

/// Run the `validate` command: load suites and report their shape.
///
/// # Errors
///
/// Returns an error string for the first suite that fails to load.
pub fn run_validate(files: &[PathBuf]) -> Result<String, String> {
    let mut results = Vec::new();

    for file in files {
        let tree = load_tree(file).map_err(|e| e.to_string())?;
        results.push(format!(
            "{}: {} is valid ({} nodes, {} tests)",
            file.display(),
            tree.name(),
            tree.node_count(),
            tree.tests().len(),
        ));
    }

    Ok(results.join("\n"))
}

/// Run the `list` command: print every test's fully-qualified name.
///
/// # Errors
///
/// Returns an error string for the first suite that fails to load.
pub fn run_list(files: &[PathBuf]) -> Result<String, String> {
    let mut lines = Vec::new();

    for tree in load_trees(files)? {
        lines.push(format!("{}:", tree.name()));
        for test in tree.tests() {
            lines.push(format!("  {test}"));
        }
    }

    Ok(lines.join("\n") + "\n")
}
