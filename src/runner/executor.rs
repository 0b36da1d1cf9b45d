use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::graph::resolver;
use crate::run::identity::{RunArena, prefix_hashes};
use crate::runner::logger::{EventLog, Location, TestLogger};
use crate::runner::result::{RecordKind, TestRecord, TestStatus};
use crate::runner::store::{PostponedRun, ResultStore};
use crate::runner::walker::{Selection, TreeWalker};
use crate::tree::TestTree;

/// Configuration for a scheduler run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Upper bound on tree passes, the initial full pass included.
    pub max_passes: usize,
    /// Capture vs. stream test output.
    pub capture_output: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_passes: 100,
            capture_output: true,
        }
    }
}

/// Drives tree passes and dependency resolution until nothing is postponed
/// or no further progress is possible.
pub struct Scheduler<L: TestLogger = EventLog> {
    config: RunConfig,
    store: ResultStore,
    arena: RunArena,
    logger: L,
    passes: usize,
}

impl Scheduler<EventLog> {
    /// Create a scheduler that reports into an [`EventLog`].
    pub fn new(config: RunConfig) -> Self {
        let logger = EventLog::new(config.capture_output);
        Self::with_logger(config, logger)
    }
}

impl<L: TestLogger> Scheduler<L> {
    /// Create a scheduler with an explicit logger (useful for testing).
    pub fn with_logger(config: RunConfig, logger: L) -> Self {
        Self {
            config,
            store: ResultStore::new(),
            arena: RunArena::new(),
            logger,
            passes: 0,
        }
    }

    /// Run `tree` to a fixpoint.
    ///
    /// 1. Walk the whole tree
    /// 2. Order the postponed runs, prerequisites first
    /// 3. Walk the tree restricted to the ordered runs
    /// 4. Repeat from 2 until nothing is postponed or nothing changed
    pub fn run(&mut self, tree: &TestTree) -> TestRunResult {
        let start = Instant::now();
        info!(suite = tree.name(), tests = tree.tests().len(), "starting run");

        self.pass(tree, None);
        let mut previous: Option<(usize, HashSet<(String, String)>)> = None;

        loop {
            let postponed = self.store.take_postponed();
            if postponed.is_empty() {
                break;
            }
            let keys = postponed_keys(&postponed);
            let stalled = previous
                .as_ref()
                .is_some_and(|(revision, last)| *revision == self.store.revision() && *last == keys);
            if stalled || self.passes >= self.config.max_passes {
                self.report_unresolved(postponed);
                break;
            }

            let order = resolver::resolve(postponed, &mut self.store, &mut self.logger);
            if order.is_empty() {
                break;
            }
            previous = Some((self.store.revision(), keys));

            let selection = Selection::new(&order);
            self.pass(tree, Some(&selection));
        }

        let records = self.store.records().to_vec();
        let summary = RunSummary::from_records(&records);
        info!(
            suite = tree.name(),
            passes = self.passes,
            passed = summary.passed,
            failed = summary.failed,
            errors = summary.errors,
            skipped = summary.skipped,
            "run finished"
        );
        TestRunResult {
            suite: tree.name().to_owned(),
            passes: self.passes,
            duration: start.elapsed(),
            records,
            summary,
        }
    }

    fn pass(&mut self, tree: &TestTree, selection: Option<&Selection>) {
        self.passes += 1;
        let mut walker = TreeWalker::new(tree, &mut self.store, &mut self.arena, &mut self.logger);
        match selection {
            None => {
                debug!(pass = self.passes, "full pass");
                walker.walk(tree.nodes());
            }
            Some(selection) => {
                debug!(pass = self.passes, runs = selection.len(), "restricted pass");
                let nodes = tree.restrict(&selection.tests());
                walker.restricted(selection).walk(&nodes);
            }
        }
    }

    fn report_unresolved(&mut self, postponed: Vec<PostponedRun>) {
        for run in postponed {
            let waiting: Vec<String> = run
                .missing
                .iter()
                .map(|(name, target)| format!("{name} ({target})"))
                .collect();
            let message = format!("could not be resolved: waiting on {}", waiting.join(", "));
            let qualifier = run.qualifier();
            let location = Location::new(run.test.clone(), qualifier.clone());
            self.logger.log_error(&run.test, &message, &location);
            self.store.record(TestRecord::new(
                run.test.clone(),
                RecordKind::Test,
                run.hash.clone(),
                qualifier,
                TestStatus::Error,
                Some(message),
            ));
            self.store
                .record_fail(&run.test, &run.group, &prefix_hashes(&run.path));
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}

fn postponed_keys(postponed: &[PostponedRun]) -> HashSet<(String, String)> {
    postponed
        .iter()
        .map(|p| (p.test.clone(), p.hash.clone()))
        .collect()
}

/// The complete result of a scheduler run.
#[derive(Debug, Clone)]
pub struct TestRunResult {
    pub suite: String,
    pub passes: usize,
    pub duration: Duration,
    pub records: Vec<TestRecord>,
    pub summary: RunSummary,
}

/// Summary statistics for a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RunSummary {
    /// Whether the run was fully successful (no failures or errors).
    pub fn success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    /// Build a summary from reported records.
    pub fn from_records(records: &[TestRecord]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Self::default()
        };
        for r in records {
            match r.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::Error => summary.errors += 1,
            }
        }
        summary
    }
}
