use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use crate::run::identity::{RunInstance, run_hash};
use crate::runner::logger::{Location, TestLogger};
use crate::runner::result::{
    Interrupt, RecordKind, TestOutcome, TestRecord, TestResult, TestStatus, panic_message,
};
use crate::runner::store::{PostponedRun, ResultStore, RunTarget};
use crate::tree::{TestFn, TestTree};

type TeardownCallback = Box<dyn FnOnce() -> TestResult>;

/// The handle a running test receives.
///
/// Lives for exactly one leaf invocation and borrows the scheduler's store
/// and logger for that long.
pub struct Context<'a> {
    tree: &'a TestTree,
    store: &'a mut ResultStore,
    logger: &'a mut dyn TestLogger,
    test: &'a str,
    run: &'a RunInstance,
    args: &'a [Value],
    teardowns: Vec<TeardownCallback>,
    failed_subtests: usize,
    /// Failure records and output buffers of this invocation's subtests,
    /// kept until the body completes.
    subtest_records: Vec<TestRecord>,
    subtest_buffers: Vec<String>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        tree: &'a TestTree,
        store: &'a mut ResultStore,
        logger: &'a mut dyn TestLogger,
        test: &'a str,
        run: &'a RunInstance,
        args: &'a [Value],
    ) -> Self {
        Self {
            tree,
            store,
            logger,
            test,
            run,
            args,
            teardowns: Vec::new(),
            failed_subtests: 0,
            subtest_records: Vec::new(),
            subtest_buffers: Vec::new(),
        }
    }

    /// Fully-qualified name of the running test.
    pub fn name(&self) -> &str {
        self.test
    }

    pub fn qualifier(&self) -> &str {
        self.run.qualifier()
    }

    pub fn run_hash(&self) -> &str {
        self.run.hash()
    }

    /// Arguments of the current run.
    pub fn args(&self) -> &[Value] {
        self.args
    }

    fn location(&self) -> Location {
        Location::new(self.test, self.run.qualifier())
    }

    /// Write test output through the logger's buffering.
    pub fn print(&mut self, text: &str) {
        self.logger.write_output(text);
    }

    /// Publish a value for tests that require this one under the same run.
    pub fn set(&mut self, value: impl Into<Value>) {
        self.store.publish(self.test, self.run.hash(), value.into());
    }

    /// Register a callback to run after the body, last registered first.
    pub fn teardown<F>(&mut self, callback: F)
    where
        F: FnOnce() -> TestResult + 'static,
    {
        self.teardowns.push(Box::new(callback));
    }

    /// Run `callback` as a named subtest.
    ///
    /// Assertion failures and panics are logged under `<test>::<name>` and
    /// mark the enclosing test failed without stopping it. The failure is
    /// recorded once the body completes, and dropped if the body postpones.
    ///
    /// # Errors
    ///
    /// Errors, skips and postponements raised inside the subtest propagate.
    pub fn subtest<F>(&mut self, name: &str, callback: F) -> Result<bool, Interrupt>
    where
        F: FnOnce(&mut Self) -> TestResult,
    {
        let source = format!("{}::{name}", self.test);
        let buffer = format!("{source}{}", self.run.qualifier());
        self.logger.start_buffering(&buffer);
        self.subtest_buffers.push(buffer);
        let result = panic::catch_unwind(AssertUnwindSafe(|| callback(self)));
        self.logger.end_buffering();

        let message = match result {
            Ok(Ok(())) => return Ok(true),
            Ok(Err(Interrupt::Failure(message))) => message,
            Ok(Err(other)) => return Err(other),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        let location = self.location();
        self.logger.log_failure(&source, &message, &location);
        self.subtest_records.push(TestRecord::new(
            source,
            RecordKind::Test,
            self.run.hash(),
            self.run.qualifier(),
            TestStatus::Failed,
            Some(message),
        ));
        self.failed_subtests += 1;
        Ok(false)
    }

    /// Require one test to have passed and return its published value.
    ///
    /// # Errors
    ///
    /// `Interrupt::Skip` when the prerequisite did not pass, `Interrupt::Postpone`
    /// when it has not completed yet. Propagate both with `?`.
    pub fn requires(&mut self, name: &str) -> Result<Option<Value>, Interrupt> {
        let mut values = self.requires_all(&[name])?;
        Ok(values.remove(name).flatten())
    }

    /// Require several tests; returns each requested name's published value.
    ///
    /// Every unsatisfied prerequisite is recorded before the test is postponed,
    /// so a single later pass can satisfy all of them.
    ///
    /// # Errors
    ///
    /// See [`Context::requires`]. `Interrupt::Error` when the prerequisite's
    /// run group shares no root with the caller's.
    pub fn requires_all(
        &mut self,
        names: &[&str],
    ) -> Result<BTreeMap<String, Option<Value>>, Interrupt> {
        let mut values = BTreeMap::new();
        let mut missing = Vec::new();

        for &name in names {
            let qualified = self.tree.resolve_name(self.test, name);
            let Some(entry) = self.store.ledger_entry(&qualified) else {
                missing.push((qualified, RunTarget::Any));
                continue;
            };

            let path: Vec<String> = if entry.group() == self.run.group() {
                self.run.path().to_vec()
            } else {
                let common = entry.group().common_prefix_len(self.run.group());
                if common == 0 {
                    return Err(Interrupt::error(format!(
                        "{qualified} ran in group {} which shares no root with group {}",
                        entry.group(),
                        self.run.group()
                    )));
                }
                let depth = (common - 1).min(self.run.path().len());
                self.run.path()[..depth].to_vec()
            };
            let hash = run_hash(&path);

            match entry.get(&hash) {
                None => missing.push((qualified, RunTarget::Run(path))),
                Some(false) => {
                    return Err(Interrupt::skip(format!(
                        "depends on {qualified}, which did not pass"
                    )));
                }
                Some(true) => {
                    let value = self.store.published(&qualified, &hash).cloned();
                    values.insert(name.to_owned(), value);
                }
            }
        }

        if missing.is_empty() {
            return Ok(values);
        }
        tracing::debug!(
            test = self.test,
            run = self.run.hash(),
            missing = missing.len(),
            "postponing"
        );
        self.store
            .postpone(PostponedRun::new(self.test, self.run), missing);
        Err(Interrupt::Postpone)
    }

    /// Invoke the test body, then drain registered teardowns.
    ///
    /// A postponed attempt leaves nothing behind: its captured output and
    /// subtest failures are discarded so the re-run reports only its own.
    pub(crate) fn run_body(&mut self, body: &TestFn) -> TestOutcome {
        let display = format!("{}{}", self.test, self.run.qualifier());
        let args = self.args;

        self.logger.start_buffering(&display);
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(self, args)));
        self.logger.end_buffering();
        let result = result.unwrap_or_else(|payload| {
            Err(Interrupt::failure(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        if matches!(result, Err(Interrupt::Postpone)) {
            self.logger.discard_output(&display);
            for buffer in self.subtest_buffers.drain(..) {
                self.logger.discard_output(&buffer);
            }
            self.subtest_records.clear();
        } else {
            for record in self.subtest_records.drain(..) {
                self.store.record(record);
            }
        }

        self.drain_teardowns();
        TestOutcome::from_result(result, self.failed_subtests)
    }

    fn drain_teardowns(&mut self) {
        while let Some(callback) = self.teardowns.pop() {
            let source = format!("teardown #{} for {}", self.teardowns.len() + 1, self.test);
            self.logger
                .start_buffering(&format!("{source}{}", self.run.qualifier()));
            let result = panic::catch_unwind(AssertUnwindSafe(callback));
            self.logger.end_buffering();

            let message = match result {
                Ok(Ok(())) => continue,
                Ok(Err(interrupt)) => interrupt.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };
            let location = self.location();
            self.logger.log_error(&source, &message, &location);
            self.store.record(TestRecord::new(
                source,
                RecordKind::Fixture,
                self.run.hash(),
                self.run.qualifier(),
                TestStatus::Error,
                Some(message),
            ));
        }
    }
}
