use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use crate::runner::logger::{Location, TestLogger};
use crate::runner::result::{Interrupt, RecordKind, TestRecord, TestStatus, panic_message};
use crate::runner::store::ResultStore;
use crate::tree::fixture::{FixtureResult, SetupFn, TeardownFn, disambiguate_names};

/// Identifies one fixture invocation for reporting.
#[derive(Debug, Clone)]
pub struct FixtureCall {
    pub source: String,
    pub hash: String,
    pub location: Location,
}

impl FixtureCall {
    fn display_name(&self) -> String {
        format!("{}{}", self.source, self.location.qualifier)
    }
}

/// Runs setup and teardown callables and reports their failures.
pub struct FixtureInvoker<'a> {
    store: &'a mut ResultStore,
    logger: &'a mut dyn TestLogger,
}

impl<'a> FixtureInvoker<'a> {
    pub fn new(store: &'a mut ResultStore, logger: &'a mut dyn TestLogger) -> Self {
        Self { store, logger }
    }

    /// Run a setup callable.
    ///
    /// Returns `None` when the fixture skipped or failed; the caller must not
    /// enter the subtree. Argument sets are only interpreted when
    /// `argument_aware` is set, otherwise the result is [`FixtureResult::NoArgs`].
    pub fn setup(
        &mut self,
        call: &FixtureCall,
        func: &SetupFn,
        args: &[Value],
        argument_aware: bool,
    ) -> Option<FixtureResult> {
        let result = self.invoke(call, || func(args));
        match result {
            Ok(FixtureResult::ArgSets(mut sets)) if argument_aware => {
                if sets.is_empty() {
                    self.report_error(call, "did not return any arguments");
                    return None;
                }
                disambiguate_names(&mut sets);
                Some(FixtureResult::ArgSets(sets))
            }
            Ok(_) => Some(FixtureResult::NoArgs),
            Err(Interrupt::Skip(reason)) => {
                self.logger.log_skip(&call.source, &reason, &call.location);
                self.store.record(fixture_record(call, TestStatus::Skipped, reason));
                None
            }
            Err(Interrupt::Postpone) => {
                self.report_error(call, "fixtures cannot be postponed");
                None
            }
            Err(Interrupt::Failure(message) | Interrupt::Error(message)) => {
                self.report_error(call, &message);
                None
            }
        }
    }

    /// Run a teardown callable. Every interrupt, skips included, is an error.
    pub fn teardown(&mut self, call: &FixtureCall, func: &TeardownFn, args: &[Value]) -> bool {
        match self.invoke(call, || func(args)) {
            Ok(()) => true,
            Err(Interrupt::Skip(reason)) => {
                self.report_error(call, &format!("teardown cannot be skipped: {reason}"));
                false
            }
            Err(Interrupt::Postpone) => {
                self.report_error(call, "fixtures cannot be postponed");
                false
            }
            Err(Interrupt::Failure(message) | Interrupt::Error(message)) => {
                self.report_error(call, &message);
                false
            }
        }
    }

    fn invoke<T>(
        &mut self,
        call: &FixtureCall,
        f: impl FnOnce() -> Result<T, Interrupt>,
    ) -> Result<T, Interrupt> {
        self.logger.start_buffering(&call.display_name());
        let result = panic::catch_unwind(AssertUnwindSafe(f));
        self.logger.end_buffering();
        result.unwrap_or_else(|payload| {
            Err(Interrupt::error(format!(
                "panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
    }

    fn report_error(&mut self, call: &FixtureCall, message: &str) {
        self.logger.log_error(&call.source, message, &call.location);
        self.store
            .record(fixture_record(call, TestStatus::Error, message.to_owned()));
    }
}

fn fixture_record(call: &FixtureCall, status: TestStatus, message: String) -> TestRecord {
    TestRecord::new(
        call.source.clone(),
        RecordKind::Fixture,
        call.hash.clone(),
        call.location.qualifier.clone(),
        status,
        Some(message),
    )
}
