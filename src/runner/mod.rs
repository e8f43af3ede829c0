//! Test invocation orchestration.
//!
//! [`ExecutionRunner`] runs one [`TestCase`] under the context its declared
//! [`ContextKind`](crate::ContextKind) resolves to and reports the outcome
//! through a [`ResultSink`]. It never touches threads or loops itself; every
//! context-specific mechanic lives behind the resolved adapter.
//!
//! Outcome precedence for one run:
//!
//! 1. a skip reason reports [`TestStatus::Skipped`] without resolving anything
//! 2. cancellation requested before start reports [`TestStatus::Canceled`]
//! 3. a resolution or dispatch failure reports [`TestStatus::Errored`]
//! 4. a panic or returned `Err` reports [`TestStatus::Failed`]
//! 5. otherwise [`TestStatus::Passed`], or `Canceled` when cancellation was
//!    requested while the body ran

pub mod case;
pub mod outcome;

pub use case::{BoxError, IntoTestResult, TestBody, TestCase, TestResult};
pub use outcome::{
    CollectingSink, FailureDetail, FailureOrigin, LogSink, OutcomeRecord, ResultSink,
    TestOutcome, TestStatus,
};

use crate::context::ContextAdapterExt;
use crate::error::RunError;
use crate::registry::AdapterRegistry;
use crate::tracing_compat::{debug, info};
use crate::types::CancellationToken;
use std::time::Instant;

/// One run of one test case, owned by the runner until it is reported.
#[derive(Debug)]
pub struct TestInvocation<'c> {
    case: &'c TestCase,
    cancel: CancellationToken,
    started: Instant,
}

impl<'c> TestInvocation<'c> {
    fn start(case: &'c TestCase, cancel: CancellationToken) -> Self {
        Self {
            case,
            cancel,
            started: Instant::now(),
        }
    }

    /// The case being run.
    #[must_use]
    pub fn case(&self) -> &TestCase {
        self.case
    }

    /// The cancellation signal for this run.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Closes the invocation with `status`.
    #[must_use]
    pub fn finish(self, status: TestStatus) -> TestOutcome {
        let status = match (status, self.cancel.reason()) {
            (TestStatus::Passed, Some(reason)) => TestStatus::Canceled(reason),
            (status, _) => status,
        };
        TestOutcome {
            test: self.case.display_name.clone(),
            method: self.case.method.clone(),
            context_kind: self.case.context_kind,
            status,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Runs test invocations against an adapter registry.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRunner<'r> {
    registry: &'r AdapterRegistry,
}

impl<'r> ExecutionRunner<'r> {
    /// A runner resolving adapters from `registry`.
    #[must_use]
    pub const fn new(registry: &'r AdapterRegistry) -> Self {
        Self { registry }
    }

    /// The registry adapters are resolved from.
    #[must_use]
    pub const fn registry(&self) -> &'r AdapterRegistry {
        self.registry
    }

    /// Runs `body` for `case`, reports the outcome to `sink` exactly once,
    /// and returns it.
    pub fn run(
        &self,
        case: &TestCase,
        body: TestBody,
        sink: &dyn ResultSink,
        cancel: &CancellationToken,
    ) -> TestOutcome {
        let invocation = TestInvocation::start(case, cancel.clone());
        let status = self.execute(&invocation, body);
        let outcome = invocation.finish(status);

        info!(
            test = %outcome.test,
            kind = %outcome.context_kind,
            status = outcome.status.label(),
            "test invocation finished"
        );
        sink.report(&outcome);
        outcome
    }

    fn execute(&self, invocation: &TestInvocation<'_>, body: TestBody) -> TestStatus {
        let case = invocation.case();
        if let Some(reason) = &case.skip_reason {
            return TestStatus::Skipped(reason.clone());
        }
        if let Some(reason) = invocation.cancellation().reason() {
            debug!(test = %case.display_name, reason = %reason, "canceled before start");
            return TestStatus::Canceled(reason);
        }

        let adapter = match self.registry.resolve(case.context_kind) {
            Ok(adapter) => adapter,
            Err(err) => return TestStatus::Errored(err),
        };
        debug!(
            test = %case.display_name,
            kind = %case.context_kind,
            adapter = adapter.name(),
            asynchronous = body.is_async(),
            "running test body"
        );

        match adapter.try_run_work(body.into_work()) {
            Ok(Ok(())) => TestStatus::Passed,
            Ok(Err(err)) => TestStatus::Failed(FailureDetail::from_error(&err)),
            Err(RunError::Panicked(panic)) => TestStatus::Failed(FailureDetail::from_panic(panic)),
            Err(RunError::Context(err)) => TestStatus::Errored(err),
        }
    }
}
