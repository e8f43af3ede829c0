//! Invocation outcomes and the result channel.

use super::case::BoxError;
use crate::error::{ContextError, Panic};
use crate::tracing_compat::{error, info, warn};
use crate::types::{CancelReason, ContextKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Where a test failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    /// The body panicked.
    Panic,
    /// The body returned `Err`.
    Error,
}

/// Full detail of a test-body failure.
///
/// For panics the original payload is kept so the failure can be re-raised
/// unchanged on the reporting thread.
#[derive(Debug)]
pub struct FailureDetail {
    origin: FailureOrigin,
    message: String,
    payload_type: &'static str,
    sources: Vec<String>,
    panic: Option<Panic>,
}

impl FailureDetail {
    /// Detail for a captured panic.
    #[must_use]
    pub fn from_panic(panic: Panic) -> Self {
        Self {
            origin: FailureOrigin::Panic,
            message: panic
                .message()
                .map_or_else(|| "non-string panic payload".to_owned(), str::to_owned),
            payload_type: panic.payload_type(),
            sources: Vec::new(),
            panic: Some(panic),
        }
    }

    /// Detail for a returned error, including its source chain.
    #[must_use]
    pub fn from_error(err: &BoxError) -> Self {
        let mut sources = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            sources.push(cause.to_string());
            source = cause.source();
        }
        Self {
            origin: FailureOrigin::Error,
            message: err.to_string(),
            payload_type: "error",
            sources,
            panic: None,
        }
    }

    /// Where the failure came from.
    #[must_use]
    pub const fn origin(&self) -> FailureOrigin {
        self.origin
    }

    /// Panic message or error display.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `&str`, `String`, or `opaque` for panics; `error` for returned errors.
    #[must_use]
    pub const fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Error source chain, outermost first.
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// The original panic, if still held.
    #[must_use]
    pub fn panic(&self) -> Option<&Panic> {
        self.panic.as_ref()
    }

    /// Takes the original panic out of the detail.
    pub fn take_panic(&mut self) -> Option<Panic> {
        self.panic.take()
    }

    /// Re-raises the failure on the current thread: the original panic
    /// payload when available, otherwise a panic carrying this detail.
    pub fn resume(mut self) -> ! {
        match self.panic.take() {
            Some(panic) => panic.resume(),
            None => panic!("{self}"),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            FailureOrigin::Panic => write!(f, "test panicked: {}", self.message)?,
            FailureOrigin::Error => write!(f, "test returned error: {}", self.message)?,
        }
        for cause in &self.sources {
            write!(f, "\n  caused by: {cause}")?;
        }
        Ok(())
    }
}

/// How one invocation ended.
#[derive(Debug)]
pub enum TestStatus {
    /// The body completed.
    Passed,
    /// The body panicked or returned `Err`.
    Failed(FailureDetail),
    /// The harness could not run the body under the requested context.
    Errored(ContextError),
    /// The case was skipped before anything was resolved.
    Skipped(String),
    /// Cancellation was requested.
    Canceled(CancelReason),
}

impl TestStatus {
    /// Short lowercase label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed(_) => "failed",
            Self::Errored(_) => "errored",
            Self::Skipped(_) => "skipped",
            Self::Canceled(_) => "canceled",
        }
    }

    /// Returns `true` for [`TestStatus::Passed`].
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Returns `true` for infrastructure failures.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Errored(_))
    }

    fn message(&self) -> Option<String> {
        match self {
            Self::Passed => None,
            Self::Failed(detail) => Some(detail.message().to_owned()),
            Self::Errored(err) => Some(err.to_string()),
            Self::Skipped(reason) => Some(reason.clone()),
            Self::Canceled(reason) => Some(reason.to_string()),
        }
    }
}

/// The reported result of one invocation.
#[derive(Debug)]
pub struct TestOutcome {
    /// Display name of the case.
    pub test: String,
    /// Method of the case.
    pub method: String,
    /// Context kind the case declared.
    pub context_kind: ContextKind,
    /// How it ended.
    pub status: TestStatus,
    /// Wall time from invocation start to report.
    pub elapsed: Duration,
}

impl TestOutcome {
    /// A serializable summary of this outcome.
    #[must_use]
    pub fn record(&self) -> OutcomeRecord {
        let (origin, payload_type, sources) = match &self.status {
            TestStatus::Failed(detail) => (
                Some(detail.origin()),
                Some(detail.payload_type().to_owned()),
                detail.sources().to_vec(),
            ),
            _ => (None, None, Vec::new()),
        };
        OutcomeRecord {
            test: self.test.clone(),
            method: self.method.clone(),
            context_kind: self.context_kind,
            status: self.status.label().to_owned(),
            message: self.status.message(),
            origin,
            payload_type,
            sources,
            elapsed_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Serializable form of a [`TestOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Display name.
    pub test: String,
    /// Method.
    pub method: String,
    /// Declared context kind.
    pub context_kind: ContextKind,
    /// Status label.
    pub status: String,
    /// Failure message, error text, skip or cancel reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failure origin for failed tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<FailureOrigin>,
    /// Failure payload type for failed tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,
    /// Error source chain for failed tests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    /// Elapsed milliseconds.
    pub elapsed_ms: u64,
}

/// The test-result channel: receives exactly one outcome per invocation.
pub trait ResultSink: Send + Sync {
    /// Records `outcome`.
    fn report(&self, outcome: &TestOutcome);
}

impl<F> ResultSink for F
where
    F: Fn(&TestOutcome) + Send + Sync,
{
    fn report(&self, outcome: &TestOutcome) {
        self(outcome);
    }
}

/// In-memory sink keeping a record of every outcome.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<OutcomeRecord>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records reported so far.
    #[must_use]
    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records.lock().clone()
    }

    /// Number of outcomes reported.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl ResultSink for CollectingSink {
    fn report(&self, outcome: &TestOutcome) {
        self.records.lock().push(outcome.record());
    }
}

/// Sink that writes outcomes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn report(&self, outcome: &TestOutcome) {
        let elapsed_ms = outcome.elapsed.as_millis();
        match &outcome.status {
            TestStatus::Passed | TestStatus::Skipped(_) | TestStatus::Canceled(_) => {
                info!(
                    test = %outcome.test,
                    kind = %outcome.context_kind,
                    status = outcome.status.label(),
                    elapsed_ms,
                    "test finished"
                );
            }
            TestStatus::Failed(detail) => {
                warn!(
                    test = %outcome.test,
                    kind = %outcome.context_kind,
                    failure = %detail,
                    elapsed_ms,
                    "test failed"
                );
            }
            TestStatus::Errored(err) => {
                error!(
                    test = %outcome.test,
                    kind = %outcome.context_kind,
                    error = %err,
                    "test could not run under its context"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    fn outcome(status: TestStatus) -> TestOutcome {
        TestOutcome {
            test: "suite::t".into(),
            method: "suite::t".into(),
            context_kind: ContextKind::Portable,
            status,
            elapsed: Duration::from_millis(12),
        }
    }

    #[test]
    fn error_detail_walks_source_chain() {
        init_test("error_detail_walks_source_chain");
        let err: BoxError = Box::new(Outer(std::io::Error::other("disk gone")));
        let detail = FailureDetail::from_error(&err);
        assert_eq!(detail.origin(), FailureOrigin::Error);
        assert_eq!(detail.message(), "outer failure");
        assert_eq!(detail.sources(), ["disk gone".to_owned()]);
        assert_eq!(
            detail.to_string(),
            "test returned error: outer failure\n  caused by: disk gone"
        );
        crate::test_complete!("error_detail_walks_source_chain");
    }

    #[test]
    fn panic_detail_resumes_original_payload() {
        init_test("panic_detail_resumes_original_payload");
        let payload = catch_unwind(|| -> () { std::panic::panic_any(17_u64) }).unwrap_err();
        let detail = FailureDetail::from_panic(Panic::new(payload));
        assert_eq!(detail.payload_type(), "opaque");
        assert_eq!(detail.message(), "non-string panic payload");

        let resumed = catch_unwind(AssertUnwindSafe(|| -> () { detail.resume() })).unwrap_err();
        assert_eq!(resumed.downcast_ref::<u64>(), Some(&17));
        crate::test_complete!("panic_detail_resumes_original_payload");
    }

    #[test]
    fn taken_panic_leaves_display_fallback() {
        init_test("taken_panic_leaves_display_fallback");
        let who = String::from("worker");
        let payload = catch_unwind(move || -> () { panic!("{who} stalled") }).unwrap_err();
        let mut detail = FailureDetail::from_panic(Panic::new(payload));

        let panic = detail.take_panic().unwrap();
        assert_eq!(panic.message(), Some("worker stalled"));
        assert!(detail.take_panic().is_none());

        let resumed = catch_unwind(AssertUnwindSafe(|| -> () { detail.resume() })).unwrap_err();
        assert_eq!(
            resumed.downcast_ref::<String>().map(String::as_str),
            Some("test panicked: worker stalled")
        );
        crate::test_complete!("taken_panic_leaves_display_fallback");
    }

    #[test]
    fn error_detail_resume_panics_with_display() {
        init_test("error_detail_resume_panics_with_display");
        let err: BoxError = "bad state".into();
        let detail = FailureDetail::from_error(&err);
        let resumed = catch_unwind(AssertUnwindSafe(|| -> () { detail.resume() })).unwrap_err();
        assert_eq!(
            resumed.downcast_ref::<String>().map(String::as_str),
            Some("test returned error: bad state")
        );
        crate::test_complete!("error_detail_resume_panics_with_display");
    }

    #[test]
    fn records_distinguish_failed_from_errored() {
        init_test("records_distinguish_failed_from_errored");
        let payload = catch_unwind(|| -> () { panic!("assertion") }).unwrap_err();
        let failed = outcome(TestStatus::Failed(FailureDetail::from_panic(Panic::new(
            payload,
        ))))
        .record();
        let errored = outcome(TestStatus::Errored(ContextError::UnsupportedKind {
            kind: ContextKind::Cocoa,
        }))
        .record();

        assert_eq!(failed.status, "failed");
        assert_eq!(failed.origin, Some(FailureOrigin::Panic));
        assert_eq!(failed.payload_type.as_deref(), Some("&str"));
        assert_eq!(errored.status, "errored");
        assert_eq!(errored.origin, None);
        assert_eq!(
            errored.message.as_deref(),
            Some("unsupported context kind: cocoa")
        );
        assert_eq!(failed.elapsed_ms, 12);
        crate::test_complete!("records_distinguish_failed_from_errored");
    }

    #[test]
    fn record_serializes_compactly() {
        init_test("record_serializes_compactly");
        let record = outcome(TestStatus::Passed).record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "test": "suite::t",
                "method": "suite::t",
                "context_kind": "portable",
                "status": "passed",
                "elapsed_ms": 12,
            })
        );
        let back: OutcomeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        crate::test_complete!("record_serializes_compactly");
    }

    #[test]
    fn sinks_receive_reports() {
        init_test("sinks_receive_reports");
        let sink = CollectingSink::new();
        assert!(sink.is_empty());
        sink.report(&outcome(TestStatus::Skipped("not on ci".into())));
        sink.report(&outcome(TestStatus::Canceled(CancelReason::user("abort"))));
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message.as_deref(), Some("not on ci"));
        assert_eq!(records[1].message.as_deref(), Some("user: abort"));

        let counter = std::sync::atomic::AtomicUsize::new(0);
        let closure_sink = |_: &TestOutcome| {
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        };
        closure_sink.report(&outcome(TestStatus::Passed));
        LogSink.report(&outcome(TestStatus::Passed));
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 1);
        crate::test_complete!("sinks_receive_reports");
    }
}
