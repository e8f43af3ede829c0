//! Test cases and bodies.
//!
//! A [`TestCase`] is the persisted identity of one test: what to call, with
//! which arguments, under which [`ContextKind`]. It never carries an adapter;
//! the kind is re-resolved in whichever process executes the case.

use crate::types::ContextKind;
use crate::work::WorkUnit;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Boxed error returned by a fallible test body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a test body produces once normalised.
pub type TestResult = Result<(), BoxError>;

/// A declared test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Name shown in reports.
    pub display_name: String,
    /// Fully qualified test method.
    pub method: String,
    /// Data-driven arguments, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<serde_json::Value>,
    /// Execution context the body requires.
    #[serde(default)]
    pub context_kind: ContextKind,
    /// When set the case is reported skipped without running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl TestCase {
    /// A case for `method` under `context_kind`, displayed by its method name.
    #[must_use]
    pub fn new(method: impl Into<String>, context_kind: ContextKind) -> Self {
        let method = method.into();
        Self {
            display_name: method.clone(),
            method,
            arguments: Vec::new(),
            context_kind,
            skip_reason: None,
        }
    }

    /// Overrides the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Sets the data-driven arguments.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<serde_json::Value>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Marks the case skipped.
    #[must_use]
    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    /// Serializes the case for cross-process transport.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restores a case serialized with [`to_json`](Self::to_json).
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}

/// Values a test body may return.
pub trait IntoTestResult {
    /// Normalises into a [`TestResult`].
    fn into_test_result(self) -> TestResult;
}

impl IntoTestResult for () {
    fn into_test_result(self) -> TestResult {
        Ok(())
    }
}

impl<E: Into<BoxError>> IntoTestResult for Result<(), E> {
    fn into_test_result(self) -> TestResult {
        self.map_err(Into::into)
    }
}

/// The executable part of a test.
#[derive(Debug)]
pub struct TestBody(WorkUnit<TestResult>);

impl TestBody {
    /// A synchronous body.
    pub fn sync<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoTestResult + 'static,
    {
        Self(WorkUnit::sync(move || f().into_test_result()))
    }

    /// An asynchronous body; the future is created on the test's context.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + 'static,
        Fut::Output: IntoTestResult,
    {
        Self(WorkUnit::future(move || {
            let fut = f();
            async move { fut.await.into_test_result() }
        }))
    }

    /// Returns `true` for asynchronous bodies.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        self.0.is_async()
    }

    /// The underlying work unit.
    #[must_use]
    pub fn into_work(self) -> WorkUnit<TestResult> {
        self.0
    }
}
