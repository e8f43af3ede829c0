//! Process-scoped harness used by `#[context_test]`.
//!
//! The harness owns one [`AdapterRegistry`] for the whole test binary. Its
//! built-in portable adapter reads the process configuration the first time
//! the registry is touched, so [`configure`] must run before any
//! `#[context_test]` body starts.

use crate::config::{self, ConfigError, HarnessConfig};
use crate::registry::{AdapterRegistry, ExtensionModule};
use crate::runner::{ExecutionRunner, LogSink, TestBody, TestCase, TestStatus};
use crate::types::{CancellationToken, ContextKind};
use std::sync::OnceLock;

static REGISTRY: OnceLock<AdapterRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn registry() -> &'static AdapterRegistry {
    REGISTRY.get_or_init(AdapterRegistry::new)
}

/// Installs the process configuration.
///
/// Fails with [`ConfigError::AlreadyInitialized`] once a configuration is in
/// effect, whether set here or read from the environment on first use.
pub fn configure(config: HarnessConfig) -> Result<(), ConfigError> {
    config::install(config)
}

/// Makes an extension module visible to the process-wide registry.
pub fn install_module(module: ExtensionModule) {
    registry().load_module(module);
}

/// A runner over the process-wide registry.
#[must_use]
pub fn runner() -> ExecutionRunner<'static> {
    ExecutionRunner::new(registry())
}

/// Runs one declared test on the current test thread.
///
/// A failing body is re-raised here: panics with their original payload,
/// returned errors as a panic carrying the error chain. A context that could
/// not run the body panics with a `context infrastructure error` message so
/// it reads differently from an assertion failure.
pub fn run_test(name: &str, kind: ContextKind, body: TestBody) {
    let case = TestCase::new(name, kind);
    let outcome = runner().run(&case, body, &LogSink, &CancellationToken::new());
    match outcome.status {
        TestStatus::Passed | TestStatus::Skipped(_) | TestStatus::Canceled(_) => {}
        TestStatus::Failed(detail) => detail.resume(),
        TestStatus::Errored(err) => panic!("context infrastructure error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::catch_unwind;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn registry_is_process_stable() {
        init_test("registry_is_process_stable");
        assert!(std::ptr::eq(registry(), registry()));
        crate::test_complete!("registry_is_process_stable");
    }

    #[test]
    fn run_test_passes_quietly() {
        init_test("run_test_passes_quietly");
        run_test("harness::quiet", ContextKind::None, TestBody::sync(|| ()));
        crate::test_complete!("run_test_passes_quietly");
    }

    #[test]
    fn run_test_resumes_original_payload() {
        init_test("run_test_resumes_original_payload");
        let payload = catch_unwind(|| {
            run_test(
                "harness::boom",
                ContextKind::Portable,
                TestBody::sync(|| -> () { std::panic::panic_any(7_i32) }),
            );
        })
        .unwrap_err();
        assert_eq!(payload.downcast_ref::<i32>(), Some(&7));
        crate::test_complete!("run_test_resumes_original_payload");
    }

    #[test]
    fn structural_error_reads_as_infrastructure() {
        init_test("structural_error_reads_as_infrastructure");
        let payload = catch_unwind(|| {
            run_test(
                "harness::unregistered",
                ContextKind::Cocoa,
                TestBody::sync(|| ()),
            );
        })
        .unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert!(message.starts_with("context infrastructure error:"));
        assert!(message.contains("cocoa"));
        crate::test_complete!("structural_error_reads_as_infrastructure");
    }

    #[test]
    fn configure_after_first_use_is_rejected() {
        init_test("configure_after_first_use_is_rejected");
        let _ = registry().resolve(ContextKind::Portable);
        let _ = crate::config::active();
        assert_eq!(
            configure(HarnessConfig::default()),
            Err(ConfigError::AlreadyInitialized)
        );
        crate::test_complete!("configure_after_first_use_is_rejected");
    }
}
