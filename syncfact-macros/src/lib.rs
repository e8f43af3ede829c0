//! Procedural macros for syncfact.
//!
//! - [`macro@context_test`]: declare a test whose body runs on a designated
//!   execution context

use proc_macro::TokenStream;


/// Declares a test that runs on an execution context.
///
/// The optional argument names the context kind: `none`, `portable`
/// (default), `win32`, `gtk` or `cocoa`. The function may be `async` and may
/// return `()` or `Result<(), E>`.
///
/// ```ignore
/// #[syncfact::context_test(portable)]
/// async fn renders_on_ui_thread() {
///     syncfact::work::yield_now().await;
/// }
/// ```
///
/// Panics from the body reach the test thread with their original payload,
/// so `#[should_panic(expected = "...")]` works as usual.
#[proc_macro_attribute]
pub fn context_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    context_test::context_test_impl(attr, item)
}
