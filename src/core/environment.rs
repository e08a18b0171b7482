//! 运行环境检查

use std::thread;

use super::error::{WebviewError, WebviewResult};

/// Rejects creation from inside an async runtime.
///
/// The engine thread blocks in the native loop, which would stall every
/// other task sharing the runtime's worker.
pub fn check_environment() -> WebviewResult<()> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(WebviewError::VirtualExecutionContext);
    }
    Ok(())
}

pub fn is_main_thread() -> bool {
    thread::current().name() == Some("main")
}

pub fn warn_if_not_main_thread(ignore: bool) {
    if ignore || is_main_thread() {
        return;
    }
    tracing::warn!(
        target: "webview::core",
        thread = ?thread::current().name(),
        "Webview is being created off the main thread. Some platforms (macOS) require the main thread. \
         Set threading.ignore_not_main_thread to silence this warning."
    );
}
