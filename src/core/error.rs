//! 统一错误处理模块
//!
//! Fault taxonomy shared by every layer of the bridge.
//!
//! ## 错误类型分层
//!
//! - **宿主侧错误** (`WebviewError`): raised synchronously to the host thread,
//!   delivered through a [`Completion`](crate::core::Completion), or routed to
//!   the dispatcher's error handler.
//! - **原生状态码** (`EngineStatus`): integer codes returned by the native
//!   engine, translated into `WebviewError::Engine` at the adapter boundary.
//!
//! Faults raised while marshaling a script call never leave the engine
//! thread as errors; they are encoded into an error response instead
//! (see [`CallFault`](crate::bindings::CallFault)).

use std::fmt;

use thiserror::Error;

/// Status codes of the native engine's C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStatus {
    /// A native dependency (e.g. WebView2) is unavailable.
    MissingDependency,
    /// The platform cancelled the operation (WM_QUIT on Windows).
    Canceled,
    /// The instance is in the wrong state for the call (e.g. already stopping).
    InvalidState,
    /// Null handle, unknown call id, or a string with an interior NUL.
    InvalidArgument,
    Unspecified,
    Ok,
    /// A binding with the requested name already exists.
    Duplicate,
    /// No binding with the requested name exists.
    NotFound,
    /// A code this crate does not know about.
    Unknown(i32),
}

impl EngineStatus {
    /// Maps a raw C API return code. Unrecognised codes are kept as
    /// [`EngineStatus::Unknown`].
    pub const fn from_code(code: i32) -> Self {
        match code {
            -5 => Self::MissingDependency,
            -4 => Self::Canceled,
            -3 => Self::InvalidState,
            -2 => Self::InvalidArgument,
            -1 => Self::Unspecified,
            0 => Self::Ok,
            1 => Self::Duplicate,
            2 => Self::NotFound,
            other => Self::Unknown(other),
        }
    }

    /// The raw C API code; the inverse of [`from_code`](Self::from_code).
    pub const fn code(self) -> i32 {
        match self {
            Self::MissingDependency => -5,
            Self::Canceled => -4,
            Self::InvalidState => -3,
            Self::InvalidArgument => -2,
            Self::Unspecified => -1,
            Self::Ok => 0,
            Self::Duplicate => 1,
            Self::NotFound => 2,
            Self::Unknown(code) => code,
        }
    }

    /// Only [`EngineStatus::Ok`] is success; `Duplicate` and `NotFound` are
    /// positive codes but still faults.
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Converts the status into a result, mapping every non-OK code to
    /// [`WebviewError::Engine`].
    pub fn into_result(self) -> WebviewResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(WebviewError::Engine(self))
        }
    }

    fn message(self) -> String {
        match self {
            Self::MissingDependency => {
                "a native dependency is unavailable (is WebView2 installed?)".to_string()
            }
            Self::Canceled => "received WM_QUIT".to_string(),
            Self::InvalidState => "invalid state".to_string(),
            Self::InvalidArgument => "invalid argument".to_string(),
            Self::Unspecified => "unspecified error".to_string(),
            Self::Ok => "ok".to_string(),
            Self::Duplicate => "duplicate binding".to_string(),
            Self::NotFound => "binding not found".to_string(),
            Self::Unknown(code) => format!("unknown error code: {}", code),
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

/// 桥接层核心错误类型
#[derive(Error, Debug)]
pub enum WebviewError {
    #[error("A binding already exists with the name: {0}")]
    DuplicateBinding(String),

    #[error("No binding found with the name: {0}")]
    BindingNotFound(String),

    #[error("Invalid binding: {0}")]
    InvalidBinding(String),

    #[error("Invalid number of arguments: expected {expected}, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },

    #[error("Argument {index} could not be decoded as {expected}: {source}")]
    ArgumentDecode {
        index: usize,
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed wire payload: {0}")]
    WireFormat(#[from] serde_json::Error),

    #[error("Engine fault: {0}")]
    Engine(EngineStatus),

    #[error(
        "Webview has to be run on the same thread it was created on. \
         This is a limitation of the underlying webview library."
    )]
    WrongThread,

    #[error(
        "Webview cannot be created inside an async runtime context. \
         Running it blocks the thread indefinitely, which starves the runtime's workers."
    )]
    VirtualExecutionContext,

    #[error("Webview has been terminated")]
    Terminated,

    #[error("Operation was dropped before it ran on the webview thread")]
    Cancelled,

    #[error("Host code panicked: {0}")]
    HostPanic(String),

    #[error("Failed to load native library: {0}")]
    Library(#[from] libloading::Error),
}

impl WebviewError {
    /// Stable name of the fault kind, used as the `"type"` of encoded
    /// script-side errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateBinding(_) => "DuplicateBinding",
            Self::BindingNotFound(_) => "BindingNotFound",
            Self::InvalidBinding(_) => "InvalidBinding",
            Self::ArgumentCount { .. } => "ArgumentCount",
            Self::ArgumentDecode { .. } => "ArgumentDecode",
            Self::WireFormat(_) => "WireFormat",
            Self::Engine(_) => "EngineFault",
            Self::WrongThread => "WrongThread",
            Self::VirtualExecutionContext => "VirtualExecutionContext",
            Self::Terminated => "Terminated",
            Self::Cancelled => "Cancelled",
            Self::HostPanic(_) => "HostPanic",
            Self::Library(_) => "Library",
        }
    }
}

/// 桥接层结果类型别名
pub type WebviewResult<T> = Result<T, WebviewError>;

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_known_codes() {
        for code in -5..=2 {
            assert_eq!(EngineStatus::from_code(code).code(), code);
        }
        assert_eq!(EngineStatus::from_code(42), EngineStatus::Unknown(42));
    }

    #[test]
    fn test_status_into_result() {
        assert!(EngineStatus::Ok.into_result().is_ok());
        let err = EngineStatus::InvalidState.into_result().unwrap_err();
        assert!(matches!(err, WebviewError::Engine(EngineStatus::InvalidState)));
        assert_eq!(err.kind(), "EngineFault");
    }

    #[test]
    fn test_error_display() {
        let err = WebviewError::ArgumentCount {
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Invalid number of arguments: expected 2, got 3"
        );
        assert_eq!(
            EngineStatus::Unknown(9).to_string(),
            "unknown error code: 9 (9)"
        );
    }

    #[test]
    fn test_panic_message() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*caught), "boom 1");
    }
}
