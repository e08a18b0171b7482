//! Wire protocol between script and host
//!
//! Requests arrive as a JSON array of arguments. Responses are a single JSON
//! value, delivered with a [`ResponseStatus`] that tells the script-side
//! promise whether to resolve or reject. Every response payload passes
//! through [`safe_string`] before it reaches the engine.

use std::any::type_name;
use std::backtrace::BacktraceStatus;
use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use serde_json::{json, Value};

pub use crate::platform::ResponseStatus;
use crate::core::error::{WebviewError, WebviewResult};

/// Outcome of a wire function: an optional JSON payload or a fault.
pub type WireResult = Result<Option<String>, CallFault>;

// ============================================================================
// Safety filter
// ============================================================================

/// Escapes NUL and every non-ASCII UTF-16 code unit as a lowercase `\uXXXX`
/// sequence. Characters outside the BMP become a surrogate pair. Printable
/// ASCII is returned unchanged (and unallocated).
pub fn safe_string(input: &str) -> Cow<'_, str> {
    if input.bytes().all(|b| b != 0 && b.is_ascii()) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 16);
    let mut units = [0u16; 2];
    for c in input.chars() {
        if c != '\0' && c.is_ascii() {
            out.push(c);
            continue;
        }
        for unit in c.encode_utf16(&mut units) {
            let _ = write!(out, "\\u{:04x}", unit);
        }
    }
    Cow::Owned(out)
}

// ============================================================================
// Requests and results
// ============================================================================

/// Parses a wire request into its argument list.
pub fn parse_request(request: &str) -> WebviewResult<Vec<Value>> {
    Ok(serde_json::from_str(request)?)
}

/// Serializes a host result. `None` and unit both become the literal `null`.
pub fn encode_result<R: Serialize>(result: &R) -> WireResult {
    Ok(Some(serde_json::to_string(result).map_err(WebviewError::WireFormat)?))
}

// ============================================================================
// Faults
// ============================================================================

/// A fault raised while serving a script call.
#[derive(Debug)]
pub enum CallFault {
    /// Marshaling or binding fault raised by the bridge itself.
    Binding(WebviewError),
    /// Error returned by the host callback.
    Host {
        type_name: &'static str,
        error: anyhow::Error,
    },
    /// The host callback panicked.
    Panic(String),
}

impl CallFault {
    /// Wraps a host error, remembering its concrete type.
    pub fn host<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Host {
            type_name: type_name::<E>(),
            error: error.into(),
        }
    }

    /// Name reported as the `"type"` of the encoded error.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Binding(error) => error.kind(),
            Self::Host { type_name, .. } => *type_name,
            Self::Panic(_) => "HostPanic",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Binding(error) => error.to_string(),
            Self::Host { error, .. } => error.to_string(),
            Self::Panic(message) => message.clone(),
        }
    }

    /// Messages of the underlying causes, outermost first.
    pub fn causes(&self) -> Vec<String> {
        match self {
            Self::Binding(error) => {
                let mut causes = Vec::new();
                let mut source = std::error::Error::source(error);
                while let Some(cause) = source {
                    causes.push(cause.to_string());
                    source = cause.source();
                }
                causes
            }
            Self::Host { error, .. } => error.chain().skip(1).map(|c| c.to_string()).collect(),
            Self::Panic(_) => Vec::new(),
        }
    }

    /// Captured backtrace, if the host error carries one.
    pub fn trace(&self) -> Option<String> {
        match self {
            Self::Host { error, .. } => {
                let backtrace = error.backtrace();
                (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string())
            }
            _ => None,
        }
    }
}

impl fmt::Display for CallFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name(), self.message())
    }
}

impl From<WebviewError> for CallFault {
    fn from(error: WebviewError) -> Self {
        Self::Binding(error)
    }
}

// ============================================================================
// Error encoding
// ============================================================================

/// Turns a fault into the JSON value the script-side promise rejects with.
pub trait ErrorEncoder: Send + Sync + 'static {
    fn encode(&self, fault: &CallFault) -> Value;
}

/// Default encoder: `{"message", "type", "causes", "stack"?}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonErrorEncoder {
    /// Adds `"stack"` when the host error captured a backtrace.
    pub include_trace: bool,
}

impl JsonErrorEncoder {
    pub const fn new(include_trace: bool) -> Self {
        Self { include_trace }
    }
}

impl ErrorEncoder for JsonErrorEncoder {
    fn encode(&self, fault: &CallFault) -> Value {
        let mut value = json!({
            "message": fault.message(),
            "type": fault.type_name(),
            "causes": fault.causes(),
        });
        if self.include_trace {
            if let Some(stack) = fault.trace() {
                value["stack"] = Value::String(stack);
            }
        }
        value
    }
}

impl<F> ErrorEncoder for F
where
    F: Fn(&CallFault) -> Value + Send + Sync + 'static,
{
    fn encode(&self, fault: &CallFault) -> Value {
        self(fault)
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A filtered response ready for the engine's `respond` primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: ResponseStatus,
    pub payload: String,
}

impl WireResponse {
    pub fn success(payload: Option<String>) -> Self {
        let payload = match payload {
            Some(payload) => safe_string(&payload).into_owned(),
            None => "null".to_string(),
        };
        Self {
            status: ResponseStatus::Success,
            payload,
        }
    }

    /// Encodes `fault` with `encoder`. A panicking encoder falls back to the
    /// default shape.
    pub fn error(fault: &CallFault, encoder: &dyn ErrorEncoder) -> Self {
        let value = catch_unwind(AssertUnwindSafe(|| encoder.encode(fault))).unwrap_or_else(|_| {
            tracing::warn!(
                target: "webview::interop",
                "Error encoder panicked; falling back to the default encoding"
            );
            JsonErrorEncoder::default().encode(fault)
        });
        Self {
            status: ResponseStatus::Error,
            payload: safe_string(&value.to_string()).into_owned(),
        }
    }

    pub fn from_result(result: WireResult, encoder: &dyn ErrorEncoder) -> Self {
        match result {
            Ok(payload) => Self::success(payload),
            Err(fault) => Self::error(&fault, encoder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_string_borrows_plain_ascii() {
        let input = r#"{"a":[1,2,"x y"]}"#;
        assert!(matches!(safe_string(input), Cow::Borrowed(s) if s == input));
    }

    #[test]
    fn test_safe_string_escapes() {
        assert_eq!(safe_string("a\0b"), "a\\u0000b");
        assert_eq!(safe_string("é"), "\\u00e9");
        assert_eq!(safe_string("€"), "\\u20ac");
        assert_eq!(safe_string("😀"), "\\ud83d\\ude00");
    }

    #[test]
    fn test_escaped_payload_is_still_valid_json() {
        let payload = serde_json::to_string("héllo 😀").unwrap();
        let safe = safe_string(&payload);
        let parsed: String = serde_json::from_str(&safe).unwrap();
        assert_eq!(parsed, "héllo 😀");
    }

    #[test]
    fn test_parse_request() {
        assert_eq!(parse_request("[1,\"a\"]").unwrap(), vec![json!(1), json!("a")]);
        assert!(matches!(
            parse_request("{\"a\":1}"),
            Err(WebviewError::WireFormat(_))
        ));
        assert!(matches!(parse_request("[1,"), Err(WebviewError::WireFormat(_))));
    }

    #[test]
    fn test_encode_result_null() {
        assert_eq!(encode_result(&()).unwrap().as_deref(), Some("null"));
        assert_eq!(encode_result(&None::<i32>).unwrap().as_deref(), Some("null"));
        assert_eq!(encode_result(&5).unwrap().as_deref(), Some("5"));
    }

    #[test]
    fn test_success_response_defaults_to_null() {
        let response = WireResponse::success(None);
        assert_eq!(response.payload, "null");
        assert_eq!(response.status, ResponseStatus::Success);
    }

    #[test]
    fn test_default_encoder_shape() {
        let fault = CallFault::host(anyhow::anyhow!("inner").context("outer"));
        let value = JsonErrorEncoder::default().encode(&fault);
        assert_eq!(value["message"], "outer");
        assert_eq!(value["causes"], json!(["inner"]));
        assert!(value.get("stack").is_none());
    }

    #[test]
    fn test_binding_fault_type_is_kind() {
        let fault = CallFault::from(WebviewError::ArgumentCount {
            expected: 2,
            actual: 1,
        });
        let value = JsonErrorEncoder::default().encode(&fault);
        assert_eq!(value["type"], "ArgumentCount");
        assert_eq!(
            value["message"],
            "Invalid number of arguments: expected 2, got 1"
        );
    }

    #[test]
    fn test_host_fault_keeps_type_name() {
        let error = "x".parse::<i32>().unwrap_err();
        let fault = CallFault::host(error);
        assert!(fault.type_name().ends_with("ParseIntError"));
    }

    #[test]
    fn test_error_response_is_filtered() {
        let response = WireResponse::error(
            &CallFault::Panic("déjà vu".into()),
            &JsonErrorEncoder::default(),
        );
        assert!(response.status.is_error());
        assert!(response.payload.is_ascii());
        let value: Value = serde_json::from_str(&response.payload).unwrap();
        assert_eq!(value["message"], "déjà vu");
        assert_eq!(value["type"], "HostPanic");
    }

    #[test]
    fn test_panicking_encoder_falls_back() {
        let encoder = |_: &CallFault| -> Value { panic!("encoder broke") };
        let response = WireResponse::error(&CallFault::Panic("boom".into()), &encoder);
        let value: Value = serde_json::from_str(&response.payload).unwrap();
        assert_eq!(value["message"], "boom");
    }

    #[test]
    fn test_custom_encoder_closure() {
        let encoder = |fault: &CallFault| json!({ "code": 7, "text": fault.message() });
        let response = WireResponse::error(&CallFault::Panic("x".into()), &encoder);
        assert_eq!(response.payload, r#"{"code":7,"text":"x"}"#);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn safe_string_output_is_ascii_without_nul(input in any::<String>()) {
            let safe = safe_string(&input);
            prop_assert!(safe.is_ascii());
            prop_assert!(!safe.contains('\0'));
        }

        #[test]
        fn safe_string_is_idempotent(input in any::<String>()) {
            let once = safe_string(&input).into_owned();
            let twice = safe_string(&once);
            prop_assert_eq!(twice.as_ref(), once.as_str());
        }

        #[test]
        fn safe_string_keeps_printable_ascii(input in "[ -~]*") {
            let safe = safe_string(&input);
            prop_assert_eq!(safe.as_ref(), input.as_str());
        }

        #[test]
        fn safe_json_decodes_to_input(input in any::<String>()) {
            let payload = serde_json::to_string(&input).unwrap();
            let safe = safe_string(&payload);
            let decoded: String = serde_json::from_str(&safe).unwrap();
            prop_assert_eq!(decoded, input);
        }
    }
}
