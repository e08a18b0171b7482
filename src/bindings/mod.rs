//! Script ⇄ host interop layer
//!
//! Architecture:
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Script side                          │
//! │        window.add(2, 3)  ──▶  call id + "[2,3]"              │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ engine thread
//!                                v
//! ┌──────────────────────────────────────────────────────────────┐
//! │  NativeBinding (wrapped wire function)                       │
//! │    decode ─▶ host callback ─▶ encode / CallFault             │
//! │    catch_unwind, ErrorEncoder, safe_string                   │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ respond(call id, status, payload)
//!                                v
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       NativeEngine                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every accepted call gets exactly one response, including calls whose
//! host callback fails or panics.

pub mod protocol;
pub mod reflect;

pub use protocol::*;
pub use reflect::{HostMethod, MethodArgs, MethodTable, ParamDescriptor, Reflect};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::InteropConfig;
use crate::core::error::{panic_message, WebviewResult};
use crate::core::{Completion, WebviewCore};
use crate::platform::NativeBinding;

/// Binds host functions to script names on a [`WebviewCore`].
#[derive(Clone)]
pub struct WebviewInterop {
    core: Arc<WebviewCore>,
    encoder: Arc<dyn ErrorEncoder>,
}

impl WebviewInterop {
    pub fn new(core: Arc<WebviewCore>) -> Self {
        Self {
            core,
            encoder: Arc::new(JsonErrorEncoder::default()),
        }
    }

    pub fn from_config(core: Arc<WebviewCore>, config: &InteropConfig) -> Self {
        Self::new(core).with_error_encoder(JsonErrorEncoder::new(config.include_error_trace))
    }

    /// Replaces the encoder used for error responses. Only affects
    /// functions bound afterwards.
    pub fn with_error_encoder<E: ErrorEncoder>(mut self, encoder: E) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    pub fn core(&self) -> &Arc<WebviewCore> {
        &self.core
    }

    /// Binds a JSON function: the request is decoded into its argument
    /// list and the result is serialized.
    pub fn bind<F, R, E>(&self, name: &str, function: F) -> WebviewResult<Completion<()>>
    where
        F: Fn(Vec<Value>) -> Result<R, E> + Send + Sync + 'static,
        R: Serialize + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        self.bind_wire(name, move |request: &str| -> WireResult {
            let args = parse_request(request)?;
            let result = function(args).map_err(CallFault::host)?;
            encode_result(&result)
        })
    }

    /// Binds a raw wire function: it receives the request text and returns
    /// the response text. `Ok(None)` answers `null`.
    pub fn bind_raw<F, E>(&self, name: &str, function: F) -> WebviewResult<Completion<()>>
    where
        F: Fn(&str) -> Result<Option<String>, E> + Send + Sync + 'static,
        E: Into<anyhow::Error> + 'static,
    {
        self.bind_wire(name, move |request: &str| -> WireResult {
            function(request).map_err(CallFault::host)
        })
    }

    /// Binds one method of `target`. The method is resolved here, once;
    /// unknown and overloaded names fail with `InvalidBinding`.
    pub fn bind_method<T: Reflect>(
        &self,
        name: &str,
        target: Arc<T>,
        method_name: &str,
    ) -> WebviewResult<Completion<()>> {
        let method = MethodTable::<T>::of().resolve(method_name)?;
        tracing::debug!(
            target: "webview::interop",
            binding = name,
            method = method_name,
            arity = method.arity(),
            "Resolved host method"
        );
        self.bind_wire(name, move |request: &str| method.invoke(&target, request))
    }

    pub fn unbind(&self, name: &str) -> WebviewResult<Completion<()>> {
        self.core.unbind(name)
    }

    fn bind_wire<F>(&self, name: &str, function: F) -> WebviewResult<Completion<()>>
    where
        F: Fn(&str) -> WireResult + Send + Sync + 'static,
    {
        let binding = self.wrap_native(name, function);
        self.core.bind(name, binding)
    }

    fn wrap_native<F>(&self, name: &str, function: F) -> Arc<NativeBinding>
    where
        F: Fn(&str) -> WireResult + Send + Sync + 'static,
    {
        let engine = Arc::clone(self.core.engine());
        let handle = self.core.handle();
        let encoder = Arc::clone(&self.encoder);
        let binding = name.to_string();

        Arc::new(NativeBinding::new(name, move |call_id: &str, request: &str| {
            let outcome = catch_unwind(AssertUnwindSafe(|| function(request)))
                .unwrap_or_else(|payload| Err(CallFault::Panic(panic_message(&*payload))));

            if let Err(fault) = &outcome {
                tracing::debug!(
                    target: "webview::interop",
                    binding = %binding,
                    call_id,
                    fault = %fault,
                    "Bound function failed"
                );
            }

            let response = WireResponse::from_result(outcome, &*encoder);
            let status = engine.respond(handle, call_id, response.status, &response.payload);
            if !status.is_ok() {
                tracing::error!(
                    target: "webview::interop",
                    binding = %binding,
                    call_id,
                    %status,
                    "Failed to deliver response"
                );
            }
        }))
    }
}

impl std::fmt::Debug for WebviewInterop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebviewInterop")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
