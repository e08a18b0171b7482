//! Native engine abstraction
//!
//! The bridge talks to the rendering engine through a narrow, C-shaped
//! function table. [`NativeEngine`] is that table; every method maps to one
//! symbol of the `webview` C API and answers with an [`EngineStatus`].
//!
//! ```text
//! ┌───────────────┐    dispatch / bind / respond    ┌──────────────────┐
//! │  WebviewCore  │ ──────────────────────────────▶ │   NativeEngine   │
//! │  (host side)  │ ◀────────────────────────────── │ library/headless │
//! └───────────────┘   NativeTask / NativeBinding    └──────────────────┘
//! ```
//!
//! The engine never owns the callback objects it is handed. It receives
//! either a raw pointer derived from an `Arc` (library engine) or a `Weak`
//! (headless engine); the strong references live in the dispatcher's pin
//! table and in the binding registry.

pub mod headless;
pub mod library;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

pub use crate::core::error::EngineStatus;
pub use headless::{HeadlessEngine, JournalEntry, PendingCall, ScriptResponse};
pub use library::LibraryEngine;

// ============================================================================
// Handles
// ============================================================================

/// Opaque identity of one native engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(usize);

impl EngineHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Native window the engine should embed itself into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentWindow(usize);

impl ParentWindow {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Status passed to the engine's `return` primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// The script-side promise resolves with the payload.
    Success,
    /// The script-side promise rejects with the payload.
    Error,
}

impl ResponseStatus {
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
        }
    }

    pub const fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// Version reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub version_number: String,
    pub pre_release: String,
    pub build_metadata: String,
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version_number)?;
        if !self.pre_release.is_empty() {
            write!(f, "{}", self.pre_release)?;
        }
        if !self.build_metadata.is_empty() {
            write!(f, "{}", self.build_metadata)?;
        }
        Ok(())
    }
}

// ============================================================================
// Native-visible callbacks
// ============================================================================

type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A closure scheduled onto the engine thread.
///
/// The work can only be taken once; a second invocation by a misbehaving
/// engine is a no-op.
pub struct NativeTask {
    work: Mutex<Option<TaskFn>>,
}

impl NativeTask {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            work: Mutex::new(Some(Box::new(work))),
        }
    }

    /// Runs the scheduled work. Called by the engine on its own thread.
    pub fn run(&self) {
        let work = self.work.lock().take();
        if let Some(work) = work {
            work();
        }
    }

    pub fn has_run(&self) -> bool {
        self.work.lock().is_none()
    }
}

impl fmt::Debug for NativeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTask")
            .field("has_run", &self.has_run())
            .finish()
    }
}

type BindingFn = dyn Fn(&str, &str) + Send + Sync + 'static;

/// The callback the engine invokes for a bound name: `(call id, request)`.
///
/// Whoever builds the callback is responsible for eventually answering the
/// call id through [`NativeEngine::respond`].
pub struct NativeBinding {
    name: String,
    handler: Box<BindingFn>,
}

impl NativeBinding {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Box::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, call_id: &str, request: &str) {
        (self.handler)(call_id, request)
    }
}

impl fmt::Debug for NativeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBinding")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Engine function table
// ============================================================================

/// The native engine's function table.
///
/// `terminate` and `dispatch` are safe to call from any thread; everything
/// else must be called on the thread that created the instance, which the
/// dispatcher guarantees.
pub trait NativeEngine: Send + Sync + 'static {
    /// Creates an engine instance. Blocking; fails with a status when the
    /// engine cannot be created.
    fn create(
        &self,
        debug: bool,
        parent: Option<ParentWindow>,
    ) -> Result<EngineHandle, EngineStatus>;

    fn destroy(&self, handle: EngineHandle) -> EngineStatus;

    /// Runs the event loop until terminated.
    fn run(&self, handle: EngineHandle) -> EngineStatus;

    fn terminate(&self, handle: EngineHandle) -> EngineStatus;

    /// Schedules `task` on the engine thread. The engine keeps only a
    /// non-owning reference.
    fn dispatch(&self, handle: EngineHandle, task: &Arc<NativeTask>) -> EngineStatus;

    /// Exposes `binding` to script under `name`. The engine keeps only a
    /// non-owning reference.
    fn bind(&self, handle: EngineHandle, name: &str, binding: &Arc<NativeBinding>)
        -> EngineStatus;

    fn unbind(&self, handle: EngineHandle, name: &str) -> EngineStatus;

    /// Delivers the single response for `call_id`.
    fn respond(
        &self,
        handle: EngineHandle,
        call_id: &str,
        status: ResponseStatus,
        result: &str,
    ) -> EngineStatus;

    fn eval(&self, handle: EngineHandle, js: &str) -> EngineStatus;

    /// Registers script injected on every page load.
    fn init(&self, handle: EngineHandle, js: &str) -> EngineStatus;

    fn navigate(&self, handle: EngineHandle, url: &str) -> EngineStatus;

    fn version(&self) -> VersionInfo;
}
