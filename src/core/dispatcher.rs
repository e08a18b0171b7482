//! 线程亲和调度器
//!
//! Runs host work on the engine thread.
//!
//! ## 功能特性
//!
//! - Work submitted from the engine thread runs inline.
//! - Work submitted from any other thread is scheduled through the engine's
//!   `dispatch` primitive.
//! - Every scheduled closure is pinned in an owned table until the engine
//!   invokes it. The engine only ever sees a non-owning reference.
//! - Faults raised by the work (including panics) never unwind into the
//!   native loop; they go to a replaceable error handler.
//! - Once the instance is torn down the dispatcher is closed: the
//!   acceptance check and the native `dispatch` happen under one read lock,
//!   and teardown takes the write side before destroying the instance.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use super::error::{panic_message, WebviewError, WebviewResult};
use crate::platform::{EngineHandle, NativeEngine, NativeTask};

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle of a core instance as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// 已创建：事件循环尚未运行，跨线程操作排队等待
    Created,
    /// 运行中：`run` 正阻塞在原生事件循环里
    Running,
    /// 已终止：事件循环结束，不再接受任何操作
    Terminated,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Terminated,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    terminating: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Created as u8),
            terminating: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `Created → Running`. Any other starting state is an engine fault.
    pub(crate) fn begin_run(&self) -> WebviewResult<()> {
        self.state
            .compare_exchange(
                LifecycleState::Created as u8,
                LifecycleState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|_| WebviewError::Engine(crate::platform::EngineStatus::InvalidState))
    }

    pub(crate) fn finish(&self) {
        self.terminating.store(true, Ordering::SeqCst);
        self.state
            .store(LifecycleState::Terminated as u8, Ordering::SeqCst);
    }

    /// Returns `true` for the first caller only.
    pub(crate) fn request_termination(&self) -> bool {
        !self.terminating.swap(true, Ordering::SeqCst)
            && self.state() != LifecycleState::Terminated
    }

    /// Withdraws a termination request that never reached the engine.
    pub(crate) fn withdraw_termination(&self) {
        if self.state() != LifecycleState::Terminated {
            self.terminating.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn accepts_work(&self) -> bool {
        !self.terminating.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Completion
// ============================================================================

/// Result of an operation queued on the engine thread.
///
/// Resolves once the work has run. If the work is dropped without running
/// (the loop stopped first), it resolves to [`WebviewError::Cancelled`].
#[must_use = "dropping a completion discards the outcome; failures then go to the error handler"]
#[derive(Debug)]
pub struct Completion<T> {
    receiver: oneshot::Receiver<WebviewResult<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn ready(result: WebviewResult<T>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver }
    }

    /// Blocks the calling thread until the work has run.
    ///
    /// On the engine thread the work has always already run, so this never
    /// blocks there.
    pub fn wait(self) -> WebviewResult<T> {
        futures::executor::block_on(self)
    }

    /// Takes the outcome if it is available. Do not poll the completion
    /// again after this returned `Some`.
    pub fn try_take(&mut self) -> Option<WebviewResult<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WebviewError::Cancelled)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = WebviewResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(WebviewError::Cancelled)))
    }
}

// ============================================================================
// Pinned tasks
// ============================================================================

/// Owned table of scheduled closures the engine has not invoked yet.
#[derive(Default)]
struct PinnedTasks {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, Arc<NativeTask>>>,
}

impl PinnedTasks {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn pin(&self, id: u64, task: Arc<NativeTask>) {
        self.tasks.lock().insert(id, task);
    }

    fn unpin(&self, id: u64) -> Option<Arc<NativeTask>> {
        self.tasks.lock().remove(&id)
    }

    fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    fn drain(&self) -> Vec<Arc<NativeTask>> {
        self.tasks.lock().drain().map(|(_, task)| task).collect()
    }
}

/// Handler for faults that surface on the engine thread.
pub type ErrorHandler = Arc<dyn Fn(&WebviewError) + Send + Sync>;

fn default_error_handler() -> ErrorHandler {
    Arc::new(|error: &WebviewError| {
        tracing::warn!(
            target: "webview::dispatcher",
            error = %error,
            kind = error.kind(),
            "Uncaught fault on the webview thread. Use set_error_handler to install a custom handler."
        );
    })
}

struct DispatchShared {
    pins: PinnedTasks,
    error_handler: RwLock<ErrorHandler>,
    // false once the native instance is gone
    open: RwLock<bool>,
}

impl DispatchShared {
    fn report(&self, error: &WebviewError) {
        let handler = Arc::clone(&*self.error_handler.read());
        handler(error);
    }

    fn run_guarded<F>(&self, work: F)
    where
        F: FnOnce(),
    {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(work)) {
            self.report(&WebviewError::HostPanic(panic_message(&*payload)));
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Executes work with affinity to the engine's creation thread.
pub struct WebviewDispatcher {
    engine: Arc<dyn NativeEngine>,
    handle: EngineHandle,
    owner: ThreadId,
    lifecycle: Arc<Lifecycle>,
    shared: Arc<DispatchShared>,
}

impl WebviewDispatcher {
    /// Captures the calling thread as the engine thread.
    pub(crate) fn new(
        engine: Arc<dyn NativeEngine>,
        handle: EngineHandle,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            engine,
            handle,
            owner: thread::current().id(),
            lifecycle,
            shared: Arc::new(DispatchShared {
                pins: PinnedTasks::default(),
                error_handler: RwLock::new(default_error_handler()),
                open: RwLock::new(true),
            }),
        }
    }

    pub fn is_engine_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Replaces the handler for faults raised on the engine thread.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&WebviewError) + Send + Sync + 'static,
    {
        *self.shared.error_handler.write() = Arc::new(handler);
    }

    pub(crate) fn report(&self, error: &WebviewError) {
        self.shared.report(error);
    }

    /// Scheduled closures the engine has not invoked yet.
    pub fn pending_tasks(&self) -> usize {
        self.shared.pins.len()
    }

    /// Runs `work` on the engine thread without waiting for it.
    ///
    /// Fails fast with [`WebviewError::Terminated`] once termination has
    /// been requested.
    pub fn execute<F>(&self, work: F) -> WebviewResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch_work(work, true)
    }

    /// Runs `work` on the engine thread and returns a completion for its
    /// result.
    pub fn submit<T, F>(&self, work: F) -> WebviewResult<Completion<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> WebviewResult<T> + Send + 'static,
    {
        self.submit_work(work, true)
    }

    /// Like [`submit`](Self::submit) but bypasses the termination request
    /// check. Only termination itself uses this. Still fails once the
    /// dispatcher has been shut down.
    pub(crate) fn submit_unchecked<T, F>(&self, work: F) -> WebviewResult<Completion<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> WebviewResult<T> + Send + 'static,
    {
        self.submit_work(work, false)
    }

    fn submit_work<T, F>(&self, work: F, check_termination: bool) -> WebviewResult<Completion<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> WebviewResult<T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let shared = Arc::downgrade(&self.shared);

        self.dispatch_work(
            move || {
                let result = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
                    Err(WebviewError::HostPanic(panic_message(&*payload)))
                });
                // Nobody is waiting: the failure would otherwise vanish.
                if let Err(Err(error)) = sender.send(result) {
                    if let Some(shared) = shared.upgrade() {
                        shared.report(&error);
                    }
                }
            },
            check_termination,
        )?;

        Ok(Completion { receiver })
    }

    fn dispatch_work<F>(&self, work: F, check_termination: bool) -> WebviewResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // Held until the engine has the task, so teardown cannot destroy the
        // instance between the check and the native dispatch.
        let open = self.shared.open.read();
        if !*open || (check_termination && !self.lifecycle.accepts_work()) {
            return Err(WebviewError::Terminated);
        }

        if self.is_engine_thread() {
            // Inline work may drop the core, which shuts the dispatcher down.
            drop(open);
            self.shared.run_guarded(work);
            return Ok(());
        }
        self.schedule(work)
    }

    fn schedule<F>(&self, work: F) -> WebviewResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.shared.pins.next_id();
        let shared: Weak<DispatchShared> = Arc::downgrade(&self.shared);

        let task = Arc::new(NativeTask::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(work));
            if let Some(shared) = shared.upgrade() {
                shared.pins.unpin(id);
                if let Err(payload) = outcome {
                    shared.report(&WebviewError::HostPanic(panic_message(&*payload)));
                }
            }
        }));

        self.shared.pins.pin(id, Arc::clone(&task));
        let status = self.engine.dispatch(self.handle, &task);
        if !status.is_ok() {
            self.shared.pins.unpin(id);
            tracing::debug!(target: "webview::dispatcher", %status, "Engine refused scheduled task");
            return Err(WebviewError::Engine(status));
        }

        tracing::trace!(target: "webview::dispatcher", task = id, "Scheduled task on engine thread");
        Ok(())
    }

    /// Closes the dispatcher. Waits for in-flight dispatches to reach the
    /// engine; every later submission fails with `Terminated`.
    pub(crate) fn shutdown(&self) {
        *self.shared.open.write() = false;
    }

    pub fn is_shut_down(&self) -> bool {
        !*self.shared.open.read()
    }

    /// Drops every task the engine never invoked. Their completions resolve
    /// to `Cancelled`.
    pub(crate) fn release_pending(&self) -> usize {
        let leaked = self.shared.pins.drain();
        let count = leaked.len();
        if count > 0 {
            tracing::warn!(
                target: "webview::dispatcher",
                count,
                "Scheduled tasks were never invoked by the engine"
            );
        }
        drop(leaked);
        count
    }
}

impl std::fmt::Debug for WebviewDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebviewDispatcher")
            .field("handle", &self.handle)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}
