//! In-process engine
//!
//! `HeadlessEngine` implements the native function table without a
//! rendering surface. It runs a real event loop on the creating thread,
//! honours the same ownership rules as the C library (it only keeps `Weak`
//! references to tasks and bindings), and exposes a "script side" that can
//! issue calls to bound names and observe the responses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{
    EngineHandle, EngineStatus, NativeBinding, NativeEngine, NativeTask, ParentWindow,
    ResponseStatus, VersionInfo,
};

enum Message {
    Task(Weak<NativeTask>),
    Call {
        name: String,
        call_id: String,
        request: String,
    },
    Terminate,
}

/// Side effects of host operations that a real engine would apply to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Eval(String),
    Init(String),
    Navigate(String),
}

/// A response delivered to the script side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResponse {
    pub call_id: String,
    pub status: ResponseStatus,
    pub payload: String,
}

impl ScriptResponse {
    /// `true` when the script-side promise would reject.
    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// Parses the payload the way the script-side promise would.
    pub fn value(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.payload)
    }
}

/// A script-originated call waiting for its response.
#[derive(Debug)]
pub struct PendingCall {
    call_id: String,
    receiver: Receiver<ScriptResponse>,
}

impl PendingCall {
    /// Call id the engine passes to the bound callback.
    pub fn id(&self) -> &str {
        &self.call_id
    }

    /// The response, if the call has been answered.
    pub fn try_response(&self) -> Option<ScriptResponse> {
        self.receiver.try_recv().ok()
    }

    /// Blocks up to `timeout` for the response. `None` if the call was not
    /// answered in time, or never will be because the instance was destroyed.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ScriptResponse> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

struct Instance {
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    bindings: Mutex<HashMap<String, Weak<NativeBinding>>>,
    pending: Mutex<HashMap<String, Sender<ScriptResponse>>>,
    journal: Mutex<Vec<JournalEntry>>,
    next_call: AtomicU64,
    running: AtomicBool,
    stopping: AtomicBool,
    destroyed: AtomicBool,
}

impl Instance {
    fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            bindings: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            journal: Mutex::new(Vec::new()),
            next_call: AtomicU64::new(1),
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    fn deliver(&self, call_id: &str, status: ResponseStatus, payload: String) -> EngineStatus {
        let waiter = self.pending.lock().remove(call_id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(ScriptResponse {
                    call_id: call_id.to_string(),
                    status,
                    payload,
                });
                EngineStatus::Ok
            }
            None => EngineStatus::InvalidArgument,
        }
    }

    fn handle_call(&self, name: &str, call_id: &str, request: &str) {
        let binding = self.bindings.lock().get(name).and_then(Weak::upgrade);
        match binding {
            Some(binding) => binding.invoke(call_id, request),
            None => {
                let payload = json!({
                    "message": format!("{} is not a bound function", name),
                    "type": "BindingNotFound",
                });
                self.deliver(call_id, ResponseStatus::Error, payload.to_string());
            }
        }
    }
}

/// An engine without a rendering surface.
///
/// Destroyed instances are removed from the engine; only their handles stay
/// recognisable through [`is_destroyed`](Self::is_destroyed).
pub struct HeadlessEngine {
    instances: Mutex<HashMap<EngineHandle, Arc<Instance>>>,
    next_handle: AtomicUsize,
    terminations: AtomicUsize,
    unavailable: bool,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            next_handle: AtomicUsize::new(1),
            terminations: AtomicUsize::new(0),
            unavailable: false,
        }
    }

    /// An engine whose `create` always fails with `MissingDependency`.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new()
        }
    }

    fn instance(&self, handle: EngineHandle) -> Option<Arc<Instance>> {
        let instance = self.instances.lock().get(&handle).cloned()?;
        if instance.destroyed.load(Ordering::SeqCst) {
            None
        } else {
            Some(instance)
        }
    }

    fn inspect<T>(&self, handle: EngineHandle, f: impl FnOnce(&Instance) -> T) -> Option<T> {
        self.instances.lock().get(&handle).map(|instance| f(&**instance))
    }

    /// Calls a bound function from the script side with a JSON-array
    /// request. The call is queued on the event loop.
    ///
    /// Unbound names are answered with a `BindingNotFound` error response,
    /// the way the script-side shim rejects them. Fails with `InvalidState`
    /// once the instance is stopping and `InvalidArgument` for unknown or
    /// destroyed handles.
    pub fn call(
        &self,
        handle: EngineHandle,
        name: &str,
        request: &str,
    ) -> Result<PendingCall, EngineStatus> {
        let instance = self.instance(handle).ok_or(EngineStatus::InvalidArgument)?;
        if instance.stopping.load(Ordering::SeqCst) {
            return Err(EngineStatus::InvalidState);
        }

        let call_id = instance.next_call.fetch_add(1, Ordering::SeqCst).to_string();
        let (sender, receiver) = unbounded();
        instance.pending.lock().insert(call_id.clone(), sender);

        let message = Message::Call {
            name: name.to_string(),
            call_id: call_id.clone(),
            request: request.to_string(),
        };
        if instance.sender.send(message).is_err() {
            instance.pending.lock().remove(&call_id);
            return Err(EngineStatus::InvalidState);
        }

        Ok(PendingCall { call_id, receiver })
    }

    /// Page-level side effects recorded so far.
    pub fn journal(&self, handle: EngineHandle) -> Vec<JournalEntry> {
        self.inspect(handle, |instance| instance.journal.lock().clone())
            .unwrap_or_default()
    }

    /// How many times `terminate` reached this engine, over all instances.
    pub fn terminate_count(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Names the engine currently exposes to script.
    pub fn exposed_names(&self, handle: EngineHandle) -> Vec<String> {
        let mut names = self
            .inspect(handle, |instance| {
                instance.bindings.lock().keys().cloned().collect::<Vec<_>>()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Messages waiting in the event loop's queue.
    pub fn queued(&self, handle: EngineHandle) -> usize {
        self.inspect(handle, |instance| instance.receiver.len())
            .unwrap_or(0)
    }

    /// `true` for handles this engine issued and has since destroyed.
    pub fn is_destroyed(&self, handle: EngineHandle) -> bool {
        let issued = handle.as_raw() > 0
            && handle.as_raw() < self.next_handle.load(Ordering::SeqCst);
        issued && !self.instances.lock().contains_key(&handle)
    }

    /// Live instances.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for HeadlessEngine {
    fn create(
        &self,
        debug: bool,
        _parent: Option<ParentWindow>,
    ) -> Result<EngineHandle, EngineStatus> {
        if self.unavailable {
            return Err(EngineStatus::MissingDependency);
        }
        let handle = EngineHandle::from_raw(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.instances.lock().insert(handle, Arc::new(Instance::new()));
        let devtools = debug;
        tracing::debug!(target: "webview::headless", ?handle, devtools, "Created headless engine");
        Ok(handle)
    }

    fn destroy(&self, handle: EngineHandle) -> EngineStatus {
        let removed = self.instances.lock().remove(&handle);
        let Some(instance) = removed else {
            return EngineStatus::InvalidArgument;
        };
        instance.destroyed.store(true, Ordering::SeqCst);
        instance.stopping.store(true, Ordering::SeqCst);
        while instance.receiver.try_recv().is_ok() {}
        instance.bindings.lock().clear();
        instance.pending.lock().clear();
        EngineStatus::Ok
    }

    fn run(&self, handle: EngineHandle) -> EngineStatus {
        let Some(instance) = self.instance(handle) else {
            return EngineStatus::InvalidArgument;
        };
        if instance.running.swap(true, Ordering::SeqCst) {
            return EngineStatus::InvalidState;
        }

        while let Ok(message) = instance.receiver.recv() {
            match message {
                Message::Task(task) => {
                    if let Some(task) = task.upgrade() {
                        task.run();
                    }
                }
                Message::Call {
                    name,
                    call_id,
                    request,
                } => instance.handle_call(&name, &call_id, &request),
                Message::Terminate => break,
            }
        }

        instance.running.store(false, Ordering::SeqCst);
        EngineStatus::Ok
    }

    fn terminate(&self, handle: EngineHandle) -> EngineStatus {
        let Some(instance) = self.instance(handle) else {
            return EngineStatus::InvalidArgument;
        };
        self.terminations.fetch_add(1, Ordering::SeqCst);
        instance.stopping.store(true, Ordering::SeqCst);
        let _ = instance.sender.send(Message::Terminate);
        EngineStatus::Ok
    }

    fn dispatch(&self, handle: EngineHandle, task: &Arc<NativeTask>) -> EngineStatus {
        let Some(instance) = self.instance(handle) else {
            return EngineStatus::InvalidArgument;
        };
        if instance.stopping.load(Ordering::SeqCst) {
            return EngineStatus::InvalidState;
        }
        match instance.sender.send(Message::Task(Arc::downgrade(task))) {
            Ok(()) => EngineStatus::Ok,
            Err(_) => EngineStatus::InvalidState,
        }
    }

    fn bind(
        &self,
        handle: EngineHandle,
        name: &str,
        binding: &Arc<NativeBinding>,
    ) -> EngineStatus {
        let Some(instance) = self.instance(handle) else {
            return EngineStatus::InvalidArgument;
        };
        let mut bindings = instance.bindings.lock();
        if bindings.contains_key(name) {
            return EngineStatus::Duplicate;
        }
        bindings.insert(name.to_string(), Arc::downgrade(binding));
        EngineStatus::Ok
    }

    fn unbind(&self, handle: EngineHandle, name: &str) -> EngineStatus {
        let Some(instance) = self.instance(handle) else {
            return EngineStatus::InvalidArgument;
        };
        let removed = instance.bindings.lock().remove(name);
        match removed {
            Some(_) => EngineStatus::Ok,
            None => EngineStatus::NotFound,
        }
    }

    fn respond(
        &self,
        handle: EngineHandle,
        call_id: &str,
        status: ResponseStatus,
        result: &str,
    ) -> EngineStatus {
        let Some(instance) = self.instance(handle) else {
            return EngineStatus::InvalidArgument;
        };
        instance.deliver(call_id, status, result.to_string())
    }

    fn eval(&self, handle: EngineHandle, js: &str) -> EngineStatus {
        self.record(handle, JournalEntry::Eval(js.to_string()))
    }

    fn init(&self, handle: EngineHandle, js: &str) -> EngineStatus {
        self.record(handle, JournalEntry::Init(js.to_string()))
    }

    fn navigate(&self, handle: EngineHandle, url: &str) -> EngineStatus {
        self.record(handle, JournalEntry::Navigate(url.to_string()))
    }

    fn version(&self) -> VersionInfo {
        VersionInfo {
            major: 0,
            minor: 1,
            patch: 0,
            version_number: "0.1.0".to_string(),
            pre_release: String::new(),
            build_metadata: "+headless".to_string(),
        }
    }
}

impl HeadlessEngine {
    fn record(&self, handle: EngineHandle, entry: JournalEntry) -> EngineStatus {
        match self.instance(handle) {
            Some(instance) => {
                instance.journal.lock().push(entry);
                EngineStatus::Ok
            }
            None => EngineStatus::InvalidArgument,
        }
    }
}
