//! `webview` shared-library engine
//!
//! Loads the native `webview` library at runtime and forwards the function
//! table to its C API. Callbacks cross the boundary as raw pointers to
//! objects pinned on the Rust side; the trampolines below turn them back
//! into references.

use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString, OsStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use libloading::Library;

use super::{
    EngineHandle, EngineStatus, NativeBinding, NativeEngine, NativeTask, ParentWindow,
    ResponseStatus, VersionInfo,
};
use crate::core::error::WebviewResult;

type Webview = *mut c_void;
type DispatchFn = extern "C" fn(Webview, *mut c_void);
type BindFn = extern "C" fn(*const c_char, *const c_char, *mut c_void);

#[repr(C)]
struct RawVersion {
    major: c_uint,
    minor: c_uint,
    patch: c_uint,
}

#[repr(C)]
struct RawVersionInfo {
    version: RawVersion,
    version_number: [c_char; 32],
    pre_release: [c_char; 48],
    build_metadata: [c_char; 48],
}

/// Resolved symbols. The function pointers stay valid for as long as the
/// owning `Library` is loaded.
struct Api {
    create: unsafe extern "C" fn(c_int, *mut c_void) -> Webview,
    destroy: unsafe extern "C" fn(Webview) -> c_int,
    run: unsafe extern "C" fn(Webview) -> c_int,
    terminate: unsafe extern "C" fn(Webview) -> c_int,
    dispatch: unsafe extern "C" fn(Webview, DispatchFn, *mut c_void) -> c_int,
    bind: unsafe extern "C" fn(Webview, *const c_char, BindFn, *mut c_void) -> c_int,
    unbind: unsafe extern "C" fn(Webview, *const c_char) -> c_int,
    ret: unsafe extern "C" fn(Webview, *const c_char, c_int, *const c_char) -> c_int,
    eval: unsafe extern "C" fn(Webview, *const c_char) -> c_int,
    init: unsafe extern "C" fn(Webview, *const c_char) -> c_int,
    navigate: unsafe extern "C" fn(Webview, *const c_char) -> c_int,
    version: unsafe extern "C" fn() -> *const RawVersionInfo,
}

/// Engine backed by the native `webview` library.
pub struct LibraryEngine {
    api: Api,
    // Must outlive `api`.
    _library: Library,
}

impl LibraryEngine {
    /// Loads the library from an explicit path.
    pub fn load(path: impl AsRef<OsStr>) -> WebviewResult<Self> {
        let path = path.as_ref();
        tracing::info!(target: "webview::library", path = ?path, "Loading native webview library");
        // SAFETY: loading runs the library's initialisers; the webview
        // library has none with preconditions.
        let library = unsafe { Library::new(path)? };
        let api = unsafe { Self::resolve(&library)? };
        Ok(Self {
            api,
            _library: library,
        })
    }

    /// Loads the library by its platform file name (`libwebview.so`,
    /// `libwebview.dylib`, `webview.dll`) from the loader's search path.
    pub fn load_default() -> WebviewResult<Self> {
        Self::load(libloading::library_filename("webview"))
    }

    unsafe fn resolve(library: &Library) -> WebviewResult<Api> {
        Ok(Api {
            create: symbol(library, b"webview_create\0")?,
            destroy: symbol(library, b"webview_destroy\0")?,
            run: symbol(library, b"webview_run\0")?,
            terminate: symbol(library, b"webview_terminate\0")?,
            dispatch: symbol(library, b"webview_dispatch\0")?,
            bind: symbol(library, b"webview_bind\0")?,
            unbind: symbol(library, b"webview_unbind\0")?,
            ret: symbol(library, b"webview_return\0")?,
            eval: symbol(library, b"webview_eval\0")?,
            init: symbol(library, b"webview_init\0")?,
            navigate: symbol(library, b"webview_navigate\0")?,
            version: symbol(library, b"webview_version\0")?,
        })
    }

    fn ptr(handle: EngineHandle) -> Webview {
        handle.as_raw() as Webview
    }

    fn with_cstr(value: &str, f: impl FnOnce(*const c_char) -> c_int) -> EngineStatus {
        match CString::new(value) {
            Ok(value) => EngineStatus::from_code(f(value.as_ptr())),
            Err(_) => EngineStatus::InvalidArgument,
        }
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> WebviewResult<T> {
    Ok(*library.get::<T>(name)?)
}

/// Invoked by the engine on its thread for every scheduled task.
extern "C" fn dispatch_trampoline(_w: Webview, arg: *mut c_void) {
    let ptr = arg as *const NativeTask;
    // SAFETY: `arg` came from `Arc::as_ptr` of a task held in the
    // dispatcher's pin table, which keeps it alive until the task runs.
    // Take our own strong reference first, since running it unpins it.
    let task = unsafe {
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    };
    if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
        tracing::error!(target: "webview::library", "Scheduled task unwound into the native loop");
    }
}

/// Invoked by the engine on its thread for every script call.
extern "C" fn bind_trampoline(id: *const c_char, req: *const c_char, arg: *mut c_void) {
    let ptr = arg as *const NativeBinding;
    // SAFETY: `arg` came from `Arc::as_ptr` of a binding held by the
    // registry, which is only released on this thread. The callback may
    // unbind itself, so hold our own strong reference until it returns.
    let binding = unsafe {
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    };
    let id = unsafe { CStr::from_ptr(id) }.to_string_lossy();
    let req = if req.is_null() {
        "[]".into()
    } else {
        unsafe { CStr::from_ptr(req) }.to_string_lossy()
    };
    if catch_unwind(AssertUnwindSafe(|| binding.invoke(&id, &req))).is_err() {
        tracing::error!(
            target: "webview::library",
            binding = binding.name(),
            "Binding unwound into the native loop"
        );
    }
}

fn c_array_to_string(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl NativeEngine for LibraryEngine {
    fn create(
        &self,
        debug: bool,
        parent: Option<ParentWindow>,
    ) -> Result<EngineHandle, EngineStatus> {
        let window = parent.map_or(std::ptr::null_mut(), |p| p.as_raw() as *mut c_void);
        let raw = unsafe { (self.api.create)(c_int::from(debug), window) };
        if raw.is_null() {
            Err(EngineStatus::Unspecified)
        } else {
            Ok(EngineHandle::from_raw(raw as usize))
        }
    }

    fn destroy(&self, handle: EngineHandle) -> EngineStatus {
        EngineStatus::from_code(unsafe { (self.api.destroy)(Self::ptr(handle)) })
    }

    fn run(&self, handle: EngineHandle) -> EngineStatus {
        EngineStatus::from_code(unsafe { (self.api.run)(Self::ptr(handle)) })
    }

    fn terminate(&self, handle: EngineHandle) -> EngineStatus {
        EngineStatus::from_code(unsafe { (self.api.terminate)(Self::ptr(handle)) })
    }

    fn dispatch(&self, handle: EngineHandle, task: &Arc<NativeTask>) -> EngineStatus {
        let arg = Arc::as_ptr(task) as *mut c_void;
        EngineStatus::from_code(unsafe {
            (self.api.dispatch)(Self::ptr(handle), dispatch_trampoline, arg)
        })
    }

    fn bind(
        &self,
        handle: EngineHandle,
        name: &str,
        binding: &Arc<NativeBinding>,
    ) -> EngineStatus {
        let arg = Arc::as_ptr(binding) as *mut c_void;
        Self::with_cstr(name, |name| unsafe {
            (self.api.bind)(Self::ptr(handle), name, bind_trampoline, arg)
        })
    }

    fn unbind(&self, handle: EngineHandle, name: &str) -> EngineStatus {
        Self::with_cstr(name, |name| unsafe { (self.api.unbind)(Self::ptr(handle), name) })
    }

    fn respond(
        &self,
        handle: EngineHandle,
        call_id: &str,
        status: ResponseStatus,
        result: &str,
    ) -> EngineStatus {
        let (Ok(call_id), Ok(result)) = (CString::new(call_id), CString::new(result)) else {
            return EngineStatus::InvalidArgument;
        };
        EngineStatus::from_code(unsafe {
            (self.api.ret)(
                Self::ptr(handle),
                call_id.as_ptr(),
                status.code(),
                result.as_ptr(),
            )
        })
    }

    fn eval(&self, handle: EngineHandle, js: &str) -> EngineStatus {
        Self::with_cstr(js, |js| unsafe { (self.api.eval)(Self::ptr(handle), js) })
    }

    fn init(&self, handle: EngineHandle, js: &str) -> EngineStatus {
        Self::with_cstr(js, |js| unsafe { (self.api.init)(Self::ptr(handle), js) })
    }

    fn navigate(&self, handle: EngineHandle, url: &str) -> EngineStatus {
        Self::with_cstr(url, |url| unsafe { (self.api.navigate)(Self::ptr(handle), url) })
    }

    fn version(&self) -> VersionInfo {
        // SAFETY: the library returns a pointer to static storage.
        let raw = unsafe { &*(self.api.version)() };
        VersionInfo {
            major: raw.version.major,
            minor: raw.version.minor,
            patch: raw.version.patch,
            version_number: c_array_to_string(&raw.version_number),
            pre_release: c_array_to_string(&raw.pre_release),
            build_metadata: c_array_to_string(&raw.build_metadata),
        }
    }
}
