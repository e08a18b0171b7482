//! Webview 核心实例
//!
//! 定义 `WebviewCore`：原生引擎句柄、线程亲和调度器、绑定注册表和生命周期状态机。

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::dispatcher::{Completion, Lifecycle, LifecycleState, WebviewDispatcher};
use super::environment::{check_environment, warn_if_not_main_thread};
use super::error::{WebviewError, WebviewResult};
use super::registry::BindingRegistry;
use crate::config::WebviewConfig;
use crate::platform::{
    EngineHandle, EngineStatus, LibraryEngine, NativeBinding, NativeEngine, ParentWindow,
    VersionInfo,
};

/// 创建选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreOptions {
    /// 启用开发者工具
    pub debug: bool,
    /// 嵌入的父窗口；为空时引擎创建自己的窗口
    pub parent: Option<ParentWindow>,
    /// 不在主线程创建时不再警告
    pub ignore_not_main_thread: bool,
}

impl From<&WebviewConfig> for CoreOptions {
    fn from(config: &WebviewConfig) -> Self {
        Self {
            debug: config.debug,
            parent: None,
            ignore_not_main_thread: config.threading.ignore_not_main_thread,
        }
    }
}

/// Webview 核心实例
///
/// `WebviewCore` 负责：
/// - 在创建线程上创建原生引擎实例
/// - 把所有宿主操作通过调度器送到引擎线程
/// - 持有所有暴露给脚本的回调，直到原生侧不再引用它们
///
/// # 生命周期
///
/// 1. **Created**：可以绑定函数、导航、注入脚本（跨线程操作排队等待运行）
/// 2. **Running**：`run` 阻塞在原生事件循环中
/// 3. **Terminated**：事件循环结束，原生实例已销毁
///
/// # 示例
///
/// ```no_run
/// use std::sync::Arc;
/// use webview_bridge::core::{CoreOptions, WebviewCore};
/// use webview_bridge::platform::LibraryEngine;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = Arc::new(LibraryEngine::load_default()?);
///     let core = WebviewCore::new(engine, CoreOptions::default())?;
///     core.navigate(Some("https://example.com"))?.wait()?;
///     core.run()?;
///     Ok(())
/// }
/// ```
pub struct WebviewCore {
    engine: Arc<dyn NativeEngine>,
    handle: EngineHandle,
    registry: Arc<BindingRegistry>,
    // Cleared by termination but still visible to the engine until destroy.
    retired: Arc<Mutex<Vec<Arc<NativeBinding>>>>,
    lifecycle: Arc<Lifecycle>,
    dispatcher: WebviewDispatcher,
    destroyed: AtomicBool,
}

impl WebviewCore {
    /// 在当前线程上创建原生实例；当前线程成为引擎线程
    pub fn new(engine: Arc<dyn NativeEngine>, options: CoreOptions) -> WebviewResult<Self> {
        check_environment()?;
        warn_if_not_main_thread(options.ignore_not_main_thread);

        let handle = engine
            .create(options.debug, options.parent)
            .map_err(WebviewError::Engine)?;

        let lifecycle = Arc::new(Lifecycle::new());
        let dispatcher =
            WebviewDispatcher::new(Arc::clone(&engine), handle, Arc::clone(&lifecycle));

        tracing::info!(
            target: "webview::core",
            ?handle,
            debug = options.debug,
            version = %engine.version(),
            "Webview created"
        );

        Ok(Self {
            engine,
            handle,
            registry: Arc::new(BindingRegistry::new()),
            retired: Arc::new(Mutex::new(Vec::new())),
            lifecycle,
            dispatcher,
            destroyed: AtomicBool::new(false),
        })
    }

    /// 按配置加载原生库并创建实例
    pub fn from_config(config: &WebviewConfig) -> WebviewResult<Self> {
        let engine = match &config.library.path {
            Some(path) => LibraryEngine::load(path)?,
            None => LibraryEngine::load_default()?,
        };
        Self::new(Arc::new(engine), CoreOptions::from(config))
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &WebviewDispatcher {
        &self.dispatcher
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn version(&self) -> VersionInfo {
        self.engine.version()
    }

    /// 替换引擎线程上未捕获错误的处理器
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&WebviewError) + Send + Sync + 'static,
    {
        self.dispatcher.set_error_handler(handler);
    }

    // ========================================================================
    // 绑定
    // ========================================================================

    /// 把原生回调以 `name` 暴露给脚本
    pub fn bind(&self, name: &str, binding: Arc<NativeBinding>) -> WebviewResult<Completion<()>> {
        if self.registry.contains(name) {
            return Err(WebviewError::DuplicateBinding(name.to_string()));
        }

        let engine = Arc::clone(&self.engine);
        let registry = Arc::clone(&self.registry);
        let handle = self.handle;
        let name = name.to_string();

        self.dispatcher.submit(move || {
            match engine.bind(handle, &name, &binding) {
                EngineStatus::Ok => {}
                EngineStatus::Duplicate => return Err(WebviewError::DuplicateBinding(name)),
                status => return Err(WebviewError::Engine(status)),
            }
            if let Err(err) = registry.insert(name.clone(), binding) {
                engine.unbind(handle, &name);
                return Err(err);
            }
            tracing::debug!(target: "webview::core", binding = %name, "Bound function");
            Ok(())
        })
    }

    /// 移除绑定。原生侧先解绑，然后才释放回调
    pub fn unbind(&self, name: &str) -> WebviewResult<Completion<()>> {
        let engine = Arc::clone(&self.engine);
        let registry = Arc::clone(&self.registry);
        let handle = self.handle;
        let name = name.to_string();

        self.dispatcher.submit(move || {
            match engine.unbind(handle, &name) {
                EngineStatus::Ok => {}
                EngineStatus::NotFound => return Err(WebviewError::BindingNotFound(name)),
                status => return Err(WebviewError::Engine(status)),
            }
            registry.remove(&name)?;
            tracing::debug!(target: "webview::core", binding = %name, "Unbound function");
            Ok(())
        })
    }

    /// 当前绑定名称的快照
    pub fn bound_functions(&self) -> Vec<String> {
        self.registry.names()
    }

    // ========================================================================
    // 页面操作
    // ========================================================================

    pub fn evaluate(&self, js: &str) -> WebviewResult<Completion<()>> {
        let js = js.to_string();
        self.native_call(move |engine, handle| engine.eval(handle, &js))
    }

    /// 导航；`None` 导航到空白页
    pub fn navigate(&self, url: Option<&str>) -> WebviewResult<Completion<()>> {
        let url = url.unwrap_or("about:blank").to_string();
        self.native_call(move |engine, handle| engine.navigate(handle, &url))
    }

    /// 注册每次页面加载前执行的脚本
    pub fn init_script(&self, js: &str) -> WebviewResult<Completion<()>> {
        let js = js.to_string();
        self.native_call(move |engine, handle| engine.init(handle, &js))
    }

    fn native_call<F>(&self, call: F) -> WebviewResult<Completion<()>>
    where
        F: FnOnce(&dyn NativeEngine, EngineHandle) -> EngineStatus + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let handle = self.handle;
        self.dispatcher
            .submit(move || call(&*engine, handle).into_result())
    }

    // ========================================================================
    // 生命周期
    // ========================================================================

    /// 运行原生事件循环，直到终止
    ///
    /// 只能在创建线程上调用一次。返回时原生实例已销毁。
    pub fn run(&self) -> WebviewResult<()> {
        if !self.dispatcher.is_engine_thread() {
            return Err(WebviewError::WrongThread);
        }
        self.lifecycle.begin_run()?;

        tracing::info!(target: "webview::core", handle = ?self.handle, "Entering event loop");
        let run_status = self.engine.run(self.handle);
        self.lifecycle.finish();
        tracing::info!(target: "webview::core", status = %run_status, "Event loop finished");

        let destroy_status = self.teardown();
        run_status.into_result()?;
        destroy_status.into_result()
    }

    /// 请求终止事件循环
    ///
    /// 幂等：只有第一次调用会到达原生侧，之后的调用返回已完成的结果。
    /// 如果引擎拒绝了调度，请求会被撤回，之后的调用可以重试。
    pub fn terminate(&self) -> WebviewResult<Completion<()>> {
        if !self.lifecycle.request_termination() {
            return Ok(Completion::ready(Ok(())));
        }

        let engine = Arc::clone(&self.engine);
        let registry = Arc::clone(&self.registry);
        let retired = Arc::clone(&self.retired);
        let handle = self.handle;

        let submitted = self.dispatcher.submit_unchecked(move || {
            let status = engine.terminate(handle);
            retired.lock().extend(registry.clear());
            tracing::debug!(target: "webview::core", %status, "Termination requested");
            status.into_result()
        });
        if submitted.is_err() {
            self.lifecycle.withdraw_termination();
        }
        submitted
    }

    /// 终止并等待
    pub fn close(&self) -> WebviewResult<()> {
        self.terminate()?.wait()
    }

    fn teardown(&self) -> EngineStatus {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return EngineStatus::Ok;
        }

        self.dispatcher.shutdown();
        let status = self.engine.destroy(self.handle);
        let released = self.registry.clear().len() + mem::take(&mut *self.retired.lock()).len();
        let leaked = self.dispatcher.release_pending();

        tracing::debug!(
            target: "webview::core",
            %status,
            released,
            leaked,
            "Native instance destroyed"
        );
        status
    }
}

impl Drop for WebviewCore {
    fn drop(&mut self) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if self.state() == LifecycleState::Created {
            tracing::debug!(target: "webview::core", "Webview dropped without running");
        }
        self.lifecycle.finish();

        if !self.dispatcher.is_engine_thread() {
            // The native instance may only be touched from its own thread.
            tracing::error!(
                target: "webview::core",
                handle = ?self.handle,
                "Webview dropped off its engine thread; leaking the native instance"
            );
            self.dispatcher.shutdown();
            self.dispatcher.release_pending();
            return;
        }
        self.teardown();
    }
}

impl std::fmt::Debug for WebviewCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebviewCore")
            .field("handle", &self.handle)
            .field("state", &self.state())
            .field("bindings", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{HeadlessEngine, JournalEntry};
    use std::thread;

    fn core() -> (Arc<HeadlessEngine>, WebviewCore) {
        let engine = Arc::new(HeadlessEngine::new());
        let core = WebviewCore::new(
            Arc::clone(&engine) as Arc<dyn NativeEngine>,
            CoreOptions {
                ignore_not_main_thread: true,
                ..CoreOptions::default()
            },
        )
        .unwrap();
        (engine, core)
    }

    fn noop(name: &str) -> Arc<NativeBinding> {
        Arc::new(NativeBinding::new(name, |_, _| {}))
    }

    #[test]
    fn test_bind_on_engine_thread_completes_inline() {
        let (engine, core) = core();
        core.bind("ping", noop("ping")).unwrap().wait().unwrap();
        assert_eq!(core.bound_functions(), vec!["ping"]);
        assert_eq!(engine.exposed_names(core.handle()), vec!["ping"]);
    }

    #[test]
    fn test_duplicate_bind_is_synchronous() {
        let (_engine, core) = core();
        core.bind("ping", noop("ping")).unwrap().wait().unwrap();
        let err = core.bind("ping", noop("ping")).unwrap_err();
        assert!(matches!(err, WebviewError::DuplicateBinding(_)));
    }

    #[test]
    fn test_unbind_unknown_name() {
        let (_engine, core) = core();
        let err = core.unbind("ghost").unwrap().wait().unwrap_err();
        assert!(matches!(err, WebviewError::BindingNotFound(name) if name == "ghost"));
    }

    #[test]
    fn test_unbind_removes_binding() {
        let (engine, core) = core();
        core.bind("ping", noop("ping")).unwrap().wait().unwrap();
        core.unbind("ping").unwrap().wait().unwrap();
        assert!(core.bound_functions().is_empty());
        assert!(engine.exposed_names(core.handle()).is_empty());
    }

    #[test]
    fn test_page_operations_reach_engine() {
        let (engine, core) = core();
        core.navigate(None).unwrap().wait().unwrap();
        core.init_script("window.ready = true").unwrap().wait().unwrap();
        core.evaluate("1 + 1").unwrap().wait().unwrap();
        assert_eq!(
            engine.journal(core.handle()),
            vec![
                JournalEntry::Navigate("about:blank".to_string()),
                JournalEntry::Init("window.ready = true".to_string()),
                JournalEntry::Eval("1 + 1".to_string()),
            ]
        );
    }

    #[test]
    fn test_run_after_terminate_destroys_instance() {
        let (engine, core) = core();
        core.bind("ping", noop("ping")).unwrap().wait().unwrap();
        core.terminate().unwrap().wait().unwrap();
        core.run().unwrap();

        assert_eq!(core.state(), LifecycleState::Terminated);
        assert!(engine.is_destroyed(core.handle()));
        assert!(core.bound_functions().is_empty());
        assert!(matches!(
            core.evaluate("1").unwrap_err(),
            WebviewError::Terminated
        ));
    }

    #[test]
    fn test_second_run_is_rejected() {
        let (_engine, core) = core();
        core.close().unwrap();
        core.run().unwrap();
        assert!(matches!(
            core.run(),
            Err(WebviewError::Engine(EngineStatus::InvalidState))
        ));
    }

    #[test]
    fn test_drop_without_run_destroys_instance() {
        let (engine, core) = core();
        let handle = core.handle();
        drop(core);
        assert!(engine.is_destroyed(handle));
    }

    #[test]
    fn test_drop_off_engine_thread_skips_destroy() {
        let engine = Arc::new(HeadlessEngine::new());
        let native = Arc::clone(&engine) as Arc<dyn NativeEngine>;
        let core = thread::spawn(move || {
            WebviewCore::new(
                native,
                CoreOptions {
                    ignore_not_main_thread: true,
                    ..CoreOptions::default()
                },
            )
            .unwrap()
        })
        .join()
        .unwrap();
        let handle = core.handle();

        drop(core);

        assert!(!engine.is_destroyed(handle));
        assert_eq!(engine.instance_count(), 1);
    }

    #[test]
    fn test_refused_termination_can_be_retried() {
        let (engine, core) = core();
        let core = Arc::new(core);
        // The engine is already stopping, so it refuses the scheduled request.
        engine.terminate(core.handle());

        for _ in 0..2 {
            let foreign = Arc::clone(&core);
            let result = thread::spawn(move || foreign.terminate().map(drop))
                .join()
                .unwrap();
            assert!(matches!(
                result,
                Err(WebviewError::Engine(EngineStatus::InvalidState))
            ));
        }
        assert_eq!(core.state(), LifecycleState::Created);
        assert_eq!(core.dispatcher().pending_tasks(), 0);
    }

    #[test]
    fn test_teardown_shuts_dispatcher_down() {
        let (_engine, core) = core();
        core.close().unwrap();
        core.run().unwrap();
        assert!(core.dispatcher().is_shut_down());
    }

    #[test]
    fn test_creation_failure_is_engine_fault() {
        let engine = Arc::new(HeadlessEngine::unavailable());
        let err = WebviewCore::new(engine, CoreOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            WebviewError::Engine(EngineStatus::MissingDependency)
        ));
    }
}
