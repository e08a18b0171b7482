use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use webview_bridge::bindings::{MethodTable, Reflect, WebviewInterop};
use webview_bridge::core::{CoreOptions, LifecycleState, WebviewCore, WebviewError};
use webview_bridge::platform::{EngineStatus, HeadlessEngine, NativeEngine};

struct Calculator;

impl Reflect for Calculator {
    fn methods(table: &mut MethodTable<Self>) {
        table
            .method("add", |_, (a, b): (i64, i64)| Ok::<_, anyhow::Error>(a + b))
            .method("divide", |_, (a, b): (i64, i64)| Ok::<_, anyhow::Error>(a / b))
            .method("checked_divide", |_, (a, b): (i64, i64)| {
                a.checked_div(b)
                    .ok_or_else(|| anyhow::anyhow!("division by zero"))
            });
    }
}

fn options() -> CoreOptions {
    CoreOptions {
        ignore_not_main_thread: true,
        ..CoreOptions::default()
    }
}

fn setup() -> (Arc<HeadlessEngine>, Arc<WebviewCore>, WebviewInterop) {
    let engine = Arc::new(HeadlessEngine::new());
    let core = Arc::new(
        WebviewCore::new(Arc::clone(&engine) as Arc<dyn NativeEngine>, options()).unwrap(),
    );
    let interop = WebviewInterop::new(Arc::clone(&core));
    (engine, core, interop)
}

#[test]
fn test_reflective_add() {
    let (engine, core, interop) = setup();
    interop
        .bind_method("add", Arc::new(Calculator), "add")
        .unwrap()
        .wait()
        .unwrap();

    let call = engine.call(core.handle(), "add", "[2,3]").unwrap();
    core.close().unwrap();
    core.run().unwrap();

    let response = call.try_response().unwrap();
    assert!(!response.is_error());
    assert_eq!(response.value().unwrap(), json!(5));
}

#[test]
fn test_duplicate_binding_keeps_original() {
    let (engine, core, interop) = setup();
    let calculator = Arc::new(Calculator);
    interop
        .bind_method("add", Arc::clone(&calculator), "add")
        .unwrap()
        .wait()
        .unwrap();

    let err = interop
        .bind_method("add", calculator, "checked_divide")
        .unwrap_err();
    assert!(matches!(err, WebviewError::DuplicateBinding(name) if name == "add"));

    let call = engine.call(core.handle(), "add", "[20,22]").unwrap();
    core.close().unwrap();
    core.run().unwrap();
    assert_eq!(call.try_response().unwrap().value().unwrap(), json!(42));
}

#[test]
fn test_run_from_foreign_thread_is_rejected() {
    let (_engine, core, _interop) = setup();
    let foreign = Arc::clone(&core);
    let result = thread::spawn(move || foreign.run()).join().unwrap();

    assert!(matches!(result, Err(WebviewError::WrongThread)));
    assert_eq!(core.state(), LifecycleState::Created);
}

#[test]
fn test_concurrent_terminate_reaches_engine_once() {
    let (engine, core, interop) = setup();
    interop
        .bind("noop", |_: Vec<Value>| Ok::<_, anyhow::Error>(()))
        .unwrap()
        .wait()
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let terminators: Vec<_> = (0..2)
        .map(|_| {
            let core = Arc::clone(&core);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                core.terminate().map(drop)
            })
        })
        .collect();
    for terminator in terminators {
        terminator.join().unwrap().unwrap();
    }

    core.run().unwrap();

    assert_eq!(engine.terminate_count(), 1);
    assert!(core.bound_functions().is_empty());
    assert_eq!(core.state(), LifecycleState::Terminated);
}

#[test]
fn test_queued_duplicate_bind_keeps_original() {
    let (engine, core, interop) = setup();

    let (first, second) = {
        let interop = interop.clone();
        thread::spawn(move || {
            let calculator = Arc::new(Calculator);
            // Both pass the host-side check; the engine sees the duplicate.
            let first = interop
                .bind_method("add", Arc::clone(&calculator), "add")
                .unwrap();
            let second = interop
                .bind_method("add", calculator, "checked_divide")
                .unwrap();
            (first, second)
        })
        .join()
        .unwrap()
    };

    let call = engine.call(core.handle(), "add", "[20,22]").unwrap();
    let terminator = Arc::clone(&core);
    let terminated = thread::spawn(move || terminator.terminate().unwrap())
        .join()
        .unwrap();
    core.run().unwrap();

    first.wait().unwrap();
    assert!(matches!(
        second.wait(),
        Err(WebviewError::DuplicateBinding(name)) if name == "add"
    ));
    terminated.wait().unwrap();

    let response = call.try_response().unwrap();
    assert!(!response.is_error());
    assert_eq!(response.value().unwrap(), json!(42));
}

#[test]
fn test_submissions_racing_teardown_never_reach_destroyed_instance() {
    let (engine, core, _interop) = setup();
    let handle = core.handle();

    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                let mut accepted = Vec::new();
                for _ in 0..10_000 {
                    match core.evaluate("1") {
                        Ok(completion) => accepted.push(completion),
                        Err(err) => {
                            assert!(
                                matches!(
                                    err,
                                    WebviewError::Terminated
                                        | WebviewError::Engine(EngineStatus::InvalidState)
                                ),
                                "unexpected submission error: {err}"
                            );
                            break;
                        }
                    }
                }
                accepted
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(5));
    core.terminate().unwrap().wait().unwrap();
    core.run().unwrap();

    for submitter in submitters {
        for completion in submitter.join().unwrap() {
            assert!(matches!(completion.wait(), Ok(()) | Err(WebviewError::Cancelled)));
        }
    }
    assert!(matches!(core.evaluate("1"), Err(WebviewError::Terminated)));
    assert_eq!(core.dispatcher().pending_tasks(), 0);
    assert!(engine.is_destroyed(handle));
}

#[test]
fn test_host_faults_become_error_responses() {
    let (engine, core, interop) = setup();
    let calculator = Arc::new(Calculator);
    interop
        .bind_method("divide", Arc::clone(&calculator), "divide")
        .unwrap()
        .wait()
        .unwrap();
    interop
        .bind_method("checkedDivide", calculator, "checked_divide")
        .unwrap()
        .wait()
        .unwrap();

    let panicking = engine.call(core.handle(), "divide", "[1,0]").unwrap();
    let failing = engine.call(core.handle(), "checkedDivide", "[1,0]").unwrap();
    let miscounted = engine.call(core.handle(), "divide", "[1]").unwrap();
    core.close().unwrap();
    core.run().unwrap();

    for call in [panicking, failing, miscounted] {
        let response = call.try_response().unwrap();
        assert!(response.is_error());
        let value = response.value().unwrap();
        assert!(!value["message"].as_str().unwrap().is_empty());
    }
}

#[test]
fn test_foreign_thread_operations_wait_for_loop() {
    let (engine, core, interop) = setup();
    let handle = core.handle();

    let (bound, navigated) = {
        let interop = interop.clone();
        let core = Arc::clone(&core);
        thread::spawn(move || {
            let bound = interop
                .bind_method("add", Arc::new(Calculator), "add")
                .unwrap();
            let navigated = core.navigate(Some("https://example.com")).unwrap();
            (bound, navigated)
        })
        .join()
        .unwrap()
    };

    assert_eq!(core.dispatcher().pending_tasks(), 2);
    assert!(core.bound_functions().is_empty());

    // Terminate from yet another thread, then serve the queue.
    let terminator = Arc::clone(&core);
    let terminated = thread::spawn(move || terminator.terminate().unwrap())
        .join()
        .unwrap();
    core.run().unwrap();

    bound.wait().unwrap();
    navigated.wait().unwrap();
    terminated.wait().unwrap();
    assert_eq!(core.dispatcher().pending_tasks(), 0);
    assert!(engine.is_destroyed(handle));
}

#[test]
fn test_operations_after_terminate_fail_fast() {
    let (_engine, core, interop) = setup();
    core.close().unwrap();

    assert!(matches!(
        core.evaluate("1"),
        Err(WebviewError::Terminated)
    ));
    assert!(matches!(
        interop.bind("late", |_: Vec<Value>| Ok::<_, anyhow::Error>(())),
        Err(WebviewError::Terminated)
    ));
    // Repeated termination is a no-op.
    core.close().unwrap();
}

#[test]
fn test_never_run_operations_are_cancelled() {
    let (_engine, core, interop) = setup();
    let foreign = Arc::clone(&core);
    let completion = thread::spawn(move || foreign.evaluate("1 + 1").unwrap())
        .join()
        .unwrap();

    drop(interop);
    drop(core);

    assert!(matches!(completion.wait(), Err(WebviewError::Cancelled)));
}

#[test]
fn test_unbind_from_script_thread() {
    let (engine, core, interop) = setup();
    interop
        .bind_method("add", Arc::new(Calculator), "add")
        .unwrap()
        .wait()
        .unwrap();
    interop.unbind("add").unwrap().wait().unwrap();

    let call = engine.call(core.handle(), "add", "[1,1]").unwrap();
    core.close().unwrap();
    core.run().unwrap();

    let response = call
        .wait_timeout(Duration::from_secs(1))
        .unwrap();
    assert!(response.is_error());
    assert_eq!(response.value().unwrap()["type"], "BindingNotFound");
}

#[test]
fn test_missing_engine_dependency() {
    let engine = Arc::new(HeadlessEngine::unavailable());
    let err = WebviewCore::new(engine, options()).unwrap_err();
    assert!(matches!(
        err,
        WebviewError::Engine(EngineStatus::MissingDependency)
    ));
}

#[test]
fn test_creation_inside_async_runtime_is_rejected() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let engine = Arc::new(HeadlessEngine::new());
    let result = runtime.block_on(async move { WebviewCore::new(engine, options()).map(drop) });
    assert!(matches!(result, Err(WebviewError::VirtualExecutionContext)));
}
