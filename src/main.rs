use std::sync::Arc;

use webview_bridge::bindings::{MethodTable, Reflect, WebviewInterop};
use webview_bridge::config::WebviewConfig;
use webview_bridge::core::{initialize_logging, WebviewCore};

const PAGE: &str = "data:text/html,<!doctype html>\
<html><body><pre id='out'></pre><script>\
const log = (m) => document.getElementById('out').textContent += m + '\\n';\
window.onload = async () => {\
  log('add(2, 3) = ' + await window.add(2, 3));\
  log('scale(1.5) = ' + await window.scale(1.5));\
  try { await window.divide(1, 0); } catch (e) { log('divide: ' + e.message); }\
  log('engine = ' + await window.engineVersion());\
};\
</script></body></html>";

struct Calculator {
    factor: f64,
}

impl Reflect for Calculator {
    fn methods(table: &mut MethodTable<Self>) {
        table
            .method("add", |_, (a, b): (i64, i64)| Ok::<_, anyhow::Error>(a + b))
            .method("scale", |calc: &Calculator, (x,): (f64,)| {
                Ok::<_, anyhow::Error>(x * calc.factor)
            })
            .method("divide", |_, (a, b): (i64, i64)| {
                a.checked_div(b)
                    .ok_or_else(|| anyhow::anyhow!("division by zero"))
            });
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Webview failed to start: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = WebviewConfig::load_or_default();
    config.validate()?;
    initialize_logging(&config.logging);

    let core = Arc::new(WebviewCore::from_config(&config)?);
    let interop = WebviewInterop::from_config(Arc::clone(&core), &config.interop);

    let calculator = Arc::new(Calculator { factor: 2.0 });
    for method in ["add", "scale", "divide"] {
        interop
            .bind_method(method, Arc::clone(&calculator), method)?
            .wait()?;
    }

    let version = core.version().to_string();
    interop
        .bind_raw("engineVersion", move |_: &str| {
            serde_json::to_string(&version).map(Some)
        })?
        .wait()?;

    core.navigate(Some(PAGE))?.wait()?;
    core.run()?;

    tracing::info!(target: "webview::core", "Webview closed");
    Ok(())
}
