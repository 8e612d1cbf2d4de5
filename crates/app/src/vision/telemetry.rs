//! Telemetry helpers: tracing subscriber setup, the Prometheus recorder and
//! dispatcher-propagating thread spawns.

use std::{fs::File, io, path::Path, sync::OnceLock, thread, time::Duration};

use anyhow::{Context, Result, anyhow};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_chrome::{ChromeLayer, ChromeLayerBuilder, FlushGuard, TraceStyle};
use tracing_subscriber::{
    Registry,
    filter::{EnvFilter, filter_fn},
    fmt,
    layer::SubscriberExt,
    prelude::*,
};

use crate::vision::config::TelemetryOptions;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Keeps the Chrome trace writer alive; the trace file is flushed on drop.
pub struct TelemetryGuard {
    _chrome_guard: Option<FlushGuard>,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter; `verbose` raises the default to `debug`.
pub fn init_tracing(opts: &TelemetryOptions) -> Result<TelemetryGuard> {
    let default_level = if opts.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (chrome_layer, chrome_guard) = match opts.chrome_trace.as_deref() {
        Some(path) => {
            let (layer, guard) = build_chrome_layer(path)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(chrome_layer.map(|layer| layer.with_filter(filter_fn(|metadata| metadata.is_span()))))
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .with(tracing_error::ErrorLayer::default())
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;

    if let Some(path) = &opts.chrome_trace {
        tracing::info!("writing chrome trace to {}", path.display());
    }
    Ok(TelemetryGuard {
        _chrome_guard: chrome_guard,
    })
}

/// Install the global metrics recorder once and return its Prometheus handle.
pub fn init_metrics_recorder() -> Result<&'static PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Ok(handle);
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|err| anyhow!("metrics recorder already installed: {err}"))?;

    let upkeep_handle = handle.clone();
    spawn_thread("prometheus-upkeep", move || {
        loop {
            thread::sleep(Duration::from_secs(5));
            upkeep_handle.run_upkeep();
        }
    })?;

    Ok(PROM_HANDLE.get_or_init(|| handle))
}

/// Spawn a thread that inherits the current tracing dispatcher.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn build_chrome_layer(path: &Path) -> Result<(ChromeLayer<Registry>, FlushGuard)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create chrome trace {}", path.display()))?;
    Ok(ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(TraceStyle::Threaded)
        .build())
}
