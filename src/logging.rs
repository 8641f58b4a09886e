use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

static SILENT: AtomicBool = AtomicBool::new(false);

#[derive(Clone, Copy)]
enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Install the JSON subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}

/// Mute every event emitted through this module (benchmarks).
pub fn set_silent(silent: bool) {
    SILENT.store(silent, Ordering::Relaxed);
}

fn emit(level: Level, event: &str, message: &str, metadata: Option<Value>) {
    if SILENT.load(Ordering::Relaxed) {
        return;
    }

    let metadata = metadata.map(|value| value.to_string());
    let metadata = metadata.as_deref();
    match level {
        Level::Debug => tracing::debug!(event, metadata, "{message}"),
        Level::Info => tracing::info!(event, metadata, "{message}"),
        Level::Warn => tracing::warn!(event, metadata, "{message}"),
        Level::Error => tracing::error!(event, metadata, "{message}"),
    }
}

pub fn debug(event: &str, message: &str, metadata: Value) {
    emit(Level::Debug, event, message, Some(metadata));
}

pub fn info(event: &str, message: &str, metadata: Value) {
    emit(Level::Info, event, message, Some(metadata));
}

pub fn warn(event: &str, message: &str, metadata: Value) {
    emit(Level::Warn, event, message, Some(metadata));
}

pub fn error(event: &str, message: &str, metadata: Value) {
    emit(Level::Error, event, message, Some(metadata));
}

pub fn info_simple(event: &str, message: &str) {
    emit(Level::Info, event, message, None);
}

pub fn warn_simple(event: &str, message: &str) {
    emit(Level::Warn, event, message, None);
}
