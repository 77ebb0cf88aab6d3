use std::env::var;
use std::io;
use std::path::Path;

use tracing::{level_filters::LevelFilter, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{Layer, Registry, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::registry().with(vec![stderr_layer(LevelFilter::INFO)]).init();
}

/// Log to stderr and append the same events, without colours, to `path`.
///
/// File writes happen on a background thread. Keep the returned guard alive
/// for the lifetime of the process; dropping it flushes pending lines.
pub fn init_tracing_with_file(path: &Path) -> io::Result<WorkerGuard> {
    let (writer, guard) = file_writer(path)?;
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(env_filter(LevelFilter::INFO))
        .boxed();

    tracing_subscriber::registry()
        .with(vec![stderr_layer(LevelFilter::INFO), file_layer])
        .init();
    Ok(guard)
}

/// Non-rotating appender on `path`; missing directories are created.
fn file_writer(path: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid log file {}", path.display())))?;
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(io::Error::other)?;
    Ok(tracing_appender::non_blocking(appender))
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder().with_default_directive(level.into()).from_env_lossy()
}

/// Stderr layer, JSON when `RUST_LOG_FORMAT=json`.
fn stderr_layer(level: LevelFilter) -> BoxedLayer {
    let log_format = var("RUST_LOG_FORMAT")
        .inspect_err(|error| {
            warn!("Failed to read RUST_LOG_FORMAT, falling back to default: {error}")
        })
        .unwrap_or_default();

    match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_filter(env_filter(level))
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_writer(io::stderr)
            .with_filter(env_filter(level))
            .boxed(),
    }
}
