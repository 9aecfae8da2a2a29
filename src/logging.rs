use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_DIRECTIVE: &str = "road_camera_proxy=info";

/// Human-readable stdout layer, generic over whatever subscriber stack it lands on.
fn console_layer<S>() -> impl tracing_subscriber::Layer<S> + Send + Sync + 'static
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer().with_writer(std::io::stdout).with_target(false)
}

/// Initializes logging with a console layer and a daily-rotated JSON file under `logs/`.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the life of the process.
pub fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // Without a writable logs dir we still want console output.
    if let Err(e) = fs::create_dir_all("logs") {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer())
            .init();
        tracing::warn!("file logging disabled, cannot create logs/: {}", e);
        return None;
    }

    let file_appender = tracing_appender::rolling::daily("logs", "road-camera-proxy.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer())
        .init();

    Some(guard)
}
