use dotenv::dotenv;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::{AppError, AppResult};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Maps `-v` occurrences to a default filter, `RUST_LOG` wins when set.
fn env_filter(verbosity: u8) -> EnvFilter {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Console only subscriber for tests and local runs. Installing it twice is
/// a no-op.
pub fn setup_local_tracing() -> AppResult<()> {
    // 加载 .env 文件
    dotenv().ok();
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true);
    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .try_init();
    Ok(())
}

/// Console plus hourly rolling file output. Diagnostics are written to
/// stderr so that stdout stays free for the message stream.
///
/// The returned guard flushes the file writer when dropped.
pub fn setup_tracing(verbosity: u8) -> AppResult<WorkerGuard> {
    dotenv().ok();
    let file_appender = tracing_appender::rolling::hourly("logs", "kafka-input.log");
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
    let writer = non_blocking.and(std::io::stderr);

    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter(verbosity))
        .try_init()
        .map_err(|err| AppError::InvalidOperation(format!("tracing already set up: {err}")))?;

    Ok(worker_guard)
}
