//! Unified logging setup: `tracing` + `EnvFilter`, a compact local-time
//! formatter, and a daily-rolling file layer under `<data-dir>/logs/` for
//! the long-lived daemon.

use std::path::Path;
use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let mut filter_str = config.default.clone();
    for (module, level) in &config.modules {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    EnvFilter::new(filter_str)
}

/// Initialize stderr logging only. Used by short-lived CLI subcommands
/// where a log directory would be unnecessary ceremony.
pub fn init(config: &LoggingConfig) {
    INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(build_filter(config));
        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Initialize stderr + rolling file logging under `<data-dir>/logs/`, for
/// the long-lived daemon.
///
/// Returns the file appender's guard; it must be held for the process
/// lifetime or buffered writes are lost on drop.
pub fn init_with_file(config: &LoggingConfig, log_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let mut guard = None;
    INIT.call_once(|| {
        let _ = std::fs::create_dir_all(log_dir);
        let file_appender = tracing_appender::rolling::daily(log_dir, "codewatch.log");
        let (non_blocking, g) = tracing_appender::non_blocking(file_appender);
        guard = Some(g);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_timer(CompactTime)
            .with_filter(build_filter(config));
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_filter(build_filter(config));

        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .init();
    });
    guard
}

/// Structured single-line operational event, e.g.
/// `log_event!("watcher", "monitoring", "{n} files")`.
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!(component = $component, event = $event);
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, event = $event, detail = format_args!($($arg)*).to_string());
    };
}
