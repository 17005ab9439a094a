use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Dependencies that are noisy at the engine's level. A directive for the
/// same target in `RUST_LOG` wins.
const QUIET_TARGETS: [(&str, &str); 4] = [
    ("sqlx::query", "warn"),
    ("tokio_cron_scheduler", "warn"),
    ("reqwest", "warn"),
    ("hyper_util", "warn"),
];

pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn file_logging_enabled() -> bool {
    std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// `LOG_ROTATION`: `hourly`, `never`, anything else rotates daily.
fn rotation_from_env() -> Rotation {
    match std::env::var("LOG_ROTATION").as_deref().map(str::trim) {
        Ok("hourly") => Rotation::HOURLY,
        Ok("never") => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Filter directives for `log_level` with the quiet targets appended
/// unless the caller already mentions them.
pub fn filter_directives(log_level: &str) -> String {
    let level = log_level.trim();
    let level = if level.is_empty() { "info" } else { level };
    let mut directives = vec![level.to_string()];
    for (target, quiet) in QUIET_TARGETS {
        if !level.contains(target) {
            directives.push(format!("{target}={quiet}"));
        }
    }
    directives.join(",")
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file lines are lost.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(filter_directives(log_level))
        .unwrap_or_else(|_| EnvFilter::new(filter_directives("info")));
    let stdout_layer = fmt::layer().with_target(true);

    if file_logging_enabled() {
        let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
        match std::fs::create_dir_all(&log_dir) {
            Err(err) => eprintln!("failed to create log directory {log_dir}: {err}"),
            Ok(()) => {
                let file_appender = RollingFileAppender::new(rotation_from_env(), &log_dir, "relevia.log");
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                let file_layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(true);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer)
                    .init();

                return Some(FileLogGuard { _guard: guard });
            }
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_targets_are_appended() {
        let directives = filter_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("sqlx::query=warn"));
        assert!(directives.contains("tokio_cron_scheduler=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_explicit_directive_wins() {
        let directives = filter_directives("info,sqlx::query=debug");
        assert!(!directives.contains("sqlx::query=warn"));
        assert!(directives.contains("reqwest=warn"));
    }

    #[test]
    fn test_blank_level_defaults_to_info() {
        assert!(filter_directives("  ").starts_with("info,"));
    }
}
