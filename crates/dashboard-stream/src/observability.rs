use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "dashboard.logs.jsonl";

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_filter(level: Option<String>) -> tracing_subscriber::EnvFilter {
    if let Some(filter) = level.and_then(|l| tracing_subscriber::EnvFilter::try_new(l).ok()) {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

/// Installs the global `tracing` subscriber once per process.
///
/// Environment variables:
/// - `DASHBOARD_OBSERVABILITY`: set to `0`/`false`/`off` to disable logging.
/// - `DASHBOARD_LOG_LEVEL`: filter override (`info`, `dashboard_stream=debug`, ...).
/// - `DASHBOARD_JSON_LOG_PATH`: write JSONL to this file instead of stderr.
/// - `RUST_LOG`: used when `DASHBOARD_LOG_LEVEL` is unset. Defaults to `warn`.
///
/// Console output goes to stderr so it does not interleave with streamed
/// replies printed on stdout.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let enabled = std::env::var("DASHBOARD_OBSERVABILITY")
            .ok()
            .and_then(|v| parse_flag(&v))
            .unwrap_or(true);
        if !enabled {
            return;
        }

        let filter = env_filter(std::env::var("DASHBOARD_LOG_LEVEL").ok());
        match std::env::var("DASHBOARD_JSON_LOG_PATH") {
            Ok(raw) if !raw.trim().is_empty() => {
                let path = std::path::PathBuf::from(raw.trim());
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| std::path::Path::new("."));
                let _ = std::fs::create_dir_all(dir);
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(DEFAULT_LOG_FILE);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
            _ => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_common_spellings() {
        assert_eq!(parse_flag(" OFF "), Some(false));
        assert_eq!(parse_flag("yes"), Some(true));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn explicit_level_wins() {
        let filter = env_filter(Some("dashboard_stream=debug".into()));
        assert!(filter.to_string().contains("dashboard_stream=debug"));
    }
}
