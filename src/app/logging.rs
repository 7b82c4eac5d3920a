use tracing_subscriber::EnvFilter;

use crate::app::config::LoggingSettings;

const CRATE_TARGETS: [&str; 2] = ["autotriage", "autotriage_lib"];

/// Directive for the configured level. Only this crate follows it; other
/// targets stay at `warn` unless the level is `TRACE`.
pub fn filter_directive(log_level: &str) -> String {
    let level = match log_level.trim().to_ascii_lowercase().as_str() {
        "trace" => return "trace".to_string(),
        level @ ("debug" | "info" | "warn" | "error") => level.to_string(),
        _ => "info".to_string(),
    };
    let scoped: Vec<String> = CRATE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    format!("warn,{}", scoped.join(","))
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr; stdout
/// carries command output.
pub fn init_logging(settings: &LoggingSettings) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(&settings.log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg!(debug_assertions) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(false)
            .with_target(false)
            .try_init();
    }
}
