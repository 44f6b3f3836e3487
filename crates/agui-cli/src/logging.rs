//! Tracing subscriber setup from `[logging]` config.

use agui_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Filter directives: configured level (or the verbosity default) plus per-crate filters.
pub fn filter_directives(logging: &LoggingConfig, verbose: bool) -> String {
    let level = logging
        .level
        .clone()
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string());
    std::iter::once(level)
        .chain(logging.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize the global subscriber. `RUST_LOG` takes precedence over config.
pub fn init(logging: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(logging, verbose))?,
    };

    let writer = match logging.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        let mut logging = LoggingConfig::default();
        assert_eq!(filter_directives(&logging, false), "info");
        assert_eq!(filter_directives(&logging, true), "debug");

        logging.level = Some("warn".into());
        logging.filters = vec!["agui_gateway=debug".into(), "tower_http=trace".into()];
        assert_eq!(
            filter_directives(&logging, true),
            "warn,agui_gateway=debug,tower_http=trace"
        );
        assert!(EnvFilter::try_new(filter_directives(&logging, false)).is_ok());
    }
}
