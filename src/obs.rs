//! Observability (component F): structured logging setup for the proxy and mint paths.

// self
use crate::config::LoggingConfig;

/// Initializes the global `tracing` subscriber from the configured level and format.
///
/// `format = "json"` selects a JSON formatter suitable for log aggregation; any other value
/// falls back to the default compact/pretty formatter used during local development.
pub fn init_tracing(config: &LoggingConfig) {
	let filter = tracing_subscriber::EnvFilter::try_new(&config.level)
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	if config.format == "json" {
		tracing_subscriber::fmt().with_env_filter(filter).json().init();
	} else {
		tracing_subscriber::fmt().with_env_filter(filter).init();
	}
}
