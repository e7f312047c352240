//! CLI Entry Point (component G): argument parsing for the `idproxy` binary.

// crates.io
use clap::Parser;

/// Authenticating reverse proxy for Cloud Run-style upstreams.
#[derive(Debug, Parser)]
#[command(name = "idproxy", version, about)]
pub struct Cli {
	/// Path to the YAML configuration file.
	#[arg(long, env = "IDPROXY_CONFIG", default_value = "config.yaml")]
	pub config: String,
	/// Path to a service-account credential file; sets `GOOGLE_APPLICATION_CREDENTIALS` for
	/// this process when supplied.
	#[arg(long, env = "IDPROXY_CREDENTIALS")]
	pub credentials: Option<String>,
	/// Overrides the `logging.level` value from the configuration file.
	#[arg(long, env = "IDPROXY_LOG_LEVEL")]
	pub log_level: Option<String>,
}
