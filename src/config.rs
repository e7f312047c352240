//! Configuration Loader (component E): reads, parses, and validates the YAML configuration
//! file into immutable settings shared by the router, cache, and HTTP listener.

// std
use std::{fs, time::Duration as StdDuration};
// self
use crate::{_prelude::*, error::ConfigError, router::UpstreamDescriptor};

/// Listener and path-gating settings.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
	/// Address the listener binds to.
	#[serde(default = "default_address")]
	pub address: String,
	/// Port the listener binds to.
	#[serde(default = "default_port")]
	pub port: u32,
	/// Per-request read timeout, in seconds; a request still pending after this long is
	/// answered with `408 Request Timeout`.
	#[serde(default = "default_read_timeout")]
	pub read_timeout: u64,
	/// Path allow-list; empty permits every path.
	#[serde(default)]
	pub allowed_paths: Vec<String>,
}

fn default_address() -> String {
	"0.0.0.0".to_string()
}
fn default_port() -> u32 {
	8080
}
fn default_read_timeout() -> u64 {
	30
}

/// Raw, as-configured upstream entry (pre-validation).
#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamEntry {
	/// Unique identifier used for routing.
	pub name: String,
	/// Absolute base URL of the upstream.
	pub url: String,
	/// Audience string used when minting tokens for this upstream.
	pub audience: String,
	/// Override for the outbound `Host` header.
	#[serde(default)]
	pub host: Option<String>,
	/// Per-request timeout, in seconds.
	#[serde(default = "default_upstream_timeout")]
	pub timeout: u64,
}

fn default_upstream_timeout() -> u64 {
	30
}

/// Logging configuration consumed by the observability component.
#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
	/// `tracing`-compatible level filter, e.g. `"info"` or `"debug"`.
	#[serde(default = "default_log_level")]
	pub level: String,
	/// Either `"json"` or `"pretty"`.
	#[serde(default = "default_log_format")]
	pub format: String,
}

fn default_log_level() -> String {
	"info".to_string()
}
fn default_log_format() -> String {
	"pretty".to_string()
}

/// Token-cache tuning knobs.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenConfig {
	/// Minutes before expiry at which a cached token is preemptively refreshed.
	#[serde(default = "default_refresh_before_expiry")]
	pub refresh_before_expiry: i64,
	/// Reserved for future use; caching is always enabled in this design.
	#[serde(default = "default_true")]
	pub enable_cache: bool,
}

fn default_refresh_before_expiry() -> i64 {
	5
}
fn default_true() -> bool {
	true
}

#[derive(Deserialize)]
struct RawConfig {
	#[serde(default)]
	server: Option<ServerConfigRaw>,
	#[serde(default)]
	upstreams: Vec<UpstreamEntry>,
	#[serde(default)]
	logging: Option<LoggingConfig>,
	#[serde(default)]
	token: Option<TokenConfig>,
}

#[derive(Deserialize, Default)]
struct ServerConfigRaw {
	#[serde(default = "default_address")]
	address: String,
	#[serde(default = "default_port")]
	port: u32,
	#[serde(default = "default_read_timeout")]
	read_timeout: u64,
	#[serde(default)]
	allowed_paths: Vec<String>,
}

/// Immutable, validated application configuration shared across the router, cache, and
/// listener.
#[derive(Clone, Debug)]
pub struct AppConfig {
	/// Listener and path-gating settings.
	pub server: ServerConfig,
	/// Configured upstream descriptors, in declaration order.
	pub upstreams: Vec<UpstreamDescriptor>,
	/// Logging configuration.
	pub logging: LoggingConfig,
	/// Token-cache tuning knobs.
	pub token: TokenConfig,
}
impl AppConfig {
	/// Loads and validates configuration from a YAML file at `path`.
	pub fn load(path: &str) -> Result<Self, ConfigError> {
		let raw = fs::read_to_string(path)
			.map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
		let raw: RawConfig = serde_yaml::from_str(&raw)
			.map_err(|source| ConfigError::Parse { path: path.to_string(), source })?;

		Self::from_raw(raw)
	}

	fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
		if raw.upstreams.is_empty() {
			return Err(ConfigError::NoUpstreams);
		}

		let mut seen = std::collections::HashSet::new();
		let mut upstreams = Vec::with_capacity(raw.upstreams.len());

		for entry in raw.upstreams {
			if entry.name.trim().is_empty() {
				return Err(ConfigError::InvalidUpstream {
					name: "<unnamed>".to_string(),
					reason: "name must not be empty".to_string(),
				});
			}
			if entry.audience.trim().is_empty() {
				return Err(ConfigError::InvalidUpstream {
					name: entry.name,
					reason: "audience must not be empty".to_string(),
				});
			}
			if !seen.insert(entry.name.clone()) {
				return Err(ConfigError::DuplicateUpstream { name: entry.name });
			}

			let url = Url::parse(&entry.url).map_err(|err| ConfigError::InvalidUpstream {
				name: entry.name.clone(),
				reason: format!("invalid url: {err}"),
			})?;

			upstreams.push(UpstreamDescriptor {
				name: entry.name,
				url,
				audience: entry.audience,
				host: entry.host,
				timeout_secs: entry.timeout,
			});
		}

		let server_raw = raw.server.unwrap_or_default();

		if server_raw.port == 0 || server_raw.port > 65535 {
			return Err(ConfigError::InvalidPort { port: server_raw.port });
		}

		let token = raw.token.unwrap_or(TokenConfig {
			refresh_before_expiry: default_refresh_before_expiry(),
			enable_cache: true,
		});

		if token.refresh_before_expiry < 0 {
			return Err(ConfigError::NegativeRefreshSkew);
		}

		Ok(Self {
			server: ServerConfig {
				address: server_raw.address,
				port: server_raw.port,
				read_timeout: server_raw.read_timeout,
				allowed_paths: server_raw.allowed_paths,
			},
			upstreams,
			logging: raw.logging.unwrap_or(LoggingConfig {
				level: default_log_level(),
				format: default_log_format(),
			}),
			token,
		})
	}

	/// The refresh skew as a [`time::Duration`].
	pub fn refresh_skew(&self) -> Duration {
		Duration::minutes(self.token.refresh_before_expiry)
	}

	/// The server's read timeout as a [`std::time::Duration`].
	pub fn read_timeout(&self) -> StdDuration {
		StdDuration::from_secs(self.server.read_timeout)
	}
}
