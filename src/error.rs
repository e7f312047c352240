//! Error types shared across configuration, minting, caching, and the proxy pipeline.

// crates.io
use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
};
// self
use crate::_prelude::*;

/// Crate-wide result alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Configuration failed to load or validate; fatal at startup.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// A token source could not be instantiated for an audience.
	#[error("Failed to instantiate a token source: {reason}.")]
	Credential {
		/// Underlying reason reported by the credential loader.
		reason: String,
	},
	/// A mint attempt against the identity provider failed.
	#[error("Failed to mint an identity token: {reason}.")]
	Mint {
		/// Underlying reason reported by the provider.
		reason: String,
	},
	/// The outbound request to the upstream could not be completed.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// No upstream matched the inbound request.
	#[error("No upstream matched the request.")]
	Routing,
}
impl IntoResponse for Error {
	/// Maps an `Error` to the HTTP response the proxy sends to the client. `Config` is never
	/// expected to reach a request handler — it is surfaced at startup, before the listener
	/// binds — but is mapped defensively rather than left to panic.
	fn into_response(self) -> Response {
		match &self {
			Error::Config(_) => {
				tracing::error!(error = %self, "configuration error reached a request handler");
				(StatusCode::INTERNAL_SERVER_ERROR, "internal configuration error").into_response()
			},
			Error::Credential { .. } | Error::Mint { .. } => {
				tracing::error!(error = %self, "failed to obtain identity token");
				(StatusCode::INTERNAL_SERVER_ERROR, "failed to obtain an identity token").into_response()
			},
			Error::Transport(_) => {
				tracing::warn!(error = %self, "upstream transport error");
				(StatusCode::BAD_GATEWAY, "upstream transport error").into_response()
			},
			Error::Routing => StatusCode::NOT_FOUND.into_response(),
		}
	}
}

/// Configuration and validation failures raised at startup.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// The configuration file could not be read from disk.
	#[error("Failed to read configuration file at `{path}`.")]
	Read {
		/// Path that was read.
		path: String,
		/// Underlying I/O failure.
		#[source]
		source: std::io::Error,
	},
	/// The configuration file contents could not be parsed as YAML.
	#[error("Failed to parse configuration file at `{path}`.")]
	Parse {
		/// Path that was parsed.
		path: String,
		/// Underlying YAML parsing failure.
		#[source]
		source: serde_yaml::Error,
	},
	/// `upstreams` was empty; at least one upstream is required.
	#[error("Configuration must declare at least one upstream.")]
	NoUpstreams,
	/// An upstream is missing a required field or has an invalid value.
	#[error("Upstream `{name}` is invalid: {reason}.")]
	InvalidUpstream {
		/// Upstream name, or `<unnamed>` when the name itself is missing.
		name: String,
		/// Human-readable validation failure.
		reason: String,
	},
	/// Two upstreams declared the same name.
	#[error("Duplicate upstream name `{name}`.")]
	DuplicateUpstream {
		/// The repeated name.
		name: String,
	},
	/// `server.port` fell outside the valid `1..=65535` range.
	#[error("Server port {port} is out of range.")]
	InvalidPort {
		/// The offending port value.
		port: u32,
	},
	/// `token.refresh_before_expiry` was negative.
	#[error("token.refresh_before_expiry must not be negative.")]
	NegativeRefreshSkew,
	/// The credential environment variable was not set.
	#[error("{var} must be set to the path of a service-account credential file.")]
	MissingCredentialEnv {
		/// Name of the expected environment variable.
		var: &'static str,
	},
}

/// Transport-level failures while contacting an upstream (network, timeout).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// The upstream's configured URL could not be parsed or joined with the request path.
	#[error("Upstream URL is invalid: {reason}.")]
	InvalidUrl {
		/// Reason the URL failed to parse or join.
		reason: String,
	},
	/// The underlying HTTP client reported a network failure (DNS, TCP, TLS, timeout).
	#[error("Network error while calling the upstream.")]
	Network {
		/// Underlying transport failure.
		#[source]
		source: BoxError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<reqwest::Error> for TransportError {
	fn from(e: reqwest::Error) -> Self {
		Self::network(e)
	}
}
