//! Authenticating reverse proxy that mints, caches, and refreshes audience-scoped identity
//! tokens for Cloud Run-style upstreams.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod obs;
pub mod proxy;
pub mod router;
pub mod source;

#[cfg(any(test, feature = "test"))]
use httpmock as _;

#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests.

	pub use crate::_prelude::*;

	// self
	use crate::source::{SourceHandle, TokenSourceFactory};

	/// A scripted token source that hands out a fixed, caller-supplied sequence of
	/// `(jwt, expires_at)` pairs, one per call to [`TokenSourceFactory::new_source`].
	///
	/// Exhausting a script causes subsequent calls to repeat its last entry, which keeps tests
	/// simple when only the first mint or two matter. By default every audience draws from the
	/// same shared script; use [`ScriptedFactory::new_per_audience`] when a test needs to prove
	/// that distinct audiences never observe each other's tokens.
	#[derive(Debug, Default)]
	pub struct ScriptedFactory {
		shared: Mutex<Vec<(String, OffsetDateTime)>>,
		by_audience: Mutex<HashMap<String, Vec<(String, OffsetDateTime)>>>,
	}
	impl ScriptedFactory {
		/// Builds a factory where every audience draws from the same `(jwt, expires_at)` script,
		/// in order.
		pub fn new(script: Vec<(String, OffsetDateTime)>) -> Self {
			Self { shared: Mutex::new(script), by_audience: Mutex::new(HashMap::new()) }
		}

		/// Builds a factory that yields a distinct script per audience, so callers can assert
		/// that no audience ever receives another audience's token.
		pub fn new_per_audience(scripts: HashMap<String, Vec<(String, OffsetDateTime)>>) -> Self {
			Self { shared: Mutex::new(Vec::new()), by_audience: Mutex::new(scripts) }
		}
	}
	impl TokenSourceFactory for ScriptedFactory {
		fn new_source<'a>(
			&'a self,
			audience: &'a str,
		) -> Pin<Box<dyn Future<Output = crate::error::Result<Arc<dyn SourceHandle>>> + Send + 'a>>
		{
			Box::pin(async move {
				let mut by_audience = self.by_audience.lock();

				if let Some(script) = by_audience.get_mut(audience) {
					let next = if script.len() > 1 { script.remove(0) } else { script[0].clone() };

					return Ok(Arc::new(ScriptedHandle(next)) as Arc<dyn SourceHandle>);
				}

				drop(by_audience);

				let mut script = self.shared.lock();
				let next = if script.len() > 1 { script.remove(0) } else { script[0].clone() };

				Ok(Arc::new(ScriptedHandle(next)) as Arc<dyn SourceHandle>)
			})
		}
	}

	#[derive(Debug)]
	struct ScriptedHandle((String, OffsetDateTime));
	impl SourceHandle for ScriptedHandle {
		fn fetch<'a>(
			&'a self,
		) -> Pin<Box<dyn Future<Output = crate::error::Result<(String, OffsetDateTime)>> + Send + 'a>>
		{
			let value = self.0.clone();

			Box::pin(async move { Ok(value) })
		}
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::Client as ReqwestClient;
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;

// `tokio` backs the `#[tokio::main]` binary entry point and this crate's own async tests, but
// the library target itself only reaches it from `#[cfg(test)]` code; reference it here so a
// non-test build of the library doesn't trip `unused_crate_dependencies`.
use tokio as _;
