//! Cache-wide atomic counters backing the `/metrics` endpoint.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters aggregated across every audience in a [`TokenCache`](super::TokenCache).
#[derive(Debug, Default)]
pub struct CacheStats {
	pub(crate) tokens_cached: AtomicU64,
	pub(crate) tokens_refreshed: AtomicU64,
	pub(crate) tokens_rejected: AtomicU64,
	pub(crate) tokens_errors: AtomicU64,
}
impl CacheStats {
	/// Number of audiences that have completed their first mint.
	pub fn tokens_cached(&self) -> u64 {
		self.tokens_cached.load(Ordering::Relaxed)
	}

	/// Number of successful mints that replaced an already-cached token.
	pub fn tokens_refreshed(&self) -> u64 {
		self.tokens_refreshed.load(Ordering::Relaxed)
	}

	/// Number of upstream rejections observed across all audiences.
	pub fn tokens_rejected(&self) -> u64 {
		self.tokens_rejected.load(Ordering::Relaxed)
	}

	/// Number of failed mint attempts across all audiences.
	pub fn tokens_errors(&self) -> u64 {
		self.tokens_errors.load(Ordering::Relaxed)
	}
}
