//! Per-audience cache entry and its state machine.

// self
use crate::{_prelude::*, source::SourceHandle};

/// Lifecycle state of a cache entry, per the state-transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
	/// No token has ever been minted for this audience.
	New,
	/// A token was minted and has not yet approached expiry.
	Cached,
	/// A token was minted to replace an expiring, expired, rejected, or errored one.
	Refreshed,
	/// The cached token is still valid but within the refresh skew of its expiry.
	Expiring,
	/// The cached token's expiry has passed.
	Expired,
	/// The upstream rejected the most recently issued token.
	Rejected,
	/// The last mint attempt failed.
	Error,
}

/// Point-in-time, read-only view of a cache entry's observable fields.
#[derive(Clone, Debug, Serialize)]
pub struct CacheSnapshot {
	/// Current lifecycle state.
	pub state: TokenState,
	/// Instant this entry was first created.
	#[serde(with = "time::serde::rfc3339")]
	pub issued_at: OffsetDateTime,
	/// Expiry of the currently cached token; meaningless while `state == New`.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Instant of the most recent `get_token` call.
	#[serde(with = "time::serde::rfc3339")]
	pub last_used: OffsetDateTime,
	/// Number of successful mints (including the first) recorded for this audience.
	pub refresh_count: u64,
	/// Number of times the upstream rejected a token for this audience.
	pub rejected_count: u64,
	/// Number of failed mint attempts for this audience.
	pub error_count: u64,
	/// Message from the most recent mint failure, if any.
	pub last_error: Option<String>,
}

/// Mutable state guarded by the per-entry [`async_lock::Mutex`]; never touched except while
/// that lock is held.
pub(crate) struct CacheEntry {
	pub(crate) state: TokenState,
	pub(crate) jwt: String,
	pub(crate) issued_at: OffsetDateTime,
	pub(crate) expires_at: OffsetDateTime,
	pub(crate) last_used: OffsetDateTime,
	pub(crate) refresh_count: u64,
	pub(crate) rejected_count: u64,
	pub(crate) error_count: u64,
	pub(crate) last_error: Option<String>,
	pub(crate) source_handle: Option<Arc<dyn SourceHandle>>,
}
impl CacheEntry {
	pub(crate) fn new(now: OffsetDateTime) -> Self {
		Self {
			state: TokenState::New,
			jwt: String::new(),
			issued_at: now,
			expires_at: now,
			last_used: now,
			refresh_count: 0,
			rejected_count: 0,
			error_count: 0,
			last_error: None,
			source_handle: None,
		}
	}

	/// Whether a mint must happen before this entry's `jwt` can be handed to a caller.
	pub(crate) fn should_refresh(&mut self, now: OffsetDateTime, refresh_skew: Duration) -> bool {
		if self.state == TokenState::New || self.source_handle.is_none() {
			return true;
		}
		if now >= self.expires_at {
			self.state = TokenState::Expired;

			return true;
		}
		if now + refresh_skew >= self.expires_at {
			self.state = TokenState::Expiring;

			return true;
		}

		false
	}

	/// Records a successful mint and advances the state machine.
	pub(crate) fn record_mint(
		&mut self,
		handle: Arc<dyn SourceHandle>,
		jwt: String,
		issued_at: OffsetDateTime,
		expires_at: OffsetDateTime,
	) {
		self.state =
			if self.state == TokenState::New { TokenState::Cached } else { TokenState::Refreshed };
		self.jwt = jwt;
		self.issued_at = issued_at;
		self.expires_at = expires_at;
		self.source_handle = Some(handle);
		self.refresh_count += 1;
		self.last_error = None;
	}

	/// Records a failed mint attempt.
	pub(crate) fn record_error(&mut self, message: String) {
		self.state = TokenState::Error;
		self.error_count += 1;
		self.last_error = Some(message);
	}

	/// Records an upstream rejection, forcing the source handle to be re-instantiated.
	pub(crate) fn record_rejection(&mut self) {
		self.state = TokenState::Rejected;
		self.rejected_count += 1;
		self.source_handle = None;
	}

	pub(crate) fn snapshot(&self) -> CacheSnapshot {
		CacheSnapshot {
			state: self.state,
			issued_at: self.issued_at,
			expires_at: self.expires_at,
			last_used: self.last_used,
			refresh_count: self.refresh_count,
			rejected_count: self.rejected_count,
			error_count: self.error_count,
			last_error: self.last_error.clone(),
		}
	}
}
