//! Token Cache & State Machine (component B): a per-audience cache that mints, refreshes, and
//! invalidates identity tokens under concurrent request load.

mod entry;
mod stats;

pub use entry::{CacheSnapshot, TokenState};
pub use stats::CacheStats;

// std
use std::sync::atomic::Ordering;
// self
use crate::{_prelude::*, cache::entry::CacheEntry, source::TokenSourceFactory};

/// Cache of audience-scoped identity tokens.
///
/// A single reader/writer lock (the *cache lock*) guards only the shape of the underlying
/// map — insertion of a new audience, or lookup of an existing one. Each entry additionally
/// carries its own exclusive, async-aware lock (the *entry lock*) that serializes every
/// read-modify-write operation on that entry: freshness checks, mints, and rejection
/// bookkeeping. Two different audiences never block each other; the same audience is always
/// totally ordered by its entry lock, which is what guarantees at most one in-flight mint per
/// audience regardless of how many callers race to request it.
pub struct TokenCache {
	entries: RwLock<HashMap<String, Arc<AsyncMutex<CacheEntry>>>>,
	factory: Arc<dyn TokenSourceFactory>,
	refresh_skew: Duration,
	stats: CacheStats,
}
impl TokenCache {
	/// Builds a cache that mints through `factory`, refreshing tokens `refresh_skew` before
	/// they expire.
	pub fn new(factory: Arc<dyn TokenSourceFactory>, refresh_skew: Duration) -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
			factory,
			refresh_skew,
			stats: CacheStats::default(),
		}
	}

	/// Returns a currently valid bearer token for `audience`, minting or refreshing as needed.
	pub async fn get_token(&self, audience: &str) -> Result<String> {
		let entry = self.entry_for(audience);
		let mut guard = entry.lock().await;
		let now = OffsetDateTime::now_utc();

		if guard.should_refresh(now, self.refresh_skew) {
			self.mint(audience, &mut guard, now).await?;
		}

		guard.last_used = OffsetDateTime::now_utc();

		Ok(guard.jwt.clone())
	}

	/// Marks the most recently issued token for `audience` as rejected by the upstream,
	/// forcing the next [`get_token`](Self::get_token) call to mint a fresh one.
	///
	/// No-op if `audience` has no entry yet (nothing was ever issued).
	pub async fn mark_rejected(&self, audience: &str) {
		let Some(entry) = self.entries.read().get(audience).cloned() else {
			return;
		};
		let mut guard = entry.lock().await;

		guard.record_rejection();
		self.stats.tokens_rejected.fetch_add(1, Ordering::Relaxed);
	}

	/// Returns a point-in-time snapshot of `audience`'s cache entry, if one exists.
	pub async fn metadata(&self, audience: &str) -> Option<CacheSnapshot> {
		let entry = self.entries.read().get(audience).cloned()?;
		let guard = entry.lock().await;

		Some(guard.snapshot())
	}

	/// Returns snapshots for every audience observed so far.
	pub async fn all_metadata(&self) -> HashMap<String, CacheSnapshot> {
		let handles: Vec<(String, Arc<AsyncMutex<CacheEntry>>)> =
			self.entries.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
		let mut out = HashMap::with_capacity(handles.len());

		for (audience, handle) in handles {
			let guard = handle.lock().await;

			out.insert(audience, guard.snapshot());
		}

		out
	}

	/// Returns the cache-wide counters backing the `/metrics` endpoint.
	pub fn stats(&self) -> &CacheStats {
		&self.stats
	}

	fn entry_for(&self, audience: &str) -> Arc<AsyncMutex<CacheEntry>> {
		if let Some(entry) = self.entries.read().get(audience) {
			return entry.clone();
		}

		self.entries
			.write()
			.entry(audience.to_string())
			.or_insert_with(|| Arc::new(AsyncMutex::new(CacheEntry::new(OffsetDateTime::now_utc()))))
			.clone()
	}

	#[tracing::instrument(
		name = "idproxy.mint",
		skip(self, guard, now),
		fields(audience, stage = "source"),
	)]
	async fn mint(
		&self,
		audience: &str,
		guard: &mut CacheEntry,
		now: OffsetDateTime,
	) -> Result<()> {
		let handle = match self.factory.new_source(audience).await {
			Ok(handle) => handle,
			Err(err) => {
				guard.record_error(err.to_string());
				self.stats.tokens_errors.fetch_add(1, Ordering::Relaxed);

				return Err(err);
			},
		};

		tracing::Span::current().record("stage", "fetch");

		match handle.fetch().await {
			Ok((jwt, expires_at)) => {
				let was_new = guard.state == TokenState::New;

				guard.record_mint(handle, jwt, now, expires_at);

				if was_new {
					self.stats.tokens_cached.fetch_add(1, Ordering::Relaxed);
				} else {
					self.stats.tokens_refreshed.fetch_add(1, Ordering::Relaxed);
				}

				Ok(())
			},
			Err(err) => {
				guard.record_error(err.to_string());
				self.stats.tokens_errors.fetch_add(1, Ordering::Relaxed);

				Err(err)
			},
		}
	}
}
