//! Admin/Health HTTP Surface (component H): liveness, readiness, metrics, and token-inspection
//! endpoints served alongside the proxy routes.

// crates.io
use axum::{Json, extract::State};
// self
use crate::{_prelude::*, cache::TokenCache};

/// Shared state backing the admin handlers.
pub struct AdminState {
	/// Token cache inspected by `/metrics` and `/token-info`.
	pub cache: Arc<TokenCache>,
	/// Number of upstreams declared in configuration.
	pub upstreams_count: usize,
}

/// `GET /healthz` — liveness check; never touches the cache.
pub async fn healthz() -> &'static str {
	"OK"
}

/// `GET /readyz` — readiness check; the process is ready as soon as it is serving.
pub async fn readyz() -> &'static str {
	"READY"
}

#[derive(Serialize)]
struct MetricsResponse {
	tokens_cached: u64,
	tokens_refreshed: u64,
	tokens_rejected: u64,
	tokens_errors: u64,
	upstreams_count: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	oldest_token_age: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	newest_token_age: Option<i64>,
}

/// `GET /metrics` — plain JSON counters, not a Prometheus exposition.
pub async fn metrics(State(state): State<Arc<AdminState>>) -> Json<serde_json::Value> {
	let stats = state.cache.stats();
	let snapshots = state.cache.all_metadata().await;
	let now = OffsetDateTime::now_utc();
	let ages: Vec<i64> =
		snapshots.values().map(|snap| (now - snap.issued_at).whole_seconds()).collect();

	let response = MetricsResponse {
		tokens_cached: stats.tokens_cached(),
		tokens_refreshed: stats.tokens_refreshed(),
		tokens_rejected: stats.tokens_rejected(),
		tokens_errors: stats.tokens_errors(),
		upstreams_count: state.upstreams_count,
		oldest_token_age: ages.iter().copied().max(),
		newest_token_age: ages.iter().copied().min(),
	};

	Json(serde_json::to_value(response).unwrap_or_default())
}

#[derive(Serialize)]
struct TokenInfoEntry {
	audience: String,
	#[serde(flatten)]
	snapshot: crate::cache::CacheSnapshot,
	expires_in: i64,
}

#[derive(Serialize)]
struct TokenInfoResponse {
	total_tokens: usize,
	upstreams_configured: usize,
	tokens: Vec<TokenInfoEntry>,
}

/// `GET /token-info` — per-audience cache snapshot, without mutating the cache.
pub async fn token_info(State(state): State<Arc<AdminState>>) -> Json<serde_json::Value> {
	let now = OffsetDateTime::now_utc();
	let snapshots = state.cache.all_metadata().await;
	let tokens = snapshots
		.into_iter()
		.map(|(audience, snapshot)| {
			let expires_in = (snapshot.expires_at - now).whole_seconds();

			TokenInfoEntry { audience, snapshot, expires_in }
		})
		.collect::<Vec<_>>();
	let response = TokenInfoResponse {
		total_tokens: tokens.len(),
		upstreams_configured: state.upstreams_count,
		tokens,
	};

	Json(serde_json::to_value(response).unwrap_or_default())
}
