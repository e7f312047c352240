#![cfg(feature = "test")]

// self
use idproxy::{_preludet::*, cache::TokenCache};

#[tokio::test]
async fn refresh_kicks_in_once_the_skew_window_is_reached() {
	let now = OffsetDateTime::now_utc();
	let cache = TokenCache::new(
		Arc::new(ScriptedFactory::new(vec![
			("jwt-soon-to-expire".into(), now + Duration::seconds(2)),
			("jwt-refreshed".into(), now + Duration::minutes(60)),
		])),
		Duration::seconds(5),
	);

	let first = cache.get_token("aud1").await.expect("first mint should succeed");

	assert_eq!(first, "jwt-soon-to-expire");

	// expires_at is already inside the refresh skew window, so the very next call refreshes.
	let second = cache.get_token("aud1").await.expect("refresh should succeed");

	assert_eq!(second, "jwt-refreshed");

	let snapshot = cache.metadata("aud1").await.expect("entry should exist");

	assert_eq!(snapshot.refresh_count, 2);
}

#[tokio::test]
async fn concurrent_first_requests_for_distinct_audiences_mint_independently() {
	let now = OffsetDateTime::now_utc();
	let scripts = HashMap::from([
		("aud-a".to_string(), vec![("jwt-aud-a".to_string(), now + Duration::minutes(60))]),
		("aud-b".to_string(), vec![("jwt-aud-b".to_string(), now + Duration::minutes(60))]),
		("aud-c".to_string(), vec![("jwt-aud-c".to_string(), now + Duration::minutes(60))]),
	]);
	let cache =
		Arc::new(TokenCache::new(Arc::new(ScriptedFactory::new_per_audience(scripts)), Duration::minutes(5)));

	let (a, b, c) = tokio::join!(
		cache.get_token("aud-a"),
		cache.get_token("aud-b"),
		cache.get_token("aud-c"),
	);

	// Distinct tokens per audience so a mix-up would surface as a failed equality, not a
	// vacuously true one.
	assert_eq!(a.expect("aud-a mint should succeed"), "jwt-aud-a");
	assert_eq!(b.expect("aud-b mint should succeed"), "jwt-aud-b");
	assert_eq!(c.expect("aud-c mint should succeed"), "jwt-aud-c");

	for audience in ["aud-a", "aud-b", "aud-c"] {
		let snapshot = cache.metadata(audience).await.expect("entry should exist");

		assert_eq!(snapshot.refresh_count, 1);
	}
}

#[tokio::test]
async fn rejection_then_concurrent_requests_mint_exactly_once() {
	let now = OffsetDateTime::now_utc();
	let cache = Arc::new(TokenCache::new(
		Arc::new(ScriptedFactory::new(vec![
			("jwt-1".into(), now + Duration::minutes(60)),
			("jwt-2".into(), now + Duration::minutes(60)),
		])),
		Duration::minutes(5),
	));

	cache.get_token("aud1").await.expect("first mint should succeed");
	cache.mark_rejected("aud1").await;

	let mut handles = Vec::new();

	for _ in 0..10 {
		let cache = cache.clone();

		handles.push(tokio::spawn(async move {
			cache.get_token("aud1").await.expect("post-rejection get_token should succeed")
		}));
	}

	for handle in handles {
		let token = handle.await.expect("task should not panic");

		assert_eq!(token, "jwt-2");
	}

	let snapshot = cache.metadata("aud1").await.expect("entry should exist");

	assert_eq!(snapshot.refresh_count, 2);
	assert_eq!(snapshot.rejected_count, 1);
}
