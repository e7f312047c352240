#![cfg(feature = "test")]

// crates.io
use httpmock::prelude::*;
// self
use idproxy::{
	_preludet::*,
	cache::TokenCache,
	http::AdminState,
	proxy::{self, ProxyState},
	router::{Router, UpstreamDescriptor},
};

async fn spawn_app(
	upstreams: Vec<UpstreamDescriptor>,
	allowed_paths: Vec<String>,
	script: Vec<(String, OffsetDateTime)>,
) -> (String, Arc<TokenCache>) {
	let cache = Arc::new(TokenCache::new(Arc::new(ScriptedFactory::new(script)), Duration::minutes(5)));
	let upstreams_count = upstreams.len();
	let router = Arc::new(Router::new(upstreams, allowed_paths));
	let admin_state = Arc::new(AdminState { cache: cache.clone(), upstreams_count });
	let proxy_state = Arc::new(ProxyState { router, cache: cache.clone(), http: reqwest::Client::new() });
	let app = proxy::app(proxy_state, admin_state, std::time::Duration::from_secs(30));
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
		.await
		.expect("test listener should bind");
	let addr = listener.local_addr().expect("listener should have a local address");

	tokio::spawn(async move {
		axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
			.await
			.expect("test server should not error");
	});

	(format!("http://{addr}"), cache)
}

fn upstream(name: &str, url: &str) -> UpstreamDescriptor {
	UpstreamDescriptor {
		name: name.to_string(),
		url: Url::parse(url).expect("mock upstream url should parse"),
		audience: format!("aud-{name}"),
		host: None,
		timeout_secs: 30,
	}
}

#[tokio::test]
async fn forwards_request_with_minted_bearer_token() {
	let upstream_server = MockServer::start_async().await;
	let mock = upstream_server
		.mock_async(|when, then| {
			when.method(GET).path("/hello").header("authorization", "Bearer jwt-1");
			then.status(200).body("hi");
		})
		.await;
	let now = OffsetDateTime::now_utc();
	let (base, _cache) = spawn_app(
		vec![upstream("svc", &upstream_server.base_url())],
		vec![],
		vec![("jwt-1".into(), now + Duration::minutes(60))],
	)
	.await;

	let response = reqwest::get(format!("{base}/hello")).await.expect("proxied request should succeed");

	assert_eq!(response.status(), reqwest::StatusCode::OK);
	assert_eq!(response.text().await.expect("body should read"), "hi");

	mock.assert_async().await;
}

#[tokio::test]
async fn disallowed_path_never_reaches_upstream() {
	let upstream_server = MockServer::start_async().await;
	let mock = upstream_server
		.mock_async(|when, then| {
			when.path("/forbidden");
			then.status(200).body("should not be hit");
		})
		.await;
	let now = OffsetDateTime::now_utc();
	let (base, _cache) = spawn_app(
		vec![upstream("svc", &upstream_server.base_url())],
		vec!["/allowed".into()],
		vec![("jwt-1".into(), now + Duration::minutes(60))],
	)
	.await;

	let response =
		reqwest::get(format!("{base}/forbidden")).await.expect("request should get a response");

	assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

	mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn upstream_rejection_marks_token_rejected_and_forces_remint() {
	let upstream_server = MockServer::start_async().await;
	let rejecting = upstream_server
		.mock_async(|when, then| {
			when.method(GET).path("/secure").header("authorization", "Bearer jwt-1");
			then.status(401).body("nope");
		})
		.await;
	let accepting = upstream_server
		.mock_async(|when, then| {
			when.method(GET).path("/secure").header("authorization", "Bearer jwt-2");
			then.status(200).body("ok");
		})
		.await;
	let now = OffsetDateTime::now_utc();
	let (base, cache) = spawn_app(
		vec![upstream("svc", &upstream_server.base_url())],
		vec![],
		vec![("jwt-1".into(), now + Duration::minutes(60)), ("jwt-2".into(), now + Duration::minutes(60))],
	)
	.await;

	let first =
		reqwest::get(format!("{base}/secure")).await.expect("first proxied request should succeed");

	assert_eq!(first.status(), reqwest::StatusCode::UNAUTHORIZED);

	rejecting.assert_async().await;

	let snapshot = cache.metadata("aud-svc").await.expect("entry should exist after first call");

	assert_eq!(snapshot.rejected_count, 1);

	let second =
		reqwest::get(format!("{base}/secure")).await.expect("second proxied request should succeed");

	assert_eq!(second.status(), reqwest::StatusCode::OK);

	accepting.assert_async().await;
}

#[tokio::test]
async fn target_upstream_header_selects_named_backend() {
	let primary = MockServer::start_async().await;
	let secondary = MockServer::start_async().await;
	let primary_mock = primary
		.mock_async(|when, then| {
			when.path("/ping");
			then.status(200).body("primary");
		})
		.await;
	let secondary_mock = secondary
		.mock_async(|when, then| {
			when.path("/ping");
			then.status(200).body("secondary");
		})
		.await;
	let now = OffsetDateTime::now_utc();
	let (base, _cache) = spawn_app(
		vec![upstream("primary", &primary.base_url()), upstream("secondary", &secondary.base_url())],
		vec![],
		vec![("jwt-1".into(), now + Duration::minutes(60))],
	)
	.await;

	let client = reqwest::Client::new();
	let response = client
		.get(format!("{base}/ping"))
		.header("x-target-upstream", "secondary")
		.send()
		.await
		.expect("targeted request should succeed");

	assert_eq!(response.text().await.expect("body should read"), "secondary");

	secondary_mock.assert_async().await;
	primary_mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn healthz_and_metrics_are_served_alongside_the_proxy() {
	let upstream_server = MockServer::start_async().await;
	let now = OffsetDateTime::now_utc();
	let (base, _cache) = spawn_app(
		vec![upstream("svc", &upstream_server.base_url())],
		vec![],
		vec![("jwt-1".into(), now + Duration::minutes(60))],
	)
	.await;

	let health = reqwest::get(format!("{base}/healthz")).await.expect("healthz should respond");

	assert_eq!(health.status(), reqwest::StatusCode::OK);

	let metrics = reqwest::get(format!("{base}/metrics")).await.expect("metrics should respond");

	assert_eq!(metrics.status(), reqwest::StatusCode::OK);

	let body: serde_json::Value =
		metrics.json().await.expect("metrics body should be valid json");

	assert_eq!(body["upstreams_count"], 1);
}
