//! Proxy Pipeline (component D): routes, authenticates, and forwards inbound requests to the
//! selected upstream, feeding rejection signals back into the token cache.

// std
use std::{net::SocketAddr, time::Duration as StdDuration};
// crates.io
use axum::{
	Router as AxumRouter,
	body::Body,
	error_handling::HandleErrorLayer,
	extract::{ConnectInfo, State},
	http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
	response::{IntoResponse, Response},
	routing::get,
};
use tower_http::{
	cors::CorsLayer, sensitive_headers::SetSensitiveHeadersLayer, timeout::TimeoutLayer,
	trace::TraceLayer,
};
// self
use crate::{
	_prelude::*,
	cache::TokenCache,
	error::TransportError,
	http::{self as admin_http, AdminState},
	router::{self, Router, TARGET_UPSTREAM_HEADER},
};

/// Hop-by-hop headers stripped from both the inbound and outbound legs per RFC 7230.
const HOP_BY_HOP: &[&str] = &[
	"connection",
	"proxy-connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
];

/// Shared state backing the proxy handler.
pub struct ProxyState {
	/// Upstream router.
	pub router: Arc<Router>,
	/// Token cache used to mint/refresh bearer tokens.
	pub cache: Arc<TokenCache>,
	/// Shared HTTP client used for every outbound upstream call.
	pub http: ReqwestClient,
}

/// Handles one inbound request: route, authenticate, forward, and observe the response.
#[tracing::instrument(
	name = "idproxy.request",
	skip_all,
	fields(method = %request.method(), path = %request.uri().path(), upstream = tracing::field::Empty),
)]
pub async fn handle(
	State(state): State<Arc<ProxyState>>,
	ConnectInfo(remote): ConnectInfo<SocketAddr>,
	request: Request<Body>,
) -> Response {
	let path = request.uri().path().to_string();
	let target_hint =
		request.headers().get(TARGET_UPSTREAM_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
	let Some(descriptor) = state.router.route(&path, target_hint.as_deref()) else {
		return Error::Routing.into_response();
	};

	tracing::Span::current().record("upstream", descriptor.name.as_str());

	let jwt = match state.cache.get_token(&descriptor.audience).await {
		Ok(jwt) => jwt,
		Err(err) => {
			tracing::error!(audience = %descriptor.audience, error = %err, "failed to obtain identity token");

			return err.into_response();
		},
	};

	let method = request.method().clone();
	let inbound_headers = request.headers().clone();
	let query = request.uri().query().map(str::to_string);
	let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
		Ok(body) => body,
		Err(err) => {
			tracing::error!(error = %err, "failed to read request body");

			return StatusCode::BAD_GATEWAY.into_response();
		},
	};

	let outbound_url = match build_outbound_url(&descriptor.url, &path, query.as_deref()) {
		Ok(url) => url,
		Err(reason) => {
			tracing::error!(reason, "failed to build outbound url");

			return StatusCode::INTERNAL_SERVER_ERROR.into_response();
		},
	};
	let outbound_headers =
		rewrite_headers(&inbound_headers, &jwt, descriptor.host.as_deref(), &descriptor.url, &remote);
	let mut outbound = state.http.request(method, outbound_url).headers(outbound_headers).body(body);

	if descriptor.timeout_secs > 0 {
		outbound = outbound.timeout(std::time::Duration::from_secs(descriptor.timeout_secs));
	}

	let response = match outbound.send().await {
		Ok(response) => response,
		Err(err) => {
			tracing::warn!(upstream = %descriptor.name, error = %err, "upstream transport error");

			return Error::Transport(TransportError::from(err)).into_response();
		},
	};

	let status = response.status();

	if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
		state.cache.mark_rejected(&descriptor.audience).await;
	}

	build_client_response(response)
}

fn build_outbound_url(base: &Url, inbound_path: &str, query: Option<&str>) -> Result<Url, String> {
	let mut url = base.clone();
	let joined = router::join_path(base.path(), inbound_path);

	url.set_path(&joined);
	url.set_query(query);

	Ok(url)
}

fn rewrite_headers(
	inbound: &HeaderMap,
	jwt: &str,
	host_override: Option<&str>,
	target: &Url,
	remote: &SocketAddr,
) -> HeaderMap {
	let mut headers = inbound.clone();

	for name in HOP_BY_HOP {
		headers.remove(*name);
	}

	if let Ok(value) = HeaderValue::from_str(&format!("Bearer {jwt}")) {
		headers.insert(axum::http::header::AUTHORIZATION, value);
	}

	let host = host_override.map(str::to_string).or_else(|| target.host_str().map(str::to_string));

	if let Some(host) = host
		&& let Ok(value) = HeaderValue::from_str(&host)
	{
		headers.insert(axum::http::header::HOST, value);
	}

	if !headers.contains_key("x-forwarded-for")
		&& let Ok(value) = HeaderValue::from_str(&remote.ip().to_string())
	{
		headers.insert(HeaderName::from_static("x-forwarded-for"), value);
	}

	headers.insert(HeaderName::from_static("x-forwarded-proto"), HeaderValue::from_static("https"));

	headers
}

/// Builds the client-facing response from an upstream response, streaming the body through
/// unchanged rather than buffering it — required for long-lived bodies such as Server-Sent
/// Events that never reach a final byte within the request lifetime.
fn build_client_response(upstream: reqwest::Response) -> Response {
	let status = upstream.status();
	let headers = upstream.headers().clone();
	let mut response = Response::builder().status(status);

	if let Some(map) = response.headers_mut() {
		for (name, value) in headers.iter() {
			if HOP_BY_HOP.contains(&name.as_str()) {
				continue;
			}

			map.insert(name.clone(), value.clone());
		}
	}

	response
		.body(Body::from_stream(upstream.bytes_stream()))
		.unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

/// Assembles the full axum application: admin routes, the catch-all proxy route, and the
/// shared CORS / sensitive-header / tracing / per-request timeout middleware stack.
///
/// `read_timeout` bounds how long a single proxied request may run before the client receives
/// `408 Request Timeout`; it does not apply to the admin routes.
pub fn app(
	proxy_state: Arc<ProxyState>,
	admin_state: Arc<AdminState>,
	read_timeout: StdDuration,
) -> AxumRouter {
	let admin_routes = AxumRouter::new()
		.route("/healthz", get(admin_http::healthz))
		.route("/readyz", get(admin_http::readyz))
		.route("/metrics", get(admin_http::metrics))
		.route("/token-info", get(admin_http::token_info))
		.with_state(admin_state);
	let proxy_routes = AxumRouter::new()
		.fallback(handle)
		.with_state(proxy_state)
		.layer(TraceLayer::new_for_http())
		.layer(TimeoutLayer::new(read_timeout))
		.layer(HandleErrorLayer::new(handle_timeout_error));

	admin_routes.merge(proxy_routes).layer(CorsLayer::permissive()).layer(
		SetSensitiveHeadersLayer::new([axum::http::header::AUTHORIZATION]),
	)
}

/// Converts a timed-out proxy request into `408 Request Timeout`. The only fallible layer
/// wrapped by this handler is [`TimeoutLayer`], so any error reaching it is an elapsed deadline.
async fn handle_timeout_error(_err: Box<dyn std::error::Error + Send + Sync>) -> impl IntoResponse {
	StatusCode::REQUEST_TIMEOUT
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn build_outbound_url_joins_path_and_preserves_query() {
		let base = Url::parse("https://svc.run.app/base").expect("fixture url should parse");
		let url = build_outbound_url(&base, "/x", Some("a=1")).expect("url should build");

		assert_eq!(url.as_str(), "https://svc.run.app/base/x?a=1");
	}

	#[test]
	fn rewrite_headers_strips_hop_by_hop_and_sets_authorization() {
		let mut inbound = HeaderMap::new();

		inbound.insert("connection", HeaderValue::from_static("keep-alive"));
		inbound.insert("x-custom", HeaderValue::from_static("keep-me"));

		let target = Url::parse("https://svc.run.app").expect("fixture url should parse");
		let remote: SocketAddr = "127.0.0.1:1234".parse().expect("fixture addr should parse");
		let headers = rewrite_headers(&inbound, "T1", None, &target, &remote);

		assert!(!headers.contains_key("connection"));
		assert_eq!(headers.get("x-custom").unwrap(), "keep-me");
		assert_eq!(headers.get(axum::http::header::AUTHORIZATION).unwrap(), "Bearer T1");
		assert_eq!(headers.get("x-forwarded-for").unwrap(), "127.0.0.1");
		assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
	}

	#[test]
	fn rewrite_headers_preserves_existing_forwarded_for() {
		let mut inbound = HeaderMap::new();

		inbound.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

		let target = Url::parse("https://svc.run.app").expect("fixture url should parse");
		let remote: SocketAddr = "127.0.0.1:1234".parse().expect("fixture addr should parse");
		let headers = rewrite_headers(&inbound, "T1", None, &target, &remote);

		assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1");
	}

	#[test]
	fn rewrite_headers_honors_host_override() {
		let inbound = HeaderMap::new();
		let target = Url::parse("https://svc.run.app").expect("fixture url should parse");
		let remote: SocketAddr = "127.0.0.1:1234".parse().expect("fixture addr should parse");
		let headers = rewrite_headers(&inbound, "T1", Some("override.internal"), &target, &remote);

		assert_eq!(headers.get(axum::http::header::HOST).unwrap(), "override.internal");
	}
}
