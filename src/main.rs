//! Binary entry point: wires configuration, the token cache, the router, and the proxy
//! pipeline into a running axum server.

// std
use std::{process::ExitCode, sync::Arc};
// crates.io
use clap::Parser;

use idproxy::{
	cache::TokenCache,
	cli::Cli,
	config::AppConfig,
	http::AdminState,
	obs,
	proxy::{self, ProxyState},
	router::{Router, UpstreamDescriptor},
	source::{CREDENTIAL_ENV_VAR, GoogleServiceAccountFactory},
};

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();

	if let Some(path) = &cli.credentials {
		// SAFETY: single-threaded startup, before any other task reads the environment.
		unsafe { std::env::set_var(CREDENTIAL_ENV_VAR, path) };
	}

	let mut config = match AppConfig::load(&cli.config) {
		Ok(config) => config,
		Err(err) => {
			eprintln!("configuration error: {err}");

			return ExitCode::FAILURE;
		},
	};

	if let Some(level) = &cli.log_level {
		config.logging.level = level.clone();
	}

	obs::init_tracing(&config.logging);

	if std::env::var(CREDENTIAL_ENV_VAR).is_err() {
		tracing::error!("{CREDENTIAL_ENV_VAR} must be set to the path of a service-account credential file");

		return ExitCode::FAILURE;
	}

	let http_client = match reqwest::Client::builder().build() {
		Ok(client) => client,
		Err(err) => {
			tracing::error!(error = %err, "failed to build http client");

			return ExitCode::FAILURE;
		},
	};

	let factory = match GoogleServiceAccountFactory::from_env(http_client.clone()) {
		Ok(factory) => factory,
		Err(err) => {
			tracing::error!(error = %err, "failed to load service-account credential");

			return ExitCode::FAILURE;
		},
	};

	let cache = Arc::new(TokenCache::new(Arc::new(factory), config.refresh_skew()));
	let upstreams: Vec<UpstreamDescriptor> = config.upstreams.clone();
	let upstreams_count = upstreams.len();
	let router = Arc::new(Router::new(upstreams, config.server.allowed_paths.clone()));

	let admin_state = Arc::new(AdminState { cache: cache.clone(), upstreams_count });
	let proxy_state = Arc::new(ProxyState { router, cache, http: http_client });
	let app = proxy::app(proxy_state, admin_state, config.read_timeout());

	let address = format!("{}:{}", config.server.address, config.server.port);
	let listener = match tokio::net::TcpListener::bind(&address).await {
		Ok(listener) => listener,
		Err(err) => {
			tracing::error!(address = %address, error = %err, "failed to bind listener");

			return ExitCode::FAILURE;
		},
	};

	tracing::info!(address = %address, upstreams = upstreams_count, "idproxy listening");

	if let Err(err) = axum::serve(
		listener,
		app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
	)
	.with_graceful_shutdown(shutdown_signal())
	.await
	{
		tracing::error!(error = %err, "server error");

		return ExitCode::FAILURE;
	}

	ExitCode::SUCCESS
}

async fn shutdown_signal() {
	let ctrl_c = async {
		tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}

	tracing::info!("shutdown signal received");
}
