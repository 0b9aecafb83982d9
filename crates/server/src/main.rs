#![warn(clippy::pedantic)]

use std::time::Duration;

use runekeys_server::{
	AppState, app,
	config::Config,
	error::{Error, Result},
	i18n,
	key::KeyService,
	mailer::Mailer,
	store::{MemoryStore, StoreType},
	userid::UserIdService,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let config = Config::load()?;

	let store = StoreType::from(MemoryStore::new());
	let mailer = Mailer::from_config(&config.email)?;
	let user_ids = UserIdService::new(store.clone());
	let keys = KeyService::new(store, user_ids, mailer);

	let purge_days = config.public_key.purge_time_in_days;
	if purge_days > 0 {
		let keys = keys.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60 * 12));
			loop {
				ticker.tick().await;
				keys.purge_unverified(purge_days);
			}
		});
	}

	let state = AppState {
		keys,
		locales: i18n::enabled_locales(&config.i18n.locales),
	};
	let app = app(state, config.server.csp);

	let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
		.await
		.map_err(|err| Error::Other(err.into()))?;
	tracing::info!(host = %config.server.host, port = config.server.port, "listening");

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.map_err(|err| Error::Other(err.into()))?;
	Ok(())
}

async fn shutdown_signal() {
	if let Err(err) = tokio::signal::ctrl_c().await {
		tracing::error!(%err, "failed to install the shutdown handler");
	}
}
