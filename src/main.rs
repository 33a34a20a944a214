use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lsys_api::{app, config::Config, notify::LogNotifier, sql, AppState};

#[tokio::main]
async fn main() -> Result<()> {
	dotenvy::dotenv().ok();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("info,lsys_api=debug")),
		)
		.init();

	let config = Config::from_env()?;

	// set up connection pool
	let db = sql::open(&config.database_url).await?;
	tracing::info!(url = %config.database_url, "store opened");

	let state = AppState::new(db.clone(), &config, Arc::new(LogNotifier))?;

	let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
	let listener = tokio::net::TcpListener::bind(addr).await?;
	tracing::info!("listening on http://{}", addr);

	axum::serve(listener, app(state))
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	db.close().await;
	tracing::info!("store closed");
	Ok(())
}

async fn shutdown_signal() {
	use tokio::signal;
	let ctrl_c = async {
		signal::ctrl_c().await.ok();
	};
	#[cfg(unix)]
	let term = async {
		if let Ok(mut s) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
			s.recv().await;
		}
	};
	#[cfg(not(unix))]
	let term = std::future::pending::<()>();
	tokio::select! { _ = ctrl_c => {}, _ = term => {} }
}
