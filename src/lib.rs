// library system

pub mod catalog;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod gate;
pub mod identity;
pub mod ledger;
pub mod notify;
pub mod routes;
pub mod sql;
pub mod types;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::gate::TokenCodec;
use crate::notify::Notifier;
use crate::sql::Db;

/// Everything a request needs, cloned into each handler.
#[derive(Clone)]
pub struct AppState {
	pub db: Db,
	pub tokens: Arc<TokenCodec>,
	pub notifier: Arc<dyn Notifier>,
	pub bcrypt_cost: u32,
}

impl AppState {
	pub fn new(db: Db, config: &Config, notifier: Arc<dyn Notifier>) -> anyhow::Result<Self> {
		let ttl = chrono::Duration::hours(config.token_ttl_hours);
		let tokens = TokenCodec::new(config.token_secret.as_bytes(), ttl)
			.map_err(|_| anyhow::anyhow!("TOKEN_SECRET cannot key the token signer"))?;
		Ok(AppState{
			db,
			tokens: Arc::new(tokens),
			notifier,
			bcrypt_cost: config.bcrypt_cost,
		})
	}
}

pub fn app(state: AppState) -> Router {
	Router::new()
		.route("/healthz", get(|| async { "ok" }))
		.merge(routes::router())
		.layer(CookieManagerLayer::new())
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
		.with_state(state)
}
