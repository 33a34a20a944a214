use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
	pub database_url: String,
	pub port: u16,
	pub token_secret: String,
	pub token_ttl_hours: i64,
	pub bcrypt_cost: u32,
}

impl Config {
	pub fn from_env() -> Result<Self> {
		let database_url = env::var("DATABASE_URL")
			.unwrap_or_else(|_| "sqlite://lsys.db".into());
		let token_secret = env::var("TOKEN_SECRET")
			.context("TOKEN_SECRET not set in env")?;
		if token_secret.len() < 16 {
			anyhow::bail!("TOKEN_SECRET must be at least 16 bytes");
		}

		let port = parse_or("PORT", 4000)?;
		// no refresh path exists, keep tokens short lived
		let token_ttl_hours = parse_or::<i64>("TOKEN_TTL_HOURS", 1)?.clamp(1, 5);
		let bcrypt_cost = parse_or("BCRYPT_COST", bcrypt::DEFAULT_COST)?;

		Ok(Config{
			database_url,
			port,
			token_secret,
			token_ttl_hours,
			bcrypt_cost,
		})
	}
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
	T: std::str::FromStr,
	T::Err: std::error::Error + Send + Sync + 'static,
{
	match env::var(key) {
		Ok(raw) => raw.trim().parse()
			.with_context(|| format!("{key} is malformed: {raw:?}")),
		Err(_) => Ok(default),
	}
}
