use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Store handle. Opened once on startup, closed on shutdown, passed
/// explicitly to every component.
#[derive(Clone, Debug)]
pub struct Db(Pool<Sqlite>);

pub async fn open(url: &str) -> Result<Db, sqlx::Error> {
	let memory = url.contains(":memory:");
	let opts = SqliteConnectOptions::from_str(url)?
		.create_if_missing(true);

	// every connection to :memory: is its own database, keep exactly one
	let pool_opts = if memory {
		SqlitePoolOptions::new()
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
	} else {
		SqlitePoolOptions::new()
			.max_connections(5)
	};
	let pool = pool_opts
		.acquire_timeout(Duration::from_secs(3))
		.connect_with(opts).await?;

	let db = Db(pool);
	db.schema(TABLE_SCHEMA).await?;
	Ok(db)
}

impl Db {
	pub fn pool(&self) -> &Pool<Sqlite> {
		&self.0
	}

	pub async fn schema(&self, schema: &str) -> Result<(), sqlx::Error> {
		let statements = schema.split(';')
			.map(str::trim)
			.filter(|stmt| !stmt.is_empty());
		for stmt in statements {
			sqlx::query(stmt).execute(&self.0).await?;
		}
		Ok(())
	}

	pub async fn close(self) {
		self.0.close().await
	}
}

/// Appended after every `LIKE ?` built from [`contains_pattern`].
pub const ESCAPE: &str = " ESCAPE '\\'";

/// `%needle%` for `LIKE ... ESCAPE '\'`. sqlite LIKE folds case for ASCII
/// only, so `über` does not match `Über`.
pub fn contains_pattern(needle: &str) -> String {
	let mut pat = String::with_capacity(needle.len()+2);
	pat.push('%');
	for chr in needle.chars() {
		if matches!(chr, '%' | '_' | '\\') {
			pat.push('\\');
		}
		pat.push(chr);
	}
	pat.push('%');
	pat
}

/// Filters arrive from query strings; blank means "not given".
pub fn given(value: &Option<String>) -> Option<&str> {
	value.as_deref()
		.map(str::trim)
		.filter(|v| !v.is_empty())
}

pub const TABLE_SCHEMA: &str = r#"

CREATE TABLE IF NOT EXISTS users (
	id BLOB NOT NULL PRIMARY KEY,
	email TEXT NOT NULL UNIQUE,
	password_hash TEXT NOT NULL,
	first_name TEXT NOT NULL,
	last_name TEXT NOT NULL,
	department TEXT DEFAULT NULL,
	student_id TEXT DEFAULT NULL UNIQUE,
	batch TEXT DEFAULT NULL,
	date_of_birth DATE NOT NULL,
	phone_number TEXT NOT NULL UNIQUE,
	address TEXT DEFAULT NULL,
	role TEXT NOT NULL CHECK(role IN ('student', 'teacher', 'librarian', 'admin')),
	otp TEXT DEFAULT NULL,
	otp_purpose TEXT DEFAULT NULL,
	otp_expires TEXT DEFAULT NULL,
	is_verified BOOL NOT NULL DEFAULT false,
	is_active BOOL NOT NULL DEFAULT true,
	created_at TEXT NOT NULL,
	CHECK((otp IS NULL) == (otp_expires IS NULL))
);

CREATE TABLE IF NOT EXISTS books (
	id BLOB NOT NULL PRIMARY KEY,
	title TEXT NOT NULL,
	author TEXT NOT NULL,
	category TEXT NOT NULL,
	department TEXT NOT NULL,
	description TEXT DEFAULT NULL,
	published_date TEXT DEFAULT NULL,
	isbn TEXT NOT NULL,
	total_quantity INTEGER NOT NULL,
	current_quantity INTEGER NOT NULL,
	created_at TEXT NOT NULL,
	CHECK(total_quantity >= 0),
	CHECK(current_quantity >= 0 AND current_quantity <= total_quantity)
);

CREATE TABLE IF NOT EXISTS reviews (
	book_id BLOB NOT NULL,
	reviewer_id BLOB NOT NULL,
	reviewer_name TEXT NOT NULL,
	rating INTEGER NOT NULL,
	comment TEXT NOT NULL,
	created_at TEXT NOT NULL,
	UNIQUE(book_id, reviewer_id)
);

CREATE TABLE IF NOT EXISTS borrowing_history (
	id BLOB NOT NULL PRIMARY KEY,
	book_id BLOB NOT NULL,
	user_id BLOB NOT NULL,
	borrow_date TEXT NOT NULL,
	expected_return_date TEXT NOT NULL,
	actual_return_date TEXT DEFAULT NULL,
	status TEXT NOT NULL DEFAULT 'borrowed' CHECK(status IN ('borrowed', 'returned', 'overdue')),
	fines REAL NOT NULL DEFAULT 0,
	comment TEXT DEFAULT NULL,
	CHECK((status == 'returned') == (actual_return_date IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS borrowing_history_book ON borrowing_history(book_id, status);

CREATE INDEX IF NOT EXISTS borrowing_history_user ON borrowing_history(user_id, status)

"#;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pattern_escapes_wildcards() {
		assert_eq!(contains_pattern("tolkien"), "%tolkien%");
		assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
	}

	#[test]
	fn blank_filters_are_ignored() {
		assert_eq!(given(&Some("  ".into())), None);
		assert_eq!(given(&Some(" cs ".into())), Some("cs"));
		assert_eq!(given(&None), None);
	}

	#[tokio::test]
	async fn memory_store_keeps_schema_across_acquires() {
		let db = open("sqlite::memory:").await.unwrap();
		for _ in 0..3 {
			let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
				.fetch_one(db.pool()).await.unwrap();
			assert_eq!(n, 0);
		}
		db.close().await;
	}
}
