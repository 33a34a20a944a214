//! Read-only rollups over users, books and the ledger.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::gate::{Operation, Principal};
use crate::types::{Bid, BorrowStatus, Hid, Uid};
use crate::AppState;

const RECENT_DAYS: i64 = 7;
const TOP: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Tally {
	pub name: String,
	pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BookActivity {
	pub book_id: Bid,
	pub book_title: String,
	pub book_author: String,
	pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
	pub user_id: Uid,
	pub user_name: String,
	pub activity_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboard {
	pub total_users: i64,
	pub new_users_last_7_days: i64,
	pub users_by_role: Vec<Tally>,
	pub total_books: i64,
	pub new_books_last_7_days: i64,
	pub books_by_category: Vec<Tally>,
	pub total_borrowed_books: i64,
	pub borrowed_books_last_7_days: i64,
	pub most_borrowed_books: Vec<BookActivity>,
	pub total_overdue_books: i64,
	pub books_returned_last_7_days: i64,
	pub most_active_users: Vec<UserActivity>,
}

/// One loan as seen from the borrower's side.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
	pub id: Hid,
	pub book_id: Bid,
	pub title: String,
	pub author: String,
	pub borrow_date: DateTime<Utc>,
	pub expected_return_date: DateTime<Utc>,
	pub actual_return_date: Option<DateTime<Utc>>,
	pub status: BorrowStatus,
	pub fines: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDashboard {
	pub current_borrowings: Vec<Loan>,
	pub borrowing_history: Vec<Loan>,
	pub overdue_books: Vec<Loan>,
}

async fn scalar(state: &AppState, sql: &str) -> Result<i64> {
	let n = sqlx::query_scalar(sql)
		.fetch_one(state.db.pool()).await?;
	Ok(n)
}

async fn scalar_since(state: &AppState, sql: &str, since: DateTime<Utc>) -> Result<i64> {
	let n = sqlx::query_scalar(sql)
		.bind(since)
		.fetch_one(state.db.pool()).await?;
	Ok(n)
}

async fn tally(state: &AppState, sql: &str) -> Result<Vec<Tally>> {
	let rows = sqlx::query_as::<_, Tally>(sql)
		.fetch_all(state.db.pool()).await?;
	Ok(rows)
}

pub async fn admin(state: &AppState, principal: &Principal) -> Result<AdminDashboard> {
	principal.authorize(Operation::AdminDashboard)?;
	let since = Utc::now() - Duration::days(RECENT_DAYS);

	let most_borrowed_books = sqlx::query_as::<_, BookActivity>(r#"
SELECT
	b.id AS book_id, b.title AS book_title, b.author AS book_author, COUNT(*) AS count
FROM
	borrowing_history h
	JOIN books b ON b.id = h.book_id
GROUP BY
	b.id
ORDER BY
	count DESC, b.title
LIMIT ?
	"#)
		.bind(TOP)
		.fetch_all(state.db.pool()).await?;

	let most_active_users = sqlx::query_as::<_, UserActivity>(r#"
SELECT
	u.id AS user_id, u.first_name || ' ' || u.last_name AS user_name, COUNT(*) AS activity_count
FROM
	borrowing_history h
	JOIN users u ON u.id = h.user_id
GROUP BY
	u.id
ORDER BY
	activity_count DESC, user_name
LIMIT ?
	"#)
		.bind(TOP)
		.fetch_all(state.db.pool()).await?;

	Ok(AdminDashboard{
		total_users: scalar(state, "SELECT COUNT(*) FROM users").await?,
		new_users_last_7_days: scalar_since(state,
			"SELECT COUNT(*) FROM users WHERE created_at >= ?", since).await?,
		users_by_role: tally(state,
			"SELECT role AS name, COUNT(*) AS count FROM users GROUP BY role ORDER BY count DESC, name").await?,
		total_books: scalar(state, "SELECT COUNT(*) FROM books").await?,
		new_books_last_7_days: scalar_since(state,
			"SELECT COUNT(*) FROM books WHERE created_at >= ?", since).await?,
		books_by_category: tally(state,
			"SELECT category AS name, COUNT(*) AS count FROM books GROUP BY category ORDER BY count DESC, name").await?,
		total_borrowed_books: scalar(state,
			"SELECT COUNT(*) FROM borrowing_history WHERE status = 'borrowed'").await?,
		borrowed_books_last_7_days: scalar_since(state,
			"SELECT COUNT(*) FROM borrowing_history WHERE borrow_date >= ?", since).await?,
		most_borrowed_books,
		// nothing in this crate flips loans to overdue; counts what others flagged
		total_overdue_books: scalar(state,
			"SELECT COUNT(*) FROM borrowing_history WHERE status = 'overdue'").await?,
		books_returned_last_7_days: scalar_since(state,
			"SELECT COUNT(*) FROM borrowing_history WHERE status = 'returned' AND actual_return_date >= ?", since).await?,
		most_active_users,
	})
}

async fn loans(state: &AppState, user: Uid, statuses: &[BorrowStatus]) -> Result<Vec<Loan>> {
	let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(r#"
SELECT
	h.id, h.book_id, b.title, b.author, h.borrow_date, h.expected_return_date,
	h.actual_return_date, h.status, h.fines
FROM
	borrowing_history h
	JOIN books b ON b.id = h.book_id
WHERE
	h.user_id = "#);
	qb.push_bind(user);
	qb.push(" AND h.status IN (");
	let mut list = qb.separated(", ");
	for status in statuses {
		list.push_bind(*status);
	}
	list.push_unseparated(") ORDER BY h.borrow_date DESC");

	let rows = qb.build_query_as::<Loan>()
		.fetch_all(state.db.pool()).await?;
	Ok(rows)
}

pub async fn user(state: &AppState, principal: &Principal) -> Result<UserDashboard> {
	let (me, _) = principal.authorize(Operation::UserDashboard)?;
	Ok(UserDashboard{
		current_borrowings: loans(state, me, &[BorrowStatus::Borrowed]).await?,
		borrowing_history: loans(state, me, &[BorrowStatus::Returned, BorrowStatus::Overdue]).await?,
		overdue_books: loans(state, me, &[BorrowStatus::Overdue]).await?,
	})
}
