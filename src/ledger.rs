//! Borrowing ledger: lending and taking back copies.
//!
//! A loan is `borrowed -> returned`, or `borrowed -> overdue -> returned`
//! when something outside this crate flags it overdue. Both write paths
//! touch a book and a ledger row and run inside one transaction, with the
//! inventory check folded into a conditional update, so for every book
//! `total_quantity - current_quantity` equals its open loans.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gate::{Operation, Principal};
use crate::identity;
use crate::sql::{contains_pattern, given, ESCAPE};
use crate::types::{
	Assign, Book, Borrowing, BorrowingFilter, BorrowingHistory, BorrowStatus, Hid, ReturnBook,
	User, UserRecord,
};
use crate::AppState;

pub async fn fetch(state: &AppState, id: Hid) -> Result<Option<BorrowingHistory>> {
	let entry = sqlx::query_as::<_, BorrowingHistory>("SELECT * FROM borrowing_history WHERE id = ?")
		.bind(id)
		.fetch_optional(state.db.pool()).await?;
	Ok(entry)
}

/// Lends one copy of `book_id` to `user_id`.
pub async fn assign(state: &AppState, principal: &Principal, req: Assign) -> Result<Borrowing> {
	let (me, _) = principal.authorize(Operation::AssignBook)?;
	let now = Utc::now();
	if req.expected_return_date <= now {
		return Err(Error::Validation("expected return date must be in the future".into()));
	}

	let mut tx = state.db.pool().begin().await?;

	// check and decrement in one statement, a missing book matches nothing too
	let taken = sqlx::query(r#"
UPDATE books SET
	current_quantity = current_quantity - 1
WHERE
	id = ? AND current_quantity > 0
	"#)
		.bind(req.book_id)
		.execute(&mut *tx).await?;
	if taken.rows_affected() == 0 {
		tracing::debug!(book = %req.book_id, "assign refused, no copy on the shelf");
		return Err(Error::Unavailable);
	}

	if identity::fetch(&mut *tx, req.user_id).await?.is_none() {
		return Err(Error::NotFound("user"));
	}

	let id = Uuid::new_v4();
	sqlx::query(r#"
INSERT INTO borrowing_history
	(id, book_id, user_id, borrow_date, expected_return_date, status, fines)
VALUES
	(?, ?, ?, ?, ?, ?, 0)
	"#)
		.bind(id)
		.bind(req.book_id)
		.bind(req.user_id)
		.bind(now)
		.bind(req.expected_return_date)
		.bind(BorrowStatus::Borrowed)
		.execute(&mut *tx).await?;

	tx.commit().await?;
	tracing::info!(%id, book = %req.book_id, user = %req.user_id, by = %me, "book assigned");

	let entry = fetch(state, id).await?.ok_or(Error::NotFound("borrowing"))?;
	join(state, vec![entry]).await?
		.pop()
		.ok_or(Error::NotFound("book"))
}

/// Closes a loan and puts the copy back on the shelf. A second return of
/// the same loan fails instead of counting the copy twice.
pub async fn return_book(state: &AppState, principal: &Principal, id: Hid, req: ReturnBook) -> Result<BorrowingHistory> {
	let (me, _) = principal.authorize(Operation::ReturnBook)?;
	let comment = req.comment
		.map(|c| c.trim().to_string())
		.filter(|c| !c.is_empty());

	let mut tx = state.db.pool().begin().await?;

	let closed = sqlx::query(r#"
UPDATE borrowing_history SET
	status = ?, actual_return_date = ?, comment = COALESCE(?, comment)
WHERE
	id = ? AND status != ?
	"#)
		.bind(BorrowStatus::Returned)
		.bind(Utc::now())
		.bind(comment)
		.bind(id)
		.bind(BorrowStatus::Returned)
		.execute(&mut *tx).await?;

	let book_id: Option<Uuid> = sqlx::query_scalar("SELECT book_id FROM borrowing_history WHERE id = ?")
		.bind(id)
		.fetch_optional(&mut *tx).await?;
	let Some(book_id) = book_id else {
		return Err(Error::NotFound("borrowing"));
	};
	if closed.rows_affected() == 0 {
		return Err(Error::Conflict("book was already returned".into()));
	}

	let shelved = sqlx::query(r#"
UPDATE books SET
	current_quantity = current_quantity + 1
WHERE
	id = ? AND current_quantity < total_quantity
	"#)
		.bind(book_id)
		.execute(&mut *tx).await?;
	if shelved.rows_affected() == 0 {
		tracing::warn!(borrowing = %id, book = %book_id, "returned copy has no book to go back to");
	}

	tx.commit().await?;
	tracing::info!(borrowing = %id, book = %book_id, by = %me, "book returned");

	fetch(state, id).await?.ok_or(Error::NotFound("borrowing"))
}

pub async fn list_borrowings(state: &AppState, principal: &Principal, filter: BorrowingFilter) -> Result<Vec<Borrowing>> {
	principal.authorize(Operation::ListBorrowings)?;

	let mut qb = QueryBuilder::<Sqlite>::new(r#"
SELECT
	h.*
FROM
	borrowing_history h
	JOIN books b ON b.id = h.book_id
	JOIN users u ON u.id = h.user_id
WHERE
	1 = 1"#);
	if let Some(status) = filter.status {
		qb.push(" AND h.status = ").push_bind(status);
	}
	if let Some(user) = filter.user_id {
		qb.push(" AND h.user_id = ").push_bind(user);
	}
	if let Some(book) = filter.book_id {
		qb.push(" AND h.book_id = ").push_bind(book);
	}
	let columns = [
		("b.title", &filter.title),
		("b.author", &filter.author),
		("b.department", &filter.book_department),
		("u.department", &filter.user_department),
	];
	for (column, value) in columns {
		if let Some(value) = given(value) {
			qb.push(format!(" AND {column} LIKE "))
				.push_bind(contains_pattern(value))
				.push(ESCAPE);
		}
	}
	if let Some(name) = given(&filter.name) {
		let pat = contains_pattern(name);
		qb.push(" AND (u.first_name LIKE ").push_bind(pat.clone()).push(ESCAPE)
			.push(" OR u.last_name LIKE ").push_bind(pat).push(ESCAPE)
			.push(")");
	}
	qb.push(" ORDER BY h.borrow_date DESC");

	let entries = qb.build_query_as::<BorrowingHistory>()
		.fetch_all(state.db.pool()).await?;
	join(state, entries).await
}

/// Attaches the current book and borrower to each entry. Entries whose
/// book or borrower no longer exists are dropped.
pub(crate) async fn join(state: &AppState, entries: Vec<BorrowingHistory>) -> Result<Vec<Borrowing>> {
	if entries.is_empty() {
		return Ok(Vec::new());
	}

	let book_ids: HashSet<Uuid> = entries.iter().map(|e| e.book_id).collect();
	let user_ids: HashSet<Uuid> = entries.iter().map(|e| e.user_id).collect();

	let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM books WHERE id IN (");
	let mut ids = qb.separated(", ");
	for id in &book_ids {
		ids.push_bind(*id);
	}
	ids.push_unseparated(")");
	let books: HashMap<Uuid, Book> = qb.build_query_as::<Book>()
		.fetch_all(state.db.pool()).await?
		.into_iter()
		.map(|b| (b.id, b))
		.collect();

	let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM users WHERE id IN (");
	let mut ids = qb.separated(", ");
	for id in &user_ids {
		ids.push_bind(*id);
	}
	ids.push_unseparated(")");
	let users: HashMap<Uuid, User> = qb.build_query_as::<UserRecord>()
		.fetch_all(state.db.pool()).await?
		.into_iter()
		.map(|u| (u.id, User::from(u)))
		.collect();

	let joined = entries.into_iter()
		.filter_map(|e| {
			let book = books.get(&e.book_id)?.clone();
			let user = users.get(&e.user_id)?.clone();
			Some(Borrowing{
				id: e.id,
				borrow_date: e.borrow_date,
				expected_return_date: e.expected_return_date,
				actual_return_date: e.actual_return_date,
				status: e.status,
				fines: e.fines,
				comment: e.comment,
				book,
				user,
			})
		})
		.collect();
	Ok(joined)
}
