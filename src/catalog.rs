use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gate::{Operation, Principal};
use crate::identity;
use crate::sql::{contains_pattern, given, ESCAPE};
use crate::types::{Bid, Book, BookFilter, BookPatch, BorrowStatus, NewBook, NewReview, Review, User};
use crate::AppState;

pub(crate) async fn fetch<'e>(db: impl SqliteExecutor<'e>, id: Bid) -> Result<Option<Book>> {
	let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ?")
		.bind(id)
		.fetch_optional(db).await?;
	Ok(book)
}

async fn reviews(state: &AppState, id: Bid) -> Result<Vec<Review>> {
	let reviews = sqlx::query_as::<_, Review>(r#"
SELECT
	reviewer_id, reviewer_name, rating, comment, created_at
FROM
	reviews
WHERE
	book_id = ?
ORDER BY
	created_at
	"#)
		.bind(id)
		.fetch_all(state.db.pool()).await?;
	Ok(reviews)
}

async fn with_reviews(state: &AppState, id: Bid) -> Result<Book> {
	let mut book = fetch(state.db.pool(), id).await?.ok_or(Error::NotFound("book"))?;
	book.reviews = reviews(state, id).await?;
	Ok(book)
}

fn required(field: &str, value: &str) -> Result<()> {
	if value.trim().is_empty() {
		return Err(Error::Validation(format!("{field} is required")));
	}
	Ok(())
}

pub async fn list_books(state: &AppState, principal: &Principal, filter: BookFilter) -> Result<Vec<Book>> {
	principal.authorize(Operation::ListBooks)?;

	let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM books WHERE 1 = 1");
	let columns = [
		("department", &filter.department),
		("author", &filter.author),
		("title", &filter.title),
	];
	for (column, value) in columns {
		if let Some(value) = given(value) {
			qb.push(format!(" AND {column} LIKE "))
				.push_bind(contains_pattern(value))
				.push(ESCAPE);
		}
	}
	qb.push(" ORDER BY title");

	let books = qb.build_query_as::<Book>()
		.fetch_all(state.db.pool()).await?;
	Ok(books)
}

pub async fn get_book(state: &AppState, principal: &Principal, id: Bid) -> Result<Book> {
	principal.authorize(Operation::GetBook)?;
	with_reviews(state, id).await
}

/// New titles start with every copy on the shelf.
pub async fn create_book(state: &AppState, principal: &Principal, req: NewBook) -> Result<Book> {
	let (me, _) = principal.authorize(Operation::CreateBook)?;
	required("title", &req.title)?;
	required("author", &req.author)?;
	required("category", &req.category)?;
	required("department", &req.department)?;
	required("isbn", &req.isbn)?;
	if req.total_quantity < 0 {
		return Err(Error::Validation("total quantity cannot be negative".into()));
	}

	let id = Uuid::new_v4();
	sqlx::query(r#"
INSERT INTO books
	(id, title, author, category, department, description, published_date, isbn,
	total_quantity, current_quantity, created_at)
VALUES
	(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
	"#)
		.bind(id)
		.bind(req.title.trim())
		.bind(req.author.trim())
		.bind(req.category.trim())
		.bind(req.department.trim())
		.bind(&req.description)
		.bind(&req.published_date)
		.bind(req.isbn.trim())
		.bind(req.total_quantity)
		.bind(req.total_quantity)
		.bind(Utc::now())
		.execute(state.db.pool()).await?;

	tracing::info!(%id, by = %me, title = %req.title, copies = req.total_quantity, "book added");
	with_reviews(state, id).await
}

/// Merges the given fields. A new total shifts the shelf count by the same
/// delta so copies on loan stay accounted for.
pub async fn update_book(state: &AppState, principal: &Principal, id: Bid, patch: BookPatch) -> Result<Book> {
	let (me, _) = principal.authorize(Operation::UpdateBook)?;

	if patch.is_empty() {
		return with_reviews(state, id).await;
	}
	for (field, value) in [
		("title", &patch.title),
		("author", &patch.author),
		("category", &patch.category),
		("department", &patch.department),
		("isbn", &patch.isbn),
	] {
		if let Some(value) = value {
			required(field, value)?;
		}
	}
	if matches!(patch.total_quantity, Some(n) if n < 0) {
		return Err(Error::Validation("total quantity cannot be negative".into()));
	}

	let mut qb = QueryBuilder::<Sqlite>::new("UPDATE books SET ");
	let mut set = qb.separated(", ");
	let text = [
		("title", patch.title),
		("author", patch.author),
		("category", patch.category),
		("department", patch.department),
		("isbn", patch.isbn),
	];
	for (column, value) in text {
		if let Some(value) = value {
			set.push(format!("{column} = ")).push_bind_unseparated(value.trim().to_string());
		}
	}
	if let Some(description) = patch.description {
		set.push("description = ").push_bind_unseparated(description);
	}
	if let Some(published) = patch.published_date {
		set.push("published_date = ").push_bind_unseparated(published);
	}
	if let Some(total) = patch.total_quantity {
		set.push("current_quantity = current_quantity + (")
			.push_bind_unseparated(total)
			.push_unseparated(" - total_quantity)");
		set.push("total_quantity = ").push_bind_unseparated(total);
	}
	qb.push(" WHERE id = ").push_bind(id);
	if let Some(total) = patch.total_quantity {
		// fewer copies than are out on loan would break the ledger
		qb.push(" AND total_quantity - current_quantity <= ").push_bind(total);
	}

	let done = qb.build().execute(state.db.pool()).await?;
	if done.rows_affected() == 0 {
		let book = fetch(state.db.pool(), id).await?.ok_or(Error::NotFound("book"))?;
		return Err(Error::Validation(format!(
			"{} copies are on loan, total quantity cannot go below that",
			book.total_quantity - book.current_quantity,
		)));
	}

	tracing::info!(%id, by = %me, "book updated");
	with_reviews(state, id).await
}

pub async fn delete_book(state: &AppState, principal: &Principal, id: Bid) -> Result<()> {
	let (me, _) = principal.authorize(Operation::DeleteBook)?;

	let mut tx = state.db.pool().begin().await?;
	let done = sqlx::query("DELETE FROM books WHERE id = ?")
		.bind(id)
		.execute(&mut *tx).await?;
	if done.rows_affected() == 0 {
		return Err(Error::NotFound("book"));
	}
	sqlx::query("DELETE FROM reviews WHERE book_id = ?")
		.bind(id)
		.execute(&mut *tx).await?;
	tx.commit().await?;

	tracing::info!(%id, by = %me, "book deleted");
	Ok(())
}

/// Only readers who have returned a copy may review, once per title.
/// The (book, reviewer) unique index settles concurrent submissions.
pub async fn add_review(state: &AppState, principal: &Principal, book_id: Bid, req: NewReview) -> Result<Book> {
	let (me, _) = principal.authorize(Operation::AddReview)?;
	if !(1..=5).contains(&req.rating) {
		return Err(Error::Validation("rating must be between 1 and 5".into()));
	}

	if fetch(state.db.pool(), book_id).await?.is_none() {
		return Err(Error::NotFound("book"));
	}
	let returned: bool = sqlx::query_scalar(r#"
SELECT EXISTS(
	SELECT 1 FROM borrowing_history
	WHERE book_id = ? AND user_id = ? AND status = ?
)
	"#)
		.bind(book_id)
		.bind(me)
		.bind(BorrowStatus::Returned)
		.fetch_one(state.db.pool()).await?;
	if !returned {
		return Err(Error::Forbidden("you can only review books you have borrowed and returned"));
	}

	let reviewer: User = identity::fetch(state.db.pool(), me).await?
		.ok_or(Error::NotFound("user"))?
		.into();
	sqlx::query(r#"
INSERT INTO reviews
	(book_id, reviewer_id, reviewer_name, rating, comment, created_at)
VALUES
	(?, ?, ?, ?, ?, ?)
	"#)
		.bind(book_id)
		.bind(me)
		.bind(reviewer.name.full())
		.bind(req.rating)
		.bind(req.comment.trim())
		.bind(Utc::now())
		.execute(state.db.pool()).await
		.map_err(|e| Error::on_unique(e, "review from this reader"))?;

	tracing::info!(book = %book_id, reviewer = %me, rating = req.rating, "review added");
	with_reviews(state, book_id).await
}
