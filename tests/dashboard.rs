mod common;

use common::*;
use lsys_api::dashboard;
use lsys_api::error::Error;
use lsys_api::types::{BorrowStatus, ReturnBook, Role};
use lsys_api::{catalog, ledger};

#[tokio::test]
async fn admin_rollup_counts() {
	let h = harness().await;
	let (admin, librarian, (student, student_id)) = staffed(&h).await;
	let (_, teacher) = member(&h, &admin, "ada@x.com", "400", Role::Teacher).await;

	let dune = book(&h, &librarian, "Dune", 3).await;
	let mut other = new_book("Neuromancer", 2);
	other.category = "Cyberpunk".into();
	let neuro = catalog::create_book(&h.state, &librarian, other).await.unwrap();

	let first = lend(&h, &librarian, dune.id, student_id).await;
	lend(&h, &librarian, dune.id, student_id).await;
	lend(&h, &librarian, neuro.id, teacher).await;
	ledger::return_book(&h.state, &librarian, first, ReturnBook::default()).await.unwrap();

	let stats = dashboard::admin(&h.state, &librarian).await.unwrap();
	assert_eq!(stats.total_users, 4);
	assert_eq!(stats.new_users_last_7_days, 4);
	assert_eq!(stats.total_books, 2);
	assert_eq!(stats.new_books_last_7_days, 2);
	assert_eq!(stats.total_borrowed_books, 2);
	assert_eq!(stats.borrowed_books_last_7_days, 3);
	assert_eq!(stats.books_returned_last_7_days, 1);
	assert_eq!(stats.total_overdue_books, 0);

	let students = stats.users_by_role.iter().find(|t| t.name == "student").unwrap();
	assert_eq!(students.count, 1);
	let fiction = stats.books_by_category.iter().find(|t| t.name == "Fiction").unwrap();
	assert_eq!(fiction.count, 1);

	assert_eq!(stats.most_borrowed_books[0].book_id, dune.id);
	assert_eq!(stats.most_borrowed_books[0].count, 2);
	assert_eq!(stats.most_active_users[0].user_id, student_id);
	assert_eq!(stats.most_active_users[0].user_name, "Test stu");
	assert_eq!(stats.most_active_users[0].activity_count, 2);

	let res = dashboard::admin(&h.state, &student).await;
	assert!(matches!(res, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn empty_store_rolls_up_to_zero() {
	let h = harness().await;
	let (admin, _, _) = staffed(&h).await;
	let stats = dashboard::admin(&h.state, &admin).await.unwrap();
	assert_eq!(stats.total_books, 0);
	assert!(stats.books_by_category.is_empty());
	assert!(stats.most_borrowed_books.is_empty());
	assert!(stats.most_active_users.is_empty());

	let json = serde_json::to_value(&stats).unwrap();
	assert!(json.get("newUsersLast7Days").is_some());
	assert!(json.get("mostActiveUsers").is_some());
}

#[tokio::test]
async fn borrower_sees_own_loans() {
	let h = harness().await;
	let (admin, librarian, (student, student_id)) = staffed(&h).await;
	let (teacher, teacher_id) = member(&h, &admin, "ada@x.com", "400", Role::Teacher).await;
	let dune = book(&h, &librarian, "Dune", 3).await;

	let first = lend(&h, &librarian, dune.id, student_id).await;
	let late = lend(&h, &librarian, dune.id, student_id).await;
	lend(&h, &librarian, dune.id, teacher_id).await;
	ledger::return_book(&h.state, &librarian, first, ReturnBook::default()).await.unwrap();
	sqlx::query("UPDATE borrowing_history SET status = 'overdue' WHERE id = ?")
		.bind(late)
		.execute(h.state.db.pool()).await.unwrap();

	let mine = dashboard::user(&h.state, &student).await.unwrap();
	assert!(mine.current_borrowings.is_empty());
	assert_eq!(mine.borrowing_history.len(), 2);
	assert_eq!(mine.overdue_books.len(), 1);
	assert_eq!(mine.overdue_books[0].id, late);
	assert_eq!(mine.overdue_books[0].status, BorrowStatus::Overdue);
	assert_eq!(mine.overdue_books[0].title, "Dune");

	let theirs = dashboard::user(&h.state, &teacher).await.unwrap();
	assert_eq!(theirs.current_borrowings.len(), 1);
	assert!(theirs.borrowing_history.is_empty());

	let stats = dashboard::admin(&h.state, &admin).await.unwrap();
	assert_eq!(stats.total_overdue_books, 1);
}
