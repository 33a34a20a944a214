#![allow(dead_code)]

use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;

use lsys_api::config::Config;
use lsys_api::gate::Principal;
use lsys_api::notify::Outbox;
use lsys_api::types::{Assign, Book, Name, NewBook, Role, Signup, Uid, VerifyOtp};
use lsys_api::{catalog, identity, ledger, sql, AppState};

/// Cheapest cost bcrypt accepts.
pub const TEST_COST: u32 = 4;

pub struct Harness {
	pub state: AppState,
	pub outbox: Arc<Outbox>,
}

pub async fn harness() -> Harness {
	let config = Config{
		database_url: "sqlite::memory:".into(),
		port: 0,
		token_secret: "integration-test-secret".into(),
		token_ttl_hours: 1,
		bcrypt_cost: TEST_COST,
	};
	let db = sql::open(&config.database_url).await.unwrap();
	let outbox = Arc::new(Outbox::default());
	let state = AppState::new(db, &config, outbox.clone()).unwrap();
	Harness { state, outbox }
}

pub fn signup_req(email: &str, phone: &str, role: Role) -> Signup {
	Signup{
		email: email.into(),
		password: "correct horse".into(),
		name: Name{ first: "Test".into(), last: email.split('@').next().unwrap_or("user").into() },
		department: Some("CSE".into()),
		student_id: None,
		batch: None,
		date_of_birth: NaiveDate::from_ymd_opt(2000, 5, 17).unwrap(),
		phone_number: phone.into(),
		address: None,
		role,
	}
}

/// Signs up, verifies and returns the logged in principal.
pub async fn member(h: &Harness, by: &Principal, email: &str, phone: &str, role: Role) -> (Principal, Uid) {
	identity::signup(&h.state, by, signup_req(email, phone, role)).await.unwrap();
	let otp = h.outbox.last_for(email).unwrap().otp;
	let session = identity::verify_otp(&h.state, VerifyOtp{ email: email.into(), otp }).await.unwrap();
	let id = session.user.id;
	(Principal::User { id, role }, id)
}

/// An admin, a librarian and a student, in that order.
pub async fn staffed(h: &Harness) -> (Principal, Principal, (Principal, Uid)) {
	let (admin, _) = member(h, &Principal::Anonymous, "admin@x.com", "100", Role::Admin).await;
	let (librarian, _) = member(h, &admin, "lib@x.com", "200", Role::Librarian).await;
	let student = member(h, &Principal::Anonymous, "stu@x.com", "300", Role::Student).await;
	(admin, librarian, student)
}

pub fn new_book(title: &str, total: i64) -> NewBook {
	NewBook{
		title: title.into(),
		author: "Frank Herbert".into(),
		category: "Fiction".into(),
		department: "Literature".into(),
		description: None,
		published_date: Some("1965".into()),
		isbn: "978-0441013593".into(),
		total_quantity: total,
	}
}

pub async fn book(h: &Harness, staff: &Principal, title: &str, total: i64) -> Book {
	catalog::create_book(&h.state, staff, new_book(title, total)).await.unwrap()
}

pub fn loan(book: Uid, user: Uid) -> Assign {
	Assign{
		book_id: book,
		user_id: user,
		expected_return_date: Utc::now() + Duration::days(14),
	}
}

pub async fn lend(h: &Harness, staff: &Principal, book: Uid, user: Uid) -> Uid {
	ledger::assign(&h.state, staff, loan(book, user)).await.unwrap().id
}

/// `total - current == open loans` and `0 <= current <= total`.
pub async fn assert_inventory(h: &Harness, book: Uid) {
	let (total, current): (i64, i64) = sqlx::query_as(
		"SELECT total_quantity, current_quantity FROM books WHERE id = ?"
	)
		.bind(book)
		.fetch_one(h.state.db.pool()).await.unwrap();
	let open: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM borrowing_history WHERE book_id = ? AND status = 'borrowed'"
	)
		.bind(book)
		.fetch_one(h.state.db.pool()).await.unwrap();
	assert!(0 <= current && current <= total, "current {current} outside 0..={total}");
	assert_eq!(total - current, open);
}
