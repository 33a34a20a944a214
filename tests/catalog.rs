mod common;

use common::*;
use lsys_api::error::Error;
use lsys_api::gate::Principal;
use lsys_api::types::{BookFilter, BookPatch, NewReview, ReturnBook};
use lsys_api::{catalog, ledger};
use uuid::Uuid;

fn review(rating: i64) -> NewReview {
	NewReview{ rating, comment: "worth it".into() }
}

#[tokio::test]
async fn review_only_after_return() {
	let h = harness().await;
	let (_, librarian, (student, student_id)) = staffed(&h).await;
	let dune = book(&h, &librarian, "Dune", 1).await;

	let res = catalog::add_review(&h.state, &student, dune.id, review(5)).await;
	assert!(matches!(res, Err(Error::Forbidden(_))));

	let id = lend(&h, &librarian, dune.id, student_id).await;
	let res = catalog::add_review(&h.state, &student, dune.id, review(5)).await;
	assert!(matches!(res, Err(Error::Forbidden(_))));

	ledger::return_book(&h.state, &librarian, id, ReturnBook::default()).await.unwrap();
	let reviewed = catalog::add_review(&h.state, &student, dune.id, review(4)).await.unwrap();
	assert_eq!(reviewed.reviews.len(), 1);
	assert_eq!(reviewed.reviews[0].reviewer_id, student_id);
	assert_eq!(reviewed.reviews[0].reviewer_name, "Test stu");
	assert_eq!(reviewed.reviews[0].rating, 4);

	let again = catalog::add_review(&h.state, &student, dune.id, review(1)).await;
	assert!(matches!(again, Err(Error::Conflict(_))));
	let book = catalog::get_book(&h.state, &student, dune.id).await.unwrap();
	assert_eq!(book.reviews.len(), 1);
}

#[tokio::test]
async fn review_rating_and_target_are_checked() {
	let h = harness().await;
	let (_, librarian, (student, _)) = staffed(&h).await;
	let dune = book(&h, &librarian, "Dune", 1).await;

	for rating in [0, 6, -1] {
		let res = catalog::add_review(&h.state, &student, dune.id, review(rating)).await;
		assert!(matches!(res, Err(Error::Validation(_))));
	}
	let res = catalog::add_review(&h.state, &student, Uuid::new_v4(), review(3)).await;
	assert!(matches!(res, Err(Error::NotFound("book"))));
	let res = catalog::add_review(&h.state, &Principal::Anonymous, dune.id, review(3)).await;
	assert!(matches!(res, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn filters_are_case_insensitive_substrings() {
	let h = harness().await;
	let (_, librarian, (student, _)) = staffed(&h).await;
	book(&h, &librarian, "Dune", 1).await;
	book(&h, &librarian, "Dune Messiah", 1).await;
	let mut other = new_book("Neuromancer", 1);
	other.author = "William Gibson".into();
	other.department = "Cyber_Lit".into();
	catalog::create_book(&h.state, &librarian, other).await.unwrap();

	let all = catalog::list_books(&h.state, &student, BookFilter::default()).await.unwrap();
	let titles: Vec<_> = all.iter().map(|b| b.title.as_str()).collect();
	assert_eq!(titles, ["Dune", "Dune Messiah", "Neuromancer"]);

	let dune = catalog::list_books(&h.state, &student, BookFilter{
		title: Some("dUNE".into()),
		..Default::default()
	}).await.unwrap();
	assert_eq!(dune.len(), 2);

	let gibson = catalog::list_books(&h.state, &student, BookFilter{
		author: Some("gibson".into()),
		department: Some("r_l".into()),
		..Default::default()
	}).await.unwrap();
	assert_eq!(gibson.len(), 1);

	// `_` is a literal, not a wildcard
	let literal = catalog::list_books(&h.state, &student, BookFilter{
		department: Some("Cyber_".into()),
		..Default::default()
	}).await.unwrap();
	assert_eq!(literal.len(), 1);
	let none = catalog::list_books(&h.state, &student, BookFilter{
		department: Some("Literatur_".into()),
		..Default::default()
	}).await.unwrap();
	assert!(none.is_empty());

	let res = catalog::list_books(&h.state, &Principal::Anonymous, BookFilter::default()).await;
	assert!(matches!(res, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn create_validates_and_needs_staff() {
	let h = harness().await;
	let (_, librarian, (student, _)) = staffed(&h).await;

	let res = catalog::create_book(&h.state, &student, new_book("Dune", 1)).await;
	assert!(matches!(res, Err(Error::Unauthorized(_))));

	let res = catalog::create_book(&h.state, &librarian, new_book(" ", 1)).await;
	assert!(matches!(res, Err(Error::Validation(_))));
	let res = catalog::create_book(&h.state, &librarian, new_book("Dune", -1)).await;
	assert!(matches!(res, Err(Error::Validation(_))));

	let dune = book(&h, &librarian, "Dune", 4).await;
	assert_eq!((dune.total_quantity, dune.current_quantity), (4, 4));
	assert!(dune.reviews.is_empty());
}

#[tokio::test]
async fn patch_touches_only_given_fields() {
	let h = harness().await;
	let (_, librarian, _) = staffed(&h).await;
	let mut req = new_book("Dune", 2);
	req.description = Some("desert planet".into());
	let dune = catalog::create_book(&h.state, &librarian, req).await.unwrap();

	let patch: BookPatch = serde_json::from_value(serde_json::json!({
		"id": Uuid::new_v4(),
		"category": "Sci-Fi",
		"description": null,
	})).unwrap();
	let updated = catalog::update_book(&h.state, &librarian, dune.id, patch).await.unwrap();
	assert_eq!(updated.id, dune.id);
	assert_eq!(updated.category, "Sci-Fi");
	assert_eq!(updated.description, None);
	assert_eq!(updated.title, "Dune");
	assert_eq!(updated.published_date.as_deref(), Some("1965"));

	let res = catalog::update_book(&h.state, &librarian, Uuid::new_v4(), BookPatch{
		title: Some("Ghost".into()),
		..Default::default()
	}).await;
	assert!(matches!(res, Err(Error::NotFound("book"))));
}

#[tokio::test]
async fn delete_removes_book_and_reviews() {
	let h = harness().await;
	let (admin, librarian, (student, student_id)) = staffed(&h).await;
	let dune = book(&h, &librarian, "Dune", 1).await;
	let id = lend(&h, &librarian, dune.id, student_id).await;
	ledger::return_book(&h.state, &librarian, id, ReturnBook::default()).await.unwrap();
	catalog::add_review(&h.state, &student, dune.id, review(5)).await.unwrap();

	catalog::delete_book(&h.state, &admin, dune.id).await.unwrap();
	let res = catalog::get_book(&h.state, &student, dune.id).await;
	assert!(matches!(res, Err(Error::NotFound("book"))));
	let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
		.fetch_one(h.state.db.pool()).await.unwrap();
	assert_eq!(left, 0);

	let res = catalog::delete_book(&h.state, &admin, dune.id).await;
	assert!(matches!(res, Err(Error::NotFound("book"))));
}

#[tokio::test]
async fn non_ascii_filters_match_stored_case() {
	let h = harness().await;
	let (_, librarian, (student, _)) = staffed(&h).await;
	let mut req = new_book("Faust", 1);
	req.author = "Jürgen Über".into();
	catalog::create_book(&h.state, &librarian, req).await.unwrap();

	let by = |author: &str| BookFilter{ author: Some(author.into()), ..Default::default() };

	// ascii letters fold, the umlaut is taken as given
	let found = catalog::list_books(&h.state, &student, by("jürgen")).await.unwrap();
	assert_eq!(found.len(), 1);
	let found = catalog::list_books(&h.state, &student, by("Über")).await.unwrap();
	assert_eq!(found.len(), 1);
	let missed = catalog::list_books(&h.state, &student, by("über")).await.unwrap();
	assert!(missed.is_empty());
}
