//! REST surface. Every handler is a thin shell over one operation; the
//! operation does the policy check, the handler only shapes the response.

use axum::{
	async_trait,
	extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
	http::{request::Parts, StatusCode},
	response::{IntoResponse, Response},
	routing::{get, post, put},
	Json, Router,
};
use maud::{html, Markup, DOCTYPE};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gate::{Principal, TOKEN_COOKIE};
use crate::identity::Session;
use crate::types::{
	Assign, BookFilter, BookPatch, BorrowingFilter, EmailOnly, Login, NewBook, NewReview,
	ProfilePatch, ResetPassword, ReturnBook, Signup, UserFilter, UserSearch, VerifyOtp,
};
use crate::{catalog, dashboard, identity, ledger, AppState};

/// JSON body whose rejection reads as a validation error.
pub struct Body<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Body<T>
where
	T: DeserializeOwned,
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
		let Json(value) = Json::<T>::from_request(req, state).await
			.map_err(|e| Error::Validation(e.body_text()))?;
		Ok(Body(value))
	}
}

/// Query string, same rejection policy as [`Body`].
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for Params<T>
where
	T: DeserializeOwned,
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
		let Query(value) = Query::<T>::from_request_parts(parts, state).await
			.map_err(|e| Error::Validation(e.body_text()))?;
		Ok(Params(value))
	}
}

/// `:id` path segment that must be a uuid.
pub struct Id(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for Id
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
		let Path(id) = Path::<Uuid>::from_request_parts(parts, state).await
			.map_err(|_| Error::Validation("invalid id".into()))?;
		Ok(Id(id))
	}
}

fn ok(status: StatusCode, body: serde_json::Value) -> Response {
	(status, Json(body)).into_response()
}

fn logged_in(cookies: &Cookies, session: &Session) {
	let mut cookie = Cookie::new(TOKEN_COOKIE, session.token.clone());
	cookie.set_http_only(true);
	cookie.set_path("/");
	cookies.add(cookie);
}

// auth

async fn signup(State(state): State<AppState>, principal: Principal, Body(req): Body<Signup>) -> Result<Response> {
	let user = identity::signup(&state, &principal, req).await?;
	Ok(ok(StatusCode::CREATED, json!({
		"success": true,
		"message": "account created, a verification code was sent to your email",
		"user": user,
	})))
}

async fn verify_otp(State(state): State<AppState>, cookies: Cookies, Body(req): Body<VerifyOtp>) -> Result<Response> {
	let session = identity::verify_otp(&state, req).await?;
	logged_in(&cookies, &session);
	Ok(ok(StatusCode::OK, json!({
		"success": true,
		"message": "account verified",
		"token": session.token,
		"user": session.user,
	})))
}

async fn resend_otp(State(state): State<AppState>, Body(req): Body<EmailOnly>) -> Result<Response> {
	identity::resend_otp(&state, req).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "message": "a new verification code was sent" })))
}

async fn login(State(state): State<AppState>, cookies: Cookies, Body(req): Body<Login>) -> Result<Response> {
	let session = identity::login(&state, req).await?;
	logged_in(&cookies, &session);
	Ok(ok(StatusCode::OK, json!({
		"success": true,
		"message": "logged in",
		"token": session.token,
		"user": session.user,
	})))
}

async fn logout(cookies: Cookies) -> Response {
	let mut cookie = Cookie::new(TOKEN_COOKIE, "");
	cookie.set_path("/");
	cookies.remove(cookie);
	ok(StatusCode::OK, json!({ "success": true, "message": "logged out" }))
}

async fn forgot_password(State(state): State<AppState>, Body(req): Body<EmailOnly>) -> Result<Response> {
	identity::request_password_reset(&state, req).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "message": "a reset code was sent to your email" })))
}

async fn reset_password(State(state): State<AppState>, Body(req): Body<ResetPassword>) -> Result<Response> {
	identity::reset_password(&state, req).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "message": "password updated, please log in" })))
}

// books

async fn list_books(State(state): State<AppState>, principal: Principal, Params(filter): Params<BookFilter>) -> Result<Response> {
	let books = catalog::list_books(&state, &principal, filter).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "books": books })))
}

async fn get_book(State(state): State<AppState>, principal: Principal, Id(id): Id) -> Result<Response> {
	let book = catalog::get_book(&state, &principal, id).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "book": book })))
}

async fn add_book(State(state): State<AppState>, principal: Principal, Body(req): Body<NewBook>) -> Result<Response> {
	let book = catalog::create_book(&state, &principal, req).await?;
	Ok(ok(StatusCode::CREATED, json!({
		"success": true,
		"message": "book added successfully",
		"book": book,
	})))
}

async fn edit_book(State(state): State<AppState>, principal: Principal, Id(id): Id, Body(patch): Body<BookPatch>) -> Result<Response> {
	let book = catalog::update_book(&state, &principal, id, patch).await?;
	Ok(ok(StatusCode::OK, json!({
		"success": true,
		"message": "book updated successfully",
		"book": book,
	})))
}

async fn delete_book(State(state): State<AppState>, principal: Principal, Id(id): Id) -> Result<Response> {
	catalog::delete_book(&state, &principal, id).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "message": "book deleted successfully" })))
}

async fn add_review(State(state): State<AppState>, principal: Principal, Id(id): Id, Body(req): Body<NewReview>) -> Result<Response> {
	let book = catalog::add_review(&state, &principal, id, req).await?;
	Ok(ok(StatusCode::CREATED, json!({
		"success": true,
		"message": "review added",
		"book": book,
	})))
}

// borrowing

async fn assign(State(state): State<AppState>, principal: Principal, Body(req): Body<Assign>) -> Result<Response> {
	let borrowing = ledger::assign(&state, &principal, req).await?;
	Ok(ok(StatusCode::OK, json!({
		"success": true,
		"message": "book assigned successfully",
		"borrowingHistory": borrowing,
	})))
}

async fn return_book(State(state): State<AppState>, principal: Principal, Id(id): Id, body: Option<Json<ReturnBook>>) -> Result<Response> {
	let req = body.map(|Json(r)| r).unwrap_or_default();
	let entry = ledger::return_book(&state, &principal, id, req).await?;
	Ok(ok(StatusCode::OK, json!({
		"success": true,
		"message": "book returned successfully",
		"borrowingHistory": entry,
	})))
}

async fn list_borrowings(State(state): State<AppState>, principal: Principal, Params(filter): Params<BorrowingFilter>) -> Result<Response> {
	let borrowings = ledger::list_borrowings(&state, &principal, filter).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "borrowings": borrowings })))
}

// users

async fn list_users(State(state): State<AppState>, principal: Principal, Params(filter): Params<UserFilter>) -> Result<Response> {
	let users = identity::list_users(&state, &principal, filter).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "users": users })))
}

async fn search_users(State(state): State<AppState>, principal: Principal, Body(req): Body<UserSearch>) -> Result<Response> {
	let users = identity::search_users(&state, &principal, req.search_keyword.as_deref()).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "users": users })))
}

async fn get_user(State(state): State<AppState>, principal: Principal, Id(id): Id) -> Result<Response> {
	let user = identity::get_user(&state, &principal, id).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "user": user })))
}

async fn delete_user(State(state): State<AppState>, principal: Principal, Id(id): Id) -> Result<Response> {
	identity::delete_user(&state, &principal, id).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "message": "user deleted successfully" })))
}

async fn profile(State(state): State<AppState>, principal: Principal) -> Result<Response> {
	let user = identity::my_profile(&state, &principal).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "user": user })))
}

async fn edit_profile(State(state): State<AppState>, principal: Principal, Body(patch): Body<ProfilePatch>) -> Result<Response> {
	let user = identity::update_profile(&state, &principal, patch).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "message": "profile updated", "user": user })))
}

async fn deactivate(State(state): State<AppState>, principal: Principal, Id(id): Id) -> Result<Response> {
	identity::set_active(&state, &principal, id, false).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "message": "user successfully deactivated" })))
}

async fn activate(State(state): State<AppState>, principal: Principal, Id(id): Id) -> Result<Response> {
	identity::set_active(&state, &principal, id, true).await?;
	Ok(ok(StatusCode::OK, json!({ "success": true, "message": "user activated successfully" })))
}

// dashboards

async fn admin_dashboard(State(state): State<AppState>, principal: Principal) -> Result<Response> {
	let stats = dashboard::admin(&state, &principal).await?;
	Ok(Json(stats).into_response())
}

async fn user_dashboard(State(state): State<AppState>, principal: Principal) -> Result<Response> {
	let stats = dashboard::user(&state, &principal).await?;
	Ok(Json(stats).into_response())
}

async fn dashboard_view(State(state): State<AppState>, principal: Principal) -> Result<Markup> {
	let stats = dashboard::admin(&state, &principal).await?;

	Ok(html! { (DOCTYPE) html {
		head { title { "Library dashboard" } }
		body {
			h1 { "Library dashboard" }
			table {
				tbody {
					tr { th { "Users" } td { (stats.total_users) } td { "+" (stats.new_users_last_7_days) " this week" } }
					tr { th { "Books" } td { (stats.total_books) } td { "+" (stats.new_books_last_7_days) " this week" } }
					tr { th { "On loan" } td { (stats.total_borrowed_books) } td { (stats.borrowed_books_last_7_days) " lent this week" } }
					tr { th { "Overdue" } td { (stats.total_overdue_books) } td { (stats.books_returned_last_7_days) " returned this week" } }
				}
			}

			h2 { "Most borrowed" }
			table {
				thead { tr {
					td { "Title" }
					td { "Author" }
					td { "Loans" }
				} }
				tbody {
					@for book in &stats.most_borrowed_books {
						tr {
							td { (book.book_title) }
							td { (book.book_author) }
							td { (book.count) }
						}
					}
				}
			}

			h2 { "Most active readers" }
			table {
				tbody {
					@for user in &stats.most_active_users {
						tr {
							td { (user.user_name) }
							td { (user.activity_count) }
						}
					}
				}
			}

			h2 { "Accounts by role" }
			ul {
				@for role in &stats.users_by_role {
					li { (role.name) ": " (role.count) }
				}
			}

			h2 { "Books by category" }
			ul {
				@for category in &stats.books_by_category {
					li { (category.name) ": " (category.count) }
				}
			}
		}
	} })
}

pub fn router() -> Router<AppState> {
	Router::new()
		.route("/auth/signup", post(signup))
		.route("/auth/verify-otp", post(verify_otp))
		.route("/auth/resend-otp", post(resend_otp))
		.route("/auth/login", post(login))
		.route("/auth/logout", post(logout))
		.route("/auth/forgot-password", post(forgot_password))
		.route("/auth/reset-password", post(reset_password))
		.route("/books", get(list_books).post(add_book))
		.route("/books/:id", get(get_book).put(edit_book).delete(delete_book))
		.route("/books/:id/reviews", post(add_review))
		.route("/assign", post(assign))
		.route("/return/:id", post(return_book))
		.route("/borrowings", get(list_borrowings))
		.route("/users", get(list_users))
		.route("/search-users", post(search_users))
		.route("/user/:id", get(get_user).delete(delete_user))
		.route("/profile", get(profile))
		.route("/edit-profile", put(edit_profile))
		.route("/deactivate/:id", put(deactivate))
		.route("/activate/:id", put(activate))
		.route("/dashboard", get(admin_dashboard))
		.route("/dashboard/view", get(dashboard_view))
		.route("/user-dashboard", get(user_dashboard))
}
