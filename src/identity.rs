//! Accounts: signup with email verification, login, password reset and
//! the profile/administration operations around them.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gate::{Operation, Principal};
use crate::sql::{contains_pattern, given, ESCAPE};
use crate::types::{
	EmailOnly, Login, OtpPurpose, ProfilePatch, ResetPassword, Role, Signup, Uid, User,
	UserFilter, UserRecord, VerifyOtp,
};
use crate::AppState;

pub const OTP_TTL_MINUTES: i64 = 15;
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
	pub token: String,
	pub user: User,
}

/// Six digits, uniformly drawn, zero padded.
pub fn new_otp() -> String {
	format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

fn normalize_email(email: &str) -> String {
	email.trim().to_lowercase()
}

fn check_password(password: &str) -> Result<()> {
	if password.chars().count() < MIN_PASSWORD_LEN {
		return Err(Error::Validation(format!("password must be at least {MIN_PASSWORD_LEN} characters")));
	}
	Ok(())
}

fn required(field: &str, value: &str) -> Result<()> {
	if value.trim().is_empty() {
		return Err(Error::Validation(format!("{field} is required")));
	}
	Ok(())
}

fn blank_to_none(value: Option<String>) -> Option<String> {
	value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) async fn fetch<'e>(db: impl SqliteExecutor<'e>, id: Uid) -> Result<Option<UserRecord>> {
	let rec = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = ?")
		.bind(id)
		.fetch_optional(db).await?;
	Ok(rec)
}

async fn fetch_by_email(state: &AppState, email: &str) -> Result<Option<UserRecord>> {
	let rec = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE email = ?")
		.bind(normalize_email(email))
		.fetch_optional(state.db.pool()).await?;
	Ok(rec)
}

async fn store_otp(state: &AppState, user: &UserRecord, purpose: OtpPurpose) -> Result<()> {
	let otp = new_otp();
	let expires = Utc::now() + Duration::minutes(OTP_TTL_MINUTES);
	// a new code always supersedes the previous one
	sqlx::query("UPDATE users SET otp = ?, otp_purpose = ?, otp_expires = ? WHERE id = ?")
		.bind(&otp)
		.bind(purpose)
		.bind(expires)
		.bind(user.id)
		.execute(state.db.pool()).await?;
	state.notifier.send_otp(&user.email, &otp, purpose);
	Ok(())
}

async fn clear_otp(state: &AppState, id: Uid) -> Result<()> {
	sqlx::query("UPDATE users SET otp = NULL, otp_purpose = NULL, otp_expires = NULL WHERE id = ?")
		.bind(id)
		.execute(state.db.pool()).await?;
	Ok(())
}

/// Compares a presented code against the pending one for `purpose`.
/// Expired codes are wiped on the way out.
async fn check_otp(state: &AppState, user: &UserRecord, purpose: OtpPurpose, presented: &str, now: DateTime<Utc>) -> Result<()> {
	// a consumed signup code reads as spent, a reset nobody asked for does not
	let not_pending = match purpose {
		OtpPurpose::Verify => Error::InvalidOrExpiredOtp,
		OtpPurpose::Reset => Error::OtpNotRequested,
	};
	let (Some(otp), Some(expires)) = (&user.otp, user.otp_expires) else {
		return Err(not_pending);
	};
	if user.otp_purpose != Some(purpose) {
		return Err(not_pending);
	}
	if expires <= now {
		clear_otp(state, user.id).await?;
		return Err(Error::InvalidOrExpiredOtp);
	}
	if otp != presented.trim() {
		return Err(Error::InvalidOrExpiredOtp);
	}
	Ok(())
}

fn session(state: &AppState, user: UserRecord) -> Session {
	let token = state.tokens.issue(user.id, user.role, &user.email, Utc::now());
	Session{ token, user: user.into() }
}

/// Creates an unverified account and sends its verification code.
///
/// Students and teachers sign themselves up. Librarian and admin accounts
/// need an admin caller, except for the first account of an empty store.
pub async fn signup(state: &AppState, principal: &Principal, req: Signup) -> Result<User> {
	let email = normalize_email(&req.email);
	if !email.contains('@') {
		return Err(Error::Validation("email is malformed".into()));
	}
	check_password(&req.password)?;
	required("first name", &req.name.first)?;
	required("last name", &req.name.last)?;
	required("phone number", &req.phone_number)?;

	if fetch_by_email(state, &email).await?.is_some() {
		return Err(Error::Conflict("user already exists".into()));
	}

	if req.role.is_privileged() && principal.role() != Some(Role::Admin) {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
			.fetch_one(state.db.pool()).await?;
		if count > 0 {
			return Err(Error::Unauthorized("only an admin can create staff accounts"));
		}
	}

	let hash = bcrypt::hash(&req.password, state.bcrypt_cost)?;
	let otp = new_otp();
	let now = Utc::now();
	let id = Uuid::new_v4();

	sqlx::query(r#"
INSERT INTO users
	(id, email, password_hash, first_name, last_name, department, student_id, batch,
	date_of_birth, phone_number, address, role, otp, otp_purpose, otp_expires,
	is_verified, is_active, created_at)
VALUES
	(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, false, true, ?)
	"#)
		.bind(id)
		.bind(&email)
		.bind(&hash)
		.bind(req.name.first.trim())
		.bind(req.name.last.trim())
		.bind(blank_to_none(req.department))
		.bind(blank_to_none(req.student_id))
		.bind(blank_to_none(req.batch))
		.bind(req.date_of_birth)
		.bind(req.phone_number.trim())
		.bind(blank_to_none(req.address))
		.bind(req.role)
		.bind(&otp)
		.bind(OtpPurpose::Verify)
		.bind(now + Duration::minutes(OTP_TTL_MINUTES))
		.bind(now)
		.execute(state.db.pool()).await
		.map_err(|e| Error::on_unique(e, "user with this email, student id or phone number"))?;

	state.notifier.send_otp(&email, &otp, OtpPurpose::Verify);
	tracing::info!(%id, %email, role = %req.role, "account created, awaiting verification");

	let rec = fetch(state.db.pool(), id).await?.ok_or(Error::NotFound("user"))?;
	Ok(rec.into())
}

/// Consumes the verification code and logs the account in.
pub async fn verify_otp(state: &AppState, req: VerifyOtp) -> Result<Session> {
	let user = fetch_by_email(state, &req.email).await?.ok_or(Error::NotFound("user"))?;
	check_otp(state, &user, OtpPurpose::Verify, &req.otp, Utc::now()).await?;

	// conditional on the code so two racing verifications cannot both win
	let done = sqlx::query(r#"
UPDATE users SET
	is_verified = true, otp = NULL, otp_purpose = NULL, otp_expires = NULL
WHERE
	id = ? AND otp = ? AND otp_purpose = ?
	"#)
		.bind(user.id)
		.bind(req.otp.trim())
		.bind(OtpPurpose::Verify)
		.execute(state.db.pool()).await?;
	if done.rows_affected() == 0 {
		return Err(Error::InvalidOrExpiredOtp);
	}

	tracing::info!(id = %user.id, "account verified");
	let user = fetch(state.db.pool(), user.id).await?.ok_or(Error::NotFound("user"))?;
	Ok(session(state, user))
}

pub async fn resend_otp(state: &AppState, req: EmailOnly) -> Result<()> {
	let user = fetch_by_email(state, &req.email).await?.ok_or(Error::NotFound("user"))?;
	if user.is_verified {
		return Err(Error::Conflict("account is already verified".into()));
	}
	store_otp(state, &user, OtpPurpose::Verify).await
}

pub async fn login(state: &AppState, req: Login) -> Result<Session> {
	let user = fetch_by_email(state, &req.email).await?.ok_or(Error::NotFound("user"))?;
	if !bcrypt::verify(&req.password, &user.password_hash)? {
		tracing::debug!(id = %user.id, "login with wrong password");
		return Err(Error::InvalidCredential);
	}
	if !user.is_verified {
		return Err(Error::NotVerified);
	}
	if !user.is_active {
		return Err(Error::Forbidden("account is deactivated"));
	}
	Ok(session(state, user))
}

pub async fn request_password_reset(state: &AppState, req: EmailOnly) -> Result<()> {
	let user = fetch_by_email(state, &req.email).await?.ok_or(Error::NotFound("user"))?;
	if !user.is_verified {
		return Err(Error::NotVerified);
	}
	store_otp(state, &user, OtpPurpose::Reset).await?;
	tracing::info!(id = %user.id, "password reset requested");
	Ok(())
}

pub async fn reset_password(state: &AppState, req: ResetPassword) -> Result<()> {
	let user = fetch_by_email(state, &req.email).await?.ok_or(Error::NotFound("user"))?;
	check_otp(state, &user, OtpPurpose::Reset, &req.otp, Utc::now()).await?;
	check_password(&req.new_password)?;

	let hash = bcrypt::hash(&req.new_password, state.bcrypt_cost)?;
	let done = sqlx::query(r#"
UPDATE users SET
	password_hash = ?, otp = NULL, otp_purpose = NULL, otp_expires = NULL
WHERE
	id = ? AND otp = ? AND otp_purpose = ?
	"#)
		.bind(&hash)
		.bind(user.id)
		.bind(req.otp.trim())
		.bind(OtpPurpose::Reset)
		.execute(state.db.pool()).await?;
	if done.rows_affected() == 0 {
		return Err(Error::InvalidOrExpiredOtp);
	}
	tracing::info!(id = %user.id, "password replaced");
	Ok(())
}

pub async fn my_profile(state: &AppState, principal: &Principal) -> Result<User> {
	let (me, _) = principal.authorize(Operation::MyProfile)?;
	let rec = fetch(state.db.pool(), me).await?.ok_or(Error::NotFound("user"))?;
	Ok(rec.into())
}

pub async fn get_user(state: &AppState, principal: &Principal, id: Uid) -> Result<User> {
	principal.authorize(Operation::GetUser)?;
	let rec = fetch(state.db.pool(), id).await?.ok_or(Error::NotFound("user"))?;
	Ok(rec.into())
}

pub async fn list_users(state: &AppState, principal: &Principal, filter: UserFilter) -> Result<Vec<User>> {
	principal.authorize(Operation::ListUsers)?;

	let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM users WHERE 1 = 1");
	let columns = [
		("student_id", &filter.student_id),
		("batch", &filter.batch),
		("department", &filter.department),
		("email", &filter.email),
		("phone_number", &filter.phone_number),
		("address", &filter.address),
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
		qb.push(" AND (first_name LIKE ").push_bind(pat.clone()).push(ESCAPE)
			.push(" OR last_name LIKE ").push_bind(pat).push(ESCAPE)
			.push(")");
	}
	if let Some(verified) = filter.is_verified {
		qb.push(" AND is_verified = ").push_bind(verified);
	}
	qb.push(" ORDER BY created_at DESC");

	let rows = qb.build_query_as::<UserRecord>()
		.fetch_all(state.db.pool()).await?;
	Ok(rows.into_iter().map(User::from).collect())
}

/// One keyword against every descriptive field, full name included.
pub async fn search_users(state: &AppState, principal: &Principal, keyword: Option<&str>) -> Result<Vec<User>> {
	principal.authorize(Operation::SearchUsers)?;

	let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM users");
	if let Some(keyword) = keyword.map(str::trim).filter(|k| !k.is_empty()) {
		let pat = contains_pattern(keyword);
		let columns = [
			"first_name || ' ' || last_name",
			"email",
			"department",
			"student_id",
			"batch",
			"phone_number",
			"address",
			"role",
		];
		qb.push(" WHERE ");
		let mut any = qb.separated(" OR ");
		for column in columns {
			any.push(format!("{column} LIKE "))
				.push_bind_unseparated(pat.clone())
				.push_unseparated(ESCAPE);
		}
	}
	qb.push(" ORDER BY created_at DESC");

	let rows = qb.build_query_as::<UserRecord>()
		.fetch_all(state.db.pool()).await?;
	Ok(rows.into_iter().map(User::from).collect())
}

/// Applies the allow-listed fields of `patch` to the caller's own account.
pub async fn update_profile(state: &AppState, principal: &Principal, patch: ProfilePatch) -> Result<User> {
	let (me, _) = principal.authorize(Operation::UpdateProfile)?;

	if patch.is_empty() {
		return my_profile(state, principal).await;
	}
	if let Some(first) = &patch.first_name {
		required("first name", first)?;
	}
	if let Some(last) = &patch.last_name {
		required("last name", last)?;
	}
	if let Some(phone) = &patch.phone_number {
		required("phone number", phone)?;
	}

	let mut qb = QueryBuilder::<Sqlite>::new("UPDATE users SET ");
	let mut set = qb.separated(", ");
	if let Some(first) = patch.first_name {
		set.push("first_name = ").push_bind_unseparated(first.trim().to_string());
	}
	if let Some(last) = patch.last_name {
		set.push("last_name = ").push_bind_unseparated(last.trim().to_string());
	}
	if let Some(department) = patch.department {
		set.push("department = ").push_bind_unseparated(blank_to_none(department));
	}
	if let Some(batch) = patch.batch {
		set.push("batch = ").push_bind_unseparated(blank_to_none(batch));
	}
	if let Some(phone) = patch.phone_number {
		set.push("phone_number = ").push_bind_unseparated(phone.trim().to_string());
	}
	if let Some(address) = patch.address {
		set.push("address = ").push_bind_unseparated(blank_to_none(address));
	}
	qb.push(" WHERE id = ").push_bind(me);

	let done = qb.build()
		.execute(state.db.pool()).await
		.map_err(|e| Error::on_unique(e, "phone number"))?;
	if done.rows_affected() == 0 {
		return Err(Error::NotFound("user"));
	}
	my_profile(state, principal).await
}

/// Activating also marks the account verified, so staff can admit
/// accounts whose owner never received the code.
pub async fn set_active(state: &AppState, principal: &Principal, id: Uid, active: bool) -> Result<User> {
	let (me, _) = principal.authorize(Operation::SetActive)?;
	if me == id {
		return Err(Error::Forbidden("cannot change the active state of your own account"));
	}

	let stmt = if active {
		"UPDATE users SET is_active = true, is_verified = true WHERE id = ?"
	} else {
		"UPDATE users SET is_active = false WHERE id = ?"
	};
	let done = sqlx::query(stmt)
		.bind(id)
		.execute(state.db.pool()).await?;
	if done.rows_affected() == 0 {
		return Err(Error::NotFound("user"));
	}

	tracing::info!(by = %me, target = %id, active, "account state changed");
	let rec = fetch(state.db.pool(), id).await?.ok_or(Error::NotFound("user"))?;
	Ok(rec.into())
}

/// Ledger entries of the deleted account stay behind as orphans.
pub async fn delete_user(state: &AppState, principal: &Principal, id: Uid) -> Result<()> {
	let (me, _) = principal.authorize(Operation::DeleteUser)?;
	if me == id {
		return Err(Error::Forbidden("cannot delete your own account"));
	}

	let done = sqlx::query("DELETE FROM users WHERE id = ?")
		.bind(id)
		.execute(state.db.pool()).await?;
	if done.rows_affected() == 0 {
		return Err(Error::NotFound("user"));
	}
	tracing::info!(by = %me, target = %id, "account deleted");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn otp_is_six_digits() {
		for _ in 0..200 {
			let otp = new_otp();
			assert_eq!(otp.len(), 6);
			assert!(otp.chars().all(|c| c.is_ascii_digit()));
		}
	}

	#[test]
	fn short_passwords_are_rejected() {
		assert!(matches!(check_password("short"), Err(Error::Validation(_))));
		assert!(check_password("long enough").is_ok());
	}

	#[test]
	fn emails_are_normalized() {
		assert_eq!(normalize_email("  A@X.com "), "a@x.com");
	}
}
