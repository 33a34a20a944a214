use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub type Uid = Uuid;
pub type Bid = Uuid;
pub type Hid = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
	Student,
	Teacher,
	Librarian,
	Admin,
}

impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Role::Student => "student",
			Role::Teacher => "teacher",
			Role::Librarian => "librarian",
			Role::Admin => "admin",
		}
	}

	/// Roles that staff the desk and may not be self-assigned at signup.
	pub fn is_privileged(self) -> bool {
		matches!(self, Role::Librarian | Role::Admin)
	}
}

impl std::fmt::Display for Role {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OtpPurpose {
	Verify,
	Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
	pub first: String,
	pub last: String,
}

impl Name {
	pub fn full(&self) -> String {
		format!("{} {}", self.first, self.last)
	}
}

/// Row as stored, secrets included. Never leaves the crate.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct UserRecord {
	pub id: Uid,
	pub email: String,
	pub password_hash: String,
	pub first_name: String,
	pub last_name: String,
	pub department: Option<String>,
	pub student_id: Option<String>,
	pub batch: Option<String>,
	pub date_of_birth: NaiveDate,
	pub phone_number: String,
	pub address: Option<String>,
	pub role: Role,
	pub otp: Option<String>,
	pub otp_purpose: Option<OtpPurpose>,
	pub otp_expires: Option<DateTime<Utc>>,
	pub is_verified: bool,
	pub is_active: bool,
	pub created_at: DateTime<Utc>,
}

/// Public projection of an account: no password hash, no otp.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	pub id: Uid,
	pub email: String,
	pub name: Name,
	pub department: Option<String>,
	pub student_id: Option<String>,
	pub batch: Option<String>,
	pub date_of_birth: NaiveDate,
	pub phone_number: String,
	pub address: Option<String>,
	pub role: Role,
	pub is_verified: bool,
	pub is_active: bool,
	pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for User {
	fn from(rec: UserRecord) -> Self {
		User{
			id: rec.id,
			email: rec.email,
			name: Name{ first: rec.first_name, last: rec.last_name },
			department: rec.department,
			student_id: rec.student_id,
			batch: rec.batch,
			date_of_birth: rec.date_of_birth,
			phone_number: rec.phone_number,
			address: rec.address,
			role: rec.role,
			is_verified: rec.is_verified,
			is_active: rec.is_active,
			created_at: rec.created_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
	#[serde(rename = "reviewer")]
	pub reviewer_id: Uid,
	pub reviewer_name: String,
	pub rating: i64,
	pub comment: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Book {
	pub id: Bid,
	pub title: String,
	pub author: String,
	pub category: String,
	pub department: String,
	pub description: Option<String>,
	pub published_date: Option<String>,
	pub isbn: String,
	pub total_quantity: i64,
	pub current_quantity: i64,
	pub created_at: DateTime<Utc>,
	#[sqlx(skip)]
	pub reviews: Vec<Review>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BorrowStatus {
	Borrowed,
	Returned,
	Overdue,
}

/// One loan, as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BorrowingHistory {
	pub id: Hid,
	#[serde(rename = "book")]
	pub book_id: Bid,
	#[serde(rename = "user")]
	pub user_id: Uid,
	pub borrow_date: DateTime<Utc>,
	pub expected_return_date: DateTime<Utc>,
	pub actual_return_date: Option<DateTime<Utc>>,
	pub status: BorrowStatus,
	pub fines: f64,
	pub comment: Option<String>,
}

/// A ledger entry joined with its current book and borrower.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Borrowing {
	pub id: Hid,
	pub borrow_date: DateTime<Utc>,
	pub expected_return_date: DateTime<Utc>,
	pub actual_return_date: Option<DateTime<Utc>>,
	pub status: BorrowStatus,
	pub fines: f64,
	pub comment: Option<String>,
	pub book: Book,
	pub user: User,
}

// request payloads

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signup {
	pub email: String,
	pub password: String,
	pub name: Name,
	pub department: Option<String>,
	pub student_id: Option<String>,
	pub batch: Option<String>,
	pub date_of_birth: NaiveDate,
	pub phone_number: String,
	pub address: Option<String>,
	pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Login {
	pub email: String,
	pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyOtp {
	pub email: String,
	pub otp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailOnly {
	pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPassword {
	pub email: String,
	pub otp: String,
	pub new_password: String,
}

/// Allow-listed profile edit. Identity, role and account flags are not
/// part of it, so they can never be set through this path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
	pub first_name: Option<String>,
	pub last_name: Option<String>,
	#[serde(default, deserialize_with = "nullable")]
	pub department: Option<Option<String>>,
	#[serde(default, deserialize_with = "nullable")]
	pub batch: Option<Option<String>>,
	pub phone_number: Option<String>,
	#[serde(default, deserialize_with = "nullable")]
	pub address: Option<Option<String>>,
}

impl ProfilePatch {
	pub fn is_empty(&self) -> bool {
		self.first_name.is_none()
			&& self.last_name.is_none()
			&& self.department.is_none()
			&& self.batch.is_none()
			&& self.phone_number.is_none()
			&& self.address.is_none()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
	pub student_id: Option<String>,
	pub batch: Option<String>,
	pub department: Option<String>,
	pub email: Option<String>,
	pub phone_number: Option<String>,
	pub address: Option<String>,
	pub is_verified: Option<bool>,
	pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserSearch {
	pub search_keyword: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
	pub title: String,
	pub author: String,
	pub category: String,
	pub department: String,
	pub description: Option<String>,
	pub published_date: Option<String>,
	pub isbn: String,
	pub total_quantity: i64,
}

/// Allow-listed book edit. An `id` key in the payload is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPatch {
	pub title: Option<String>,
	pub author: Option<String>,
	pub category: Option<String>,
	pub department: Option<String>,
	#[serde(default, deserialize_with = "nullable")]
	pub description: Option<Option<String>>,
	#[serde(default, deserialize_with = "nullable")]
	pub published_date: Option<Option<String>>,
	pub isbn: Option<String>,
	pub total_quantity: Option<i64>,
}

impl BookPatch {
	pub fn is_empty(&self) -> bool {
		self.title.is_none()
			&& self.author.is_none()
			&& self.category.is_none()
			&& self.department.is_none()
			&& self.description.is_none()
			&& self.published_date.is_none()
			&& self.isbn.is_none()
			&& self.total_quantity.is_none()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookFilter {
	pub department: Option<String>,
	pub author: Option<String>,
	pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReview {
	pub rating: i64,
	#[serde(default)]
	pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assign {
	pub book_id: Bid,
	pub user_id: Uid,
	pub expected_return_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReturnBook {
	pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowingFilter {
	pub status: Option<BorrowStatus>,
	pub user_id: Option<Uid>,
	pub book_id: Option<Bid>,
	pub title: Option<String>,
	pub author: Option<String>,
	pub book_department: Option<String>,
	pub name: Option<String>,
	pub user_department: Option<String>,
}

/// Keeps "absent" (`None`) apart from "present but null" (`Some(None)`).
fn nullable<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
	D: Deserializer<'de>,
	T: Deserialize<'de>,
{
	Option::<T>::deserialize(de).map(Some)
}
