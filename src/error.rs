use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure an operation can surface to its caller.
///
/// Nothing here is retried; the REST adapter turns each variant into a
/// structured response and the process keeps running.
#[derive(Debug, Error)]
pub enum Error {
	#[error("{0}")]
	Validation(String),

	#[error("{0}")]
	Conflict(String),

	#[error("{0} not found")]
	NotFound(&'static str),

	#[error("{0}")]
	Unauthorized(&'static str),

	#[error("{0}")]
	Forbidden(&'static str),

	#[error("invalid password")]
	InvalidCredential,

	#[error("account is not verified")]
	NotVerified,

	#[error("invalid or expired otp")]
	InvalidOrExpiredOtp,

	#[error("no otp was requested for this account")]
	OtpNotRequested,

	#[error("book is not available")]
	Unavailable,

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("password hashing failed: {0}")]
	Hash(#[from] bcrypt::BcryptError),
}

impl Error {
	pub fn status(&self) -> StatusCode {
		match self {
			Error::Validation(_)
			| Error::Conflict(_)
			| Error::InvalidCredential
			| Error::InvalidOrExpiredOtp
			| Error::OtpNotRequested
			| Error::Unavailable => StatusCode::BAD_REQUEST,
			Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
			Error::Forbidden(_) | Error::NotVerified => StatusCode::FORBIDDEN,
			Error::NotFound(_) => StatusCode::NOT_FOUND,
			Error::Database(_) | Error::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	pub fn code(&self) -> &'static str {
		match self {
			Error::Validation(_) => "VALIDATION_ERROR",
			Error::Conflict(_) => "CONFLICT",
			Error::NotFound(_) => "NOT_FOUND",
			Error::Unauthorized(_) => "UNAUTHORIZED",
			Error::Forbidden(_) => "FORBIDDEN",
			Error::InvalidCredential => "INVALID_CREDENTIAL",
			Error::NotVerified => "NOT_VERIFIED",
			Error::InvalidOrExpiredOtp => "INVALID_OR_EXPIRED_OTP",
			Error::OtpNotRequested => "OTP_NOT_REQUESTED",
			Error::Unavailable => "UNAVAILABLE",
			Error::Database(_) | Error::Hash(_) => "INTERNAL_ERROR",
		}
	}

	/// Maps a unique-index violation to `Conflict`, anything else stays internal.
	pub fn on_unique(err: sqlx::Error, what: &str) -> Error {
		let unique = err.as_database_error()
			.map(|db| db.is_unique_violation())
			.unwrap_or(false);
		if unique {
			Error::Conflict(format!("{what} already exists"))
		} else {
			Error::Database(err)
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = self.status();
		let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
			tracing::error!(error = %self, "operation failed");
			"internal server error".to_string()
		} else {
			self.to_string()
		};
		(status, Json(serde_json::json!({
			"success": false,
			"code": self.code(),
			"message": message,
		}))).into_response()
	}
}
