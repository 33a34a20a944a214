//! Access gate: bearer tokens, the request principal and the role policy.
//!
//! Tokens are `base64url(claims json) "." base64url(hmac-sha256)`. A bad or
//! missing token never fails a request here; the request just carries the
//! anonymous principal and the operation decides whether that is fatal.

use axum::{
	async_trait,
	extract::{FromRef, FromRequestParts},
	http::{header, request::Parts},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::convert::Infallible;
use tower_cookies::Cookies;

use crate::error::{Error, Result};
use crate::types::{Role, Uid};
use crate::AppState;

pub const TOKEN_COOKIE: &str = "token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
	pub sub: Uid,
	pub role: Role,
	pub email: String,
	pub iat: i64,
	pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
	InvalidFormat,
	InvalidSignature,
	Expired,
}

pub struct TokenCodec {
	mac: Hmac<Sha256>,
	ttl: Duration,
}

impl TokenCodec {
	pub fn new(secret: &[u8], ttl: Duration) -> std::result::Result<Self, hmac::digest::InvalidLength> {
		let mac = <Hmac<Sha256>>::new_from_slice(secret)?;
		Ok(Self { mac, ttl })
	}

	fn mac(&self) -> Hmac<Sha256> {
		self.mac.clone()
	}

	pub fn issue(&self, sub: Uid, role: Role, email: &str, now: DateTime<Utc>) -> String {
		let claims = Claims{
			sub,
			role,
			email: email.to_string(),
			iat: now.timestamp(),
			exp: (now + self.ttl).timestamp(),
		};
		// plain struct of strings and ints, serializing it cannot fail
		let body = serde_json::to_vec(&claims).unwrap_or_default();
		let mut mac = self.mac();
		mac.update(&body);
		let sig = mac.finalize().into_bytes();

		format!("{}.{}", URL_SAFE_NO_PAD.encode(&body), URL_SAFE_NO_PAD.encode(sig))
	}

	pub fn verify(&self, token: &str, now: DateTime<Utc>) -> std::result::Result<Claims, TokenError> {
		let (body, sig) = token.split_once('.').ok_or(TokenError::InvalidFormat)?;
		let body = URL_SAFE_NO_PAD.decode(body).map_err(|_| TokenError::InvalidFormat)?;
		let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| TokenError::InvalidFormat)?;

		let mut mac = self.mac();
		mac.update(&body);
		mac.verify_slice(&sig).map_err(|_| TokenError::InvalidSignature)?;

		let claims: Claims = serde_json::from_slice(&body).map_err(|_| TokenError::InvalidFormat)?;
		if claims.exp <= now.timestamp() {
			return Err(TokenError::Expired);
		}
		Ok(claims)
	}
}

/// Who is calling. Attached to every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
	Anonymous,
	User { id: Uid, role: Role },
}

impl Principal {
	pub fn id(&self) -> Option<Uid> {
		match self {
			Principal::Anonymous => None,
			Principal::User { id, .. } => Some(*id),
		}
	}

	pub fn role(&self) -> Option<Role> {
		match self {
			Principal::Anonymous => None,
			Principal::User { role, .. } => Some(*role),
		}
	}

	/// Checks the policy for `op` before anything is touched.
	pub fn authorize(&self, op: Operation) -> Result<(Uid, Role)> {
		match (op.access(), self) {
			(_, Principal::Anonymous) => Err(Error::Unauthorized("authentication required, please log in")),
			(Access::Authenticated, Principal::User { id, role }) => Ok((*id, *role)),
			(Access::Roles(allowed), Principal::User { id, role }) => {
				if allowed.contains(role) {
					Ok((*id, *role))
				} else {
					Err(Error::Unauthorized("not authorized"))
				}
			},
		}
	}
}

impl From<Claims> for Principal {
	fn from(claims: Claims) -> Self {
		Principal::User { id: claims.sub, role: claims.role }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
	Authenticated,
	Roles(&'static [Role]),
}

const STAFF: &[Role] = &[Role::Admin, Role::Librarian];
const ADMIN: &[Role] = &[Role::Admin];

/// Every gated operation. Public ones (signup, login, otp) never ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	ListBooks,
	GetBook,
	CreateBook,
	UpdateBook,
	DeleteBook,
	AddReview,
	AssignBook,
	ReturnBook,
	ListBorrowings,
	ListUsers,
	SearchUsers,
	GetUser,
	SetActive,
	DeleteUser,
	MyProfile,
	UpdateProfile,
	AdminDashboard,
	UserDashboard,
}

impl Operation {
	pub fn access(self) -> Access {
		use Operation::*;
		match self {
			ListBooks | GetBook | AddReview => Access::Authenticated,
			CreateBook | UpdateBook | DeleteBook => Access::Roles(STAFF),
			AssignBook | ReturnBook | ListBorrowings => Access::Roles(STAFF),
			ListUsers | SearchUsers => Access::Roles(ADMIN),
			GetUser | SetActive | DeleteUser => Access::Roles(STAFF),
			MyProfile | UpdateProfile => Access::Authenticated,
			AdminDashboard => Access::Roles(STAFF),
			UserDashboard => Access::Authenticated,
		}
	}
}

fn bearer(parts: &Parts) -> Option<String> {
	let from_header = parts.headers
		.get(header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
		.map(|t| t.trim().to_string());
	if from_header.is_some() {
		return from_header;
	}
	parts.extensions
		.get::<Cookies>()
		.and_then(|cookies| cookies.get(TOKEN_COOKIE))
		.map(|c| c.value().to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
	AppState: FromRef<S>,
	S: Send + Sync,
{
	type Rejection = Infallible;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
		let Some(token) = bearer(parts) else {
			return Ok(Principal::Anonymous);
		};
		let app = AppState::from_ref(state);
		match app.tokens.verify(&token, Utc::now()) {
			Ok(claims) => Ok(claims.into()),
			Err(e) => {
				tracing::debug!(error = ?e, "rejected bearer token");
				Ok(Principal::Anonymous)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use uuid::Uuid;

	fn codec() -> TokenCodec {
		TokenCodec::new(b"0123456789abcdef0123456789abcdef", Duration::hours(1)).unwrap()
	}

	#[test]
	fn token_roundtrip_carries_principal() {
		let id = Uuid::new_v4();
		let now = Utc::now();
		let token = codec().issue(id, Role::Librarian, "l@x.com", now);
		let claims = codec().verify(&token, now).unwrap();
		assert_eq!(Principal::from(claims), Principal::User { id, role: Role::Librarian });
	}

	#[test]
	fn expired_token_is_rejected() {
		let now = Utc::now();
		let token = codec().issue(Uuid::new_v4(), Role::Student, "s@x.com", now);
		let later = now + Duration::hours(1) + Duration::seconds(1);
		assert_eq!(codec().verify(&token, later), Err(TokenError::Expired));
	}

	#[test]
	fn tampered_token_is_rejected() {
		let now = Utc::now();
		let token = codec().issue(Uuid::new_v4(), Role::Student, "s@x.com", now);
		let (_, sig) = token.split_once('.').unwrap();

		let forged = Claims{
			sub: Uuid::new_v4(),
			role: Role::Admin,
			email: "s@x.com".into(),
			iat: now.timestamp(),
			exp: now.timestamp() + 3600,
		};
		let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
		let forged = format!("{body}.{sig}");
		assert_eq!(codec().verify(&forged, now), Err(TokenError::InvalidSignature));

		let other = TokenCodec::new(b"another-secret-another-secret!!!", Duration::hours(1)).unwrap();
		assert_eq!(other.verify(&token, now), Err(TokenError::InvalidSignature));
		assert_eq!(codec().verify("garbage", now), Err(TokenError::InvalidFormat));
	}

	#[test]
	fn anonymous_is_rejected_everywhere() {
		for op in [Operation::ListBooks, Operation::AssignBook, Operation::MyProfile] {
			assert!(matches!(Principal::Anonymous.authorize(op), Err(Error::Unauthorized(_))));
		}
	}

	#[test]
	fn policy_table() {
		let student = Principal::User { id: Uuid::new_v4(), role: Role::Student };
		let librarian = Principal::User { id: Uuid::new_v4(), role: Role::Librarian };
		let admin = Principal::User { id: Uuid::new_v4(), role: Role::Admin };

		assert!(student.authorize(Operation::ListBooks).is_ok());
		assert!(student.authorize(Operation::CreateBook).is_err());
		assert!(student.authorize(Operation::AssignBook).is_err());
		assert!(librarian.authorize(Operation::AssignBook).is_ok());
		assert!(librarian.authorize(Operation::DeleteUser).is_ok());
		// listing every account stays with admins
		assert!(librarian.authorize(Operation::ListUsers).is_err());
		assert!(admin.authorize(Operation::ListUsers).is_ok());
	}
}
