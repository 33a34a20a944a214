use std::sync::Mutex;

use crate::types::OtpPurpose;

/// Where one-time codes go. Delivery itself (mail, sms) is somebody
/// else's problem; the identity store only hands codes over.
pub trait Notifier: Send + Sync {
	fn send_otp(&self, email: &str, otp: &str, purpose: OtpPurpose);
}

/// Writes codes to the log. The default when no mailer is wired in.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
	fn send_otp(&self, email: &str, otp: &str, purpose: OtpPurpose) {
		tracing::info!(%email, ?purpose, "otp issued");
		tracing::debug!(%email, %otp, "otp code");
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
	pub email: String,
	pub otp: String,
	pub purpose: OtpPurpose,
}

/// Keeps every code in memory, newest last.
#[derive(Debug, Default)]
pub struct Outbox(Mutex<Vec<Sent>>);

impl Outbox {
	pub fn last_for(&self, email: &str) -> Option<Sent> {
		let sent = self.0.lock().unwrap_or_else(|e| e.into_inner());
		sent.iter().rev().find(|s| s.email == email).cloned()
	}

	pub fn len(&self) -> usize {
		self.0.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Notifier for Outbox {
	fn send_otp(&self, email: &str, otp: &str, purpose: OtpPurpose) {
		let mut sent = self.0.lock().unwrap_or_else(|e| e.into_inner());
		sent.push(Sent{
			email: email.to_string(),
			otp: otp.to_string(),
			purpose,
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn outbox_returns_newest_code() {
		let outbox = Outbox::default();
		outbox.send_otp("a@x.com", "111111", OtpPurpose::Verify);
		outbox.send_otp("b@x.com", "222222", OtpPurpose::Verify);
		outbox.send_otp("a@x.com", "333333", OtpPurpose::Reset);

		let last = outbox.last_for("a@x.com").unwrap();
		assert_eq!(last.otp, "333333");
		assert_eq!(last.purpose, OtpPurpose::Reset);
		assert_eq!(outbox.len(), 3);
		assert!(outbox.last_for("c@x.com").is_none());
	}
}
