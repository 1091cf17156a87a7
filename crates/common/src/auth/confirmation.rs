//! Confirmation codes
//!
//! A code is a keyed digest of the identity and its `last_login` marker.
//! Nothing is stored: once `last_login` moves, every earlier code stops
//! matching.

use crate::db::models::User;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const CODE_LEN: usize = 32;

#[derive(Clone)]
pub struct ConfirmationCodes {
    secret: String,
}

impl ConfirmationCodes {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Code for the user's current state
    pub fn make(&self, user: &User) -> String {
        let mut code = hex::encode(self.digest(user));
        code.truncate(CODE_LEN);
        code
    }

    /// True when `code` matches the user's current state
    pub fn check(&self, user: &User, code: &str) -> bool {
        let expected = self.make(user);
        expected.as_bytes().ct_eq(code.as_bytes()).into()
    }

    fn digest(&self, user: &User) -> Vec<u8> {
        let fingerprint = user
            .last_login
            .map(|ts| ts.timestamp_micros().to_string())
            .unwrap_or_else(|| "never".to_string());

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(user.id.to_string().as_bytes());
        mac.update(b"\x00");
        mac.update(user.email.as_bytes());
        mac.update(b"\x00");
        mac.update(fingerprint.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;
    use chrono::{TimeZone, Utc};

    fn user() -> User {
        User {
            id: 7,
            username: "alice".into(),
            email: "alice@example.com".into(),
            role: Role::User,
            bio: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            is_superuser: false,
            last_login: None,
            date_joined: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_code_is_deterministic() {
        let codes = ConfirmationCodes::new("secret");
        let alice = user();

        let code = codes.make(&alice);
        assert_eq!(code.len(), CODE_LEN);
        assert_eq!(code, codes.make(&alice));
        assert!(codes.check(&alice, &code));
    }

    #[test]
    fn test_login_invalidates_code() {
        let codes = ConfirmationCodes::new("secret");
        let mut alice = user();
        let code = codes.make(&alice);

        alice.last_login = Some(Utc::now());
        assert!(!codes.check(&alice, &code));
    }

    #[test]
    fn test_code_bound_to_secret_and_email() {
        let alice = user();
        let code = ConfirmationCodes::new("secret").make(&alice);

        assert!(!ConfirmationCodes::new("other").check(&alice, &code));

        let mut moved = alice.clone();
        moved.email = "new@example.com".into();
        assert!(!ConfirmationCodes::new("secret").check(&moved, &code));
    }

    #[test]
    fn test_malformed_code_rejected() {
        let codes = ConfirmationCodes::new("secret");
        assert!(!codes.check(&user(), ""));
        assert!(!codes.check(&user(), "short"));

        let mut tampered = codes.make(&user());
        tampered.replace_range(0..1, if tampered.starts_with('0') { "1" } else { "0" });
        assert!(!codes.check(&user(), &tampered));
    }

    #[test]
    fn test_code_is_truncated_hmac() {
        let codes = ConfirmationCodes::new("secret");
        let alice = user();

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"7\x00alice@example.com\x00never");
        let full = hex::encode(mac.finalize().into_bytes());

        assert_eq!(codes.make(&alice), full[..CODE_LEN]);
    }
}
