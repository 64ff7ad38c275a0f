//! Long-lived API access keys.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The access key of a user. Each user holds at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessKey {
    pub user_id: i32,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expiration: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

impl AccessKey {
    /// Build a freshly generated key for a user.
    pub fn generate(
        user_id: i32,
        expiration: Option<DateTime<Utc>>,
        scope: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            token: generate_token(),
            created_at: now,
            expiration,
            scope,
        }
    }

    /// A key with no expiration never expires; otherwise it is live strictly
    /// before its expiration instant.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            None => true,
            Some(expiration) => expiration > now,
        }
    }
}

/// Generate an opaque 64 character token from two random v4 UUIDs.
pub fn generate_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_expiration_boundary() {
        let now = Utc::now();
        let mut key = AccessKey::generate(1, None, None, now);
        assert!(key.is_live_at(now));

        key.expiration = Some(now);
        assert!(!key.is_live_at(now));

        key.expiration = Some(now + Duration::seconds(1));
        assert!(key.is_live_at(now));
    }
}
