//! Credential store: access key validation and regeneration.
//!
//! Every validation attempt is audited on the `meteodist::audit` target with
//! the username and outcome. Tokens are never logged.

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::models::{AccessKey, User};
use crate::repository::{DbContext, DbError};

/// Credentials presented by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP Basic: email and access key.
    Basic { username: String, token: String },
    /// Bearer access key.
    Bearer(String),
}

impl Credentials {
    /// Parse an `Authorization` header value. The scheme is case-insensitive.
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, rest) = value.split_once(' ')?;
        let rest = rest.trim();

        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(rest)
                .ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, token) = decoded.split_once(':')?;
            Some(Self::Basic {
                username: username.to_string(),
                token: token.to_string(),
            })
        } else if scheme.eq_ignore_ascii_case("bearer") && !rest.is_empty() {
            Some(Self::Bearer(rest.to_string()))
        } else {
            None
        }
    }
}

/// A key matches iff it is live at `now` and the tokens are equal exactly.
/// An absent record never matches.
pub fn validate(provided: &str, record: Option<&AccessKey>, now: DateTime<Utc>) -> bool {
    match record {
        Some(key) => key.is_live_at(now) && key.token == provided,
        None => false,
    }
}

fn audit(username: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "unauthorized" };
    tracing::info!(
        target: "meteodist::audit",
        username = %username,
        outcome = outcome,
        "credential validation"
    );
}

/// Access key lookups and rotation over the user and key repositories.
#[derive(Clone)]
pub struct CredentialStore {
    ctx: DbContext,
}

impl CredentialStore {
    pub fn new(ctx: DbContext) -> Self {
        Self { ctx }
    }

    /// Resolve credentials to a user. Unknown users, missing keys, expired
    /// keys and wrong tokens all yield `None`.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, DbError> {
        match credentials {
            Credentials::Basic { username, token } => {
                let user = self.ctx.users().get_by_email(username).await?;
                let key = match &user {
                    Some(user) => self.ctx.access_keys().get_for_user(user.id).await?,
                    None => None,
                };
                let ok = validate(token, key.as_ref(), now);
                audit(username, ok);
                Ok(if ok { user } else { None })
            }
            Credentials::Bearer(token) => {
                let key = self.ctx.access_keys().get_by_token(token).await?;
                let user = match &key {
                    Some(key) => self.ctx.users().get(key.user_id).await?,
                    None => None,
                };
                let ok = user.is_some() && validate(token, key.as_ref(), now);
                let username = user.as_ref().map(|u| u.email.as_str()).unwrap_or("-");
                audit(username, ok);
                Ok(if ok { user } else { None })
            }
        }
    }

    /// Issue a new key for a user, replacing the previous one.
    pub async fn regenerate(
        &self,
        user_id: i32,
        expiration: Option<DateTime<Utc>>,
        scope: Option<String>,
    ) -> Result<AccessKey, DbError> {
        let key = AccessKey::generate(user_id, expiration, scope, Utc::now());
        self.ctx.access_keys().upsert(&key).await?;
        tracing::info!(user_id, "access key regenerated");
        Ok(key)
    }

    pub async fn current_key(&self, user_id: i32) -> Result<Option<AccessKey>, DbError> {
        self.ctx.access_keys().get_for_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::UserSpec;
    use chrono::Duration;
    use tempfile::tempdir;

    fn basic(username: &str, token: &str) -> Credentials {
        Credentials::Basic {
            username: username.to_string(),
            token: token.to_string(),
        }
    }

    #[test]
    fn test_validate_rules() {
        let now = Utc::now();
        let mut key = AccessKey::generate(1, None, None, now);
        let token = key.token.clone();

        assert!(validate(&token, Some(&key), now));
        assert!(!validate(&token.to_uppercase(), Some(&key), now));
        assert!(!validate(&token, None, now));

        key.expiration = Some(now - Duration::seconds(1));
        assert!(!validate(&token, Some(&key), now));
        key.expiration = Some(now + Duration::days(1));
        assert!(validate(&token, Some(&key), now));
    }

    #[test]
    fn test_parse_authorization_header() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("a@example.org:s3cret");
        assert_eq!(
            Credentials::from_header(&format!("Basic {}", encoded)),
            Some(basic("a@example.org", "s3cret"))
        );
        assert_eq!(
            Credentials::from_header("bearer abc"),
            Some(Credentials::Bearer("abc".to_string()))
        );
        assert_eq!(Credentials::from_header("Basic !!!"), None);
        assert_eq!(Credentials::from_header("Token abc"), None);
        assert_eq!(Credentials::from_header("Bearer "), None);
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_previous_key() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let user = ctx
            .users()
            .create(&UserSpec {
                email: "k@example.org".to_string(),
                name: "K".to_string(),
                disk_quota: 0,
                max_requests_per_hour: 0,
                request_expiration_days: None,
                auto_delete: false,
            })
            .await
            .unwrap();
        let store = CredentialStore::new(ctx);
        let now = Utc::now();

        // No key yet.
        assert!(store
            .authenticate(&basic("k@example.org", "anything"), now)
            .await
            .unwrap()
            .is_none());

        let first = store.regenerate(user.id, None, None).await.unwrap();
        let second = store.regenerate(user.id, None, None).await.unwrap();
        assert_ne!(first.token, second.token);

        assert!(store
            .authenticate(&basic("k@example.org", &first.token), now)
            .await
            .unwrap()
            .is_none());
        let found = store
            .authenticate(&basic("k@example.org", &second.token), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);

        assert!(store
            .authenticate(&Credentials::Bearer(second.token.clone()), now)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .authenticate(&Credentials::Bearer(first.token), now)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .authenticate(&basic("nobody@example.org", &second.token), now)
            .await
            .unwrap()
            .is_none());

        // Expired keys are refused.
        store
            .regenerate(user.id, Some(now - Duration::minutes(1)), None)
            .await
            .unwrap();
        let expired = store.current_key(user.id).await.unwrap().unwrap();
        assert!(store
            .authenticate(&basic("k@example.org", &expired.token), now)
            .await
            .unwrap()
            .is_none());
    }
}
