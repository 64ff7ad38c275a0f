//! Access key command.

use chrono::{Duration, Utc};
use console::style;

use super::user::find_user;
use crate::auth::CredentialStore;
use crate::config::Settings;

pub async fn cmd_regenerate(
    settings: &Settings,
    email: &str,
    expires_days: Option<i64>,
    scope: Option<String>,
) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    let user = find_user(&ctx, email).await?;

    let expiration = expires_days.map(|days| Utc::now() + Duration::days(days));
    let key = CredentialStore::new(ctx)
        .regenerate(user.id, expiration, scope)
        .await?;

    println!("{} New access key for {}", style("✓").green(), user.email);
    println!("  {}", key.token);
    if let Some(expiration) = key.expiration {
        println!("  expires {}", expiration.to_rfc3339());
    }
    Ok(())
}
