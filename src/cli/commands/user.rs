//! User administration commands.

use console::style;

use crate::config::Settings;
use crate::models::User;
use crate::repository::{DbContext, UserSpec};

pub(super) async fn find_user(ctx: &DbContext, email: &str) -> anyhow::Result<User> {
    ctx.users()
        .get_by_email(email)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found: {}", email))
}

pub async fn cmd_user_create(settings: &Settings, spec: &UserSpec) -> anyhow::Result<()> {
    if spec.request_expiration_days.is_some_and(|days| days <= 0) {
        anyhow::bail!("Expiration must be at least one day");
    }
    let ctx = settings.create_db_context();
    ctx.init_schema().await?;

    if ctx.users().get_by_email(&spec.email).await?.is_some() {
        anyhow::bail!("User already exists: {}", spec.email);
    }

    let user = ctx.users().create(spec).await?;

    println!(
        "{} Created user {} (id {})",
        style("✓").green(),
        user.email,
        user.id
    );
    Ok(())
}

pub async fn cmd_user_grant(settings: &Settings, email: &str, dataset: &str) -> anyhow::Result<()> {
    if settings.find_dataset(dataset).is_none() {
        anyhow::bail!("Dataset not found: {}", dataset);
    }
    let ctx = settings.create_db_context();
    let user = find_user(&ctx, email).await?;

    ctx.users().grant_dataset(user.id, dataset).await?;
    println!(
        "{} Granted {} access to {}",
        style("✓").green(),
        user.email,
        dataset
    );
    Ok(())
}
