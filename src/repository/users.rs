//! User repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{NewUser, UserRecord};
use super::pool::{DbError, DbPool};
use super::util::{format_datetime, parse_datetime};
use crate::models::User;
use crate::schema::{file_outputs, user_datasets, users};

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        User {
            id: record.id,
            email: record.email,
            name: record.name,
            disk_quota: record.disk_quota,
            max_requests_per_hour: record.max_requests_per_hour,
            request_expiration_days: record.request_expiration_days,
            auto_delete: record.auto_delete != 0,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Fields for creating a user.
#[derive(Debug, Clone)]
pub struct UserSpec {
    pub email: String,
    pub name: String,
    pub disk_quota: i64,
    pub max_requests_per_hour: i32,
    pub request_expiration_days: Option<i32>,
    pub auto_delete: bool,
}

impl UserSpec {
    /// Spec with no quota and no hourly limit.
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            email: email.to_string(),
            name: name.to_string(),
            disk_quota: 0,
            max_requests_per_hour: 0,
            request_expiration_days: None,
            auto_delete: false,
        }
    }
}

#[derive(Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a user and return the stored row.
    pub async fn create(&self, spec: &UserSpec) -> Result<User, DbError> {
        let mut conn = self.pool.get().await?;
        let created_at = format_datetime(Utc::now());

        diesel::insert_into(users::table)
            .values(NewUser {
                email: &spec.email,
                name: &spec.name,
                disk_quota: spec.disk_quota,
                max_requests_per_hour: spec.max_requests_per_hour,
                request_expiration_days: spec.request_expiration_days,
                auto_delete: i32::from(spec.auto_delete),
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        users::table
            .filter(users::email.eq(&spec.email))
            .first::<UserRecord>(&mut conn)
            .await
            .map(User::from)
    }

    /// Users whose finished requests expire automatically.
    pub async fn list_auto_delete(&self) -> Result<Vec<User>, DbError> {
        let mut conn = self.pool.get().await?;

        users::table
            .filter(users::auto_delete.ne(0))
            .filter(users::request_expiration_days.gt(0))
            .order(users::id.asc())
            .load::<UserRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(User::from).collect())
    }

    pub async fn get(&self, id: i32) -> Result<Option<User>, DbError> {
        let mut conn = self.pool.get().await?;

        users::table
            .find(id)
            .first::<UserRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(User::from))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let mut conn = self.pool.get().await?;

        users::table
            .filter(users::email.eq(email))
            .first::<UserRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(User::from))
    }

    /// Authorize a user for a non-public dataset.
    pub async fn grant_dataset(&self, user_id: i32, dataset: &str) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;

        diesel::replace_into(user_datasets::table)
            .values((
                user_datasets::user_id.eq(user_id),
                user_datasets::dataset_name.eq(dataset),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Names of the datasets a user has been explicitly authorized for.
    pub async fn authorized_datasets(&self, user_id: i32) -> Result<Vec<String>, DbError> {
        let mut conn = self.pool.get().await?;

        user_datasets::table
            .filter(user_datasets::user_id.eq(user_id))
            .select(user_datasets::dataset_name)
            .order(user_datasets::dataset_name.asc())
            .load::<String>(&mut conn)
            .await
    }

    /// Total bytes of output files owned by a user.
    pub async fn used_space(&self, user_id: i32) -> Result<i64, DbError> {
        let mut conn = self.pool.get().await?;

        let sizes: Vec<i64> = file_outputs::table
            .filter(file_outputs::user_id.eq(user_id))
            .select(file_outputs::size)
            .load(&mut conn)
            .await?;

        Ok(sizes.into_iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    pub fn spec(email: &str) -> UserSpec {
        UserSpec {
            email: email.to_string(),
            name: "Test User".to_string(),
            disk_quota: 1_000_000,
            max_requests_per_hour: 10,
            request_expiration_days: None,
            auto_delete: false,
        }
    }

    #[tokio::test]
    async fn test_user_crud() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let repo = ctx.users();

        let user = repo.create(&spec("a@example.org")).await.unwrap();
        assert_eq!(user.email, "a@example.org");
        assert!(user.is_rate_limited());

        let fetched = repo.get_by_email("a@example.org").await.unwrap().unwrap();
        assert_eq!(fetched.id, user.id);
        assert!(repo.get_by_email("b@example.org").await.unwrap().is_none());

        // Emails are unique.
        assert!(repo.create(&spec("a@example.org")).await.is_err());

        repo.grant_dataset(user.id, "lm5").await.unwrap();
        repo.grant_dataset(user.id, "lm5").await.unwrap();
        repo.grant_dataset(user.id, "agrmet").await.unwrap();
        assert_eq!(
            repo.authorized_datasets(user.id).await.unwrap(),
            vec!["agrmet".to_string(), "lm5".to_string()]
        );

        assert_eq!(repo.used_space(user.id).await.unwrap(), 0);
    }
}
