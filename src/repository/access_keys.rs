//! Access key repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::AccessKeyRecord;
use super::pool::{DbError, DbPool};
use super::util::{format_datetime, parse_datetime, parse_datetime_opt};
use crate::models::AccessKey;
use crate::schema::access_keys;

impl From<AccessKeyRecord> for AccessKey {
    fn from(record: AccessKeyRecord) -> Self {
        AccessKey {
            user_id: record.user_id,
            token: record.token,
            created_at: parse_datetime(&record.created_at),
            expiration: parse_datetime_opt(record.expiration),
            scope: record.scope,
        }
    }
}

#[derive(Clone)]
pub struct AccessKeyRepository {
    pool: DbPool,
}

impl AccessKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The access key of a user, if one was ever generated.
    pub async fn get_for_user(&self, user_id: i32) -> Result<Option<AccessKey>, DbError> {
        let mut conn = self.pool.get().await?;

        access_keys::table
            .filter(access_keys::user_id.eq(user_id))
            .first::<AccessKeyRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(AccessKey::from))
    }

    pub async fn get_by_token(&self, token: &str) -> Result<Option<AccessKey>, DbError> {
        let mut conn = self.pool.get().await?;

        access_keys::table
            .filter(access_keys::token.eq(token))
            .first::<AccessKeyRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(AccessKey::from))
    }

    /// Store a key, replacing whatever the user held before.
    pub async fn upsert(&self, key: &AccessKey) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;
        let created_at = format_datetime(key.created_at);
        let expiration = key.expiration.map(format_datetime);

        let updated = diesel::update(access_keys::table.filter(access_keys::user_id.eq(key.user_id)))
            .set((
                access_keys::token.eq(&key.token),
                access_keys::created_at.eq(&created_at),
                access_keys::expiration.eq(&expiration),
                access_keys::scope.eq(&key.scope),
            ))
            .execute(&mut conn)
            .await?;

        if updated == 0 {
            diesel::insert_into(access_keys::table)
                .values((
                    access_keys::user_id.eq(key.user_id),
                    access_keys::token.eq(&key.token),
                    access_keys::created_at.eq(&created_at),
                    access_keys::expiration.eq(&expiration),
                    access_keys::scope.eq(&key.scope),
                ))
                .execute(&mut conn)
                .await?;
        }

        Ok(())
    }
}
