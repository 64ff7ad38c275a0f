//! Request ledger repository.
//!
//! Status changes go through [`RequestRepository::transition`], which sets the
//! end date exactly when the new status is terminal.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{NewRequest, RequestRecord};
use super::pool::{DbError, DbPool};
use super::util::{format_datetime, parse_datetime, parse_datetime_opt};
use crate::models::{Request, RequestArgs, RequestStatus};
use crate::schema::requests;

impl From<RequestRecord> for Request {
    fn from(record: RequestRecord) -> Self {
        Request {
            id: record.id,
            user_id: record.user_id,
            name: record.name,
            args: serde_json::from_str(&record.args).unwrap_or_default(),
            submission_date: parse_datetime(&record.submission_date),
            end_date: parse_datetime_opt(record.end_date),
            status: RequestStatus::from_str(&record.status),
            task_id: record.task_id,
            error_message: record.error_message,
            schedule_id: record.schedule_id,
        }
    }
}

/// Fields for a new ledger entry.
#[derive(Debug, Clone)]
pub struct NewRequestSpec {
    pub user_id: i32,
    pub name: String,
    pub args: RequestArgs,
    pub task_id: String,
    pub schedule_id: Option<i32>,
}

#[derive(Clone)]
pub struct RequestRepository {
    pool: DbPool,
}

impl RequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a new submission in PENDING state.
    pub async fn create(
        &self,
        spec: &NewRequestSpec,
        submitted_at: DateTime<Utc>,
    ) -> Result<Request, DbError> {
        let mut conn = self.pool.get().await?;
        let args = serde_json::to_string(&spec.args).unwrap_or_else(|_| "{}".to_string());
        let submission_date = format_datetime(submitted_at);

        diesel::insert_into(requests::table)
            .values(NewRequest {
                user_id: spec.user_id,
                name: &spec.name,
                args: &args,
                submission_date: &submission_date,
                end_date: None,
                status: RequestStatus::Pending.as_str(),
                task_id: &spec.task_id,
                error_message: None,
                schedule_id: spec.schedule_id,
            })
            .execute(&mut conn)
            .await?;

        requests::table
            .filter(requests::task_id.eq(&spec.task_id))
            .first::<RequestRecord>(&mut conn)
            .await
            .map(Request::from)
    }

    pub async fn get(&self, id: i32) -> Result<Option<Request>, DbError> {
        let mut conn = self.pool.get().await?;

        requests::table
            .find(id)
            .first::<RequestRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Request::from))
    }

    pub async fn get_by_task_id(&self, task_id: &str) -> Result<Option<Request>, DbError> {
        let mut conn = self.pool.get().await?;

        requests::table
            .filter(requests::task_id.eq(task_id))
            .first::<RequestRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Request::from))
    }

    /// Requests of a user, newest first.
    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<Request>, DbError> {
        let mut conn = self.pool.get().await?;

        requests::table
            .filter(requests::user_id.eq(user_id))
            .order(requests::submission_date.desc())
            .load::<RequestRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Request::from).collect())
    }

    /// Every request whose status is not terminal, oldest first.
    pub async fn list_non_terminal(&self) -> Result<Vec<Request>, DbError> {
        let mut conn = self.pool.get().await?;

        requests::table
            .filter(requests::status.ne_all(RequestStatus::terminal_strs()))
            .order(requests::submission_date.asc())
            .load::<RequestRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Request::from).collect())
    }

    /// Finished requests of a user that ended before `cutoff`, oldest first.
    pub async fn list_finished_before(
        &self,
        user_id: i32,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Request>, DbError> {
        let mut conn = self.pool.get().await?;
        let cutoff = format_datetime(cutoff);

        requests::table
            .filter(requests::user_id.eq(user_id))
            .filter(requests::status.eq_any(RequestStatus::terminal_strs()))
            .filter(requests::end_date.lt(&cutoff))
            .order(requests::end_date.asc())
            .load::<RequestRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Request::from).collect())
    }

    /// Number of submissions by a user at or after `since`.
    pub async fn count_submitted_since(
        &self,
        user_id: i32,
        since: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let mut conn = self.pool.get().await?;
        let since = format_datetime(since);

        requests::table
            .filter(requests::user_id.eq(user_id))
            .filter(requests::submission_date.ge(&since))
            .count()
            .get_result(&mut conn)
            .await
    }

    /// Move a request to `status`. Terminal states stamp the end date with
    /// `now`; any other state clears it.
    ///
    /// A request that already reached a terminal state is left alone.
    /// Returns whether the row changed.
    pub async fn transition(
        &self,
        id: i32,
        status: &RequestStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;
        let end_date = status.is_terminal().then(|| format_datetime(now));

        let rows = diesel::update(
            requests::table
                .find(id)
                .filter(requests::status.ne_all(RequestStatus::terminal_strs())),
        )
        .set((
            requests::status.eq(status.as_str()),
            requests::end_date.eq(&end_date),
            requests::error_message.eq(error_message),
        ))
        .execute(&mut conn)
        .await?;

        Ok(rows == 1)
    }

    /// Delete a request; its file output row goes with it.
    pub async fn delete(&self, id: i32) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::delete(requests::table.find(id))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }
}
