//! Schedule ledger repository.
//!
//! Rows are inserted in the `pending` state and only flipped to `committed`
//! once the scheduler store confirms the matching entry.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel_async::RunQueryDsl;

use super::models::{NewSchedule, ScheduleRecord};
use super::pool::{DbError, DbPool};
use super::util::{format_datetime, parse_datetime};
use crate::models::{
    CrontabSpec, PeriodUnit, RequestArgs, Schedule, ScheduleKind, ScheduleState,
};
use crate::schema::schedules;

impl From<ScheduleRecord> for Schedule {
    fn from(record: ScheduleRecord) -> Self {
        let kind = if record.is_crontab != 0 {
            ScheduleKind::Crontab(
                record
                    .crontab
                    .as_deref()
                    .and_then(|c| serde_json::from_str::<CrontabSpec>(c).ok())
                    .unwrap_or_default(),
            )
        } else {
            ScheduleKind::Interval {
                every: record.every.unwrap_or(1).max(1) as u32,
                period: record
                    .period
                    .as_deref()
                    .and_then(PeriodUnit::from_str)
                    .unwrap_or(PeriodUnit::Days),
            }
        };

        Schedule {
            id: record.id,
            user_id: record.user_id,
            name: record.name,
            submission_date: parse_datetime(&record.submission_date),
            args: serde_json::from_str::<RequestArgs>(&record.args).unwrap_or_default(),
            kind,
            on_data_ready: record.on_data_ready != 0,
            enabled: record.enabled != 0,
            state: ScheduleState::from_str(&record.state).unwrap_or(ScheduleState::Pending),
        }
    }
}

/// Fields for a new schedule.
#[derive(Debug, Clone)]
pub struct NewScheduleSpec {
    pub user_id: i32,
    pub name: String,
    pub args: RequestArgs,
    pub kind: ScheduleKind,
    pub on_data_ready: bool,
}

#[derive(Clone)]
pub struct ScheduleRepository {
    pool: DbPool,
}

impl ScheduleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a schedule in the `pending` state and return it.
    pub async fn insert_pending(
        &self,
        spec: &NewScheduleSpec,
        now: DateTime<Utc>,
    ) -> Result<Schedule, DbError> {
        let mut conn = self.pool.get().await?;
        let submission_date = format_datetime(now);
        let args = serde_json::to_string(&spec.args).unwrap_or_else(|_| "{}".to_string());

        let (is_crontab, period, every, crontab) = match &spec.kind {
            ScheduleKind::Interval { every, period } => {
                (0, Some(period.as_str()), Some(*every as i32), None)
            }
            ScheduleKind::Crontab(tab) => (1, None, None, serde_json::to_string(tab).ok()),
        };

        diesel::insert_into(schedules::table)
            .values(NewSchedule {
                user_id: spec.user_id,
                name: &spec.name,
                submission_date: &submission_date,
                args: &args,
                is_crontab,
                period,
                every,
                crontab: crontab.as_deref(),
                on_data_ready: i32::from(spec.on_data_ready),
                enabled: 1,
                state: ScheduleState::Pending.as_str(),
            })
            .execute(&mut conn)
            .await?;

        // Same connection, so the rowid belongs to the insert above.
        let id: i32 = diesel::select(diesel::dsl::sql::<Integer>("last_insert_rowid()"))
            .get_result(&mut conn)
            .await?;

        schedules::table
            .find(id)
            .first::<ScheduleRecord>(&mut conn)
            .await
            .map(Schedule::from)
    }

    pub async fn commit(&self, id: i32) -> Result<(), DbError> {
        let mut conn = self.pool.get().await?;

        diesel::update(schedules::table.find(id))
            .set(schedules::state.eq(ScheduleState::Committed.as_str()))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    pub async fn set_enabled(&self, id: i32, enabled: bool) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::update(schedules::table.find(id))
            .set(schedules::enabled.eq(i32::from(enabled)))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }

    pub async fn get(&self, id: i32) -> Result<Option<Schedule>, DbError> {
        let mut conn = self.pool.get().await?;

        schedules::table
            .find(id)
            .first::<ScheduleRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Schedule::from))
    }

    /// Committed schedules of a user.
    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<Schedule>, DbError> {
        let mut conn = self.pool.get().await?;

        schedules::table
            .filter(schedules::user_id.eq(user_id))
            .filter(schedules::state.eq(ScheduleState::Committed.as_str()))
            .order(schedules::id.asc())
            .load::<ScheduleRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Schedule::from).collect())
    }

    /// Rows left pending by an interrupted registration.
    pub async fn list_pending(&self) -> Result<Vec<Schedule>, DbError> {
        let mut conn = self.pool.get().await?;

        schedules::table
            .filter(schedules::state.eq(ScheduleState::Pending.as_str()))
            .order(schedules::id.asc())
            .load::<ScheduleRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Schedule::from).collect())
    }

    /// Enabled, committed data-ready schedules that extract from `dataset`.
    pub async fn list_data_ready_for(&self, dataset: &str) -> Result<Vec<Schedule>, DbError> {
        let mut conn = self.pool.get().await?;

        let records = schedules::table
            .filter(schedules::on_data_ready.eq(1))
            .filter(schedules::enabled.eq(1))
            .filter(schedules::state.eq(ScheduleState::Committed.as_str()))
            .order(schedules::id.asc())
            .load::<ScheduleRecord>(&mut conn)
            .await?;

        Ok(records
            .into_iter()
            .map(Schedule::from)
            .filter(|s| s.args.datasets.iter().any(|d| d == dataset))
            .collect())
    }

    pub async fn delete(&self, id: i32) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::delete(schedules::table.find(id))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::users::UserSpec;
    use crate::repository::DbContext;
    use tempfile::tempdir;

    fn interval_spec(user_id: i32, name: &str, dataset: &str, on_data_ready: bool) -> NewScheduleSpec {
        NewScheduleSpec {
            user_id,
            name: name.to_string(),
            args: RequestArgs {
                datasets: vec![dataset.to_string()],
                ..Default::default()
            },
            kind: ScheduleKind::Interval {
                every: 6,
                period: PeriodUnit::Hours,
            },
            on_data_ready,
        }
    }

    #[tokio::test]
    async fn test_pending_then_commit() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let user = ctx
            .users()
            .create(&UserSpec {
                email: "s@example.org".to_string(),
                name: "S".to_string(),
                disk_quota: 0,
                max_requests_per_hour: 0,
                request_expiration_days: None,
                auto_delete: false,
            })
            .await
            .unwrap();
        let repo = ctx.schedules();

        let first = repo
            .insert_pending(&interval_spec(user.id, "daily", "lm5", false), Utc::now())
            .await
            .unwrap();
        let second = repo
            .insert_pending(&interval_spec(user.id, "ready", "lm5", true), Utc::now())
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.name, "ready");
        assert_eq!(first.state, ScheduleState::Pending);
        assert_eq!(
            first.kind,
            ScheduleKind::Interval {
                every: 6,
                period: PeriodUnit::Hours
            }
        );

        // Pending rows are invisible to users and data-ready lookups.
        assert!(repo.list_for_user(user.id).await.unwrap().is_empty());
        assert!(repo.list_data_ready_for("lm5").await.unwrap().is_empty());
        assert_eq!(repo.list_pending().await.unwrap().len(), 2);

        repo.commit(first.id).await.unwrap();
        repo.commit(second.id).await.unwrap();
        assert_eq!(repo.list_for_user(user.id).await.unwrap().len(), 2);

        let ready = repo.list_data_ready_for("lm5").await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, second.id);
        assert!(repo.list_data_ready_for("agrmet").await.unwrap().is_empty());

        repo.set_enabled(second.id, false).await.unwrap();
        assert!(repo.list_data_ready_for("lm5").await.unwrap().is_empty());

        assert!(repo.delete(first.id).await.unwrap());
        assert!(repo.get(first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crontab_roundtrip() {
        let dir = tempdir().unwrap();
        let ctx = DbContext::from_path(&dir.path().join("test.db"));
        ctx.init_schema().await.unwrap();
        let user = ctx
            .users()
            .create(&UserSpec {
                email: "c@example.org".to_string(),
                name: "C".to_string(),
                disk_quota: 0,
                max_requests_per_hour: 0,
                request_expiration_days: None,
                auto_delete: false,
            })
            .await
            .unwrap();

        let tab = CrontabSpec {
            minute: "15".to_string(),
            hour: "3".to_string(),
            ..Default::default()
        };
        let created = ctx
            .schedules()
            .insert_pending(
                &NewScheduleSpec {
                    user_id: user.id,
                    name: "nightly".to_string(),
                    args: RequestArgs::default(),
                    kind: ScheduleKind::Crontab(tab.clone()),
                    on_data_ready: false,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(created.kind, ScheduleKind::Crontab(tab));
        assert_eq!(created.entry_name(), format!("schedule-{}-nightly", created.id));
    }
}
