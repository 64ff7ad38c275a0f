//! Diesel ORM records for database tables.
//!
//! Records mirror the SQL columns one to one; conversion to domain models
//! happens in the repositories.

use diesel::prelude::*;

use crate::schema;

/// User record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserRecord {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub disk_quota: i64,
    pub max_requests_per_hour: i32,
    pub request_expiration_days: Option<i32>,
    pub auto_delete: i32,
    pub created_at: String,
}

/// New user for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::users)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub disk_quota: i64,
    pub max_requests_per_hour: i32,
    pub request_expiration_days: Option<i32>,
    pub auto_delete: i32,
    pub created_at: &'a str,
}

/// Access key record from the database.
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::access_keys)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AccessKeyRecord {
    pub id: i32,
    pub user_id: i32,
    pub token: String,
    pub created_at: String,
    pub expiration: Option<String>,
    pub scope: Option<String>,
}

/// Request record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::requests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RequestRecord {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub args: String,
    pub submission_date: String,
    pub end_date: Option<String>,
    pub status: String,
    pub task_id: String,
    pub error_message: Option<String>,
    pub schedule_id: Option<i32>,
}

/// New request for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::requests)]
pub struct NewRequest<'a> {
    pub user_id: i32,
    pub name: &'a str,
    pub args: &'a str,
    pub submission_date: &'a str,
    pub end_date: Option<&'a str>,
    pub status: &'a str,
    pub task_id: &'a str,
    pub error_message: Option<&'a str>,
    pub schedule_id: Option<i32>,
}

/// File output record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::file_outputs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FileOutputRecord {
    pub id: i32,
    pub filename: String,
    pub size: i64,
    pub user_id: i32,
    pub request_id: i32,
}

/// New file output for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::file_outputs)]
pub struct NewFileOutput<'a> {
    pub filename: &'a str,
    pub size: i64,
    pub user_id: i32,
    pub request_id: i32,
}

/// Schedule record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::schedules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScheduleRecord {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub submission_date: String,
    pub args: String,
    pub is_crontab: i32,
    pub period: Option<String>,
    pub every: Option<i32>,
    pub crontab: Option<String>,
    pub on_data_ready: i32,
    pub enabled: i32,
    pub state: String,
}

/// New schedule for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::schedules)]
pub struct NewSchedule<'a> {
    pub user_id: i32,
    pub name: &'a str,
    pub submission_date: &'a str,
    pub args: &'a str,
    pub is_crontab: i32,
    pub period: Option<&'a str>,
    pub every: Option<i32>,
    pub crontab: Option<&'a str>,
    pub on_data_ready: i32,
    pub enabled: i32,
    pub state: &'a str,
}

/// Queued task record (local broker).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::task_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskQueueRecord {
    pub task_id: String,
    pub task_name: String,
    pub queue: String,
    pub routing_key: String,
    pub payload: String,
    pub enqueued_at: String,
    pub claimed_at: Option<String>,
    pub claimed_by: Option<String>,
}

/// Task result record (local result backend).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::task_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskResultRecord {
    pub task_id: String,
    pub status: String,
    pub error: Option<String>,
    pub date_done: Option<String>,
}
