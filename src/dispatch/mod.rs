//! Task dispatch: queue selection and request submission.
//!
//! Extractions are routed to one of eight queues keyed by dataset category
//! and recency. Requests whose reference window starts within the trailing
//! operational window go to `operational_*` queues, everything else to the
//! `archived_*` bulk queues.

mod error;

pub use error::{DispatchError, SubmitError};

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::models::{Dataset, DatasetCategory, Request, RequestArgs, RequestStatus, User};
use crate::queue::{new_task_id, ResultBackend, TaskBroker, TaskMessage, TaskPayload};
use crate::repository::{DbContext, NewRequestSpec};

/// Reference windows starting this recently are operational.
pub const OPERATIONAL_WINDOW_DAYS: i64 = 3;

/// Output formats a client may request.
const OUTPUT_FORMATS: [&str; 3] = ["json", "grib", "bufr"];

/// Queue and routing key chosen for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRoute {
    pub queue: &'static str,
    pub routing_key: &'static str,
}

impl QueueRoute {
    const fn same(name: &'static str) -> Self {
        Self {
            queue: name,
            routing_key: name,
        }
    }
}

/// Fixed routing table.
pub fn route_for(category: DatasetCategory, operational: bool) -> QueueRoute {
    let name = match (category, operational) {
        (DatasetCategory::Forecast, true) => "operational_forecast",
        (DatasetCategory::Forecast, false) => "archived_forecast",
        (DatasetCategory::Observed, true) => "operational_observed",
        (DatasetCategory::Observed, false) => "archived_observed",
        (DatasetCategory::Radar, true) => "operational_radar",
        (DatasetCategory::Radar, false) => "archived_radar",
        (DatasetCategory::Sea, true) => "operational_sea",
        (DatasetCategory::Sea, false) => "archived_sea",
    };
    QueueRoute::same(name)
}

/// Every queue a worker may listen on.
pub fn all_queues() -> Vec<String> {
    [
        DatasetCategory::Forecast,
        DatasetCategory::Observed,
        DatasetCategory::Radar,
        DatasetCategory::Sea,
    ]
    .into_iter()
    .flat_map(|c| [route_for(c, true), route_for(c, false)])
    .map(|r| r.queue.to_string())
    .collect()
}

/// Parse a reference timestamp. Values without an offset are taken as UTC.
pub fn parse_reference_time(value: &str) -> Result<DateTime<Utc>, DispatchError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DispatchError::InvalidReferenceTime(value.to_string()))
}

/// Operational iff a start is present and not older than the trailing window.
pub fn is_operational(
    reftime_from: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DispatchError> {
    match reftime_from {
        Some(from) => {
            let start = parse_reference_time(from)?;
            Ok(start >= now - Duration::days(OPERATIONAL_WINDOW_DAYS))
        }
        None => Ok(false),
    }
}

/// Choose the queue for a dataset type code (`FOR`, `OBS`, `RAD`, `SEA`).
pub fn select_queue(
    dataset_type: &str,
    reftime_from: Option<&str>,
    now: DateTime<Utc>,
) -> Result<QueueRoute, DispatchError> {
    let category = DatasetCategory::from_str(dataset_type)
        .ok_or_else(|| DispatchError::UnknownDatasetType(dataset_type.to_string()))?;
    Ok(route_for(category, is_operational(reftime_from, now)?))
}

/// The single category shared by every dataset in `args`.
pub fn category_of(args: &RequestArgs, catalog: &[Dataset]) -> Result<DatasetCategory, SubmitError> {
    let mut category = None;
    for name in &args.datasets {
        let dataset = catalog
            .iter()
            .find(|d| &d.name == name)
            .ok_or_else(|| SubmitError::DatasetNotFound(name.clone()))?;
        match category {
            None => category = Some(dataset.category),
            Some(c) if c != dataset.category => return Err(SubmitError::MixedCategories),
            Some(_) => {}
        }
    }
    category.ok_or(SubmitError::NoDatasets)
}

/// Check the post-processing chain and output format of a request.
pub fn validate_args(args: &RequestArgs) -> Result<(), SubmitError> {
    if let Some(format) = &args.output_format {
        if !OUTPUT_FORMATS.iter().any(|f| f.eq_ignore_ascii_case(format)) {
            return Err(SubmitError::UnsupportedOutputFormat(format.clone()));
        }
    }
    if args.quality_filter() && !args.wants_json() {
        return Err(SubmitError::QualityFilterNeedsJson);
    }
    if let Some(from) = args.reftime_from() {
        parse_reference_time(from)?;
    }
    Ok(())
}

/// Records submissions in the request ledger and hands them to the broker.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: DbContext,
    broker: Arc<dyn TaskBroker>,
    results: Arc<dyn ResultBackend>,
    catalog: Arc<Vec<Dataset>>,
}

impl Dispatcher {
    pub fn new(
        ctx: DbContext,
        broker: Arc<dyn TaskBroker>,
        results: Arc<dyn ResultBackend>,
        catalog: Arc<Vec<Dataset>>,
    ) -> Self {
        Self {
            ctx,
            broker,
            results,
            catalog,
        }
    }

    pub fn catalog(&self) -> &[Dataset] {
        &self.catalog
    }

    /// Validate and enqueue an extraction on behalf of `user`.
    pub async fn submit(
        &self,
        user: &User,
        name: &str,
        args: RequestArgs,
        now: DateTime<Utc>,
    ) -> Result<Request, SubmitError> {
        if args.datasets.is_empty() {
            return Err(SubmitError::NoDatasets);
        }
        let category = category_of(&args, &self.catalog)?;
        self.check_access(user, &args).await?;
        validate_args(&args)?;

        if user.is_rate_limited() {
            let recent = self
                .ctx
                .requests()
                .count_submitted_since(user.id, now - Duration::hours(1))
                .await?;
            if recent >= i64::from(user.max_requests_per_hour) {
                return Err(SubmitError::RateLimited(user.max_requests_per_hour));
            }
        }

        if user.disk_quota > 0 && self.ctx.users().used_space(user.id).await? >= user.disk_quota {
            return Err(SubmitError::QuotaExceeded);
        }

        let route = route_for(category, is_operational(args.reftime_from(), now)?);
        let request = self
            .ctx
            .requests()
            .create(
                &NewRequestSpec {
                    user_id: user.id,
                    name: name.to_string(),
                    args,
                    task_id: new_task_id(),
                    schedule_id: None,
                },
                now,
            )
            .await?;

        let task = TaskMessage::new(
            request.task_id.clone(),
            route.queue,
            route.routing_key,
            TaskPayload::DataExtract {
                request_id: request.id,
            },
        );
        if let Err(e) = self.broker.enqueue(&task).await {
            tracing::error!(request_id = request.id, "failed to enqueue extraction: {}", e);
            self.ctx
                .requests()
                .transition(
                    request.id,
                    &RequestStatus::Failure,
                    Some("request could not be queued"),
                    Utc::now(),
                )
                .await?;
            return Err(e.into());
        }

        tracing::info!(
            request_id = request.id,
            task_id = %request.task_id,
            queue = route.queue,
            "extraction submitted"
        );
        Ok(request)
    }

    /// Validate a recurring extraction and pick its route. Scheduled runs
    /// always target fresh data, so they go to the operational queues.
    pub async fn route_schedule(
        &self,
        user: &User,
        args: &RequestArgs,
    ) -> Result<QueueRoute, SubmitError> {
        if args.datasets.is_empty() {
            return Err(SubmitError::NoDatasets);
        }
        let category = category_of(args, &self.catalog)?;
        self.check_access(user, args).await?;
        validate_args(args)?;
        Ok(route_for(category, true))
    }

    /// Every requested dataset must be public or granted to the user.
    async fn check_access(&self, user: &User, args: &RequestArgs) -> Result<(), SubmitError> {
        let granted = self.ctx.users().authorized_datasets(user.id).await?;
        for name in &args.datasets {
            let public = self
                .catalog
                .iter()
                .any(|d| &d.name == name && d.public);
            if !public && !granted.iter().any(|g| g == name) {
                return Err(SubmitError::DatasetForbidden(name.clone()));
            }
        }
        Ok(())
    }

    /// Withdraw a non-terminal request: drop its queued task if unclaimed and
    /// mark it REVOKED on both sides.
    ///
    /// A request that finished in the meantime keeps its outcome.
    pub async fn revoke(&self, request: &Request) -> Result<(), SubmitError> {
        let dequeued = self.broker.revoke(&request.task_id).await?;
        let revoked = self
            .ctx
            .requests()
            .transition(request.id, &RequestStatus::Revoked, None, Utc::now())
            .await?;
        if !revoked {
            tracing::info!(request_id = request.id, "request finished before revoke");
            return Ok(());
        }
        self.results
            .store(&request.task_id, &RequestStatus::Revoked, None)
            .await?;
        tracing::info!(request_id = request.id, dequeued, "request revoked");
        Ok(())
    }
}
