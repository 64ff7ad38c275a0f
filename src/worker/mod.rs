//! Extraction worker.
//!
//! Claims tasks from its queues, runs extraction and post-processing on a
//! blocking thread, and records the outcome in the request ledger and the
//! result backend. Failure details are logged; clients only ever see the
//! generic post-processing message.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::config::Settings;
use crate::models::{DataFormat, Request, RequestStatus};
use crate::postprocess::{remove_quietly, Extractor, Pipeline, PostProcessError};
use crate::queue::{BrokerError, ResultBackend, TaskBroker, TaskMessage, TaskPayload};
use crate::repository::{DbContext, DbError, NewRequestSpec};

/// Message stored for every failed extraction.
pub const GENERIC_FAILURE: &str = "post-processing failed";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Worker {
    ctx: DbContext,
    broker: Arc<dyn TaskBroker>,
    results: Arc<dyn ResultBackend>,
    settings: Arc<Settings>,
    queues: Vec<String>,
    name: String,
}

impl Worker {
    pub fn new(
        ctx: DbContext,
        broker: Arc<dyn TaskBroker>,
        results: Arc<dyn ResultBackend>,
        settings: Arc<Settings>,
        queues: Vec<String>,
    ) -> Self {
        let name = format!("worker-{}", std::process::id());
        Self {
            ctx,
            broker,
            results,
            settings,
            queues,
            name,
        }
    }

    /// Poll forever.
    pub async fn run(&self) -> Result<(), WorkerError> {
        tracing::info!(worker = %self.name, queues = ?self.queues, "worker started");
        let idle = Duration::from_millis(self.settings.worker_poll_interval_ms);

        loop {
            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(idle).await,
                Err(e) => {
                    tracing::error!("worker iteration failed: {}", e);
                    tokio::time::sleep(idle).await;
                }
            }
        }
    }

    /// Claim and process at most one task. Returns whether one was processed.
    pub async fn run_once(&self) -> Result<bool, WorkerError> {
        let task = match self.broker.claim(&self.queues, &self.name).await {
            Ok(Some(task)) => task,
            Ok(None) | Err(BrokerError::AlreadyClaimed) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let outcome = self.process(&task).await;
        self.broker.complete(&task.task_id).await?;
        outcome.map(|()| true)
    }

    async fn process(&self, task: &TaskMessage) -> Result<(), WorkerError> {
        let request = match task.payload {
            TaskPayload::DataExtract { request_id } => {
                match self.ctx.requests().get(request_id).await? {
                    Some(request) => request,
                    None => {
                        tracing::warn!(request_id, "task for unknown request dropped");
                        return Ok(());
                    }
                }
            }
            TaskPayload::ScheduledExtract { schedule_id } => {
                match self.start_scheduled(task, schedule_id).await? {
                    Some(request) => request,
                    None => return Ok(()),
                }
            }
        };

        if request.status.is_terminal() {
            tracing::info!(request_id = request.id, status = request.status.as_str(), "skipping finished request");
            return Ok(());
        }

        self.execute(request).await
    }

    /// Create the request row for a schedule run.
    async fn start_scheduled(
        &self,
        task: &TaskMessage,
        schedule_id: i32,
    ) -> Result<Option<Request>, WorkerError> {
        let Some(schedule) = self.ctx.schedules().get(schedule_id).await? else {
            tracing::warn!(schedule_id, "task for deleted schedule dropped");
            return Ok(None);
        };
        if !schedule.enabled {
            tracing::info!(schedule_id, "schedule disabled, run skipped");
            return Ok(None);
        }
        if let Some(existing) = self.ctx.requests().get_by_task_id(&task.task_id).await? {
            return Ok(Some(existing));
        }

        let request = self
            .ctx
            .requests()
            .create(
                &NewRequestSpec {
                    user_id: schedule.user_id,
                    name: schedule.name.clone(),
                    args: schedule.args.clone(),
                    task_id: task.task_id.clone(),
                    schedule_id: Some(schedule.id),
                },
                Utc::now(),
            )
            .await?;
        Ok(Some(request))
    }

    async fn execute(&self, request: Request) -> Result<(), WorkerError> {
        if !self.set_status(&request, RequestStatus::Started, None).await? {
            tracing::info!(request_id = request.id, "request ended before it started");
            return Ok(());
        }

        let Some(user) = self.ctx.users().get(request.user_id).await? else {
            self.set_status(&request, RequestStatus::Failure, Some(GENERIC_FAILURE))
                .await?;
            return Ok(());
        };
        if user.disk_quota > 0 && self.ctx.users().used_space(user.id).await? >= user.disk_quota {
            tracing::info!(request_id = request.id, "disk quota exceeded, run skipped");
            self.set_status(&request, RequestStatus::Failure, Some("disk quota exceeded"))
                .await?;
            return Ok(());
        }

        let workdir = self.settings.user_download_dir(user.id);
        tokio::fs::create_dir_all(&workdir).await?;

        let format = request
            .args
            .datasets
            .first()
            .and_then(|name| self.settings.find_dataset(name))
            .map(|d| d.format)
            .unwrap_or(DataFormat::Grib);
        let raw = Extractor::output_path(&workdir, &request.task_id, format);
        let extractor = Extractor {
            tool: self.settings.tools.extract.clone(),
        };
        let pipeline = Pipeline::for_request(&request.args, &self.settings.tools);
        let args = request.args.clone();

        let started = std::time::Instant::now();
        let outcome = tokio::task::spawn_blocking(move || -> Result<PathBuf, PostProcessError> {
            let extracted = extractor.extract(&args, &raw)?;
            pipeline.run(&extracted)
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(request_id = request.id, "extraction task panicked: {}", e);
                self.set_status(&request, RequestStatus::Failure, Some(GENERIC_FAILURE))
                    .await?;
                return Ok(());
            }
        };

        match result {
            Ok(path) => self.register_output(&request, &path).await?,
            Err(e) => {
                let failure = e.failure();
                tracing::error!(
                    request_id = request.id,
                    stage = e.stage(),
                    tool = %failure.tool,
                    exit_code = ?failure.exit_code,
                    "{}",
                    e
                );
                self.set_status(&request, RequestStatus::Failure, Some(GENERIC_FAILURE))
                    .await?;
            }
        }

        tracing::info!(
            request_id = request.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request processed"
        );
        Ok(())
    }

    async fn register_output(&self, request: &Request, path: &Path) -> Result<(), WorkerError> {
        let size = tokio::fs::metadata(path).await?.len() as i64;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Err(e) = self
            .ctx
            .file_outputs()
            .create(&filename, size, request.user_id, request.id)
            .await
        {
            tracing::error!(request_id = request.id, "failed to register output: {}", e);
            remove_quietly(path);
            self.set_status(request, RequestStatus::Failure, Some(GENERIC_FAILURE))
                .await?;
            return Ok(());
        }

        if !self.set_status(request, RequestStatus::Success, None).await? {
            // Revoked or timed out while running: the output is not wanted.
            if let Some(output) = self.ctx.file_outputs().get_for_request(request.id).await? {
                self.ctx.file_outputs().delete(output.id).await?;
            }
            remove_quietly(path);
            tracing::info!(
                request_id = request.id,
                filename = %filename,
                "request ended while running, output discarded"
            );
            return Ok(());
        }
        tracing::info!(request_id = request.id, filename = %filename, size, "output ready");
        Ok(())
    }

    /// Record a status change in the ledger and, if it applied, in the
    /// result backend. Returns false when the request had already ended.
    async fn set_status(
        &self,
        request: &Request,
        status: RequestStatus,
        error: Option<&str>,
    ) -> Result<bool, WorkerError> {
        let applied = self
            .ctx
            .requests()
            .transition(request.id, &status, error, Utc::now())
            .await?;
        if applied {
            self.results.store(&request.task_id, &status, error).await?;
        }
        Ok(applied)
    }
}
