//! Domain models for the distribution backend.

mod access_key;
mod dataset;
mod file_output;
mod request;
mod schedule;
mod user;

pub use access_key::AccessKey;
pub use dataset::{DataFormat, Dataset, DatasetCategory, DatasetView};
pub use file_output::FileOutput;
pub use request::{
    CropBounds, PostProcessorSpec, ReferenceTime, Request, RequestArgs, RequestStatus,
};
pub use schedule::{CrontabSpec, PeriodUnit, MAX_INTERVAL_DAYS, Schedule, ScheduleKind, ScheduleState};
pub use user::User;
