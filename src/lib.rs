//! meteodist - meteorological data distribution backend.
//!
//! Users browse a catalog of observation, forecast, radar and sea datasets,
//! submit extraction requests that are routed to worker queues, receive
//! post-processed files, and manage quotas, access keys and recurring
//! extractions. Out-of-band jobs keep the ledger and the download tree
//! consistent.

pub mod auth;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod maintenance;
pub mod models;
pub mod postprocess;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod schema;
pub mod server;
pub mod tools;
pub mod utils;
pub mod worker;
