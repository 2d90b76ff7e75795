//! deskrun-driver — session orchestration over the core pipeline.
//!
//! - [`config`]: serializable session configuration with validation
//! - [`market_hours`]: trading-calendar windows for scheduled runs
//! - [`scheduler`]: bounded worker pool running one batch of tickers
//! - [`worker`]: single-ticker worker wiring binding and pipeline
//! - [`status`]: copy-on-read status board for polling consumers
//! - [`driver`]: the session lifecycle and public control surface

pub mod config;
pub mod driver;
pub mod market_hours;
pub mod scheduler;
pub mod status;
pub mod worker;

pub use config::{ConfigError, RunMode, SessionConfig, StaggerRange, MAX_PARALLEL_LIMIT};
pub use driver::{ControlError, RunDriver};
pub use scheduler::{run_batch, BatchResult};
pub use status::{SessionStatus, SessionSummary, StatusBoard, StatusSnapshot};
pub use worker::run_ticker;
