pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod types;

pub mod gateway;
pub mod idempotency;

pub use config::Config;
pub use error::{ImportError, Result};
pub use pipeline::{FileOutcome, FileState, Pipeline, PipelineResult, RunOptions};
