//! Logging bootstrap.
//!
//! Structured `tracing` output through a non-blocking stdout writer. The
//! returned guard must be held by `main` for the lifetime of the process so
//! buffered lines are flushed on shutdown.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::errors::ServerError;
use crate::runtime::Config;

pub fn init(config: &Config) -> Result<WorkerGuard, ServerError> {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false);

    let result = if config.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| ServerError::Logging(e.to_string()))?;
    Ok(guard)
}
