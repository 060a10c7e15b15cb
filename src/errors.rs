// Error types and error handling module
// This file defines the error type surfaced by the fallible building blocks
// of the instrumentation layer. Nothing here ever reaches a wrapped request.
//
// Numan Thabit 2025 Nov

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics backend error: {0}")]
    Backend(#[from] prometheus::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
}
