// Library root module for rpc-metrics
// Request-count and latency instrumentation for RPC servers, exported
// through a prometheus registry
//
// Numan Thabit 2025 Nov

pub mod classify;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod metrics;
pub mod summary;
pub mod wrapper;

pub use classify::{Classify, ErrorsAsFailures, GrpcErrorsAsFailures, Outcome};
pub use crate::config::MetricsOptions;
pub use endpoint::Endpoint;
pub use errors::MetricsError;
pub use metrics::{CollectorRegistry, Collectors};
pub use summary::{Summary, SummaryVec};
pub use wrapper::{MetricsLayer, MetricsService, ResponseFuture};
