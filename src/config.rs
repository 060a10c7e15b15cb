// Configuration management module
// This file holds the service identity and naming prefixes used to label
// exported request metrics, and loads them from environment variables
//
// Numan Thabit 2025 Nov

use crate::errors::MetricsError;
use serde::Deserialize;

/// Service identity and naming applied to every exported request metric.
///
/// Every field defaults to the empty string. The record is fixed once a
/// [`MetricsLayer`](crate::MetricsLayer) is built from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MetricsOptions {
    /// Value of the `name` label
    pub service_name: String,
    /// Value of the `version` label
    pub service_version: String,
    /// Value of the `id` label, usually the instance id
    pub service_id: String,
    /// Prepended to every metric name
    pub metrics_prefix: String,
    /// Prepended to every label name
    pub metrics_label_prefix: String,
}

impl MetricsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn service_id(mut self, id: impl Into<String>) -> Self {
        self.service_id = id.into();
        self
    }

    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = prefix.into();
        self
    }

    pub fn metrics_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_label_prefix = prefix.into();
        self
    }

    /// Load from `METRICS__SERVICE_NAME`, `METRICS__METRICS_PREFIX`, ...
    pub fn from_env() -> Result<Self, MetricsError> {
        Self::load(config::Environment::with_prefix("METRICS").separator("__"))
    }

    /// Load from an explicit environment source. Missing keys stay empty.
    pub fn load(source: config::Environment) -> Result<Self, MetricsError> {
        let cfg = config::Config::builder().add_source(source).build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub(crate) fn label_values<'a>(&'a self, endpoint: &'a str) -> [&'a str; 4] {
        [
            self.service_name.as_str(),
            self.service_version.as_str(),
            self.service_id.as_str(),
            endpoint,
        ]
    }
}
