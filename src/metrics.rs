// Metrics and observability module
// This file owns the request collectors (counter, latency summary, latency
// histogram), builds them with the configured name and label prefixes and
// registers them with a prometheus registry exactly once
//
// Numan Thabit 2025 Nov

use crate::errors::MetricsError;
use crate::summary::SummaryVec;
use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

pub const REQUEST_TOTAL: &str = "request_total";
pub const LATENCY_MICROSECONDS: &str = "latency_microseconds";
pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";

const REQUEST_TOTAL_HELP: &str = "Requests processed, partitioned by endpoint and status";
const LATENCY_MICROSECONDS_HELP: &str = "Request latencies in microseconds, partitioned by endpoint";
const REQUEST_DURATION_SECONDS_HELP: &str = "Request time in seconds, partitioned by endpoint";

static GLOBAL: Lazy<CollectorRegistry> =
    Lazy::new(|| CollectorRegistry::new(prometheus::default_registry().clone()));

/// Handles to the request collectors, cheap to clone. A collector that could
/// not be built is `None` and observations into it are skipped.
#[derive(Clone, Default)]
pub struct Collectors {
    request_total: Option<IntCounterVec>,
    latency_summary: Option<SummaryVec>,
    latency_histogram: Option<HistogramVec>,
}

impl Collectors {
    pub fn request_total(&self) -> Option<&IntCounterVec> {
        self.request_total.as_ref()
    }

    pub fn latency_summary(&self) -> Option<&SummaryVec> {
        self.latency_summary.as_ref()
    }

    pub fn latency_histogram(&self) -> Option<&HistogramVec> {
        self.latency_histogram.as_ref()
    }
}

/// Builds the request collectors once and registers them with a prometheus
/// registry. Share one instance between every [`MetricsLayer`](crate::MetricsLayer)
/// of a process.
pub struct CollectorRegistry {
    backend: Registry,
    setup: Mutex<SetupState>,
}

#[derive(Default)]
struct SetupState {
    prefixes: Option<(String, String)>,
    request_total: Slot<IntCounterVec>,
    latency_summary: Slot<SummaryVec>,
    latency_histogram: Slot<HistogramVec>,
}

struct Slot<C> {
    collector: Option<C>,
    registration: Registration,
}

/// Where a built collector stands with the backend. Only `Pending` is ever
/// (re)attempted; the backend keeps a name's label layout even after an
/// unregister, so a refused registration is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Pending,
    Exported,
    Shadowed,
    Failed,
}

impl<C> Default for Slot<C> {
    fn default() -> Self {
        Self {
            collector: None,
            registration: Registration::Pending,
        }
    }
}

impl<C: Collector + Clone + 'static> Slot<C> {
    fn build_with(&mut self, kind: &str, build: impl FnOnce() -> Result<C, MetricsError>) {
        if self.collector.is_some() {
            return;
        }
        match build() {
            Ok(collector) => self.collector = Some(collector),
            Err(err) => warn!(
                collector = kind,
                error = %err,
                "failed to build collector; its observations are dropped"
            ),
        }
    }

    fn register(&mut self, kind: &str, backend: &Registry) {
        let Some(collector) = self.collector.as_ref() else {
            return;
        };
        if self.registration != Registration::Pending {
            return;
        }
        self.registration = match backend.register(Box::new(collector.clone())) {
            Ok(()) => {
                debug!(collector = kind, "registered collector");
                Registration::Exported
            }
            Err(prometheus::Error::AlreadyReg) => {
                warn!(
                    collector = kind,
                    "another collector with this name is registered on the backend; \
                     series recorded through this registry will not be exported"
                );
                Registration::Shadowed
            }
            Err(err) => {
                warn!(
                    collector = kind,
                    error = %err,
                    "failed to register collector; metric will not be exported"
                );
                Registration::Failed
            }
        };
    }
}

impl CollectorRegistry {
    pub fn new(backend: Registry) -> Self {
        Self {
            backend,
            setup: Mutex::new(SetupState::default()),
        }
    }

    /// Process-wide instance backed by `prometheus::default_registry()`.
    pub fn global() -> &'static CollectorRegistry {
        &GLOBAL
    }

    pub fn backend(&self) -> &Registry {
        &self.backend
    }

    /// Build any missing collector, register any unregistered one and return
    /// handles for the request path. Safe to call any number of times from
    /// any number of threads; the first caller's prefixes win.
    pub fn ensure_registered(&self, metric_prefix: &str, label_prefix: &str) -> Collectors {
        let mut state = self.setup.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some((metric, label)) = &state.prefixes {
            if metric != metric_prefix || label != label_prefix {
                debug!(
                    requested_metric_prefix = metric_prefix,
                    requested_label_prefix = label_prefix,
                    metric_prefix = %metric,
                    label_prefix = %label,
                    "collectors already built; keeping original prefixes"
                );
            }
        }

        let names = LabelNames::new(label_prefix);
        state.request_total.build_with(REQUEST_TOTAL, || {
            Ok(IntCounterVec::new(
                Opts::new(format!("{metric_prefix}{REQUEST_TOTAL}"), REQUEST_TOTAL_HELP),
                &names.with_status(),
            )?)
        });
        state.latency_summary.build_with(LATENCY_MICROSECONDS, || {
            SummaryVec::new(
                Opts::new(
                    format!("{metric_prefix}{LATENCY_MICROSECONDS}"),
                    LATENCY_MICROSECONDS_HELP,
                ),
                &names.base(),
            )
        });
        state.latency_histogram.build_with(REQUEST_DURATION_SECONDS, || {
            Ok(HistogramVec::new(
                HistogramOpts::new(
                    format!("{metric_prefix}{REQUEST_DURATION_SECONDS}"),
                    REQUEST_DURATION_SECONDS_HELP,
                ),
                &names.base(),
            )?)
        });

        if state.prefixes.is_none() && state.any_built() {
            state.prefixes = Some((metric_prefix.to_string(), label_prefix.to_string()));
        }

        state.request_total.register(REQUEST_TOTAL, &self.backend);
        state.latency_summary.register(LATENCY_MICROSECONDS, &self.backend);
        state.latency_histogram.register(REQUEST_DURATION_SECONDS, &self.backend);

        state.collectors()
    }

    /// Current handles, without building or registering anything.
    pub fn collectors(&self) -> Collectors {
        self.setup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .collectors()
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

impl SetupState {
    fn any_built(&self) -> bool {
        self.request_total.collector.is_some()
            || self.latency_summary.collector.is_some()
            || self.latency_histogram.collector.is_some()
    }

    fn collectors(&self) -> Collectors {
        Collectors {
            request_total: self.request_total.collector.clone(),
            latency_summary: self.latency_summary.collector.clone(),
            latency_histogram: self.latency_histogram.collector.clone(),
        }
    }
}

struct LabelNames {
    name: String,
    version: String,
    id: String,
    endpoint: String,
    status: String,
}

impl LabelNames {
    fn new(prefix: &str) -> Self {
        Self {
            name: format!("{prefix}name"),
            version: format!("{prefix}version"),
            id: format!("{prefix}id"),
            endpoint: format!("{prefix}endpoint"),
            status: format!("{prefix}status"),
        }
    }

    fn base(&self) -> [&str; 4] {
        [
            self.name.as_str(),
            self.version.as_str(),
            self.id.as_str(),
            self.endpoint.as_str(),
        ]
    }

    fn with_status(&self) -> [&str; 5] {
        [
            self.name.as_str(),
            self.version.as_str(),
            self.id.as_str(),
            self.endpoint.as_str(),
            self.status.as_str(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::proto::MetricType;

    fn observe_once(collectors: &Collectors) {
        let labels = ["svc", "v1", "abc", "Greeter.Hello"];
        collectors
            .request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "Greeter.Hello", "success"])
            .inc();
        collectors
            .latency_summary()
            .unwrap()
            .get_metric_with_label_values(&labels)
            .unwrap()
            .observe(12.0);
        collectors
            .latency_histogram()
            .unwrap()
            .with_label_values(&labels)
            .observe(0.000012);
    }

    #[test]
    fn repeated_setup_registers_each_collector_once() {
        let registry = CollectorRegistry::default();
        let first = registry.ensure_registered("", "");
        for _ in 0..4 {
            registry.ensure_registered("", "");
        }
        observe_once(&first);

        let families = registry.backend().gather();
        let mut names: Vec<(&str, MetricType)> = families
            .iter()
            .map(|f| (f.get_name(), f.get_field_type()))
            .collect();
        names.sort_by_key(|(name, _)| *name);
        assert_eq!(
            names,
            vec![
                ("latency_microseconds", MetricType::SUMMARY),
                ("request_duration_seconds", MetricType::HISTOGRAM),
                ("request_total", MetricType::COUNTER),
            ]
        );
        for family in &families {
            assert_eq!(family.get_metric().len(), 1);
        }
    }

    #[test]
    fn repeated_setup_hands_out_shared_collectors() {
        let registry = CollectorRegistry::default();
        let a = registry.ensure_registered("", "");
        let b = registry.ensure_registered("", "");

        a.request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "A", "success"])
            .inc();
        let seen = b
            .request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "A", "success"])
            .get();
        assert_eq!(seen, 1);
    }

    #[test]
    fn backend_sees_collectors_as_already_registered() {
        let registry = CollectorRegistry::default();
        registry.ensure_registered("", "");

        let duplicate = IntCounterVec::new(
            Opts::new(REQUEST_TOTAL, REQUEST_TOTAL_HELP),
            &["name", "version", "id", "endpoint", "status"],
        )
        .unwrap();
        let err = registry.backend().register(Box::new(duplicate)).unwrap_err();
        assert!(matches!(err, prometheus::Error::AlreadyReg));
    }

    #[test]
    fn prefixes_apply_to_names_and_labels() {
        let registry = CollectorRegistry::default();
        let collectors = registry.ensure_registered("micro_", "go_");
        collectors
            .request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "A", "failure"])
            .inc();

        let families = registry.backend().gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "micro_request_total")
            .unwrap();
        let mut labels: Vec<&str> = family.get_metric()[0]
            .get_label()
            .iter()
            .map(|l| l.get_name())
            .collect();
        labels.sort_unstable();
        assert_eq!(labels, vec!["go_endpoint", "go_id", "go_name", "go_status", "go_version"]);
    }

    #[test]
    fn first_prefixes_win() {
        let registry = CollectorRegistry::default();
        registry.ensure_registered("first_", "");
        let later = registry.ensure_registered("second_", "x_");
        later
            .request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "A", "success"])
            .inc();

        let families = registry.backend().gather();
        assert!(families.iter().any(|f| f.get_name() == "first_request_total"));
        assert!(!families.iter().any(|f| f.get_name() == "second_request_total"));
    }

    #[test]
    fn invalid_prefix_leaves_collectors_inert() {
        let registry = CollectorRegistry::default();
        let collectors = registry.ensure_registered("bad-prefix-", "");
        assert!(collectors.request_total().is_none());
        assert!(collectors.latency_summary().is_none());
        assert!(collectors.latency_histogram().is_none());
        assert!(registry.backend().gather().is_empty());
    }

    fn exported_request_endpoints(backend: &Registry) -> Vec<(String, f64)> {
        backend
            .gather()
            .iter()
            .filter(|f| f.get_name() == REQUEST_TOTAL)
            .flat_map(|f| f.get_metric().iter())
            .filter_map(|m| {
                let endpoint = m.get_label().iter().find(|l| l.get_name() == "endpoint")?;
                Some((endpoint.get_value().to_string(), m.get_counter().get_value()))
            })
            .collect()
    }

    #[test]
    fn second_registry_on_same_backend_is_not_exported() {
        let backend = Registry::new();
        let first = CollectorRegistry::new(backend.clone());
        let second = CollectorRegistry::new(backend.clone());

        let owner = first.ensure_registered("", "");
        let shadowed = second.ensure_registered("", "");
        assert!(shadowed.request_total().is_some());

        owner
            .request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "A", "success"])
            .inc();
        shadowed
            .request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "B", "success"])
            .inc();

        assert_eq!(exported_request_endpoints(&backend), vec![("A".to_string(), 1.0)]);
    }

    #[test]
    fn conflicting_registration_keeps_handles_and_skips_export() {
        let backend = Registry::new();
        let squatter = prometheus::IntCounter::with_opts(
            Opts::new(REQUEST_TOTAL, "unrelated counter").const_label("team", "billing"),
        )
        .unwrap();
        backend.register(Box::new(squatter)).unwrap();

        let registry = CollectorRegistry::new(backend.clone());
        let collectors = registry.ensure_registered("", "");
        let again = registry.ensure_registered("", "");
        assert!(collectors.request_total().is_some());
        assert!(again.request_total().is_some());

        observe_once(&collectors);

        // the latency collectors are unaffected by the counter conflict
        let mut names: Vec<String> = backend
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec![LATENCY_MICROSECONDS, REQUEST_DURATION_SECONDS, REQUEST_TOTAL]);
        assert!(exported_request_endpoints(&backend).is_empty());
    }

    #[test]
    fn prefixes_are_kept_only_once_collectors_exist() {
        let registry = CollectorRegistry::default();
        let inert = registry.ensure_registered("bad-prefix-", "");
        assert!(inert.request_total().is_none());

        let built = registry.ensure_registered("good_", "");
        registry.ensure_registered("other_", "");
        built
            .request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "A", "success"])
            .inc();

        let families = registry.backend().gather();
        assert!(families.iter().any(|f| f.get_name() == "good_request_total"));
        assert!(!families.iter().any(|f| f.get_name() == "other_request_total"));

        let state = registry.setup.lock().unwrap();
        assert_eq!(state.prefixes, Some(("good_".to_string(), String::new())));
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        let registry = std::sync::Arc::new(CollectorRegistry::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.ensure_registered("", ""))
            })
            .collect();
        let sets: Vec<Collectors> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for set in &sets {
            set.request_total()
                .unwrap()
                .with_label_values(&["svc", "v1", "abc", "A", "success"])
                .inc();
        }
        let total = registry
            .collectors()
            .request_total()
            .unwrap()
            .with_label_values(&["svc", "v1", "abc", "A", "success"])
            .get();
        assert_eq!(total, 16);
    }

    #[test]
    fn collectors_before_setup_are_empty() {
        let registry = CollectorRegistry::default();
        assert!(registry.collectors().request_total().is_none());
    }
}
