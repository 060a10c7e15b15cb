// Request instrumentation wrapper
// A tower layer that brackets every call to the wrapped handler with request
// metrics: latency into the summary and histogram, outcome into the counter.
// The handler's response and error pass through untouched.
//
// Numan Thabit 2025 Nov

use crate::classify::{Classify, ErrorsAsFailures, GrpcErrorsAsFailures, Outcome};
use crate::config::MetricsOptions;
use crate::endpoint::Endpoint;
use crate::metrics::{CollectorRegistry, Collectors};
use futures::ready;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};
use tracing::debug;

/// Wraps services so each call records request count and latency.
///
/// Building the layer performs the one-time collector setup on the given
/// [`CollectorRegistry`]; every service it wraps shares those collectors.
#[derive(Clone)]
pub struct MetricsLayer<C = ErrorsAsFailures> {
    recorder: Arc<Recorder>,
    classifier: C,
}

impl MetricsLayer {
    pub fn new(options: MetricsOptions, registry: &CollectorRegistry) -> Self {
        let collectors =
            registry.ensure_registered(&options.metrics_prefix, &options.metrics_label_prefix);
        Self {
            recorder: Arc::new(Recorder {
                options,
                collectors,
            }),
            classifier: ErrorsAsFailures,
        }
    }

    /// Same as [`MetricsLayer::new`] on [`CollectorRegistry::global`].
    pub fn with_global(options: MetricsOptions) -> Self {
        Self::new(options, CollectorRegistry::global())
    }

    /// Count gRPC error statuses as failures, see [`GrpcErrorsAsFailures`].
    pub fn grpc(self) -> MetricsLayer<GrpcErrorsAsFailures> {
        self.classify_with(GrpcErrorsAsFailures)
    }
}

impl<C> MetricsLayer<C> {
    pub fn classify_with<D>(self, classifier: D) -> MetricsLayer<D> {
        MetricsLayer {
            recorder: self.recorder,
            classifier,
        }
    }

    pub fn options(&self) -> &MetricsOptions {
        &self.recorder.options
    }
}

impl<S, C: Clone> Layer<S> for MetricsLayer<C> {
    type Service = MetricsService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            recorder: self.recorder.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S, C = ErrorsAsFailures> {
    inner: S,
    recorder: Arc<Recorder>,
    classifier: C,
}

impl<S, C> MetricsService<S, C> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, C, Req> Service<Req> for MetricsService<S, C>
where
    S: Service<Req>,
    C: Classify<S::Response, S::Error> + Clone,
    Req: Endpoint,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, C>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let endpoint = req.endpoint().into_owned();
        let timer = RequestTimer::start(self.recorder.clone(), endpoint);
        ResponseFuture {
            inner: self.inner.call(req),
            timer: Some(timer),
            classifier: self.classifier.clone(),
        }
    }
}

#[pin_project]
pub struct ResponseFuture<F, C> {
    #[pin]
    inner: F,
    timer: Option<RequestTimer>,
    classifier: C,
}

impl<F, C, T, E> Future for ResponseFuture<F, C>
where
    F: Future<Output = Result<T, E>>,
    C: Classify<T, E>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));
        if let Some(timer) = this.timer.take() {
            timer.finish(this.classifier.classify(&result));
        }
        Poll::Ready(result)
    }
}

/// Records one request when dropped. Unless [`RequestTimer::finish`] says
/// otherwise the request counts as a failure, which covers calls whose
/// future is dropped before completing.
struct RequestTimer {
    recorder: Arc<Recorder>,
    endpoint: String,
    start: Instant,
    outcome: Outcome,
}

impl RequestTimer {
    fn start(recorder: Arc<Recorder>, endpoint: String) -> Self {
        Self {
            recorder,
            endpoint,
            start: Instant::now(),
            outcome: Outcome::Failure,
        }
    }

    fn finish(mut self, outcome: Outcome) {
        self.outcome = outcome;
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        self.recorder
            .record(&self.endpoint, self.start.elapsed(), self.outcome);
    }
}

struct Recorder {
    options: MetricsOptions,
    collectors: Collectors,
}

impl Recorder {
    fn record(&self, endpoint: &str, elapsed: Duration, outcome: Outcome) {
        let labels = self.options.label_values(endpoint);
        let seconds = elapsed.as_secs_f64();

        if let Some(summary) = self.collectors.latency_summary() {
            match summary.get_metric_with_label_values(&labels) {
                Ok(series) => series.observe(seconds * 1_000_000.0),
                Err(err) => debug!(endpoint, error = %err, "latency summary observation dropped"),
            }
        }

        if let Some(histogram) = self.collectors.latency_histogram() {
            match histogram.get_metric_with_label_values(&labels) {
                Ok(series) => series.observe(seconds),
                Err(err) => debug!(endpoint, error = %err, "latency histogram observation dropped"),
            }
        }

        if let Some(counter) = self.collectors.request_total() {
            let [name, version, id, endpoint] = labels;
            let status = outcome.as_str();
            match counter.get_metric_with_label_values(&[name, version, id, endpoint, status]) {
                Ok(series) => series.inc(),
                Err(err) => debug!(endpoint, error = %err, "request counter increment dropped"),
            }
        }
    }
}
