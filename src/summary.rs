// Labeled summary collector
// The prometheus crate ships counters, gauges and histograms but no summary.
// This file provides a labeled summary (sample count and sample sum per label
// tuple) that plugs into a prometheus Registry like any built-in vector.
//
// Numan Thabit 2025 Nov

use crate::errors::MetricsError;
use prometheus::core::{Atomic, AtomicF64, AtomicU64, Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use prometheus::Opts;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A summary partitioned by label values. Cloning shares the underlying
/// series, so a clone can be handed to a registry while another is observed
/// into.
#[derive(Clone)]
pub struct SummaryVec {
    core: Arc<SummaryVecCore>,
}

struct SummaryVecCore {
    desc: Desc,
    children: RwLock<HashMap<Vec<String>, Summary>>,
}

/// One series of a [`SummaryVec`].
#[derive(Clone)]
pub struct Summary {
    inner: Arc<SummaryCore>,
}

struct SummaryCore {
    count: AtomicU64,
    sum: AtomicF64,
}

impl SummaryVec {
    pub fn new(opts: Opts, label_names: &[&str]) -> Result<Self, MetricsError> {
        let desc = Desc::new(
            opts.fq_name(),
            opts.help.clone(),
            label_names.iter().map(|name| name.to_string()).collect(),
            opts.const_labels.clone(),
        )?;
        Ok(Self {
            core: Arc::new(SummaryVecCore {
                desc,
                children: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn get_metric_with_label_values(&self, values: &[&str]) -> Result<Summary, MetricsError> {
        let expect = self.core.desc.variable_labels.len();
        if values.len() != expect {
            return Err(prometheus::Error::InconsistentCardinality {
                expect,
                got: values.len(),
            }
            .into());
        }

        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        {
            let children = self
                .core
                .children
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(child) = children.get(&key) {
                return Ok(child.clone());
            }
        }

        let mut children = self
            .core
            .children
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(children.entry(key).or_insert_with(Summary::new).clone())
    }

    pub fn name(&self) -> &str {
        &self.core.desc.fq_name
    }
}

impl Summary {
    fn new() -> Self {
        Self {
            inner: Arc::new(SummaryCore {
                count: AtomicU64::new(0),
                sum: AtomicF64::new(0.0),
            }),
        }
    }

    pub fn observe(&self, value: f64) {
        self.inner.sum.inc_by(value);
        self.inner.count.inc_by(1);
    }

    pub fn sample_count(&self) -> u64 {
        self.inner.count.get()
    }

    pub fn sample_sum(&self) -> f64 {
        self.inner.sum.get()
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.core.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let desc = &self.core.desc;
        let children = self
            .core
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let metrics: Vec<proto::Metric> = children
            .iter()
            .map(|(values, child)| {
                let mut labels = desc.const_label_pairs.clone();
                for (name, value) in desc.variable_labels.iter().zip(values) {
                    let mut pair = proto::LabelPair::default();
                    pair.set_name(name.clone());
                    pair.set_value(value.clone());
                    labels.push(pair);
                }
                labels.sort_by(|a, b| a.get_name().cmp(b.get_name()));

                let mut summary = proto::Summary::default();
                summary.set_sample_count(child.sample_count());
                summary.set_sample_sum(child.sample_sum());

                let mut metric = proto::Metric::default();
                metric.set_label(labels.into());
                metric.set_summary(summary);
                metric
            })
            .collect();

        let mut family = MetricFamily::default();
        family.set_name(desc.fq_name.clone());
        family.set_help(desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);
        family.set_metric(metrics.into());
        vec![family]
    }
}
