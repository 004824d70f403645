use crate::{configuration::Configuration, error::Error};
use fnv::FnvBuildHasher;
use hashbrown::{Equivalent, HashMap};
use hdrhistogram::Histogram as HdrHistogram;
use parking_lot::{Mutex, RwLock};
use prometheus::{
    core::{Collector, Desc},
    proto,
};
use quanta::{Clock, Instant};
use std::{collections::HashMap as StdHashMap, sync::Arc, time::Duration};

/// A summary objective.
///
/// This represents a floating-point value from 0 to 1, the quantile that will be estimated and
/// exported for every series of a `SummaryVec`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quantile(f64);

impl Quantile {
    /// The quantile as a value between `0.0` and `1.0`.
    pub fn value(self) -> f64 { self.0 }
}

impl From<f64> for Quantile {
    fn from(q: f64) -> Self {
        // Force our value between +0.0 and +1.0.  NaN ends up at zero.
        let clamped = q.max(0.0);
        let clamped = clamped.min(1.0);

        Quantile(clamped)
    }
}

pub(crate) fn default_quantiles() -> Vec<Quantile> { vec![Quantile(0.5), Quantile(0.9), Quantile(0.99)] }

/// A labeled vector of summaries.
///
/// The `prometheus` crate ships histograms but no summaries, so this collector fills the gap: every
/// label tuple gets a cumulative sample count and sum, plus quantile estimates computed over a
/// sliding window of recent observations.
///
/// `SummaryVec` is cheaply cloneable; clones share the same series.
#[derive(Clone)]
pub struct SummaryVec {
    inner: Arc<SummaryCore>,
}

struct SummaryCore {
    desc: Desc,
    quantiles: Vec<Quantile>,
    granularity: Duration,
    num_buckets: usize,
    template: HdrHistogram<u64>,
    clock: Clock,
    series: RwLock<HashMap<Vec<String>, Arc<Mutex<WindowedSummary>>, FnvBuildHasher>>,
}

impl SummaryVec {
    pub(crate) fn from_config(name: &str, labels: &[&str], conf: &Configuration) -> Result<SummaryVec, Error> {
        if conf.age_buckets == 0 {
            return Err(Error::InvalidSummary("age buckets must be non-zero".to_owned()));
        }
        let granularity = conf.max_age / conf.age_buckets;
        if granularity == Duration::from_secs(0) {
            return Err(Error::InvalidSummary(format!(
                "max age {:?} is too short for {} age buckets",
                conf.max_age, conf.age_buckets
            )));
        }

        let desc = Desc::new(
            name.to_owned(),
            name.to_owned(),
            labels.iter().map(|l| (*l).to_owned()).collect(),
            StdHashMap::new(),
        )
        .map_err(|e| Error::registration(name, e))?;

        let template = HdrHistogram::new(3).map_err(|e| Error::InvalidSummary(e.to_string()))?;

        Ok(SummaryVec {
            inner: Arc::new(SummaryCore {
                desc,
                quantiles: conf.quantiles.clone(),
                granularity,
                // One extra bucket so there is always a clear bucket to write into.
                num_buckets: conf.age_buckets as usize + 1,
                template,
                clock: conf.clock.clone(),
                series: RwLock::new(HashMap::default()),
            }),
        })
    }

    /// Gets the summary for the given label values, creating it if needed.
    ///
    /// Fails with `InconsistentCardinality` if the number of values does not match the number of
    /// label names this vector was declared with.
    pub fn get_metric_with_label_values(&self, vals: &[&str]) -> prometheus::Result<Summary> {
        let core = &self.inner;
        let expect = core.desc.variable_labels.len();
        if vals.len() != expect {
            return Err(prometheus::Error::InconsistentCardinality { expect, got: vals.len() });
        }

        if let Some(series) = core.series.read().get(&LabelValues(vals)) {
            return Ok(self.handle(series));
        }

        let mut series = core.series.write();
        let entry = series
            .entry(vals.iter().map(|v| (*v).to_owned()).collect())
            .or_insert_with(|| Arc::new(Mutex::new(core.new_window())));

        Ok(self.handle(entry))
    }

    fn handle(&self, series: &Arc<Mutex<WindowedSummary>>) -> Summary {
        Summary {
            core: Arc::clone(&self.inner),
            series: Arc::clone(series),
        }
    }
}

impl SummaryCore {
    fn new_window(&self) -> WindowedSummary {
        WindowedSummary::new(&self.template, self.num_buckets, self.granularity, self.clock.now())
    }

    fn metric(&self, values: &[String], window: &mut WindowedSummary, now: Instant) -> proto::Metric {
        window.upkeep(now);
        let merged = window.merged(&self.template);

        let mut summary = proto::Summary::default();
        summary.set_sample_count(window.count);
        summary.set_sample_sum(window.sum);
        for q in &self.quantiles {
            let mut quantile = proto::Quantile::default();
            quantile.set_quantile(q.value());
            quantile.set_value(quantile_of(&merged, *q));
            summary.mut_quantile().push(quantile);
        }

        let mut pairs: Vec<(&String, &String)> = self.desc.variable_labels.iter().zip(values).collect();
        pairs.sort();

        let mut metric = proto::Metric::default();
        for (name, value) in pairs {
            let mut label = proto::LabelPair::default();
            label.set_name(name.clone());
            label.set_value(value.clone());
            metric.mut_label().push(label);
        }
        metric.set_summary(summary);
        metric
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> Vec<&Desc> { vec![&self.inner.desc] }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let core = &self.inner;
        let now = core.clock.now();

        let mut family = proto::MetricFamily::default();
        family.set_name(core.desc.fq_name.clone());
        family.set_help(core.desc.help.clone());
        family.set_field_type(proto::MetricType::SUMMARY);

        for (values, window) in core.series.read().iter() {
            let mut window = window.lock();
            let metric = core.metric(values, &mut window, now);
            family.mut_metric().push(metric);
        }

        vec![family]
    }
}

/// A single series of a `SummaryVec`.
#[derive(Clone)]
pub struct Summary {
    core: Arc<SummaryCore>,
    series: Arc<Mutex<WindowedSummary>>,
}

impl Summary {
    /// Records an observation.
    ///
    /// The sum tracks the exact value; quantiles are estimated from the value rounded to the
    /// nearest non-negative integer.
    pub fn observe(&self, v: f64) {
        let now = self.core.clock.now();
        self.series.lock().observe(now, v);
    }

    /// Total number of observations since creation.
    pub fn get_sample_count(&self) -> u64 { self.series.lock().count }

    /// Sum of all observations since creation.
    pub fn get_sample_sum(&self) -> f64 { self.series.lock().sum }

    /// Estimates the given quantile over the current window.
    ///
    /// Returns `NaN` when the window holds no observations.
    pub fn get_quantile(&self, q: f64) -> f64 {
        let now = self.core.clock.now();
        let mut window = self.series.lock();
        window.upkeep(now);
        quantile_of(&window.merged(&self.core.template), Quantile::from(q))
    }
}

fn quantile_of(h: &HdrHistogram<u64>, q: Quantile) -> f64 {
    if h.len() == 0 {
        return f64::NAN;
    }

    h.value_at_quantile(q.value()) as f64
}

/// Borrowed label values, usable to look up series keyed by owned label values.
#[derive(Hash)]
struct LabelValues<'a>(&'a [&'a str]);

impl<'a> Equivalent<Vec<String>> for LabelValues<'a> {
    fn equivalent(&self, key: &Vec<String>) -> bool {
        self.0.len() == key.len() && self.0.iter().zip(key).all(|(a, b)| *a == b.as_str())
    }
}

/// Sliding-window quantile state for one series, plus its cumulative count and sum.
struct WindowedSummary {
    buckets: Vec<HdrHistogram<u64>>,
    bucket_index: usize,
    last_upkeep: Instant,
    granularity: Duration,
    count: u64,
    sum: f64,
}

impl WindowedSummary {
    fn new(template: &HdrHistogram<u64>, num_buckets: usize, granularity: Duration, now: Instant) -> WindowedSummary {
        WindowedSummary {
            buckets: vec![template.clone(); num_buckets],
            bucket_index: 0,
            last_upkeep: now,
            granularity,
            count: 0,
            sum: 0.0,
        }
    }

    /// Rotates out buckets older than the window.
    ///
    /// Upkeep is lazy, so a long idle period may have to rotate several buckets at once.  Once
    /// every bucket has been cleared there is nothing left to expire.
    fn upkeep(&mut self, at: Instant) {
        let mut rotated = 0;
        while at >= self.last_upkeep + self.granularity {
            self.bucket_index += 1;
            self.bucket_index %= self.buckets.len();
            self.buckets[self.bucket_index].clear();
            self.last_upkeep = self.last_upkeep + self.granularity;

            rotated += 1;
            if rotated == self.buckets.len() {
                self.last_upkeep = at;
                break;
            }
        }
    }

    fn observe(&mut self, at: Instant, v: f64) {
        self.upkeep(at);

        let sample = if v.is_finite() && v > 0.0 { v.round() as u64 } else { 0 };
        self.buckets[self.bucket_index].saturating_record(sample);
        self.count += 1;
        self.sum += v;
    }

    fn merged(&self, template: &HdrHistogram<u64>) -> HdrHistogram<u64> {
        let mut base = template.clone();
        for histogram in &self.buckets {
            base.add(histogram)
                .expect("window buckets share the template's auto-resizing bounds");
        }

        base
    }
}
