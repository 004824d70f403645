use crate::{
    error::Error,
    group::MetricGroup,
    stats::Stats,
    summary::{default_quantiles, Quantile},
};
use prometheus::Registry;
use quanta::Clock;
use std::time::Duration;

/// A configuration builder for `Stats`.
#[derive(Clone)]
pub struct Configuration {
    pub(crate) registry: Registry,
    pub(crate) prefix: String,
    pub(crate) buckets: Vec<f64>,
    pub(crate) quantiles: Vec<Quantile>,
    pub(crate) max_age: Duration,
    pub(crate) age_buckets: u32,
    pub(crate) clock: Clock,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            registry: Registry::new(),
            prefix: "go".to_owned(),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(),
            quantiles: default_quantiles(),
            max_age: Duration::from_secs(600),
            age_buckets: 5,
            clock: Clock::new(),
        }
    }
}

impl Configuration {
    /// Creates a new `Configuration` with default values.
    pub fn new() -> Configuration { Default::default() }

    /// Sets the registry that every instrument is registered into.
    ///
    /// Defaults to a fresh, empty `Registry`.
    ///
    /// To expose the catalogue through the process-wide default registry, pass
    /// `prometheus::default_registry().clone()`.  Registering the catalogue twice into the same
    /// registry fails with `Error::DuplicateRegistration`.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the metric name prefix.
    ///
    /// Defaults to `go`, which yields names such as `go_http_client` and `go_db_query_state`.  An
    /// empty prefix drops the leading segment entirely.
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_owned();
        self
    }

    /// Sets the bucket bounds used by timers.
    ///
    /// Defaults to `prometheus::DEFAULT_BUCKETS`.
    ///
    /// Timers are fed microseconds, so the default buckets (tuned for seconds) put nearly every
    /// observation in `+Inf`.  That keeps exported series compatible with existing dashboards;
    /// set microsecond-scale bounds here if bucket resolution matters.
    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = buckets;
        self
    }

    /// Sets the quantiles estimated by summaries.
    ///
    /// Defaults to `0.5`, `0.9` and `0.99`.  Values are clamped to `[0, 1]`.
    pub fn quantiles(mut self, quantiles: &[f64]) -> Self {
        self.quantiles = quantiles.iter().map(|q| Quantile::from(*q)).collect();
        self
    }

    /// Sets how long an observation contributes to summary quantiles.
    ///
    /// Defaults to `10 minutes`.
    pub fn summary_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets how many steps the summary window advances in.
    ///
    /// Defaults to `5`.
    ///
    /// Observations expire one bucket at a time, so more buckets give a smoother window at the
    /// cost of memory per series.
    pub fn summary_age_buckets(mut self, age_buckets: u32) -> Self {
        self.age_buckets = age_buckets;
        self
    }

    /// Sets the clock used for elapsed-time helpers and summary windows.
    ///
    /// Defaults to `Clock::new()`.  Tests can pass the clock half of `Clock::mock()` to control
    /// time.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Creates an empty `MetricGroup` bound to this configuration.
    ///
    /// Useful for application-specific groups that should live next to the built-in catalogue.
    pub fn group(&self) -> MetricGroup { MetricGroup::from_config(self.clone()) }

    /// Builds the full catalogue, registering every instrument.
    pub fn build(self) -> Result<Stats, Error> { Stats::from_config(self) }

    pub(crate) fn metric_name(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_owned()
        } else {
            format!("{}_{}", self.prefix, suffix)
        }
    }
}
