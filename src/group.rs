use crate::{configuration::Configuration, error::Error, summary::SummaryVec};
use log::{debug, warn};
use prometheus::{core::Collector, CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};

/// A bundle of up to four labeled instruments recorded through one interface.
///
/// Groups are assembled with the `with_*` builders, each of which registers a single instrument
/// kind with the backing registry.  Every kind can be set at most once: calling the same builder
/// again is a no-op, so a group can be declared through any number of chained calls without
/// tripping duplicate registration.
///
/// Recording never fails.  Operations aimed at an instrument the group doesn't carry are silently
/// dropped, and the first label value of every recording call is always the `name` argument.
pub struct MetricGroup {
    conf: Configuration,
    timer: Option<HistogramVec>,
    summary: Option<SummaryVec>,
    counter: Option<CounterVec>,
    state: Option<GaugeVec>,
    counter_labels: usize,
    state_labels: usize,
}

impl MetricGroup {
    /// Creates an empty group that registers into `registry` using default settings.
    pub fn new(registry: &Registry) -> MetricGroup { Configuration::new().registry(registry.clone()).group() }

    pub(crate) fn from_config(conf: Configuration) -> MetricGroup {
        MetricGroup {
            conf,
            timer: None,
            summary: None,
            counter: None,
            state: None,
            counter_labels: 0,
            state_labels: 0,
        }
    }

    /// Attaches a histogram timer.
    ///
    /// No-op if the group already has a timer.
    pub fn with_timer(mut self, name: &str, labels: &[&str]) -> Result<MetricGroup, Error> {
        if self.timer.is_some() {
            return Ok(self);
        }

        let opts = HistogramOpts::new(name, name).buckets(self.conf.buckets.clone());
        let timer = HistogramVec::new(opts, labels).map_err(|e| Error::registration(name, e))?;
        self.register(name, Box::new(timer.clone()))?;
        self.timer = Some(timer);
        Ok(self)
    }

    /// Attaches a summary timer.
    ///
    /// No-op if the group already has a summary.
    pub fn with_summary(mut self, name: &str, labels: &[&str]) -> Result<MetricGroup, Error> {
        if self.summary.is_some() {
            return Ok(self);
        }

        let summary = SummaryVec::from_config(name, labels, &self.conf)?;
        self.register(name, Box::new(summary.clone()))?;
        self.summary = Some(summary);
        Ok(self)
    }

    /// Attaches a counter.
    ///
    /// No-op if the group already has a counter.
    pub fn with_counter(mut self, name: &str, labels: &[&str]) -> Result<MetricGroup, Error> {
        if self.counter.is_some() {
            return Ok(self);
        }

        let counter = CounterVec::new(Opts::new(name, name), labels).map_err(|e| Error::registration(name, e))?;
        self.register(name, Box::new(counter.clone()))?;
        self.counter = Some(counter);
        self.counter_labels = labels.len();
        Ok(self)
    }

    /// Attaches a gauge, used as the group's live state.
    ///
    /// No-op if the group already has a gauge.
    pub fn with_gauge(mut self, name: &str, labels: &[&str]) -> Result<MetricGroup, Error> {
        if self.state.is_some() {
            return Ok(self);
        }

        let state = GaugeVec::new(Opts::new(name, name), labels).map_err(|e| Error::registration(name, e))?;
        self.register(name, Box::new(state.clone()))?;
        self.state = Some(state);
        self.state_labels = labels.len();
        Ok(self)
    }

    /// Label values for the gauge.
    ///
    /// Groups often count by `{method, name, code}` while tracking state by `{method, name}`.  A
    /// tuple shaped for such a counter is trimmed to the gauge's leading labels, so one call site
    /// can feed both; any other mismatch is left for `resolve` to catch.
    fn gauge_labels<'a, 'b>(&self, labels: &'b [&'a str]) -> &'b [&'a str] {
        if labels.len() == self.counter_labels && self.counter_labels > self.state_labels {
            &labels[..self.state_labels]
        } else {
            labels
        }
    }

    /// Whether a tuple should reach the counter.
    ///
    /// The reverse of `gauge_labels`: a tuple shaped for the gauge carries no code, so it only
    /// moves the gauge and the counter is skipped without a warning.
    fn counts(&self, labels: &[&str]) -> bool {
        !(self.state.is_some() && labels.len() == self.state_labels && self.state_labels < self.counter_labels)
    }

    fn register(&self, name: &str, collector: Box<dyn Collector>) -> Result<(), Error> {
        self.conf
            .registry
            .register(collector)
            .map_err(|e| Error::registration(name, e))?;

        debug!("registered metric {}", name);
        Ok(())
    }

    /// The timer, if one was attached.
    pub fn timer(&self) -> Option<&HistogramVec> { self.timer.as_ref() }

    /// The summary, if one was attached.
    pub fn summary(&self) -> Option<&SummaryVec> { self.summary.as_ref() }

    /// The counter, if one was attached.
    pub fn counter(&self) -> Option<&CounterVec> { self.counter.as_ref() }

    /// The gauge, if one was attached.
    pub fn gauge(&self) -> Option<&GaugeVec> { self.state.as_ref() }

    /// Records a duration, usually in microseconds, on the timer and the summary.
    pub fn timing(&self, name: &str, time: i64, extra: &[&str]) {
        if self.timer.is_none() && self.summary.is_none() {
            return;
        }

        let labels = label_values(name, extra);
        if let Some(timer) = &self.timer {
            if let Some(h) = resolve(timer, timer.get_metric_with_label_values(&labels)) {
                h.observe(time as f64);
            }
        }

        if let Some(summary) = &self.summary {
            if let Some(s) = resolve(summary, summary.get_metric_with_label_values(&labels)) {
                s.observe(time as f64);
            }
        }
    }

    /// Increments the counter and the gauge by one.
    ///
    /// Both are updated independently; a group with only one of them still records it.  When the
    /// counter declares more labels than the gauge, the gauge only sees the leading values, and a
    /// tuple that only fits the gauge leaves the counter alone.
    pub fn incr(&self, name: &str, extra: &[&str]) {
        if self.counter.is_none() && self.state.is_none() {
            return;
        }

        let labels = label_values(name, extra);
        if let Some(counter) = self.counter.as_ref().filter(|_| self.counts(&labels)) {
            if let Some(c) = resolve(counter, counter.get_metric_with_label_values(&labels)) {
                c.inc();
            }
        }

        if let Some(state) = &self.state {
            if let Some(g) = resolve(state, state.get_metric_with_label_values(self.gauge_labels(&labels))) {
                g.inc();
            }
        }
    }

    /// Decrements the gauge by one.  Counters only ever go up, so they are left alone.
    pub fn decr(&self, name: &str, extra: &[&str]) {
        if let Some(state) = &self.state {
            let labels = label_values(name, extra);
            if let Some(g) = resolve(state, state.get_metric_with_label_values(self.gauge_labels(&labels))) {
                g.dec();
            }
        }
    }

    /// Sets the gauge to an absolute value.
    pub fn state(&self, name: &str, value: i64, extra: &[&str]) {
        if let Some(state) = &self.state {
            let labels = label_values(name, extra);
            if let Some(g) = resolve(state, state.get_metric_with_label_values(self.gauge_labels(&labels))) {
                g.set(value as f64);
            }
        }
    }

    /// Adds `value` to the counter and the gauge.
    ///
    /// `value` is expected to be positive.  A negative value still moves the gauge but is never
    /// applied to the counter.  Label tuples are routed the same way as in `incr`.
    pub fn add(&self, name: &str, value: i64, extra: &[&str]) {
        if self.counter.is_none() && self.state.is_none() {
            return;
        }

        let labels = label_values(name, extra);
        if let Some(counter) = self.counter.as_ref().filter(|_| self.counts(&labels)) {
            if value >= 0 {
                if let Some(c) = resolve(counter, counter.get_metric_with_label_values(&labels)) {
                    c.inc_by(value as f64);
                }
            }
        }

        if let Some(state) = &self.state {
            if let Some(g) = resolve(state, state.get_metric_with_label_values(self.gauge_labels(&labels))) {
                g.add(value as f64);
            }
        }
    }
}

fn label_values<'a>(name: &'a str, extra: &[&'a str]) -> Vec<&'a str> {
    let mut labels = Vec::with_capacity(extra.len() + 1);
    labels.push(name);
    labels.extend_from_slice(extra);
    labels
}

/// Unwraps a series lookup, dropping the sample when the label values don't fit the instrument.
///
/// A mismatch is a bug at the call site, so debug builds panic to surface it in tests.
fn resolve<M>(instrument: &dyn Collector, series: prometheus::Result<M>) -> Option<M> {
    match series {
        Ok(m) => Some(m),
        Err(e) => {
            let descs = instrument.desc();
            let metric = descs.first().map(|d| d.fq_name.as_str()).unwrap_or("unknown");
            warn!("dropping sample for {}: {}", metric, e);
            if cfg!(debug_assertions) {
                panic!("label values for {} do not match its label names: {}", metric, e);
            }
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::MetricGroup;
    use crate::error::Error;
    use prometheus::{core::Collector, Registry};
    use std::{sync::Arc, thread};

    fn fq_name<C: Collector>(c: &C) -> String { c.desc()[0].fq_name.clone() }

    #[test]
    fn test_new_group_is_empty() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry);

        assert!(group.timer().is_none());
        assert!(group.summary().is_none());
        assert!(group.counter().is_none());
        assert!(group.gauge().is_none());
        assert!(registry.gather().is_empty());
    }

    #[test]
    fn test_with_builders_are_idempotent() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_timer("first_timer", &["method", "name"])
            .unwrap()
            .with_timer("second_timer", &["method"])
            .unwrap()
            .with_summary("first_summary", &["method", "name"])
            .unwrap()
            .with_summary("second_summary", &["method"])
            .unwrap()
            .with_counter("first_counter", &["name"])
            .unwrap()
            .with_counter("second_counter", &["name", "code"])
            .unwrap()
            .with_gauge("first_gauge", &["name"])
            .unwrap()
            .with_gauge("second_gauge", &["name", "code"])
            .unwrap();

        assert_eq!(fq_name(group.timer().unwrap()), "first_timer");
        assert_eq!(fq_name(group.summary().unwrap()), "first_summary");
        assert_eq!(fq_name(group.counter().unwrap()), "first_counter");
        assert_eq!(fq_name(group.gauge().unwrap()), "first_gauge");

        // None of the ignored declarations reached the registry.
        let other = MetricGroup::new(&registry)
            .with_timer("second_timer", &["method"])
            .and_then(|g| g.with_summary("second_summary", &["method"]))
            .and_then(|g| g.with_counter("second_counter", &["name", "code"]))
            .and_then(|g| g.with_gauge("second_gauge", &["name", "code"]));
        assert!(other.is_ok());
    }

    #[test]
    fn test_repeated_builder_keeps_recording_into_first() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_counter("calls", &["name"])
            .unwrap()
            .with_counter("calls", &["name"])
            .unwrap();

        group.incr("get_user", &[]);
        assert_eq!(group.counter().unwrap().with_label_values(&["get_user"]).get(), 1.0);
    }

    #[test]
    fn test_duplicate_registration_across_groups() {
        let registry = Registry::new();
        let _first = MetricGroup::new(&registry).with_counter("go_cache_hit", &["name"]).unwrap();

        match MetricGroup::new(&registry).with_counter("go_cache_hit", &["name"]) {
            Err(Error::DuplicateRegistration { name }) => assert_eq!(name, "go_cache_hit"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("duplicate registration was accepted"),
        }
    }

    #[test]
    fn test_invalid_metric_name() {
        let registry = Registry::new();
        match MetricGroup::new(&registry).with_gauge("not a metric", &["name"]) {
            Err(Error::InvalidMetric { name, .. }) => assert_eq!(name, "not a metric"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("invalid name was accepted"),
        }
    }

    #[test]
    fn test_counter_only_group() {
        let registry = Registry::new();
        let cache = MetricGroup::new(&registry).with_counter("cache", &["name"]).unwrap();

        cache.incr("get_user", &[]);
        cache.incr("get_user", &[]);
        cache.incr("get_user", &[]);

        assert_eq!(cache.counter().unwrap().with_label_values(&["get_user"]).get(), 3.0);
        assert!(cache.gauge().is_none());

        // Decrementing without a gauge has nothing to touch.
        cache.decr("get_user", &[]);
        assert_eq!(cache.counter().unwrap().with_label_values(&["get_user"]).get(), 3.0);
    }

    #[test]
    fn test_incr_decr_state() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_counter("app_info_count", &["name"])
            .unwrap()
            .with_gauge("app_info_state", &["name"])
            .unwrap();

        group.incr("login", &[]);
        group.incr("login", &[]);
        group.decr("login", &[]);

        assert_eq!(group.counter().unwrap().with_label_values(&["login"]).get(), 2.0);
        assert_eq!(group.gauge().unwrap().with_label_values(&["login"]).get(), 1.0);

        group.state("login", 42, &[]);
        assert_eq!(group.gauge().unwrap().with_label_values(&["login"]).get(), 42.0);
        assert_eq!(group.counter().unwrap().with_label_values(&["login"]).get(), 2.0);
    }

    #[test]
    fn test_state_takes_leading_counter_labels() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_gauge("http_client_state", &["method", "name"])
            .unwrap()
            .with_counter("http_client_code", &["method", "name", "code"])
            .unwrap();

        group.incr("GET", &["/users", "200"]);
        group.incr("GET", &["/users", "500"]);
        group.decr("GET", &["/users", "200"]);
        group.incr("GET", &["/orders"]);

        let counter = group.counter().unwrap();
        assert_eq!(counter.with_label_values(&["GET", "/users", "200"]).get(), 1.0);
        assert_eq!(counter.with_label_values(&["GET", "/users", "500"]).get(), 1.0);

        let state = group.gauge().unwrap();
        assert_eq!(state.with_label_values(&["GET", "/users"]).get(), 1.0);
        assert_eq!(state.with_label_values(&["GET", "/orders"]).get(), 1.0);

        // The state-shaped tuple never created a counter series.
        let families = registry.gather();
        let codes = families.iter().find(|mf| mf.get_name() == "http_client_code").unwrap();
        assert_eq!(codes.get_metric().len(), 2);
    }

    #[test]
    fn test_state_shaped_tuple_skips_counter() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_counter("rpc_client_code", &["method", "name", "code"])
            .unwrap()
            .with_gauge("rpc_client_state", &["method", "name"])
            .unwrap();

        group.incr("Get", &["user"]);
        group.add("Get", 4, &["user"]);
        group.decr("Get", &["user"]);
        group.add("Get", 1, &["user", "0"]);

        assert_eq!(group.gauge().unwrap().with_label_values(&["Get", "user"]).get(), 5.0);

        let counter = group.counter().unwrap();
        assert_eq!(counter.with_label_values(&["Get", "user", "0"]).get(), 1.0);
        let families = registry.gather();
        let codes = families.iter().find(|mf| mf.get_name() == "rpc_client_code").unwrap();
        assert_eq!(codes.get_metric().len(), 1);
    }

    #[test]
    fn test_gauge_symmetry() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_gauge("rpc_client_state", &["method", "name"])
            .unwrap();

        for _ in 0..25 {
            group.incr("get", &["user"]);
        }
        assert_eq!(group.gauge().unwrap().with_label_values(&["get", "user"]).get(), 25.0);

        for _ in 0..25 {
            group.decr("get", &["user"]);
        }
        assert_eq!(group.gauge().unwrap().with_label_values(&["get", "user"]).get(), 0.0);
    }

    #[test]
    fn test_add() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_counter("bytes_total", &["name"])
            .unwrap()
            .with_gauge("bytes_state", &["name"])
            .unwrap();

        group.add("upload", 512, &[]);
        group.add("upload", 512, &[]);
        assert_eq!(group.counter().unwrap().with_label_values(&["upload"]).get(), 1024.0);
        assert_eq!(group.gauge().unwrap().with_label_values(&["upload"]).get(), 1024.0);

        group.add("upload", -24, &[]);
        assert_eq!(group.counter().unwrap().with_label_values(&["upload"]).get(), 1024.0);
        assert_eq!(group.gauge().unwrap().with_label_values(&["upload"]).get(), 1000.0);
    }

    #[test]
    fn test_counter_is_monotonic() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_counter("events", &["name"])
            .unwrap()
            .with_gauge("events_state", &["name"])
            .unwrap();
        let counter = group.counter().unwrap().with_label_values(&["tick"]);

        let mut last = counter.get();
        for i in 0..50 {
            match i % 4 {
                0 => group.incr("tick", &[]),
                1 => group.add("tick", i, &[]),
                2 => group.decr("tick", &[]),
                _ => group.state("tick", -i, &[]),
            }

            let current = counter.get();
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn test_timing_feeds_timer_and_summary() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_timer("db_query", &["method", "name"])
            .unwrap()
            .with_summary("db_query_summary", &["method", "name"])
            .unwrap()
            .with_gauge("db_query_state", &["method", "name"])
            .unwrap();

        group.timing("user", 1200, &["user_info"]);
        group.timing("user", 800, &["user_info"]);

        let timer = group.timer().unwrap().with_label_values(&["user", "user_info"]);
        assert_eq!(timer.get_sample_count(), 2);
        assert_eq!(timer.get_sample_sum(), 2000.0);

        let summary = group.summary().unwrap().get_metric_with_label_values(&["user", "user_info"]).unwrap();
        assert_eq!(summary.get_sample_count(), 2);
        assert_eq!(summary.get_sample_sum(), 2000.0);

        // Timing never touches the gauge.
        let families = registry.gather();
        assert!(families.iter().all(|mf| mf.get_name() != "db_query_state"));
    }

    #[test]
    fn test_absent_instruments_are_noops() {
        let registry = Registry::new();
        let empty = MetricGroup::new(&registry);

        empty.timing("get", 10, &["user"]);
        empty.incr("get", &["user"]);
        empty.decr("get", &["user"]);
        empty.state("get", 3, &["user"]);
        empty.add("get", 3, &["user"]);
        assert!(registry.gather().is_empty());

        let counters = MetricGroup::new(&registry).with_counter("hits", &["name"]).unwrap();
        counters.timing("get", 10, &[]);
        counters.state("get", 3, &[]);
        assert!(registry.gather().is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "do not match its label names")]
    fn test_label_arity_mismatch_is_caught() {
        let registry = Registry::new();
        let group = MetricGroup::new(&registry)
            .with_counter("http_server_code", &["method", "name", "code"])
            .unwrap();

        group.incr("GET", &["/users"]);
    }

    #[test]
    fn test_concurrent_recording() {
        let registry = Registry::new();
        let group = Arc::new(
            MetricGroup::new(&registry)
                .with_counter("requests", &["name"])
                .unwrap()
                .with_gauge("requests_state", &["name"])
                .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let group = Arc::clone(&group);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        group.incr("index", &[]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(group.counter().unwrap().with_label_values(&["index"]).get(), 8000.0);
        assert_eq!(group.gauge().unwrap().with_label_values(&["index"]).get(), 8000.0);
    }
}
