//! Predefined Prometheus metric groups for services.
//!
//! `Stats` registers a fixed catalogue of labeled timers, summaries, counters and gauges for the
//! usual service concerns, and hands out each one behind the small `Stat` recording interface:
//!
//! ```
//! use promstat::{Role, Stat, Stats};
//!
//! let stats = Stats::new()?;
//!
//! let start = stats.begin_time();
//! stats.cache_miss().incr("get_user", &[]);
//! stats.db_query_end_time(start, "user", "user_info");
//!
//! let http: &dyn Stat = stats.role(Role::HttpServer);
//! http.timing("GET", 1250, &["/users"]);
//! http.incr("GET", &["/users", "200"]);
//!
//! let text = stats.gather_text()?;
//! assert!(text.contains("go_cache_miss{name=\"get_user\"} 1"));
//! # Ok::<(), promstat::Error>(())
//! ```
mod configuration;
mod error;
mod group;
mod stat;
mod stats;
mod summary;

pub use self::{
    configuration::Configuration,
    error::Error,
    group::MetricGroup,
    stat::Stat,
    stats::{Role, Stats},
    summary::{Quantile, Summary, SummaryVec},
};

pub use quanta::{Clock, Instant};
