use crate::{configuration::Configuration, error::Error, group::MetricGroup, stat::Stat};
use log::info;
use prometheus::{Registry, TextEncoder};
use quanta::{Clock, Instant};
use std::{fmt, str::FromStr, sync::Arc};

/// A logical name that application code records against.
///
/// Every role resolves to exactly one `MetricGroup`.  `Cache` and `DB` deliberately resolve to
/// the same library-client group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    HttpClient,
    HttpServer,
    RpcClient,
    RpcServer,
    Cache,
    Db,
    DbQuery,
    CacheHit,
    CacheMiss,
    AppErrorCount,
    AppInfoCount,
}

impl Role {
    /// Every role in the catalogue.
    pub const ALL: [Role; 11] = [
        Role::HttpClient,
        Role::HttpServer,
        Role::RpcClient,
        Role::RpcServer,
        Role::Cache,
        Role::Db,
        Role::DbQuery,
        Role::CacheHit,
        Role::CacheMiss,
        Role::AppErrorCount,
        Role::AppInfoCount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::HttpClient => "HTTPClient",
            Role::HttpServer => "HTTPServer",
            Role::RpcClient => "RPCClient",
            Role::RpcServer => "RPCServer",
            Role::Cache => "Cache",
            Role::Db => "DB",
            Role::DbQuery => "DBQuery",
            Role::CacheHit => "CacheHit",
            Role::CacheMiss => "CacheMiss",
            Role::AppErrorCount => "AppErrorCount",
            Role::AppInfoCount => "AppInfoCount",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Role, Error> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| Error::UnknownRole(s.to_owned()))
    }
}

/// The predefined catalogue of metric groups.
///
/// Built once at startup, then shared by reference (or behind an `Arc`) with every component that
/// records metrics.  The catalogue itself is immutable; only instrument values change.
///
/// | role            | metrics                                                             |
/// |-----------------|---------------------------------------------------------------------|
/// | `HTTPClient`    | `http_client`, `http_client_state`, `http_client_code`              |
/// | `HTTPServer`    | `http_server`, `http_server_code`                                   |
/// | `RPCClient`     | `rpc_client`, `rpc_client_state`, `rpc_client_code`                 |
/// | `RPCServer`     | `rpc_server`, `rpc_server_code`                                     |
/// | `Cache`, `DB`   | `lib_client`, `lib_client_state`, `lib_client_code`                 |
/// | `DBQuery`       | `db_query`, `db_query_summary`, `db_query_state`                    |
/// | `CacheHit`      | `cache_hit`                                                         |
/// | `CacheMiss`     | `cache_miss`                                                        |
/// | `AppErrorCount` | `app_error_count`, `app_error_state`                                |
/// | `AppInfoCount`  | `app_info_count`, `app_info_state`                                  |
///
/// Every name carries the configured prefix, `go` by default.
pub struct Stats {
    registry: Registry,
    clock: Clock,
    http_client: Arc<MetricGroup>,
    http_server: Arc<MetricGroup>,
    rpc_client: Arc<MetricGroup>,
    rpc_server: Arc<MetricGroup>,
    lib_client: Arc<MetricGroup>,
    db_query: Arc<MetricGroup>,
    cache_hit: Arc<MetricGroup>,
    cache_miss: Arc<MetricGroup>,
    app_error_count: Arc<MetricGroup>,
    app_info_count: Arc<MetricGroup>,
}

impl Stats {
    /// Builds the catalogue into a fresh registry with default settings.
    pub fn new() -> Result<Stats, Error> { Configuration::new().build() }

    /// Gets a builder to configure a `Stats` instance with.
    pub fn builder() -> Configuration { Configuration::default() }

    pub(crate) fn from_config(conf: Configuration) -> Result<Stats, Error> {
        const METHOD_NAME: &[&str] = &["method", "name"];
        const METHOD_NAME_CODE: &[&str] = &["method", "name", "code"];
        const NAME: &[&str] = &["name"];

        let n = |suffix: &str| conf.metric_name(suffix);

        // Shared by every mc/redis/mysql style client.
        let lib_client = conf
            .group()
            .with_timer(&n("lib_client"), METHOD_NAME)?
            .with_gauge(&n("lib_client_state"), METHOD_NAME)?
            .with_counter(&n("lib_client_code"), &["method", "code"])?;

        let rpc_client = conf
            .group()
            .with_timer(&n("rpc_client"), METHOD_NAME)?
            .with_gauge(&n("rpc_client_state"), METHOD_NAME)?
            .with_counter(&n("rpc_client_code"), METHOD_NAME_CODE)?;

        let rpc_server = conf
            .group()
            .with_timer(&n("rpc_server"), METHOD_NAME)?
            .with_counter(&n("rpc_server_code"), METHOD_NAME_CODE)?;

        let http_client = conf
            .group()
            .with_timer(&n("http_client"), METHOD_NAME)?
            .with_gauge(&n("http_client_state"), METHOD_NAME)?
            .with_counter(&n("http_client_code"), METHOD_NAME_CODE)?;

        let http_server = conf
            .group()
            .with_timer(&n("http_server"), METHOD_NAME)?
            .with_counter(&n("http_server_code"), METHOD_NAME_CODE)?;

        let app_error_count = conf
            .group()
            .with_counter(&n("app_error_count"), NAME)?
            .with_gauge(&n("app_error_state"), NAME)?;

        let app_info_count = conf
            .group()
            .with_counter(&n("app_info_count"), NAME)?
            .with_gauge(&n("app_info_state"), NAME)?;

        let cache_hit = conf.group().with_counter(&n("cache_hit"), NAME)?;
        let cache_miss = conf.group().with_counter(&n("cache_miss"), NAME)?;

        let db_query = conf
            .group()
            .with_timer(&n("db_query"), METHOD_NAME)?
            .with_summary(&n("db_query_summary"), METHOD_NAME)?
            .with_gauge(&n("db_query_state"), METHOD_NAME)?;

        info!("metric catalogue registered with prefix {:?}", conf.prefix);

        Ok(Stats {
            registry: conf.registry.clone(),
            clock: conf.clock.clone(),
            http_client: Arc::new(http_client),
            http_server: Arc::new(http_server),
            rpc_client: Arc::new(rpc_client),
            rpc_server: Arc::new(rpc_server),
            lib_client: Arc::new(lib_client),
            db_query: Arc::new(db_query),
            cache_hit: Arc::new(cache_hit),
            cache_miss: Arc::new(cache_miss),
            app_error_count: Arc::new(app_error_count),
            app_info_count: Arc::new(app_info_count),
        })
    }

    /// The group backing the given role.
    pub fn group(&self, role: Role) -> &Arc<MetricGroup> {
        match role {
            Role::HttpClient => &self.http_client,
            Role::HttpServer => &self.http_server,
            Role::RpcClient => &self.rpc_client,
            Role::RpcServer => &self.rpc_server,
            Role::Cache | Role::Db => &self.lib_client,
            Role::DbQuery => &self.db_query,
            Role::CacheHit => &self.cache_hit,
            Role::CacheMiss => &self.cache_miss,
            Role::AppErrorCount => &self.app_error_count,
            Role::AppInfoCount => &self.app_info_count,
        }
    }

    /// The recording surface for the given role.
    pub fn role(&self, role: Role) -> &dyn Stat { self.group(role).as_ref() }

    pub fn http_client(&self) -> &Arc<MetricGroup> { &self.http_client }

    pub fn http_server(&self) -> &Arc<MetricGroup> { &self.http_server }

    pub fn rpc_client(&self) -> &Arc<MetricGroup> { &self.rpc_client }

    pub fn rpc_server(&self) -> &Arc<MetricGroup> { &self.rpc_server }

    /// Cache client calls.  Shares its group with `db`.
    pub fn cache(&self) -> &Arc<MetricGroup> { &self.lib_client }

    /// Database client calls.  Shares its group with `cache`.
    pub fn db(&self) -> &Arc<MetricGroup> { &self.lib_client }

    pub fn db_query(&self) -> &Arc<MetricGroup> { &self.db_query }

    pub fn cache_hit(&self) -> &Arc<MetricGroup> { &self.cache_hit }

    pub fn cache_miss(&self) -> &Arc<MetricGroup> { &self.cache_miss }

    pub fn app_error_count(&self) -> &Arc<MetricGroup> { &self.app_error_count }

    pub fn app_info_count(&self) -> &Arc<MetricGroup> { &self.app_info_count }

    /// The registry every group is registered into.
    pub fn registry(&self) -> &Registry { &self.registry }

    /// Reference to the clock used by the elapsed-time helpers.
    pub fn clock(&self) -> &Clock { &self.clock }

    /// Captures a monotonic start marker.
    pub fn begin_time(&self) -> Instant { self.clock.now() }

    /// Microseconds elapsed since `start`.
    ///
    /// Never negative; a marker from the future yields zero.
    pub fn time_sub(&self, start: Instant) -> i64 {
        let elapsed = self.clock.now().saturating_duration_since(start);
        elapsed.as_micros().min(i64::max_value() as u128) as i64
    }

    /// Records how long a database call took since `start`.
    ///
    /// The elapsed microseconds are observed on the `DBQuery` timer and set as its state, both
    /// under the label tuple `[method, name]`.
    pub fn db_query_end_time(&self, start: Instant, method: &str, name: &str) {
        let elapsed = self.time_sub(start);

        self.db_query.timing(method, elapsed, &[name]);
        self.db_query.state(method, elapsed, &[name]);
    }

    /// Renders every registered metric in the Prometheus text exposition format.
    pub fn gather_text(&self) -> Result<String, Error> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(Error::Encode)
    }
}
