use thiserror::Error;

/// Errors raised while building metric groups or rendering them.
///
/// Recording never produces an error; these only surface during startup or exposition.
#[derive(Debug, Error)]
pub enum Error {
    /// An instrument with this name already exists in the registry.
    ///
    /// This is a configuration bug: two groups were declared with the same metric name.
    #[error("metric `{name}` is already registered")]
    DuplicateRegistration { name: String },

    /// The backend rejected the metric name or its label names.
    #[error("invalid metric `{name}`: {source}")]
    InvalidMetric {
        name: String,
        #[source]
        source: prometheus::Error,
    },

    /// The summary window could not be built from the configured settings.
    #[error("invalid summary settings: {0}")]
    InvalidSummary(String),

    /// The given string does not name a known role.
    #[error("unknown role `{0}`")]
    UnknownRole(String),

    /// The registry could not be rendered in the text exposition format.
    #[error("failed to encode metrics: {0}")]
    Encode(#[source] prometheus::Error),
}

impl Error {
    /// Maps a registration failure from the backend onto the metric that caused it.
    pub(crate) fn registration(name: &str, e: prometheus::Error) -> Error {
        match e {
            prometheus::Error::AlreadyReg => Error::DuplicateRegistration { name: name.to_owned() },
            source => Error::InvalidMetric {
                name: name.to_owned(),
                source,
            },
        }
    }
}
