#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("NVML initialization failed: {0}")]
    Init(String),

    #[error("management interface not initialized")]
    Uninitialized,

    #[error("management interface degraded: {0}")]
    Degraded(String),

    #[error("NVML query failed: {0}")]
    Query(String),
}

impl Error {
    pub(crate) fn init<S: Into<String>>(msg: S) -> Self {
        Error::Init(msg.into())
    }

    pub(crate) fn degraded<S: Into<String>>(msg: S) -> Self {
        Error::Degraded(msg.into())
    }

    pub(crate) fn query<S: Into<String>>(msg: S) -> Self {
        Error::Query(msg.into())
    }

    /// True for the two structured "no data this tick" results. Hosts
    /// should skip the tick and keep scheduling; neither is fatal.
    pub fn is_no_data(&self) -> bool {
        matches!(self, Error::Uninitialized | Error::Degraded(_))
    }
}

/// Result type for nvml-metrics operations
pub type Result<T> = std::result::Result<T, Error>;
