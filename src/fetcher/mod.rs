//! Data fetcher implementations
//!
//! Two fetch paths feed the archive tree:
//!
//! - [`elia::ApiHarvester`] pulls forecast records from the paginated
//!   open-data API, one JSON file per calendar day.
//! - [`belpex::BrowserExporter`] drives a headless browser through the spot
//!   price export flow, one CSV file per month.

pub mod belpex;
pub mod elia;
pub mod http;

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Transport-level failure (timeout, connection reset)
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status after retries
    #[error("HTTP error: {0}")]
    Http(String),

    /// Response or file contents could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// WebDriver session failure (element missing, timeout, lost session)
    #[error("browser error: {0}")]
    Browser(String),

    /// The export download never materialized
    #[error("download missing: {0}")]
    DownloadMissing(String),

    /// Filesystem failure while writing fetched data
    #[error("io error: {0}")]
    Io(String),

    /// Caller passed an argument outside the supported domain
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for FetcherError {
    fn from(e: std::io::Error) -> Self {
        FetcherError::Io(e.to_string())
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;
