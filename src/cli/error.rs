//! CLI error types and conversions

use crate::archive::ArchiveError;
use crate::fetcher::FetcherError;
use crate::store::StoreError;
use crate::updater::UpdateError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Fetcher error
    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetcherError),

    /// Archive error
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Update run error
    #[error("update error: {0}")]
    Update(#[from] UpdateError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
