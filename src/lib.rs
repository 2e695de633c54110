//! # Energy Data Downloader Library
//!
//! A library for incrementally harvesting time-series energy data and loading
//! it into a local SQLite store. Two upstream sources are covered:
//!
//! - **Generation forecasts and measurements** (wind and solar) from the Elia
//!   open-data REST API, fetched day by day through a paginated endpoint and
//!   archived as one JSON file per calendar day.
//! - **Day-ahead spot prices** from the Elexys market-information site, which
//!   only offers a session-based export and is driven through a headless
//!   browser (WebDriver).
//!
//! ## Features
//!
//! - **Idempotent Fetching**: days and months whose output files already exist
//!   are skipped, so interrupted runs resume where they left off
//! - **Retry Hardening**: network calls and the browser export are wrapped in
//!   bounded retries with configurable delay and backoff
//! - **Yearly Archives**: daily JSON files are bundled into one ZIP per
//!   dataset kind and year, recompacted only when a member file is newer than
//!   the bundle
//! - **Deduplicated Loading**: batch inserts ignore duplicate natural keys,
//!   so re-loading the same files never creates duplicate rows
//!
//! ## Architecture
//!
//! The library is organized into several core modules:
//!
//! - [`retry`] - Bounded retry policy with delay and multiplicative backoff
//! - [`fetcher`] - HTTP harvester for the forecast API and the browser-driven
//!   price exporter
//! - [`archive`] - Per-year ZIP bundling with staleness detection
//! - [`store`] - SQLite schema, connection handle, and the batch loader
//! - [`updater`] - Orchestration of a full update run across a year/month
//!   window
//! - [`cli`] - Command line entry points
//!
//! Execution is strictly sequential. Both upstreams are rate limited or
//! session bound and do not tolerate concurrent use, so nothing fans out
//! across days, months, or dataset kinds.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::str::FromStr;

/// Per-year ZIP bundling of daily JSON files
pub mod archive;

/// CLI command implementations
pub mod cli;

/// Settings and tuning constants
pub mod config;

/// Data fetchers (forecast API, browser price export)
pub mod fetcher;

/// Bounded retry policy
pub mod retry;

/// SQLite store and batch loader
pub mod store;

/// Update orchestration
pub mod updater;

/// One dataset handled by the pipeline.
///
/// The variants form a closed set; everything kind-specific (directory
/// layout, file naming, API endpoint, store table) is resolved through the
/// methods below instead of string comparisons at the call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    /// Wind generation forecasts and measurements
    Wind,
    /// Solar generation forecasts and measurements
    Solar,
    /// Day-ahead spot prices
    Price,
}

impl DatasetKind {
    /// The two forecast kinds, in fetch order.
    pub const FORECASTS: [DatasetKind; 2] = [DatasetKind::Wind, DatasetKind::Solar];

    /// Directory name under the data root holding this kind's files.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DatasetKind::Wind => "wind_forecast",
            DatasetKind::Solar => "solar_forecast",
            DatasetKind::Price => "prices",
        }
    }

    /// File name prefix for per-period output files.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            DatasetKind::Wind => "WindForecast",
            DatasetKind::Solar => "SolarForecast",
            DatasetKind::Price => "Price",
        }
    }

    /// Human readable label used in log messages.
    pub fn label(&self) -> &'static str {
        match self {
            DatasetKind::Wind => "wind forecast",
            DatasetKind::Solar => "solar forecast",
            DatasetKind::Price => "spot price",
        }
    }

    /// Store table this kind loads into.
    pub fn table(&self) -> &'static str {
        match self {
            DatasetKind::Wind => "wind_forecast",
            DatasetKind::Solar => "solar_forecast",
            DatasetKind::Price => "spot_price",
        }
    }

    /// API endpoint for the paginated day fetch.
    ///
    /// Prices have no API endpoint; they only exist as a browser export.
    pub fn api_url(&self) -> Option<&'static str> {
        match self {
            DatasetKind::Wind => {
                Some("https://opendata.elia.be/api/explore/v2.1/catalog/datasets/ods031/records")
            }
            DatasetKind::Solar => {
                Some("https://opendata.elia.be/api/explore/v2.1/catalog/datasets/ods032/records")
            }
            DatasetKind::Price => None,
        }
    }

    /// Additional `refine` filters sent with every API request.
    ///
    /// The solar dataset publishes the same measurements per region and once
    /// aggregated for the whole country; restricting to the country-level
    /// region avoids double counting.
    pub fn extra_filters(&self) -> &'static [&'static str] {
        match self {
            DatasetKind::Solar => &["region:\"Belgium\""],
            _ => &[],
        }
    }

    /// True for the kinds that go through the JSON/ZIP archive tree.
    pub fn is_forecast(&self) -> bool {
        matches!(self, DatasetKind::Wind | DatasetKind::Solar)
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DatasetKind::Wind => "wind",
            DatasetKind::Solar => "solar",
            DatasetKind::Price => "price",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wind" => Ok(DatasetKind::Wind),
            "solar" => Ok(DatasetKind::Solar),
            "price" => Ok(DatasetKind::Price),
            _ => Err(format!(
                "invalid dataset kind: {s}. Valid options: wind, solar, price"
            )),
        }
    }
}

/// Which dataset kinds an update or load run should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindSelection {
    /// Wind forecasts only
    Wind,
    /// Solar forecasts only
    Solar,
    /// Spot prices only
    Price,
    /// Everything
    All,
}

impl KindSelection {
    /// The concrete kinds covered by this selection, in processing order.
    pub fn kinds(&self) -> Vec<DatasetKind> {
        match self {
            KindSelection::Wind => vec![DatasetKind::Wind],
            KindSelection::Solar => vec![DatasetKind::Solar],
            KindSelection::Price => vec![DatasetKind::Price],
            KindSelection::All => {
                vec![DatasetKind::Wind, DatasetKind::Solar, DatasetKind::Price]
            }
        }
    }

    /// True if any covered kind uses the forecast archive tree.
    pub fn includes_forecast(&self) -> bool {
        self.kinds().iter().any(DatasetKind::is_forecast)
    }
}

impl std::fmt::Display for KindSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KindSelection::Wind => "wind",
            KindSelection::Solar => "solar",
            KindSelection::Price => "price",
            KindSelection::All => "all",
        };
        write!(f, "{s}")
    }
}

impl FromStr for KindSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wind" => Ok(KindSelection::Wind),
            "solar" => Ok(KindSelection::Solar),
            "price" => Ok(KindSelection::Price),
            "all" => Ok(KindSelection::All),
            _ => Err(format!(
                "invalid dataset kind: {s}. Valid options: wind, solar, price, all"
            )),
        }
    }
}
