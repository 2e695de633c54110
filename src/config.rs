//! Runtime settings and tuning constants

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::DatasetKind;

/// Environment variable naming the data root directory.
pub const DATA_DIR_ENV: &str = "ENERGY_DATA_DIR";

/// Environment variable naming the WebDriver endpoint for the price export.
pub const WEBDRIVER_URL_ENV: &str = "WEBDRIVER_URL";

/// Default WebDriver endpoint (a locally running chromedriver).
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// HTTP request timeout.
/// The forecast API answers small pages quickly; anything slower than this
/// is treated as a transient failure and retried.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of attempts for retried operations.
/// 3 attempts recovers from the typical transient upstream hiccup without
/// stretching a scheduled run when an outage is real.
pub const DEFAULT_TRIES: u32 = 3;

/// Initial wait between attempts, in seconds.
pub const RETRY_DELAY_SECS: f64 = 5.0;

/// Backoff multiplier applied to the browser export retries.
/// The export site throttles sessions that reconnect too eagerly, so unlike
/// the API path the wait grows between attempts.
pub const EXPORT_BACKOFF: f64 = 2.0;

/// Records per API page. The upstream caps `limit` at 100.
pub const PAGE_LIMIT: usize = 100;

/// Rows per batch insert.
/// 1000 rows keeps the bind-parameter count well under the SQLite limit for
/// the widest table while amortizing statement overhead.
pub const BATCH_SIZE: usize = 1000;

/// Bounded wait for UI elements to appear on the export page.
pub const UI_WAIT: Duration = Duration::from_secs(20);

/// Polling interval while waiting for UI elements.
pub const UI_POLL: Duration = Duration::from_millis(500);

/// Settle delay after the results grid appears, before triggering the export.
/// The grid renders before its export control is wired up.
pub const SETTLE_WAIT: Duration = Duration::from_secs(5);

/// Fixed wait for the browser download to land on disk.
pub const DOWNLOAD_WAIT: Duration = Duration::from_secs(5);

/// Filesystem layout of the data tree.
///
/// Everything lives under a single root:
///
/// ```text
/// <root>/wind_forecast/<year>/WindForecast_YYYYMMDD.json
/// <root>/wind_forecast/WindForecast_<year>.zip
/// <root>/solar_forecast/...
/// <root>/prices/Price_YYYYMM.csv
/// <root>/energy_data.sqlite
/// ```
#[derive(Debug, Clone)]
pub struct Settings {
    base_dir: PathBuf,
}

impl Settings {
    /// Settings rooted at an explicit directory.
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Settings rooted at `$ENERGY_DATA_DIR`, falling back to `./data`.
    pub fn from_env() -> Self {
        let base = std::env::var(DATA_DIR_ENV).unwrap_or_else(|_| "data".to_string());
        Self::new(base)
    }

    /// The data root directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding one dataset kind.
    pub fn kind_dir(&self, kind: DatasetKind) -> PathBuf {
        self.base_dir.join(kind.dir_name())
    }

    /// Year subdirectory for a forecast kind.
    pub fn year_dir(&self, kind: DatasetKind, year: i32) -> PathBuf {
        self.kind_dir(kind).join(year.to_string())
    }

    /// Path of the SQLite database file.
    pub fn db_file(&self) -> PathBuf {
        self.base_dir.join("energy_data.sqlite")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_layout() {
        let settings = Settings::new("/tmp/energy");
        assert_eq!(
            settings.kind_dir(DatasetKind::Wind),
            PathBuf::from("/tmp/energy/wind_forecast")
        );
        assert_eq!(
            settings.year_dir(DatasetKind::Solar, 2024),
            PathBuf::from("/tmp/energy/solar_forecast/2024")
        );
        assert_eq!(
            settings.kind_dir(DatasetKind::Price),
            PathBuf::from("/tmp/energy/prices")
        );
        assert_eq!(
            settings.db_file(),
            PathBuf::from("/tmp/energy/energy_data.sqlite")
        );
    }
}
