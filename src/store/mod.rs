//! SQLite store
//!
//! A thin handle around a single-connection `SqlitePool`, created per run
//! and threaded explicitly through the loader and orchestrator. The schema
//! is created on connect: one table per dataset kind with a uniqueness
//! constraint over the natural key, calendar-derived columns indexed for the
//! reporting queries, and read-only views aggregating per-timestamp totals
//! across the discriminating dimensions.
//!
//! Rows are append-only. Inserts ignore duplicate natural keys and every
//! batch commits individually, so a crash mid-run leaves a valid prefix of
//! the intended result rather than a corrupted store.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

pub mod loader;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller passed a dataset kind the operation does not support
    #[error("unsupported dataset kind: {0}")]
    UnsupportedKind(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Schema statements executed on connect. `IF NOT EXISTS` keeps the
/// initialization idempotent across runs.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS wind_forecast (
        id INTEGER PRIMARY KEY,
        datetime TEXT NOT NULL,
        year INTEGER,
        month INTEGER,
        day INTEGER,
        weekday INTEGER,
        hour INTEGER,
        minute INTEGER,
        resolutioncode TEXT,
        offshoreonshore TEXT,
        region TEXT,
        gridconnectiontype TEXT,
        measured REAL,
        monitoredcapacity REAL,
        mostrecentforecast REAL,
        mostrecentconfidence10 REAL,
        mostrecentconfidence90 REAL,
        dayahead11hforecast REAL,
        dayahead11hconfidence10 REAL,
        dayahead11hconfidence90 REAL,
        dayaheadforecast REAL,
        dayaheadconfidence10 REAL,
        dayaheadconfidence90 REAL,
        weekaheadforecast REAL,
        weekaheadconfidence10 REAL,
        weekaheadconfidence90 REAL,
        loadfactor REAL,
        decrementalbidid TEXT,
        UNIQUE (datetime, region, offshoreonshore, gridconnectiontype)
    )",
    "CREATE INDEX IF NOT EXISTS idx_wind_datetime ON wind_forecast (datetime)",
    "CREATE INDEX IF NOT EXISTS idx_wind_year ON wind_forecast (year)",
    "CREATE INDEX IF NOT EXISTS idx_wind_month ON wind_forecast (month)",
    "CREATE INDEX IF NOT EXISTS idx_wind_day ON wind_forecast (day)",
    "CREATE INDEX IF NOT EXISTS idx_wind_weekday ON wind_forecast (weekday)",
    "CREATE INDEX IF NOT EXISTS idx_wind_hour ON wind_forecast (hour)",
    "CREATE TABLE IF NOT EXISTS solar_forecast (
        id INTEGER PRIMARY KEY,
        datetime TEXT NOT NULL,
        year INTEGER,
        month INTEGER,
        day INTEGER,
        weekday INTEGER,
        hour INTEGER,
        minute INTEGER,
        resolutioncode TEXT,
        region TEXT,
        measured REAL,
        monitoredcapacity REAL,
        mostrecentforecast REAL,
        mostrecentconfidence10 REAL,
        mostrecentconfidence90 REAL,
        dayahead11hforecast REAL,
        dayahead11hconfidence10 REAL,
        dayahead11hconfidence90 REAL,
        dayaheadforecast REAL,
        dayaheadconfidence10 REAL,
        dayaheadconfidence90 REAL,
        weekaheadforecast REAL,
        weekaheadconfidence10 REAL,
        weekaheadconfidence90 REAL,
        loadfactor REAL,
        UNIQUE (datetime, region)
    )",
    "CREATE INDEX IF NOT EXISTS idx_solar_datetime ON solar_forecast (datetime)",
    "CREATE INDEX IF NOT EXISTS idx_solar_year ON solar_forecast (year)",
    "CREATE INDEX IF NOT EXISTS idx_solar_month ON solar_forecast (month)",
    "CREATE INDEX IF NOT EXISTS idx_solar_day ON solar_forecast (day)",
    "CREATE INDEX IF NOT EXISTS idx_solar_weekday ON solar_forecast (weekday)",
    "CREATE INDEX IF NOT EXISTS idx_solar_hour ON solar_forecast (hour)",
    "CREATE TABLE IF NOT EXISTS spot_price (
        id INTEGER PRIMARY KEY,
        datetime TEXT NOT NULL UNIQUE,
        year INTEGER,
        month INTEGER,
        day INTEGER,
        weekday INTEGER,
        hour INTEGER,
        minute INTEGER,
        price_eur_per_mwh REAL
    )",
    "CREATE INDEX IF NOT EXISTS idx_price_year ON spot_price (year)",
    "CREATE INDEX IF NOT EXISTS idx_price_month ON spot_price (month)",
    "CREATE INDEX IF NOT EXISTS idx_price_day ON spot_price (day)",
    "CREATE INDEX IF NOT EXISTS idx_price_weekday ON spot_price (weekday)",
    "CREATE INDEX IF NOT EXISTS idx_price_hour ON spot_price (hour)",
    "CREATE VIEW IF NOT EXISTS v_wind AS
        SELECT datetime, year, month, day, weekday, hour, minute,
               SUM(measured) AS measured_wind_mw,
               SUM(monitoredcapacity) AS monitored_wind_mw
        FROM wind_forecast
        GROUP BY datetime",
    "CREATE VIEW IF NOT EXISTS v_solar AS
        SELECT datetime, year, month, day, weekday, hour, minute,
               SUM(measured) AS measured_solar_mw,
               SUM(monitoredcapacity) AS monitored_solar_mw
        FROM solar_forecast
        GROUP BY datetime",
    "CREATE VIEW IF NOT EXISTS v_price AS
        SELECT datetime, year, month, day, weekday, hour,
               price_eur_per_mwh
        FROM spot_price
        GROUP BY datetime",
];

/// Handle to the relational store, scoped to one run.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if necessary) the database file and initialize the
    /// schema.
    ///
    /// The pool is capped at a single connection: the store is a
    /// single-writer resource and only one orchestrator instance is assumed
    /// to run at a time.
    ///
    /// # Errors
    /// Returns an error when the file cannot be created or a schema
    /// statement fails.
    pub async fn connect(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect_with(options).await
    }

    /// Open an in-memory database (used by tests).
    ///
    /// # Errors
    /// Returns an error when a schema statement fails.
    pub async fn connect_in_memory() -> StoreResult<Self> {
        Self::connect_with(SqliteConnectOptions::new().filename(":memory:")).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("schema initialized");
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_schema_creates_tables_and_views() {
        let store = Store::connect_in_memory().await.unwrap();

        let rows = sqlx::query(
            "SELECT name, type FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name",
        )
        .fetch_all(store.pool())
        .await
        .unwrap();

        let names: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();
        for expected in [
            "solar_forecast",
            "spot_price",
            "v_price",
            "v_solar",
            "v_wind",
            "wind_forecast",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let store = Store::connect_in_memory().await.unwrap();
        store.init_schema().await.unwrap();
        store.init_schema().await.unwrap();
    }
}
