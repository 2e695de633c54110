//! Batch loader from the archive tree into the store
//!
//! Raw records are parsed and enriched here, not at fetch time: the archive
//! keeps whatever the upstream returned, and this module derives the
//! calendar columns and normalizes locale-specific price formatting on the
//! way into the database.
//!
//! Failure handling is per record and per batch: a record that cannot be
//! parsed is dropped on its own, and when a multi-row insert fails the batch
//! falls back to row-by-row inserts so one malformed row cannot sink the
//! rest.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Timelike};
use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::{DatasetKind, KindSelection};

use super::{Store, StoreError, StoreResult};

/// Storage format of the timestamp column.
const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Textual format of the price export timestamps.
const PRICE_DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// One raw forecast record as fetched from the API.
///
/// Only `datetime` is required; every other field may be absent depending on
/// dataset kind and publication age. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForecastRecord {
    /// Observation timestamp, ISO-8601 as received
    pub datetime: String,
    /// Interval length (ISO-8601 duration)
    #[serde(default)]
    pub resolutioncode: Option<String>,
    /// Offshore or onshore (wind only)
    #[serde(default)]
    pub offshoreonshore: Option<String>,
    /// Location of the production units
    #[serde(default)]
    pub region: Option<String>,
    /// TSO or DSO grid connection (wind only)
    #[serde(default)]
    pub gridconnectiontype: Option<String>,
    /// Measured running average for the interval
    #[serde(default)]
    pub measured: Option<f64>,
    /// Most recently published forecast
    #[serde(default)]
    pub mostrecentforecast: Option<f64>,
    /// Lower confidence band of the most recent forecast
    #[serde(default)]
    pub mostrecentconfidence10: Option<f64>,
    /// Upper confidence band of the most recent forecast
    #[serde(default)]
    pub mostrecentconfidence90: Option<f64>,
    /// Day-ahead forecast published at 11AM
    #[serde(default)]
    pub dayahead11hforecast: Option<f64>,
    /// Lower confidence band of the 11AM forecast
    #[serde(default)]
    pub dayahead11hconfidence10: Option<f64>,
    /// Upper confidence band of the 11AM forecast
    #[serde(default)]
    pub dayahead11hconfidence90: Option<f64>,
    /// Day-ahead forecast
    #[serde(default)]
    pub dayaheadforecast: Option<f64>,
    /// Lower confidence band of the day-ahead forecast
    #[serde(default)]
    pub dayaheadconfidence10: Option<f64>,
    /// Upper confidence band of the day-ahead forecast
    #[serde(default)]
    pub dayaheadconfidence90: Option<f64>,
    /// Week-ahead forecast
    #[serde(default)]
    pub weekaheadforecast: Option<f64>,
    /// Lower confidence band of the week-ahead forecast
    #[serde(default)]
    pub weekaheadconfidence10: Option<f64>,
    /// Upper confidence band of the week-ahead forecast
    #[serde(default)]
    pub weekaheadconfidence90: Option<f64>,
    /// Total monitored production capacity
    #[serde(default)]
    pub monitoredcapacity: Option<f64>,
    /// Ratio of measured generation to monitored capacity
    #[serde(default)]
    pub loadfactor: Option<f64>,
    /// Requested production reduction (wind only)
    #[serde(default)]
    pub decrementalbidid: Option<String>,
}

/// A forecast record normalized for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    /// Timestamp in store format
    pub datetime: String,
    /// Calendar year
    pub year: i32,
    /// Calendar month (1-12)
    pub month: i32,
    /// Day of month
    pub day: i32,
    /// ISO weekday (1 = Monday)
    pub weekday: i32,
    /// Hour of day
    pub hour: i32,
    /// Minute of hour
    pub minute: i32,
    /// Remaining domain fields, carried through unchanged
    pub record: ForecastRecord,
}

/// A spot price row normalized for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    /// Timestamp in store format
    pub datetime: String,
    /// Calendar year
    pub year: i32,
    /// Calendar month (1-12)
    pub month: i32,
    /// Day of month
    pub day: i32,
    /// ISO weekday (1 = Monday)
    pub weekday: i32,
    /// Hour of day
    pub hour: i32,
    /// Minute of hour
    pub minute: i32,
    /// Price in EUR per MWh
    pub price_eur_per_mwh: f64,
}

/// Parse an ISO-8601 timestamp, normalizing a trailing `Z`.
///
/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(input.trim()).ok().or_else(|| {
        NaiveDateTime::parse_from_str(input.trim(), "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

/// Parse one raw record into a normalized row.
///
/// Returns `None` (dropping the record) when the timestamp is missing or
/// unparseable. Calendar fields are derived from the wall time at the
/// record's own offset.
pub fn parse_forecast(value: &Value) -> Option<ForecastRow> {
    let record: ForecastRecord = serde_json::from_value(value.clone()).ok()?;
    let dt = parse_timestamp(&record.datetime)?;

    Some(ForecastRow {
        datetime: dt.naive_local().format(SQL_DATETIME_FORMAT).to_string(),
        year: dt.year(),
        month: dt.month() as i32,
        day: dt.day() as i32,
        weekday: dt.weekday().number_from_monday() as i32,
        hour: dt.hour() as i32,
        minute: dt.minute() as i32,
        record,
    })
}

/// Parse one price export row.
///
/// The price text is locale formatted: currency glyphs are stripped and the
/// decimal comma becomes a dot before numeric coercion.
pub fn parse_price_row(date_raw: &str, price_raw: &str) -> Option<PriceRow> {
    let dt = NaiveDateTime::parse_from_str(date_raw.trim(), PRICE_DATETIME_FORMAT).ok()?;
    let cleaned: String = price_raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    let price: f64 = cleaned.replace(',', ".").parse().ok()?;

    Some(PriceRow {
        datetime: dt.format(SQL_DATETIME_FORMAT).to_string(),
        year: dt.year(),
        month: dt.month() as i32,
        day: dt.day() as i32,
        weekday: dt.weekday().number_from_monday() as i32,
        hour: dt.hour() as i32,
        minute: dt.minute() as i32,
        price_eur_per_mwh: price,
    })
}

/// Insert forecast rows, ignoring duplicate natural keys.
///
/// Attempts a single multi-row insert; when that fails, falls back to
/// row-by-row inserts and keeps whatever succeeds.
///
/// # Returns
/// The number of rows actually inserted (duplicates count as zero).
pub async fn insert_forecast_batch(store: &Store, kind: DatasetKind, rows: &[ForecastRow]) -> u64 {
    if rows.is_empty() {
        return 0;
    }
    if !kind.is_forecast() {
        warn!("{} rows do not belong in a forecast table", kind.label());
        return 0;
    }
    match try_insert_forecast(store, kind, rows).await {
        Ok(count) => count,
        Err(e) => {
            warn!("batch insert failed: {e}; retrying row by row");
            let mut inserted = 0;
            for row in rows {
                match try_insert_forecast(store, kind, std::slice::from_ref(row)).await {
                    Ok(count) => inserted += count,
                    Err(e) => warn!("row insert failed: {e}"),
                }
            }
            inserted
        }
    }
}

async fn try_insert_forecast(
    store: &Store,
    kind: DatasetKind,
    rows: &[ForecastRow],
) -> Result<u64, sqlx::Error> {
    let mut builder: QueryBuilder<Sqlite> = match kind {
        DatasetKind::Wind => {
            let mut qb = QueryBuilder::new(
                "INSERT OR IGNORE INTO wind_forecast (datetime, year, month, day, weekday, \
                 hour, minute, resolutioncode, offshoreonshore, region, gridconnectiontype, \
                 measured, monitoredcapacity, mostrecentforecast, mostrecentconfidence10, \
                 mostrecentconfidence90, dayahead11hforecast, dayahead11hconfidence10, \
                 dayahead11hconfidence90, dayaheadforecast, dayaheadconfidence10, \
                 dayaheadconfidence90, weekaheadforecast, weekaheadconfidence10, \
                 weekaheadconfidence90, loadfactor, decrementalbidid) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(row.datetime.as_str())
                    .push_bind(row.year)
                    .push_bind(row.month)
                    .push_bind(row.day)
                    .push_bind(row.weekday)
                    .push_bind(row.hour)
                    .push_bind(row.minute)
                    .push_bind(row.record.resolutioncode.as_deref())
                    .push_bind(row.record.offshoreonshore.as_deref())
                    .push_bind(row.record.region.as_deref())
                    .push_bind(row.record.gridconnectiontype.as_deref())
                    .push_bind(row.record.measured)
                    .push_bind(row.record.monitoredcapacity)
                    .push_bind(row.record.mostrecentforecast)
                    .push_bind(row.record.mostrecentconfidence10)
                    .push_bind(row.record.mostrecentconfidence90)
                    .push_bind(row.record.dayahead11hforecast)
                    .push_bind(row.record.dayahead11hconfidence10)
                    .push_bind(row.record.dayahead11hconfidence90)
                    .push_bind(row.record.dayaheadforecast)
                    .push_bind(row.record.dayaheadconfidence10)
                    .push_bind(row.record.dayaheadconfidence90)
                    .push_bind(row.record.weekaheadforecast)
                    .push_bind(row.record.weekaheadconfidence10)
                    .push_bind(row.record.weekaheadconfidence90)
                    .push_bind(row.record.loadfactor)
                    .push_bind(row.record.decrementalbidid.as_deref());
            });
            qb
        }
        _ => {
            let mut qb = QueryBuilder::new(
                "INSERT OR IGNORE INTO solar_forecast (datetime, year, month, day, weekday, \
                 hour, minute, resolutioncode, region, measured, monitoredcapacity, \
                 mostrecentforecast, mostrecentconfidence10, mostrecentconfidence90, \
                 dayahead11hforecast, dayahead11hconfidence10, dayahead11hconfidence90, \
                 dayaheadforecast, dayaheadconfidence10, dayaheadconfidence90, \
                 weekaheadforecast, weekaheadconfidence10, weekaheadconfidence90, loadfactor) ",
            );
            qb.push_values(rows, |mut b, row| {
                b.push_bind(row.datetime.as_str())
                    .push_bind(row.year)
                    .push_bind(row.month)
                    .push_bind(row.day)
                    .push_bind(row.weekday)
                    .push_bind(row.hour)
                    .push_bind(row.minute)
                    .push_bind(row.record.resolutioncode.as_deref())
                    .push_bind(row.record.region.as_deref())
                    .push_bind(row.record.measured)
                    .push_bind(row.record.monitoredcapacity)
                    .push_bind(row.record.mostrecentforecast)
                    .push_bind(row.record.mostrecentconfidence10)
                    .push_bind(row.record.mostrecentconfidence90)
                    .push_bind(row.record.dayahead11hforecast)
                    .push_bind(row.record.dayahead11hconfidence10)
                    .push_bind(row.record.dayahead11hconfidence90)
                    .push_bind(row.record.dayaheadforecast)
                    .push_bind(row.record.dayaheadconfidence10)
                    .push_bind(row.record.dayaheadconfidence90)
                    .push_bind(row.record.weekaheadforecast)
                    .push_bind(row.record.weekaheadconfidence10)
                    .push_bind(row.record.weekaheadconfidence90)
                    .push_bind(row.record.loadfactor);
            });
            qb
        }
    };

    let result = builder.build().execute(store.pool()).await?;
    Ok(result.rows_affected())
}

/// Insert price rows, ignoring duplicate timestamps.
///
/// Same batch-then-row fallback contract as the forecast path.
///
/// # Returns
/// The number of rows actually inserted.
pub async fn insert_price_batch(store: &Store, rows: &[PriceRow]) -> u64 {
    if rows.is_empty() {
        return 0;
    }
    match try_insert_prices(store, rows).await {
        Ok(count) => count,
        Err(e) => {
            warn!("batch insert failed: {e}; retrying row by row");
            let mut inserted = 0;
            for row in rows {
                match try_insert_prices(store, std::slice::from_ref(row)).await {
                    Ok(count) => inserted += count,
                    Err(e) => warn!("row insert failed: {e}"),
                }
            }
            inserted
        }
    }
}

async fn try_insert_prices(store: &Store, rows: &[PriceRow]) -> Result<u64, sqlx::Error> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT OR IGNORE INTO spot_price (datetime, year, month, day, weekday, hour, \
         minute, price_eur_per_mwh) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.datetime.as_str())
            .push_bind(row.year)
            .push_bind(row.month)
            .push_bind(row.day)
            .push_bind(row.weekday)
            .push_bind(row.hour)
            .push_bind(row.minute)
            .push_bind(row.price_eur_per_mwh);
    });

    let result = builder.build().execute(store.pool()).await?;
    Ok(result.rows_affected())
}

/// Load every JSON file of a forecast tree into its table.
///
/// Year subdirectories are processed in sorted order; within a year, rows
/// accumulate until `batch_size` and are then flushed. Inserted-vs-total
/// counts are reported per year.
///
/// # Errors
/// Returns an error when `kind` is not a forecast kind. File-level problems
/// are logged and skipped.
pub async fn process_directory(
    store: &Store,
    dir: &Path,
    kind: DatasetKind,
    batch_size: usize,
) -> StoreResult<()> {
    if !kind.is_forecast() {
        return Err(StoreError::UnsupportedKind(kind.to_string()));
    }
    if !dir.is_dir() {
        warn!("directory does not exist: {}", dir.display());
        return Ok(());
    }

    for year_dir in sorted_year_dirs(dir)? {
        let year_label = year_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut inserted: u64 = 0;
        let mut total: u64 = 0;
        let mut batch: Vec<ForecastRow> = Vec::with_capacity(batch_size);

        for file in sorted_json_files(&year_dir)? {
            let contents = match std::fs::read_to_string(&file) {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("failed to read {}: {e}", file.display());
                    continue;
                }
            };
            let records = match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Array(records)) => records,
                Ok(value @ Value::Object(_)) => vec![value],
                Ok(_) => {
                    warn!("unexpected JSON shape in {}", file.display());
                    continue;
                }
                Err(e) => {
                    warn!("failed to parse {}: {e}", file.display());
                    continue;
                }
            };

            for value in &records {
                total += 1;
                let Some(row) = parse_forecast(value) else {
                    continue;
                };
                batch.push(row);
                if batch.len() >= batch_size {
                    inserted += insert_forecast_batch(store, kind, &batch).await;
                    batch.clear();
                }
            }
        }

        if !batch.is_empty() {
            inserted += insert_forecast_batch(store, kind, &batch).await;
        }

        if inserted > 0 {
            info!(
                "{inserted} of {total} records from {year_label} added to {} (duplicates ignored)",
                kind.table()
            );
        } else {
            info!("year {year_label} of {} is up to date", kind.table());
        }
    }
    Ok(())
}

/// Load every price export CSV of a directory into the price table.
///
/// Applies the same batching contract as the forecast path. Files without
/// the expected `Date`/`Euro` columns are skipped with a log message; bad
/// rows are dropped individually.
///
/// # Errors
/// Never fails on file contents; only the final report is returned.
pub async fn process_price_directory(
    store: &Store,
    dir: &Path,
    batch_size: usize,
) -> StoreResult<()> {
    if !dir.is_dir() {
        warn!("directory does not exist: {}", dir.display());
        return Ok(());
    }

    let mut inserted: u64 = 0;
    let mut total: u64 = 0;
    let mut batch: Vec<PriceRow> = Vec::with_capacity(batch_size);

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
        .collect();
    files.sort();

    for file in files {
        let mut reader = match csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .from_path(&file)
        {
            Ok(reader) => reader,
            Err(e) => {
                warn!("failed to open {}: {e}", file.display());
                continue;
            }
        };

        // The export is not UTF-8 (legacy single-byte encoding around the
        // euro sign), so headers and fields go through lossy conversion.
        let headers = match reader.byte_headers() {
            Ok(headers) => headers.clone(),
            Err(e) => {
                warn!("failed to read headers of {}: {e}", file.display());
                continue;
            }
        };
        let find_column = |needle: &str| {
            headers.iter().position(|h| {
                String::from_utf8_lossy(h)
                    .trim()
                    .to_lowercase()
                    .contains(needle)
            })
        };
        let (Some(date_col), Some(price_col)) = (find_column("date"), find_column("euro")) else {
            warn!("{} has no usable columns; skipping", file.display());
            continue;
        };

        for record in reader.byte_records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("bad row in {}: {e}", file.display());
                    continue;
                }
            };
            total += 1;

            let date_raw = record.get(date_col).map(String::from_utf8_lossy);
            let price_raw = record.get(price_col).map(String::from_utf8_lossy);
            let (Some(date_raw), Some(price_raw)) = (date_raw, price_raw) else {
                continue;
            };
            let Some(row) = parse_price_row(&date_raw, &price_raw) else {
                continue;
            };

            batch.push(row);
            if batch.len() >= batch_size {
                inserted += insert_price_batch(store, &batch).await;
                batch.clear();
            }
        }
    }

    if !batch.is_empty() {
        inserted += insert_price_batch(store, &batch).await;
    }

    if inserted > 0 {
        info!("{inserted} of {total} price records added (duplicates ignored)");
    } else {
        info!("spot prices are up to date");
    }
    Ok(())
}

/// Load the archive tree for the selected kinds into the store.
///
/// Kinds are processed independently: a failure in one is logged and does
/// not block the others.
pub async fn load(
    store: &Store,
    settings: &Settings,
    selection: KindSelection,
    batch_size: usize,
) -> StoreResult<()> {
    for kind in selection.kinds() {
        let dir = settings.kind_dir(kind);
        let outcome = match kind {
            DatasetKind::Wind | DatasetKind::Solar => {
                process_directory(store, &dir, kind, batch_size).await
            }
            DatasetKind::Price => process_price_directory(store, &dir, batch_size).await,
        };
        if let Err(e) = outcome {
            error!("failed to load {} data: {e}", kind.label());
        }
    }
    Ok(())
}

fn sorted_year_dirs(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut years: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
        })
        .collect();
    years.sort();
    Ok(years)
}

fn sorted_json_files(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();
    Ok(files)
}
