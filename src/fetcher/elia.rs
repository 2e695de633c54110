//! Forecast API harvester
//!
//! Fetches wind and solar generation records from the open-data API at day
//! granularity and writes one JSON array file per calendar day. Records are
//! persisted exactly as received; parsing and enrichment happen at load time.

use std::fs::File;
use std::io::BufWriter;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Settings, DEFAULT_TRIES, HTTP_TIMEOUT, PAGE_LIMIT, RETRY_DELAY_SECS};
use crate::retry::RetryPolicy;
use crate::DatasetKind;

use super::http::ResilientHttpClient;
use super::{FetcherError, FetcherResult};

/// One page of the paginated records endpoint.
#[derive(Debug, Deserialize)]
struct ApiPage {
    #[serde(default)]
    results: Vec<Value>,
}

/// Day-granularity harvester for the forecast API.
pub struct ApiHarvester {
    http: ResilientHttpClient,
    settings: Settings,
    retry: RetryPolicy,
    base_url_override: Option<String>,
}

impl ApiHarvester {
    /// Create a harvester with the default endpoints and retry tuning.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(settings: Settings) -> FetcherResult<Self> {
        Ok(Self {
            http: ResilientHttpClient::new(DEFAULT_TRIES, RETRY_DELAY_SECS, HTTP_TIMEOUT)?,
            settings,
            retry: RetryPolicy::new(DEFAULT_TRIES, RETRY_DELAY_SECS, 1.0),
            base_url_override: None,
        })
    }

    /// Create a harvester pointed at a custom base URL (for testing).
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_base_url(settings: Settings, base_url: impl Into<String>) -> FetcherResult<Self> {
        let mut harvester = Self::new(settings)?;
        harvester.base_url_override = Some(base_url.into());
        Ok(harvester)
    }

    fn base_url(&self, kind: DatasetKind) -> FetcherResult<String> {
        if let Some(url) = &self.base_url_override {
            return Ok(url.clone());
        }
        kind.api_url().map(str::to_string).ok_or_else(|| {
            FetcherError::InvalidArgument(format!("{} has no API endpoint", kind.label()))
        })
    }

    /// Fetch every record for one calendar day.
    ///
    /// Pages through the endpoint with a fixed page size, sorted by
    /// timestamp, advancing an offset cursor until a short or empty page
    /// signals the end of the data. A non-success response stops the loop
    /// and returns whatever was collected so far; results are best effort.
    ///
    /// # Arguments
    /// * `base_url` - records endpoint for the dataset
    /// * `date` - the day to fetch
    /// * `extra_filters` - additional `refine` expressions (e.g. a region)
    ///
    /// # Errors
    /// Returns an error when a page request fails even after retries, or
    /// when a response body cannot be decoded.
    pub async fn fetch_day(
        &self,
        base_url: &str,
        date: NaiveDate,
        extra_filters: &[&str],
    ) -> FetcherResult<Vec<Value>> {
        let date_str = date.format("%Y-%m-%d").to_string();
        let mut all_records = Vec::new();
        let mut offset = 0usize;

        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("order_by", "datetime".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
                ("refine", format!("datetime:\"{date_str}\"")),
            ];
            for filter in extra_filters {
                params.push(("refine", (*filter).to_string()));
            }

            let response = self.http.get(base_url, &params).await?;
            if !response.status().is_success() {
                warn!(
                    "non-success response for {date_str} (offset {offset}): {}",
                    response.status()
                );
                break;
            }

            let page: ApiPage = response
                .json()
                .await
                .map_err(|e| FetcherError::Parse(e.to_string()))?;

            let count = page.results.len();
            all_records.extend(page.results);

            if count < PAGE_LIMIT {
                break;
            }

            debug!("fetched {} records for {date_str} so far", all_records.len());
            offset += PAGE_LIMIT;
        }

        Ok(all_records)
    }

    /// Download one month of daily files for a forecast kind.
    ///
    /// Iterates every calendar day of the month, skipping days whose output
    /// file already exists so an interrupted run resumes without refetching.
    /// A day that yields zero records is logged as having no data and is not
    /// retried. The whole month is retried as a unit: a transient upstream
    /// error re-drives the day loop, which is cheap because completed days
    /// are skipped on the next pass.
    ///
    /// # Errors
    /// Returns an error when fetching or writing still fails on the final
    /// retry attempt, or when `kind` is not a forecast kind.
    pub async fn import_month(
        &self,
        kind: DatasetKind,
        year: i32,
        month: u32,
    ) -> FetcherResult<()> {
        if !kind.is_forecast() {
            return Err(FetcherError::InvalidArgument(format!(
                "{} is not fetched through the forecast API",
                kind.label()
            )));
        }

        self.retry
            .run(|| self.import_month_once(kind, year, month))
            .await
    }

    async fn import_month_once(
        &self,
        kind: DatasetKind,
        year: i32,
        month: u32,
    ) -> FetcherResult<()> {
        let base_url = self.base_url(kind)?;
        let year_dir = self.settings.year_dir(kind, year);
        std::fs::create_dir_all(&year_dir)?;

        for date in days_in_month(year, month)? {
            let file_name = format!("{}_{}.json", kind.file_prefix(), date.format("%Y%m%d"));
            let path = year_dir.join(&file_name);

            if path.exists() {
                continue;
            }

            info!("fetching {file_name}");
            let records = self
                .fetch_day(&base_url, date, kind.extra_filters())
                .await?;

            if records.is_empty() {
                warn!("no data for {date}");
                continue;
            }

            let file = File::create(&path)?;
            serde_json::to_writer_pretty(BufWriter::new(file), &records)
                .map_err(|e| FetcherError::Io(e.to_string()))?;
            info!("saved {} records to {file_name}", records.len());
        }

        Ok(())
    }
}

/// All calendar days of a month, in order.
///
/// # Errors
/// Returns an error for a month outside 1..=12.
pub fn days_in_month(year: i32, month: u32) -> FetcherResult<Vec<NaiveDate>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| FetcherError::InvalidArgument(format!("invalid month: {year}-{month}")))?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| FetcherError::InvalidArgument(format!("invalid month: {year}-{month}")))?;

    let mut days = Vec::new();
    let mut current = first;
    while current < next_first {
        days.push(current);
        current = current
            .succ_opt()
            .ok_or_else(|| FetcherError::InvalidArgument("date overflow".to_string()))?;
    }
    Ok(days)
}
