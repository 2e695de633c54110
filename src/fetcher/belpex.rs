//! Browser-driven spot price exporter
//!
//! The price source has no API; the market-information page requires filling
//! a date range and triggering a client-side export, so the fetch is driven
//! through a WebDriver session against a headless Chrome.
//!
//! The export is modelled as an explicit state machine. Each transition
//! function performs one UI step and returns the next state; any timeout or
//! missing element fails the transition, and the session is torn down on
//! every exit path before the error propagates. The whole export is retried
//! with backoff because the site throttles eagerly reconnecting sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, DataType, Reader};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tracing::{debug, info, warn};

use crate::config::{
    self, Settings, DEFAULT_TRIES, DOWNLOAD_WAIT, EXPORT_BACKOFF, RETRY_DELAY_SECS, SETTLE_WAIT,
    UI_POLL, UI_WAIT,
};
use crate::retry::RetryPolicy;
use crate::DatasetKind;

use super::{FetcherError, FetcherResult};

/// Export page of the spot market site.
const EXPORT_URL: &str = "https://my.elexys.be/MarketInformation/SpotBelpex.aspx";

/// Fixed, non-unique base name the browser download lands under.
const DOWNLOAD_BASENAME: &str = "BelpexFilter";

/// Element ids on the export page. The page is generated by a server-side
/// grid framework, so the ids are stable but verbose.
const FROM_FIELD_ID: &str = "contentPlaceHolder_fromASPxDateEdit_I";
const UNTIL_FIELD_ID: &str = "contentPlaceHolder_untilASPxDateEdit_I";
const SHOW_BUTTON_ID: &str = "contentPlaceHolder_refreshBelpexCustomButton_I";
const RESULT_GRID_ID: &str = "contentPlaceHolder_belpexFilterGrid_DXMainTable";
const EXPORT_BUTTON_ID: &str = "ctl00_contentPlaceHolder_GridViewExportUserControl1_csvExport";

/// Steps of the export flow. Failure is reachable from every step by the
/// transition returning an error.
enum ExportStep {
    Idle,
    PageLoaded,
    FormFilled,
    ExportTriggered,
    FileDownloaded,
    Renamed(PathBuf),
    Done,
}

/// Monthly spot price exporter.
pub struct BrowserExporter {
    settings: Settings,
    webdriver_url: String,
    retry: RetryPolicy,
}

impl BrowserExporter {
    /// Create an exporter. The WebDriver endpoint is taken from
    /// `$WEBDRIVER_URL`, defaulting to a local chromedriver.
    pub fn new(settings: Settings) -> Self {
        let webdriver_url = std::env::var(config::WEBDRIVER_URL_ENV)
            .unwrap_or_else(|_| config::DEFAULT_WEBDRIVER_URL.to_string());
        Self {
            settings,
            webdriver_url,
            retry: RetryPolicy::new(DEFAULT_TRIES, RETRY_DELAY_SECS, EXPORT_BACKOFF),
        }
    }

    /// Export one month of spot prices.
    ///
    /// If the terminal CSV for the month already exists, the whole flow is
    /// bypassed. A leftover download under the generic name from an earlier
    /// failed run is deleted before a new attempt starts.
    ///
    /// # Errors
    /// Returns an error when the export still fails on the final retry
    /// attempt. A missing download counts as a failure of the attempt.
    pub async fn export_month(&self, year: i32, month: u32) -> FetcherResult<()> {
        let dir = self.settings.kind_dir(DatasetKind::Price);
        std::fs::create_dir_all(&dir)?;

        let csv_path = dir.join(export_file_name(year, month, "csv"));
        if csv_path.exists() {
            debug!("export already present: {}", csv_path.display());
            return Ok(());
        }

        self.retry.run(|| self.export_once(year, month)).await
    }

    async fn export_once(&self, year: i32, month: u32) -> FetcherResult<()> {
        let dir = self.settings.kind_dir(DatasetKind::Price);
        remove_stale_downloads(&dir)?;

        info!("requesting spot prices for {year}-{month:02}");
        let driver = self.new_session(&dir).await?;

        // Drive the state machine, then tear the session down no matter how
        // it ended.
        let result = self.drive(&driver, &dir, year, month).await;
        if let Err(e) = driver.quit().await {
            warn!("failed to close browser session: {e}");
        }
        result
    }

    async fn drive(
        &self,
        driver: &WebDriver,
        dir: &Path,
        year: i32,
        month: u32,
    ) -> FetcherResult<()> {
        let mut step = ExportStep::Idle;
        loop {
            step = match step {
                ExportStep::Idle => self.open_page(driver).await?,
                ExportStep::PageLoaded => self.fill_dates(driver, year, month).await?,
                ExportStep::FormFilled => self.trigger_export(driver).await?,
                ExportStep::ExportTriggered => self.await_download().await,
                ExportStep::FileDownloaded => rename_download(dir, year, month)?,
                ExportStep::Renamed(path) => finalize_export(&path, year, month)?,
                ExportStep::Done => return Ok(()),
            };
        }
    }

    async fn new_session(&self, download_dir: &Path) -> FetcherResult<WebDriver> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_arg("--headless=new").map_err(wd)?;
        caps.add_experimental_option(
            "prefs",
            serde_json::json!({
                "download.default_directory": download_dir.display().to_string(),
                "download.prompt_for_download": false,
                "directory_upgrade": true,
                "safebrowsing.enabled": true,
            }),
        )
        .map_err(wd)?;

        WebDriver::new(&self.webdriver_url, caps).await.map_err(wd)
    }

    /// Idle -> PageLoaded: open the page and wait for the date form.
    async fn open_page(&self, driver: &WebDriver) -> FetcherResult<ExportStep> {
        driver.goto(EXPORT_URL).await.map_err(wd)?;
        driver
            .query(By::Id(FROM_FIELD_ID))
            .wait(UI_WAIT, UI_POLL)
            .first()
            .await
            .map_err(wd)?;
        Ok(ExportStep::PageLoaded)
    }

    /// PageLoaded -> FormFilled: clear and set the date range fields.
    async fn fill_dates(
        &self,
        driver: &WebDriver,
        year: i32,
        month: u32,
    ) -> FetcherResult<ExportStep> {
        let (from_date, until_date) = export_date_range(year, month)?;

        let from_input = driver.find(By::Id(FROM_FIELD_ID)).await.map_err(wd)?;
        let until_input = driver.find(By::Id(UNTIL_FIELD_ID)).await.map_err(wd)?;

        debug!("setting 'from' date: {from_date}");
        from_input.clear().await.map_err(wd)?;
        from_input.send_keys(from_date.as_str()).await.map_err(wd)?;

        debug!("setting 'until' date: {until_date}");
        until_input.clear().await.map_err(wd)?;
        until_input
            .send_keys(until_date.as_str())
            .await
            .map_err(wd)?;

        Ok(ExportStep::FormFilled)
    }

    /// FormFilled -> ExportTriggered: refresh the grid, let it settle, then
    /// trigger the file export.
    async fn trigger_export(&self, driver: &WebDriver) -> FetcherResult<ExportStep> {
        let show_button = driver.find(By::Id(SHOW_BUTTON_ID)).await.map_err(wd)?;
        debug!("refreshing results grid");
        driver
            .execute("arguments[0].click();", vec![show_button.to_json().map_err(wd)?])
            .await
            .map_err(wd)?;

        driver
            .query(By::Id(RESULT_GRID_ID))
            .wait(UI_WAIT, UI_POLL)
            .first()
            .await
            .map_err(wd)?;
        // The grid renders before its export control is wired up.
        tokio::time::sleep(SETTLE_WAIT).await;

        let export_button = driver
            .query(By::Id(EXPORT_BUTTON_ID))
            .wait(UI_WAIT, UI_POLL)
            .first()
            .await
            .map_err(wd)?;
        debug!("triggering export");
        driver
            .execute(
                "arguments[0].click();",
                vec![export_button.to_json().map_err(wd)?],
            )
            .await
            .map_err(wd)?;

        Ok(ExportStep::ExportTriggered)
    }

    /// ExportTriggered -> FileDownloaded: give the browser a fixed window to
    /// land the download on disk.
    async fn await_download(&self) -> ExportStep {
        debug!("waiting for download");
        tokio::time::sleep(DOWNLOAD_WAIT).await;
        ExportStep::FileDownloaded
    }
}

/// FileDownloaded -> Renamed: move the generic download to its
/// period-stamped name, keeping the extension the site produced.
fn rename_download(dir: &Path, year: i32, month: u32) -> FetcherResult<ExportStep> {
    for ext in ["csv", "xlsx"] {
        let downloaded = dir.join(format!("{DOWNLOAD_BASENAME}.{ext}"));
        if downloaded.exists() {
            let target = dir.join(export_file_name(year, month, ext));
            std::fs::rename(&downloaded, &target)?;
            info!("downloaded and renamed to {}", target.display());
            return Ok(ExportStep::Renamed(target));
        }
    }
    Err(FetcherError::DownloadMissing(format!(
        "no export file appeared for {year}-{month:02}"
    )))
}

/// Renamed -> Done: convert a spreadsheet export to the legacy CSV layout.
fn finalize_export(path: &Path, year: i32, month: u32) -> FetcherResult<ExportStep> {
    if path.extension().and_then(|e| e.to_str()) == Some("xlsx") {
        let csv_path = path.with_extension("csv");
        convert_spreadsheet(path, &csv_path, year, month)?;
    }
    Ok(ExportStep::Done)
}

/// Delete leftovers under the generic download name from failed runs.
fn remove_stale_downloads(dir: &Path) -> FetcherResult<()> {
    for ext in ["csv", "xlsx"] {
        let stale = dir.join(format!("{DOWNLOAD_BASENAME}.{ext}"));
        if stale.exists() {
            std::fs::remove_file(&stale)?;
            warn!("removed stale download {}", stale.display());
        }
    }
    Ok(())
}

/// Output file name for one month, e.g. `Price_202403.csv`.
pub fn export_file_name(year: i32, month: u32, ext: &str) -> String {
    format!(
        "{}_{year}{month:02}.{ext}",
        DatasetKind::Price.file_prefix()
    )
}

/// Date pair for the export form, formatted `dd/mm/yyyy`.
///
/// The range starts on the last day of the previous month rather than the
/// first of the target month: the site treats the from date as exclusive for
/// the first hours of the day, and the overlapping day is deduplicated on
/// load anyway. The until date is the first day of the next month.
///
/// # Errors
/// Returns an error for a month outside 1..=12.
pub fn export_date_range(year: i32, month: u32) -> FetcherResult<(String, String)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| FetcherError::InvalidArgument(format!("invalid month: {year}-{month}")))?;
    let from = first
        .pred_opt()
        .ok_or_else(|| FetcherError::InvalidArgument("date underflow".to_string()))?;
    let until = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| FetcherError::InvalidArgument(format!("invalid month: {year}-{month}")))?;

    Ok((
        from.format("%d/%m/%Y").to_string(),
        until.format("%d/%m/%Y").to_string(),
    ))
}

/// Convert a spreadsheet export to the legacy CSV layout.
///
/// Rows are filtered to the target year and month, sub-hourly rows are
/// collapsed to hourly means, and dates and prices are reformatted to the
/// textual conventions of the CSV export (`dd/mm/yyyy HH:MM:SS`, decimal
/// comma, trailing euro sign). When the sheet has no usable columns or no
/// rows inside the target period, nothing is written and the reason is
/// logged; the caller treats the period as having no data.
///
/// # Errors
/// Returns an error when the workbook cannot be opened or the CSV cannot
/// be written.
pub fn convert_spreadsheet(
    source: &Path,
    target: &Path,
    year: i32,
    month: u32,
) -> FetcherResult<()> {
    let Some(rows) = read_spreadsheet_rows(source)? else {
        warn!(
            "{} has no usable date/price columns; skipping conversion",
            source.display()
        );
        return Ok(());
    };

    let hourly = collapse_hourly(&rows, year, month);
    if hourly.is_empty() {
        warn!(
            "{} has no rows for {year}-{month:02}; skipping conversion",
            source.display()
        );
        return Ok(());
    }

    write_legacy_csv(target, &hourly)?;
    info!(
        "converted {} rows to {}",
        hourly.len(),
        target.display()
    );
    Ok(())
}

/// Read (timestamp, price) pairs from the first worksheet.
///
/// Returns `None` when the header row lacks a date or price column. Rows
/// whose cells cannot be coerced are skipped individually.
fn read_spreadsheet_rows(source: &Path) -> FetcherResult<Option<Vec<(NaiveDateTime, f64)>>> {
    let mut workbook =
        open_workbook_auto(source).map_err(|e| FetcherError::Parse(e.to_string()))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(e)) => return Err(FetcherError::Parse(e.to_string())),
        None => return Ok(None),
    };

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(None);
    };

    let find_column = |needle: &str| {
        header.iter().position(|cell| {
            cell.get_string()
                .map(|s| s.trim().to_lowercase().contains(needle))
                .unwrap_or(false)
        })
    };
    let (Some(date_col), Some(price_col)) = (find_column("date"), find_column("euro")) else {
        return Ok(None);
    };

    let mut parsed = Vec::new();
    for row in rows {
        let (Some(date_cell), Some(price_cell)) = (row.get(date_col), row.get(price_col)) else {
            continue;
        };
        let Some(timestamp) = cell_to_datetime(date_cell) else {
            continue;
        };
        let Some(price) = cell_to_price(price_cell) else {
            continue;
        };
        parsed.push((timestamp, price));
    }
    Ok(Some(parsed))
}

fn cell_to_datetime(cell: &Data) -> Option<NaiveDateTime> {
    if let Some(dt) = cell.as_datetime() {
        return Some(dt);
    }
    let text = cell.get_string()?;
    NaiveDateTime::parse_from_str(text.trim(), "%d/%m/%Y %H:%M:%S").ok()
}

fn cell_to_price(cell: &Data) -> Option<f64> {
    if let Some(value) = cell.get_float() {
        return Some(value);
    }
    let text = cell.get_string()?;
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    cleaned.replace(',', ".").parse().ok()
}

/// Collapse sub-hourly rows to hourly means, keeping only the target month.
fn collapse_hourly(
    rows: &[(NaiveDateTime, f64)],
    year: i32,
    month: u32,
) -> Vec<(NaiveDateTime, f64)> {
    let mut buckets: BTreeMap<NaiveDateTime, (f64, u32)> = BTreeMap::new();

    for (timestamp, price) in rows {
        if timestamp.year() != year || timestamp.month() != month {
            continue;
        }
        let Some(hour_start) = NaiveTime::from_hms_opt(timestamp.hour(), 0, 0) else {
            continue;
        };
        let key = NaiveDateTime::new(timestamp.date(), hour_start);
        let entry = buckets.entry(key).or_insert((0.0, 0));
        entry.0 += price;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(ts, (sum, count))| (ts, sum / f64::from(count)))
        .collect()
}

fn write_legacy_csv(target: &Path, rows: &[(NaiveDateTime, f64)]) -> FetcherResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(target)
        .map_err(|e| FetcherError::Io(e.to_string()))?;

    writer
        .write_record(["Date", "Euro"])
        .map_err(|e| FetcherError::Io(e.to_string()))?;
    for (timestamp, price) in rows {
        writer
            .write_record([
                timestamp.format("%d/%m/%Y %H:%M:%S").to_string(),
                format_legacy_price(*price),
            ])
            .map_err(|e| FetcherError::Io(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| FetcherError::Io(e.to_string()))?;
    Ok(())
}

/// Price in the legacy textual convention: decimal comma, euro suffix.
fn format_legacy_price(value: f64) -> String {
    format!("{value:.2} \u{20ac}").replace('.', ",")
}

fn wd(e: impl std::fmt::Display) -> FetcherError {
    FetcherError::Browser(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_export_date_range_mid_year() {
        let (from, until) = export_date_range(2024, 3).unwrap();
        assert_eq!(from, "29/02/2024"); // leap year
        assert_eq!(until, "01/04/2024");
    }

    #[test]
    fn test_export_date_range_year_boundaries() {
        let (from, until) = export_date_range(2024, 1).unwrap();
        assert_eq!(from, "31/12/2023");
        assert_eq!(until, "01/02/2024");

        let (from, until) = export_date_range(2024, 12).unwrap();
        assert_eq!(from, "30/11/2024");
        assert_eq!(until, "01/01/2025");
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name(2024, 3, "csv"), "Price_202403.csv");
        assert_eq!(export_file_name(2024, 12, "xlsx"), "Price_202412.xlsx");
    }

    #[test]
    fn test_collapse_hourly_means_and_filtering() {
        let rows = vec![
            (ts(2024, 3, 15, 10, 0), 40.0),
            (ts(2024, 3, 15, 10, 15), 50.0),
            (ts(2024, 3, 15, 10, 30), 60.0),
            (ts(2024, 3, 15, 10, 45), 70.0),
            (ts(2024, 3, 15, 11, 0), 100.0),
            // Outside the target month, must be dropped.
            (ts(2024, 2, 29, 23, 45), 999.0),
            (ts(2023, 3, 15, 10, 0), 999.0),
        ];

        let hourly = collapse_hourly(&rows, 2024, 3);
        assert_eq!(hourly.len(), 2);
        assert_eq!(hourly[0], (ts(2024, 3, 15, 10, 0), 55.0));
        assert_eq!(hourly[1], (ts(2024, 3, 15, 11, 0), 100.0));
    }

    #[test]
    fn test_collapse_hourly_empty_when_period_missing() {
        let rows = vec![(ts(2024, 2, 1, 0, 0), 10.0)];
        assert!(collapse_hourly(&rows, 2024, 3).is_empty());
    }

    #[test]
    fn test_format_legacy_price() {
        assert_eq!(format_legacy_price(45.675), "45,68 \u{20ac}");
        assert_eq!(format_legacy_price(-5.0), "-5,00 \u{20ac}");
    }

    #[test]
    fn test_write_legacy_csv_round_trips_through_loader_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Price_202403.csv");
        let rows = vec![(ts(2024, 3, 1, 0, 0), 42.5), (ts(2024, 3, 1, 1, 0), -1.25)];

        write_legacy_csv(&path, &rows).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), "Date;Euro");
        assert_eq!(lines.next().unwrap(), "01/03/2024 00:00:00;42,50 \u{20ac}");
        assert_eq!(lines.next().unwrap(), "01/03/2024 01:00:00;-1,25 \u{20ac}");
    }
}
