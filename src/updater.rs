//! Update orchestration
//!
//! Computes the fetchable year/month window, expands the existing archives
//! so already-fetched days are visible to the idempotency checks, walks the
//! window sequentially dispatching to the per-kind fetcher, and recompacts
//! the archives at the end. One failing period is logged and skipped; it
//! never aborts the rest of the run.

use chrono::{Datelike, NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::archive::{ArchiveError, ArchiveManager};
use crate::config::Settings;
use crate::fetcher::belpex::BrowserExporter;
use crate::fetcher::elia::ApiHarvester;
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{DatasetKind, KindSelection};

/// Update errors
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Fetcher setup or terminal fetch failure
    #[error(transparent)]
    Fetcher(#[from] FetcherError),

    /// Archive expansion or compaction failure
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// The inclusive year/month range eligible for fetching.
///
/// Bounded below by the requested (or default) start year and above by the
/// latest period the upstream is known to have published. The cutoff is a
/// calendar rule, not a guarantee: a month inside the window can still turn
/// out empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// First year of the window
    pub from_year: i32,
    /// Last year of the window
    pub to_year: i32,
    /// Year of the latest published month
    pub cutoff_year: i32,
    /// Latest published month within `cutoff_year`
    pub cutoff_month: u32,
}

impl FetchWindow {
    /// Compute the window for a reference date.
    ///
    /// Defaults: `from_year` = the previous year, `to_year` = the current
    /// year.
    pub fn compute(today: NaiveDate, from_year: Option<i32>, to_year: Option<i32>) -> Self {
        let (cutoff_year, cutoff_month) = latest_published_month(today);
        Self {
            from_year: from_year.unwrap_or_else(|| today.year() - 1),
            to_year: to_year.unwrap_or_else(|| today.year()),
            cutoff_year,
            cutoff_month,
        }
    }

    /// Every (year, month) of the window not beyond the cutoff, in order.
    pub fn months(&self) -> Vec<(i32, u32)> {
        let mut months = Vec::new();
        for year in self.from_year..=self.to_year {
            for month in 1..=12u32 {
                if year > self.cutoff_year
                    || (year == self.cutoff_year && month > self.cutoff_month)
                {
                    continue;
                }
                months.push((year, month));
            }
        }
        months
    }
}

/// The latest (year, month) the upstream has fully published.
///
/// A month becomes available a few days into the next one; before the 5th
/// the previous month is not yet complete upstream, so the cutoff falls one
/// month further back.
pub fn latest_published_month(today: NaiveDate) -> (i32, u32) {
    let mut month = today.month() as i32 - if today.day() <= 4 { 2 } else { 1 };
    let mut year = today.year();
    if month <= 0 {
        month += 12;
        year -= 1;
    }
    (year, month as u32)
}

/// Sequences a full update run across the fetchable window.
pub struct UpdateOrchestrator {
    harvester: ApiHarvester,
    exporter: BrowserExporter,
    archives: ArchiveManager,
}

impl UpdateOrchestrator {
    /// Create an orchestrator over the configured data tree.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(settings: Settings) -> FetcherResult<Self> {
        Ok(Self {
            harvester: ApiHarvester::new(settings.clone())?,
            exporter: BrowserExporter::new(settings.clone()),
            archives: ArchiveManager::new(settings),
        })
    }

    /// Run one update over the window.
    ///
    /// For forecast kinds the existing archives are expanded first, so days
    /// already fetched in earlier runs are skipped, and recompacted at the
    /// end so the bundles pick up whatever this run added. Per-period
    /// failures are logged and counted; the run continues with the next
    /// period.
    ///
    /// # Errors
    /// Returns an error only for archive failures; fetch failures are
    /// isolated per period.
    pub async fn update(
        &self,
        from_year: Option<i32>,
        to_year: Option<i32>,
        selection: KindSelection,
    ) -> Result<(), UpdateError> {
        let kinds = selection.kinds();

        if selection.includes_forecast() {
            info!("expanding forecast archives");
            for kind in kinds.iter().filter(|k| k.is_forecast()) {
                self.archives.expand_all(*kind)?;
            }
        }

        let window = FetchWindow::compute(Utc::now().date_naive(), from_year, to_year);
        info!(
            "fetching data for {}-{} (available through {}-{:02})",
            window.from_year, window.to_year, window.cutoff_year, window.cutoff_month
        );

        let mut fetched = 0u32;
        for (year, month) in window.months() {
            info!("updating {year}-{month:02} ({selection})");
            for kind in &kinds {
                let outcome = match kind {
                    DatasetKind::Wind | DatasetKind::Solar => {
                        self.harvester.import_month(*kind, year, month).await
                    }
                    DatasetKind::Price => self.exporter.export_month(year, month).await,
                };
                match outcome {
                    Ok(()) => fetched += 1,
                    Err(e) => error!(
                        "failed to fetch {} data for {year}-{month:02}: {e}",
                        kind.label()
                    ),
                }
            }
        }

        if fetched == 0 {
            warn!("no data available for the requested window");
        }

        if selection.includes_forecast() {
            info!("compacting forecast archives");
            for kind in kinds.iter().filter(|k| k.is_forecast()) {
                self.archives.compact(*kind)?;
            }
        }

        info!("data import finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_latest_published_month_mid_month() {
        assert_eq!(latest_published_month(date(2026, 8, 6)), (2026, 7));
        assert_eq!(latest_published_month(date(2024, 6, 15)), (2024, 5));
    }

    #[test]
    fn test_latest_published_month_early_in_month() {
        // Before the 5th the previous month is not complete upstream yet.
        assert_eq!(latest_published_month(date(2024, 6, 4)), (2024, 4));
        assert_eq!(latest_published_month(date(2024, 6, 5)), (2024, 5));
    }

    #[test]
    fn test_latest_published_month_year_rollover() {
        assert_eq!(latest_published_month(date(2024, 1, 10)), (2023, 12));
        assert_eq!(latest_published_month(date(2024, 1, 3)), (2023, 11));
        assert_eq!(latest_published_month(date(2024, 2, 2)), (2023, 12));
    }

    #[test]
    fn test_fetch_window_defaults() {
        let window = FetchWindow::compute(date(2024, 6, 15), None, None);
        assert_eq!(window.from_year, 2023);
        assert_eq!(window.to_year, 2024);
        assert_eq!((window.cutoff_year, window.cutoff_month), (2024, 5));
    }

    #[test]
    fn test_fetch_window_months_respect_cutoff() {
        let window = FetchWindow::compute(date(2024, 3, 10), Some(2023), Some(2024));
        let months = window.months();

        assert_eq!(months.first(), Some(&(2023, 1)));
        assert_eq!(months.last(), Some(&(2024, 2)));
        assert_eq!(months.len(), 14);
        assert!(!months.contains(&(2024, 3)));
    }

    #[test]
    fn test_fetch_window_entirely_beyond_cutoff() {
        let window = FetchWindow::compute(date(2024, 3, 10), Some(2025), Some(2026));
        assert!(window.months().is_empty());
    }
}
