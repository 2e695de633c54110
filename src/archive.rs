//! Yearly ZIP bundles for the daily forecast files
//!
//! Each (dataset kind, year) pair is kept as one compressed bundle next to
//! the year directory. A bundle is fresh as long as no member file in the
//! unpacked year directory has a modification time later than the bundle
//! itself; a stale bundle is rewritten in full. Extraction restores each
//! member's archived modification time, which is what keeps the staleness
//! comparison meaningful after a fresh checkout of the archive tree.
//!
//! Together the pair avoids refetching already-archived periods while still
//! letting later days of an in-progress month be added without rebundling
//! untouched years.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::Settings;
use crate::DatasetKind;

/// Archive errors
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP container failure
    #[error("zip error: {0}")]
    Zip(String),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        ArchiveError::Zip(e.to_string())
    }
}

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Manages the per-year bundles of one data tree.
pub struct ArchiveManager {
    settings: Settings,
}

impl ArchiveManager {
    /// Create a manager over the configured data tree.
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Whether a bundle must be rewritten.
    ///
    /// True when the bundle is absent or any `.json` file under
    /// `source_dir` has a modification time later than the bundle's.
    pub fn needs_recompaction(bundle: &Path, source_dir: &Path) -> ArchiveResult<bool> {
        if !bundle.exists() {
            return Ok(true);
        }
        let bundle_mtime = fs::metadata(bundle)?.modified()?;

        for file in collect_json_files(source_dir)? {
            let file_mtime = fs::metadata(&file)?.modified()?;
            if file_mtime > bundle_mtime {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Rewrite the stale bundles of one dataset kind.
    ///
    /// Every numeric year subdirectory gets one bundle named
    /// `<Prefix>_<year>.zip` in the kind directory; member paths are kept
    /// relative to the kind directory (`<year>/<file>.json`). Bundles that
    /// are still fresh are skipped. The bundle is written to a temporary
    /// file and moved into place, so a partially written bundle is never
    /// observable.
    ///
    /// # Errors
    /// Returns an error on filesystem or ZIP failures.
    pub fn compact(&self, kind: DatasetKind) -> ArchiveResult<()> {
        let kind_dir = self.settings.kind_dir(kind);
        if !kind_dir.is_dir() {
            warn!("directory does not exist: {}", kind_dir.display());
            return Ok(());
        }

        for year_dir in year_directories(&kind_dir)? {
            let year = year_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let bundle = kind_dir.join(format!("{}_{year}.zip", kind.file_prefix()));

            if !Self::needs_recompaction(&bundle, &year_dir)? {
                debug!("up to date: {}", bundle.display());
                continue;
            }

            info!("compacting {} into {}", year_dir.display(), bundle.display());
            write_bundle(&bundle, &kind_dir, &year_dir)?;
        }
        Ok(())
    }

    /// Extract a bundle, skipping files that already exist.
    ///
    /// Files are extracted relative to `extract_to` (the bundle's parent
    /// directory when `None`), never overwriting, and each extracted file
    /// gets its archived modification time back.
    ///
    /// # Errors
    /// Returns an error on filesystem or ZIP failures.
    ///
    /// # Returns
    /// The number of newly extracted files.
    pub fn expand(bundle: &Path, extract_to: Option<&Path>) -> ArchiveResult<usize> {
        let dest = match extract_to {
            Some(dir) => dir.to_path_buf(),
            None => bundle
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let mut archive = ZipArchive::new(BufReader::new(File::open(bundle)?))?;
        let mut extracted = 0usize;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let Some(relative) = entry.enclosed_name() else {
                warn!("skipping entry with unsafe path: {}", entry.name());
                continue;
            };
            let out_path = dest.join(relative);
            if out_path.exists() {
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut out_file = File::create(&out_path)?;
            std::io::copy(&mut entry, &mut out_file)?;

            if let Some(mtime) = entry.last_modified().and_then(to_system_time) {
                out_file.set_modified(mtime)?;
            }
            debug!("extracted {}", out_path.display());
            extracted += 1;
        }
        Ok(extracted)
    }

    /// Extract every bundle of one dataset kind.
    ///
    /// # Errors
    /// Returns an error on filesystem or ZIP failures.
    pub fn expand_all(&self, kind: DatasetKind) -> ArchiveResult<()> {
        let kind_dir = self.settings.kind_dir(kind);
        if !kind_dir.is_dir() {
            warn!("directory does not exist: {}", kind_dir.display());
            return Ok(());
        }

        let mut bundles: Vec<PathBuf> = fs::read_dir(&kind_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("zip"))
            .collect();
        bundles.sort();

        for bundle in bundles {
            info!("expanding {}", bundle.display());
            Self::expand(&bundle, None)?;
        }
        Ok(())
    }
}

/// Write one year bundle atomically.
fn write_bundle(bundle: &Path, base_dir: &Path, year_dir: &Path) -> ArchiveResult<()> {
    let tmp = bundle.with_extension("zip.tmp");

    {
        let mut writer = ZipWriter::new(BufWriter::new(File::create(&tmp)?));

        for file in collect_json_files(year_dir)? {
            let member_name = file
                .strip_prefix(base_dir)
                .unwrap_or(&file)
                .iter()
                .map(|c| c.to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let mtime = fs::metadata(&file)?.modified()?;
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(to_zip_datetime(mtime));

            writer.start_file(member_name, options)?;
            std::io::copy(&mut File::open(&file)?, &mut writer)?;
        }
        writer.finish()?.flush()?;
    }

    fs::rename(&tmp, bundle)?;
    Ok(())
}

/// All `.json` files under a directory, recursively, in sorted order.
fn collect_json_files(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Numeric year subdirectories, in sorted order.
fn year_directories(dir: &Path) -> ArchiveResult<Vec<PathBuf>> {
    let mut years: Vec<PathBuf> = fs::read_dir(dir)?
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

/// ZIP member timestamps are local DOS time.
fn to_zip_datetime(mtime: SystemTime) -> zip::DateTime {
    let local: DateTime<Local> = mtime.into();
    zip::DateTime::from_date_and_time(
        local.year().clamp(1980, 2107) as u16,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .unwrap_or_default()
}

fn to_system_time(dt: zip::DateTime) -> Option<SystemTime> {
    Local
        .with_ymd_and_hms(
            i32::from(dt.year()),
            u32::from(dt.month()),
            u32::from(dt.day()),
            u32::from(dt.hour()),
            u32::from(dt.minute()),
            u32::from(dt.second()),
        )
        .single()
        .map(SystemTime::from)
}
