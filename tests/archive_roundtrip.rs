//! Integration tests for archive compaction, expansion, and staleness

use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use energy_data_downloader::archive::ArchiveManager;
use energy_data_downloader::config::Settings;
use energy_data_downloader::DatasetKind;

fn set_mtime(path: &Path, mtime: SystemTime) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

fn mtime_of(path: &Path) -> SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

fn seconds_between(a: SystemTime, b: SystemTime) -> u64 {
    a.duration_since(b)
        .unwrap_or_else(|e| e.duration())
        .as_secs()
}

/// Lay down a small wind year directory with known contents and mtimes.
fn seed_year(settings: &Settings) -> Vec<(String, String, SystemTime)> {
    let year_dir = settings.year_dir(DatasetKind::Wind, 2024);
    fs::create_dir_all(&year_dir).unwrap();

    let base = SystemTime::now() - Duration::from_secs(7200);
    let mut seeded = Vec::new();
    for (i, day) in ["20240101", "20240102", "20240103"].iter().enumerate() {
        let name = format!("WindForecast_{day}.json");
        let contents = format!("[{{\"datetime\": \"2024-01-0{}T00:00:00Z\"}}]", i + 1);
        let path = year_dir.join(&name);
        fs::write(&path, &contents).unwrap();
        let mtime = base + Duration::from_secs(i as u64 * 60);
        set_mtime(&path, mtime);
        seeded.push((name, contents, mtime));
    }
    seeded
}

#[test]
fn test_compact_then_expand_reconstructs_files_and_mtimes() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path());
    let seeded = seed_year(&settings);

    let manager = ArchiveManager::new(settings.clone());
    manager.compact(DatasetKind::Wind).unwrap();

    let bundle = settings
        .kind_dir(DatasetKind::Wind)
        .join("WindForecast_2024.zip");
    assert!(bundle.exists());

    // Expand into an empty directory and compare byte for byte.
    let fresh = tempfile::tempdir().unwrap();
    let extracted = ArchiveManager::expand(&bundle, Some(fresh.path())).unwrap();
    assert_eq!(extracted, seeded.len());

    for (name, contents, mtime) in &seeded {
        let restored = fresh.path().join("2024").join(name);
        assert_eq!(&fs::read_to_string(&restored).unwrap(), contents);
        // ZIP member timestamps have 2 second resolution.
        assert!(seconds_between(mtime_of(&restored), *mtime) <= 2);
    }
}

#[test]
fn test_staleness_monotonicity() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path());
    seed_year(&settings);

    let manager = ArchiveManager::new(settings.clone());
    manager.compact(DatasetKind::Wind).unwrap();

    let kind_dir = settings.kind_dir(DatasetKind::Wind);
    let bundle = kind_dir.join("WindForecast_2024.zip");
    let year_dir = settings.year_dir(DatasetKind::Wind, 2024);

    // Fresh right after compaction.
    assert!(!ArchiveManager::needs_recompaction(&bundle, &year_dir).unwrap());

    // Stale as soon as any member file postdates the bundle. The bundle is
    // dated back so the comparison does not race the test clock.
    set_mtime(&bundle, SystemTime::now() - Duration::from_secs(3600));
    let member = year_dir.join("WindForecast_20240102.json");
    set_mtime(&member, SystemTime::now() - Duration::from_secs(1800));
    assert!(ArchiveManager::needs_recompaction(&bundle, &year_dir).unwrap());

    // Recompacting restores freshness.
    manager.compact(DatasetKind::Wind).unwrap();
    assert!(!ArchiveManager::needs_recompaction(&bundle, &year_dir).unwrap());
}

#[test]
fn test_compact_skips_fresh_bundles() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path());
    seed_year(&settings);

    let manager = ArchiveManager::new(settings.clone());
    manager.compact(DatasetKind::Wind).unwrap();

    let bundle = settings
        .kind_dir(DatasetKind::Wind)
        .join("WindForecast_2024.zip");
    let first_mtime = mtime_of(&bundle);

    // A second compact over unchanged sources must not rewrite the bundle.
    manager.compact(DatasetKind::Wind).unwrap();
    assert_eq!(mtime_of(&bundle), first_mtime);
}

#[test]
fn test_expand_never_overwrites_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path());
    seed_year(&settings);

    let manager = ArchiveManager::new(settings.clone());
    manager.compact(DatasetKind::Wind).unwrap();

    let year_dir = settings.year_dir(DatasetKind::Wind, 2024);
    let member = year_dir.join("WindForecast_20240101.json");
    fs::write(&member, "locally modified").unwrap();

    let bundle = settings
        .kind_dir(DatasetKind::Wind)
        .join("WindForecast_2024.zip");
    let extracted = ArchiveManager::expand(&bundle, None).unwrap();

    assert_eq!(extracted, 0);
    assert_eq!(fs::read_to_string(&member).unwrap(), "locally modified");
}

#[test]
fn test_expand_all_restores_deleted_days() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path());
    let seeded = seed_year(&settings);

    let manager = ArchiveManager::new(settings.clone());
    manager.compact(DatasetKind::Wind).unwrap();

    // Simulate a fresh checkout: the year directory is gone, only the
    // bundle remains.
    let year_dir = settings.year_dir(DatasetKind::Wind, 2024);
    fs::remove_dir_all(&year_dir).unwrap();

    manager.expand_all(DatasetKind::Wind).unwrap();

    for (name, contents, _) in &seeded {
        let restored = year_dir.join(name);
        assert_eq!(&fs::read_to_string(&restored).unwrap(), contents);
    }

    // Restored mtimes keep the bundle fresh, so nothing is refetched or
    // rebundled.
    let bundle = settings
        .kind_dir(DatasetKind::Wind)
        .join("WindForecast_2024.zip");
    assert!(!ArchiveManager::needs_recompaction(&bundle, &year_dir).unwrap());
}
