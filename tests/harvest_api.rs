//! Integration tests for the paginated forecast harvester
//!
//! A stub HTTP server stands in for the open-data API, so these tests
//! verify the request pattern (offsets, request counts) as well as the
//! collected results.

use energy_data_downloader::config::Settings;
use energy_data_downloader::fetcher::elia::ApiHarvester;
use energy_data_downloader::DatasetKind;

use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn page(day: &str, count: usize) -> serde_json::Value {
    let records: Vec<serde_json::Value> = (0..count)
        .map(|i| {
            json!({
                "datetime": format!("{day}T00:{:02}:00Z", i % 60),
                "region": "Belgium",
                "measured": i as f64,
            })
        })
        .collect();
    json!({ "results": records })
}

#[tokio::test]
async fn test_fetch_day_pages_until_short_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/records"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("2024-03-15", 100)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .and(query_param("offset", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("2024-03-15", 100)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .and(query_param("offset", "200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("2024-03-15", 50)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let harvester =
        ApiHarvester::with_base_url(Settings::new(dir.path()), server.uri()).unwrap();

    let url = format!("{}/records", server.uri());
    let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
    let records = harvester.fetch_day(&url, date, &[]).await.unwrap();

    assert_eq!(records.len(), 250);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_fetch_day_sends_day_filter_and_ordering() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/records"))
        .and(query_param("order_by", "datetime"))
        .and(query_param("limit", "100"))
        .and(query_param("refine", "datetime:\"2024-03-15\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("2024-03-15", 4)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let harvester =
        ApiHarvester::with_base_url(Settings::new(dir.path()), server.uri()).unwrap();

    let url = format!("{}/records", server.uri());
    let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
    let records = harvester.fetch_day(&url, date, &[]).await.unwrap();

    assert_eq!(records.len(), 4);
}

#[tokio::test]
async fn test_import_month_skips_existing_days_without_requests() {
    let server = MockServer::start().await;

    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path());

    // Pre-create every day file of the month.
    let year_dir = settings.year_dir(DatasetKind::Wind, 2024);
    std::fs::create_dir_all(&year_dir).unwrap();
    for day in 1..=29 {
        let name = format!("WindForecast_202402{day:02}.json");
        std::fs::write(year_dir.join(name), "[]").unwrap();
    }

    let harvester = ApiHarvester::with_base_url(settings, server.uri()).unwrap();
    harvester
        .import_month(DatasetKind::Wind, 2024, 2)
        .await
        .unwrap();

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_import_month_records_empty_day_as_no_data() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path());

    // Every day but the last already exists, so only one fetch happens.
    let year_dir = settings.year_dir(DatasetKind::Wind, 2024);
    std::fs::create_dir_all(&year_dir).unwrap();
    for day in 1..=28 {
        let name = format!("WindForecast_202402{day:02}.json");
        std::fs::write(year_dir.join(name), "[]").unwrap();
    }

    let harvester = ApiHarvester::with_base_url(settings.clone(), server.uri()).unwrap();
    harvester
        .import_month(DatasetKind::Wind, 2024, 2)
        .await
        .unwrap();

    // The empty day is recorded as no data: nothing written, not retried.
    assert!(!year_dir.join("WindForecast_20240229.json").exists());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_import_month_writes_day_files() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page("2024-02-01", 2)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::new(dir.path());

    // All days except the first are already present.
    let year_dir = settings.year_dir(DatasetKind::Solar, 2024);
    std::fs::create_dir_all(&year_dir).unwrap();
    for day in 2..=29 {
        let name = format!("SolarForecast_202402{day:02}.json");
        std::fs::write(year_dir.join(name), "[]").unwrap();
    }

    let harvester = ApiHarvester::with_base_url(settings, server.uri()).unwrap();
    harvester
        .import_month(DatasetKind::Solar, 2024, 2)
        .await
        .unwrap();

    let written = year_dir.join("SolarForecast_20240201.json");
    assert!(written.exists());

    let contents = std::fs::read_to_string(&written).unwrap();
    let records: Vec<serde_json::Value> = serde_json::from_str(&contents).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["region"], "Belgium");
}

#[tokio::test]
async fn test_import_month_rejects_price_kind() {
    let dir = tempfile::tempdir().unwrap();
    let harvester = ApiHarvester::new(Settings::new(dir.path())).unwrap();

    let result = harvester.import_month(DatasetKind::Price, 2024, 1).await;
    assert!(result.is_err());
}
