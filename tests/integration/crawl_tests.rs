//! Integration tests for the crawler
//!
//! These tests use wiremock to stand up a mock catalog origin and run the
//! full crawl cycle end-to-end, then check the record stream with the
//! validator.

use serde_json::{json, Value};
use stacks_harvest::config::{
    CatalogConfig, Config, CrawlerConfig, DetailConfig, OriginConfig, OutputConfig, PolicyConfig,
    ReaderConfig, SeedEntry,
};
use stacks_harvest::crawler::Coordinator;
use stacks_harvest::storage::{CheckpointStore, SqliteCheckpointStore};
use stacks_harvest::validator::{read_records, validate_records};
use stacks_harvest::{CatalogRecord, ReaderEntry};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock origin
fn create_test_config(base_url: &str, dir: &Path, page_size: u32, concurrency: u32) -> Config {
    Config {
        crawler: CrawlerConfig {
            max_concurrent_fetches: concurrency,
            request_timeout_secs: 5,
            max_retries: 1,
            retry_delay_ms: 10,
            checkpoint_interval: 3,
        },
        origin: OriginConfig {
            base_url: base_url.to_string(),
            cookie: Some("JSESSIONID=test".to_string()),
            user_agent: "stacks-harvest-test".to_string(),
        },
        catalog: CatalogConfig {
            listing_url: format!("{}/search-list", base_url),
            page_size,
            search_id: "0".to_string(),
            sort_order: "default".to_string(),
            site_id: Some("2120".to_string()),
            filter_field: Some("left_letter".to_string()),
            total_records_cap: 100_000,
            success_code: 1,
            seeds: vec![SeedEntry {
                name: "a".to_string(),
                filter: Some("a".to_string()),
            }],
        },
        detail: DetailConfig {
            url_template: format!("{}/detail?id={{id}}", base_url),
            variable: "resource".to_string(),
            reader_field_keys: vec!["获取方式".to_string(), "阅读".to_string()],
        },
        reader: ReaderConfig::default(),
        policy: PolicyConfig::default(),
        output: OutputConfig {
            records_path: dir.join("items.jsonl").display().to_string(),
            checkpoint_path: dir.join("harvest.db").display().to_string(),
        },
    }
}

async fn mount_listing_page(server: &MockServer, page: u64, total_pages: u64, results: Value) {
    Mock::given(method("POST"))
        .and(path("/search-list"))
        .and(body_partial_json(json!({"page": page})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 1,
            "data": {
                "curPage": page,
                "totalPages": total_pages,
                "totalRecords": total_pages,
                "results": results
            }
        })))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, id: &str, payload: Value) {
    Mock::given(method("GET"))
        .and(path("/detail"))
        .and(query_param("id", id))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<html><script type=\"text/javascript\">\n  var resource = {};\n</script></html>",
            payload
        )))
        .mount(server)
        .await;
}

/// Page 1 holds A (with sub-resource B), page 2 holds B itself
///
/// A resolves a page-image reader, B a legacy viewer.
async fn mount_two_page_catalog(server: &MockServer) {
    mount_listing_page(
        server,
        1,
        2,
        json!([{
            "id": "A",
            "fields": [{"key": "題名", "value": "Annals (listing)"}],
            "sub_resources": [{"id": "B", "fields": [{"key": "題名", "value": "Annals vol. 1"}]}]
        }]),
    )
    .await;
    mount_listing_page(
        server,
        2,
        2,
        json!([{"id": "B", "fields": [{"key": "題名", "value": "Annals vol. 1"}]}]),
    )
    .await;

    mount_detail(
        server,
        "A",
        json!({
            "id": "A",
            "fields": [
                {"key": "題名", "value": "Annals"},
                {"key": "阅读", "orsUrl": "/reader?fileId=A"}
            ]
        }),
    )
    .await;
    mount_detail(
        server,
        "B",
        json!({
            "id": "B",
            "fields": [{"key": "获取方式", "subs": [
                {"orsUrl": "/pdf/viewer.html?file=/blob/B.pdf"}
            ]}]
        }),
    )
    .await;

    Mock::given(method("GET"))
        .and(path("/reader"))
        .and(query_param("fileId", "A"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "var readerObj = {\"fileName\": \"A\", \"chapters\": []};\n\
             var pageNum = 3;\n\
             var imgUrl = encodeURIComponent(\"https://img.example.org/A/pdfImgaes/\");",
        ))
        .mount(server)
        .await;
}

async fn mount_viewer(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/pdf/viewer.html"))
        .respond_with(ResponseTemplate::new(status).set_body_string("<html></html>"))
        .mount(server)
        .await;
}

fn read_output(config: &Config) -> Vec<CatalogRecord> {
    let file = File::open(&config.output.records_path).expect("records file");
    read_records(BufReader::new(file)).expect("valid record stream")
}

fn validate(records: &[CatalogRecord]) -> (String, String) {
    let report = validate_records(records);
    let mut out = Vec::new();
    let mut err = Vec::new();
    report.write(&mut out, &mut err).unwrap();
    (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
}

#[tokio::test]
async fn test_full_crawl_two_pages() {
    let server = MockServer::start().await;
    mount_two_page_catalog(&server).await;
    mount_viewer(&server, 200).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1, 4);

    let mut coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    let stats = coordinator.run().await.unwrap();

    let records = read_output(&config);
    assert_eq!(records.len(), 2, "records: {:?}", records);
    assert_eq!(stats.records_emitted, 2);

    let a = records.iter().find(|r| r.id == "A").unwrap();
    assert!(a.merged);
    assert_eq!(a.sub_resources.len(), 1);
    assert_eq!(a.sub_resources[0].id, "B");
    assert_eq!(a.field_value("題名"), Some(&json!("Annals")));
    assert_eq!(a.fields().count(), 2);
    assert_eq!(a.reader_entries.len(), 1);
    assert!(matches!(
        &a.reader_entries[0],
        ReaderEntry::Structured { page_count: 3, image_directory, .. }
            if image_directory == "https://img.example.org/A/pdfImgaes/"
    ));

    let b = records.iter().find(|r| r.id == "B").unwrap();
    assert_eq!(b.parent_id.as_deref(), Some("A"));
    assert_eq!(
        b.reader_entries,
        vec![ReaderEntry::Blob(format!("{}/blob/B.pdf", server.uri()))]
    );

    let (out, err) = validate(&records);
    assert_eq!(out, "A 1 1\n");
    assert_eq!(err, "missing reader count: 0\n");
}

#[tokio::test]
async fn test_unresolved_reader_is_reported() {
    let server = MockServer::start().await;
    mount_two_page_catalog(&server).await;
    mount_viewer(&server, 500).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1, 4);

    let mut coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    coordinator.run().await.unwrap();

    let records = read_output(&config);
    assert_eq!(records.len(), 2);
    let b = records.iter().find(|r| r.id == "B").unwrap();
    assert!(b.reader_entries.is_empty());

    let (out, err) = validate(&records);
    assert_eq!(out, "");
    assert_eq!(err, "missing reader: A->B\nmissing reader count: 1\n");
}

#[tokio::test]
async fn test_records_follow_listing_order() {
    let server = MockServer::start().await;
    mount_listing_page(
        &server,
        1,
        2,
        json!([{"id": "1", "fields": []}, {"id": "2", "fields": []}]),
    )
    .await;
    mount_listing_page(
        &server,
        2,
        2,
        json!([{"id": "3", "fields": []}, {"id": "4", "fields": []}]),
    )
    .await;
    for id in ["1", "2", "3", "4"] {
        mount_detail(&server, id, json!({"id": id, "fields": []})).await;
    }

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 2, 1);

    let mut coordinator = Coordinator::new(config.clone(), "hash", true).unwrap();
    coordinator.run().await.unwrap();

    let ids: Vec<_> = read_output(&config).into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4"]);
}

#[tokio::test]
async fn test_completed_run_is_not_resumed() {
    let server = MockServer::start().await;
    mount_two_page_catalog(&server).await;
    mount_viewer(&server, 200).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1, 2);

    let mut first = Coordinator::new(config.clone(), "hash", true).unwrap();
    first.run().await.unwrap();
    let first_run = first.run_id();
    drop(first);

    let mut second = Coordinator::new(config.clone(), "hash", false).unwrap();
    assert_ne!(second.run_id(), first_run);
    second.run().await.unwrap();

    let records = read_output(&config);
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_reseeded_run_discards_stale_output() {
    let server = MockServer::start().await;
    mount_two_page_catalog(&server).await;
    mount_viewer(&server, 200).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path(), 1, 2);

    let interrupted = {
        let mut store =
            SqliteCheckpointStore::new(Path::new(&config.output.checkpoint_path)).unwrap();
        store.create_run("hash").unwrap()
    };
    std::fs::write(&config.output.records_path, "{\"id\":\"STALE\"}\n").unwrap();

    let mut coordinator = Coordinator::new(config.clone(), "hash", false).unwrap();
    assert_eq!(coordinator.run_id(), interrupted);
    coordinator.run().await.unwrap();

    let ids: Vec<_> = read_output(&config).into_iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids.iter().any(|id| id == "STALE"));
}
