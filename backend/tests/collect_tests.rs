use dofusdb_ingest::{CollectError, CollectOptions, CollectService, ConfigLoader, Settings};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Fixtures ────────────────────────────────────────────────────

fn write_config(root: &Path, base_url: &str) {
    let source = root.join("dofusdb");
    std::fs::create_dir_all(source.join("entities")).unwrap();
    std::fs::write(
        source.join("source.json"),
        json!({ "source": "dofusdb", "base_url": base_url }).to_string(),
    )
    .unwrap();
    std::fs::write(
        source.join("entities").join("monsters.json"),
        json!({
            "entity": "monsters",
            "entity_type": "monster",
            "endpoints": { "fetch_one": "/monsters/{id}", "fetch_many": "/monsters" },
            "pagination": { "page_size": 2 },
            "filters": { "supported": ["race"] }
        })
        .to_string(),
    )
    .unwrap();
}

fn service(root: &Path) -> CollectService {
    CollectService::new(Arc::new(ConfigLoader::new(root)), &Settings::default())
}

fn items(ids: &[u64]) -> Value {
    Value::Array(ids.iter().map(|id| json!({ "id": id })).collect())
}

async fn mount_page(server: &MockServer, skip: &str, limit: &str, ids: &[u64], total: u64) {
    Mock::given(method("GET"))
        .and(path("/monsters"))
        .and(query_param("$skip", skip))
        .and(query_param("$limit", limit))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": items(ids),
            "total": total,
            "limit": limit.parse::<u64>().unwrap(),
            "skip": skip.parse::<u64>().unwrap()
        })))
        .mount(server)
        .await;
}

fn ids(values: &[Value]) -> Vec<u64> {
    values.iter().map(|v| v["id"].as_u64().unwrap()).collect()
}

// ── fetch_many ──────────────────────────────────────────────────

#[tokio::test]
async fn fetch_many_without_limit_collects_every_page() {
    let server = MockServer::start().await;
    mount_page(&server, "0", "2", &[1, 2], 5).await;
    mount_page(&server, "2", "2", &[3, 4], 5).await;
    mount_page(&server, "4", "2", &[5], 5).await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());

    let out = service(dir.path())
        .fetch_many("dofusdb", "monsters", &Map::new(), &CollectOptions::default())
        .await
        .unwrap();

    assert_eq!(ids(&out.items), vec![1, 2, 3, 4, 5]);
    assert_eq!(out.meta.total, 5);
    assert_eq!(out.meta.collected, 5);
    assert_eq!(out.meta.pages, 3);
}

#[tokio::test]
async fn fetch_many_stops_at_limit() {
    let server = MockServer::start().await;
    mount_page(&server, "0", "2", &[1, 2], 10).await;
    mount_page(&server, "2", "2", &[3, 4], 10).await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());

    let options = CollectOptions::limit(3).with_page_size(2);
    let out = service(dir.path())
        .fetch_many("dofusdb", "monsters", &Map::new(), &options)
        .await
        .unwrap();

    assert_eq!(ids(&out.items), vec![1, 2, 3]);
    assert_eq!(out.meta.limit, 3);
    assert_eq!(out.meta.pages, 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn fetch_many_limit_above_total_returns_total() {
    let server = MockServer::start().await;
    mount_page(&server, "0", "10", &[1, 2, 3], 3).await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());

    let out = service(dir.path())
        .fetch_many("dofusdb", "monsters", &Map::new(), &CollectOptions::limit(10))
        .await
        .unwrap();

    assert_eq!(ids(&out.items), vec![1, 2, 3]);
    assert_eq!(out.meta.collected, 3);
    assert_eq!(out.meta.pages, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn fetch_many_starts_at_offset() {
    let server = MockServer::start().await;
    mount_page(&server, "2", "2", &[3, 4], 10).await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());

    let options = CollectOptions::limit(2).with_offset(2);
    let out = service(dir.path())
        .fetch_many("dofusdb", "monsters", &Map::new(), &options)
        .await
        .unwrap();

    assert_eq!(ids(&out.items), vec![3, 4]);
    assert_eq!(out.meta.offset, 2);
    assert_eq!(out.meta.total, 10);
}

#[tokio::test]
async fn fetch_many_forwards_only_supported_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monsters"))
        .and(query_param("race", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": items(&[7]), "total": 1 })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());

    let filters = json!({ "race": 5, "color": "red" });
    let out = service(dir.path())
        .fetch_many("dofusdb", "monsters", filters.as_object().unwrap(), &CollectOptions::default())
        .await
        .unwrap();

    assert_eq!(ids(&out.items), vec![7]);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].url.as_str().contains("color"));
}

#[tokio::test]
async fn fetch_many_accepts_bare_arrays() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monsters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items(&[1])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());

    let out = service(dir.path())
        .fetch_many("dofusdb", "monsters", &Map::new(), &CollectOptions::default())
        .await
        .unwrap();

    assert_eq!(ids(&out.items), vec![1]);
    assert_eq!(out.meta.total, 1);
}

// ── fetch_one ───────────────────────────────────────────────────

#[tokio::test]
async fn fetch_one_returns_the_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monsters/31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 31, "race": 2 })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());

    let record = service(dir.path()).fetch_one("dofusdb", "monsters", "31").await.unwrap();
    assert_eq!(record["race"], 2);
}

#[tokio::test]
async fn fetch_one_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monsters/999"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());

    let err = service(dir.path()).fetch_one("dofusdb", "monsters", "999").await.unwrap_err();
    assert!(matches!(err, CollectError::Http { status: 404, .. }));
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn fetch_unknown_entity_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "http://127.0.0.1:9");

    let err = service(dir.path()).fetch_one("dofusdb", "dragons", "1").await.unwrap_err();
    assert!(matches!(err, CollectError::Config(_)));
}
