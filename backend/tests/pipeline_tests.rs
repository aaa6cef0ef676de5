use dofusdb_ingest::store::EntityStore;
use dofusdb_ingest::{
    CollectOptions, Database, ImportOptions, IntegrationAction, Pipeline, RecordStatus, SeedData, Settings, SubEntity,
};
use serde_json::{json, Map};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Fixtures ────────────────────────────────────────────────────

fn write_config(root: &Path, base_url: &str) {
    let source = root.join("dofusdb");
    std::fs::create_dir_all(source.join("entities")).unwrap();
    std::fs::write(
        source.join("source.json"),
        json!({ "source": "dofusdb", "base_url": base_url, "default_lang": "en" }).to_string(),
    )
    .unwrap();
    std::fs::write(
        source.join("entities").join("monsters.json"),
        json!({
            "entity": "monsters",
            "entity_type": "monster",
            "sub_entities": ["creatures", "monsters"],
            "endpoints": { "fetch_one": "/monsters/{id}", "fetch_many": "/monsters" },
            "mapping": [
                { "key": "dofusdb_id", "from": { "path": "id" },
                  "to": [{ "model": "creatures" }, { "model": "monsters" }],
                  "formatters": [{ "type": "to_int" }] },
                { "key": "name", "from": { "path": "name" },
                  "to": [{ "model": "creatures" }], "formatters": [{ "type": "translate" }] },
                { "key": "level", "from": { "path": "grades.0.level" },
                  "to": [{ "model": "creatures" }], "formatters": [{ "type": "convert_level" }] },
                { "key": "life", "from": { "path": "grades.0.lifePoints" },
                  "to": [{ "model": "creatures" }], "formatters": [{ "type": "convert_life" }] }
            ]
        })
        .to_string(),
    )
    .unwrap();
}

fn seed() -> SeedData {
    serde_json::from_value(json!({
        "characteristics": [
            { "characteristic_id": "level", "entity": "monster", "required": true, "min": 1, "max": 20 }
        ]
    }))
    .unwrap()
}

fn monster(id: u64, level: u64) -> serde_json::Value {
    json!({
        "id": id,
        "name": { "fr": format!("Monstre {}", id), "en": format!("Monster {}", id) },
        "grades": [{ "level": level, "lifePoints": 800 }]
    })
}

async fn server_with(monsters: Vec<serde_json::Value>) -> MockServer {
    let server = MockServer::start().await;
    let total = monsters.len();
    Mock::given(method("GET"))
        .and(path("/monsters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": monsters, "total": total })))
        .mount(&server)
        .await;
    server
}

fn pipeline(config_dir: &Path, db: &Database) -> Pipeline {
    dofusdb_ingest::logging::init_test();
    db.seed(&seed()).unwrap();
    let settings = Settings {
        config_dir: config_dir.to_path_buf(),
        ..Settings::default()
    };
    Pipeline::new(&settings, db.clone())
}

// ── import_many ─────────────────────────────────────────────────

#[tokio::test]
async fn dry_run_then_import_then_rerun() {
    let server = server_with(vec![monster(31, 50), monster(32, 120)]).await;
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());
    let db = Database::open_in_memory().unwrap();
    let pipeline = pipeline(dir.path(), &db);

    let dry = ImportOptions {
        dry_run: true,
        ..ImportOptions::default()
    };
    let report = pipeline
        .import_many("dofusdb", "monsters", &Map::new(), &CollectOptions::default(), &dry)
        .await
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.summary.would_create, 2);
    assert_eq!(db.count(SubEntity::Creatures).unwrap(), 0);

    let report = pipeline
        .import_many("dofusdb", "monsters", &Map::new(), &CollectOptions::default(), &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.summary.created, 2);
    assert_eq!(report.collect.collected, 2);
    assert_eq!(db.count(SubEntity::Creatures).unwrap(), 2);
    assert_eq!(db.count(SubEntity::Monsters).unwrap(), 2);

    let rerun = pipeline
        .import_many("dofusdb", "monsters", &Map::new(), &CollectOptions::default(), &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(rerun.summary.skipped, 2);
    assert_ne!(rerun.run_id, report.run_id);
    assert_eq!(db.count(SubEntity::Creatures).unwrap(), 2);
}

#[tokio::test]
async fn invalid_records_are_reported_not_written() {
    // level 250 converts to 25, above the rule's max of 20
    let server = server_with(vec![monster(1, 30), monster(2, 250)]).await;
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());
    let db = Database::open_in_memory().unwrap();
    let pipeline = pipeline(dir.path(), &db);

    let report = pipeline
        .import_many("dofusdb", "monsters", &Map::new(), &CollectOptions::default(), &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(report.summary.created, 1);
    assert_eq!(report.summary.invalid, 1);
    let invalid = report.records.iter().find(|r| r.status == RecordStatus::Invalid).unwrap();
    assert_eq!(invalid.external_id.as_deref(), Some("2"));
    assert!(invalid.integration.is_none());
    assert_eq!(db.count(SubEntity::Creatures).unwrap(), 1);
}

#[tokio::test]
async fn skip_validation_integrates_invalid_records() {
    let server = server_with(vec![monster(2, 250)]).await;
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());
    let db = Database::open_in_memory().unwrap();
    let pipeline = pipeline(dir.path(), &db);

    let options = ImportOptions {
        skip_validation: true,
        ..ImportOptions::default()
    };
    let report = pipeline
        .import_many("dofusdb", "monsters", &Map::new(), &CollectOptions::default(), &options)
        .await
        .unwrap();

    assert_eq!(report.records[0].status, RecordStatus::Integrated);
    assert_eq!(report.records[0].action(), Some(IntegrationAction::Created));
}

#[tokio::test]
async fn conversion_errors_do_not_stop_the_batch() {
    let server = server_with(vec![json!("not an object"), monster(5, 30)]).await;
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());
    let db = Database::open_in_memory().unwrap();
    let pipeline = pipeline(dir.path(), &db);

    let report = pipeline
        .import_many("dofusdb", "monsters", &Map::new(), &CollectOptions::default(), &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.created, 1);
    assert!(report.records[0].error.is_some());
}

// ── import_one / convert ────────────────────────────────────────

#[tokio::test]
async fn import_one_uses_the_source_language() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monsters/31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(monster(31, 50)))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());
    let db = Database::open_in_memory().unwrap();
    let pipeline = pipeline(dir.path(), &db);

    let report = pipeline
        .import_one("dofusdb", "monsters", "31", &ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.action(), Some(IntegrationAction::Created));

    let stored = db.find_by_external_id(SubEntity::Creatures, "31").unwrap().unwrap();
    assert_eq!(stored.data["name"], "Monster 31");
    assert_eq!(stored.data["level"], 5);
    assert_eq!(stored.data["life"], 85);
}

#[tokio::test]
async fn convert_honours_an_explicit_language() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), "http://127.0.0.1:9");
    let db = Database::open_in_memory().unwrap();
    let pipeline = pipeline(dir.path(), &db);

    let record = pipeline
        .convert("dofusdb", "monsters", &monster(31, 50), Some("fr"))
        .unwrap();
    let (_, name) = record.find_field("name").unwrap();
    assert_eq!(name, "Monstre 31");
}

#[tokio::test]
async fn import_one_propagates_fetch_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/monsters/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.uri());
    let db = Database::open_in_memory().unwrap();
    let pipeline = pipeline(dir.path(), &db);

    let err = pipeline
        .import_one("dofusdb", "monsters", "404", &ImportOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
}
