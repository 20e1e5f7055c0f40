//! Opening a database from a configuration file.

use std::sync::Arc;

use tempfile::TempDir;
use tessera_common::config::{DataSourceConfig, EngineConfig};
use tessera_cursor::source::MemorySource;
use tessera_cursor::{CursorOptions, Database, Query};
use tessera_test::Fixture;

const CONFIG: &str = r#"
[ledger]
lock_timeout_ms = 150

[cursor]
fetch_size = 2
cursor_name_prefix = "DOC_CUR"

[data_source]
database_name = "wombat"
user = "app"
create_database = true
"#;

#[test]
fn test_open_from_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("tessera.toml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.ledger.lock_timeout_ms, 150);
    assert!(config.ledger.deadlock_detection);
    assert_eq!(config.cleanup, EngineConfig::default().cleanup);

    let fixture = Fixture::with_config(config).unwrap();
    for id in 1..=5 {
        fixture.insert_doc(id, 8, 8).unwrap();
    }
    assert_eq!(
        fixture.db.data_source(),
        &DataSourceConfig {
            database_name: Some("wombat".into()),
            user: Some("app".into()),
            create_database: true,
            ..DataSourceConfig::default()
        }
    );

    let conn = fixture.connect();
    let mut cursor = conn
        .open_cursor(Query::table(Fixture::TABLE), CursorOptions::default())
        .unwrap();
    assert!(cursor.get_cursor_name().unwrap().starts_with("DOC_CUR"));
    let mut rows = 0;
    while cursor.next().unwrap() {
        rows += 1;
    }
    assert_eq!(rows, 5);
}

#[test]
fn test_saved_config_reloads_equal() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested").join("tessera.toml");
    let config = EngineConfig::builder()
        .fetch_size(64)
        .max_lob_length(1 << 20)
        .data_source(DataSourceConfig::for_database("reports"))
        .build();

    config.save(&path).unwrap();
    let loaded = EngineConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);
    assert!(loaded
        .data_source
        .property_diff(&config.data_source)
        .is_empty());
}

#[test]
fn test_rejects_invalid_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.toml");
    std::fs::write(&path, "[ledger]\nlock_timeout_ms = 0\n").unwrap();

    let err = EngineConfig::from_file(&path).unwrap_err();
    assert_eq!(err.sql_state(), "XCY00");

    let missing = EngineConfig::from_file(&tmp.path().join("missing.toml")).unwrap_err();
    assert_eq!(missing.sql_state(), "58030");

    let mut config = EngineConfig::for_testing();
    config.cursor.fetch_size = 0;
    let err = Database::open(config, Arc::new(MemorySource::new())).unwrap_err();
    assert_eq!(err.sql_state(), "XCY00");
}
