//! `quill.toml` loading feeding into executor setup

mod common;

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;

use common::{Reply, ScriptedFactory};
use quill_executor::*;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct Person {
    #[serde(rename = "Id")]
    id: i64,
}

struct CachedPerson;

impl Cacheable for CachedPerson {
    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::absolute_secs(60)
    }
}

impl Request for CachedPerson {
    type Output = Person;

    fn execute(&mut self, ctx: &SqlContext) -> Result<Person> {
        ctx.through(|| ctx.select_first("SELECT Id FROM person LIMIT 1"))
    }
}

impl Query for CachedPerson {}

#[test]
fn test_settings_from_file_reach_executors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        r#"
debug_messages = true
command_timeout_secs = 12
transaction_timeout_secs = 5

[cache]
enabled = false
"#,
    )
    .unwrap();
    let settings = QuillConfig::from_file(&path).unwrap();

    let factory = ScriptedFactory::new();
    factory
        .push(Reply::rows(&["Id"], vec![vec![json!(1)]]))
        .push(Reply::rows(&["Id"], vec![vec![json!(1)]]))
        .push(Reply::rows(&["Id"], vec![]));
    let config = Setup::new()
        .connection_factory(factory.clone())
        .settings(settings)
        .build();
    let queries = QueryExecutor::new(config.clone());

    // Caching disabled: every execution reaches the database
    queries.execute(&mut CachedPerson).unwrap();
    queries.execute(&mut CachedPerson).unwrap();
    assert_eq!(factory.call_count(), 2);
    assert_eq!(factory.calls()[0].timeout, Some(Duration::from_secs(12)));

    // Debug messages enabled: not-found carries the SQL
    let err = queries.execute(&mut CachedPerson).unwrap_err();
    assert!(err.to_string().contains("SELECT Id FROM person LIMIT 1"));

    assert_eq!(config.coordinator().default_timeout(), Duration::from_secs(5));
}

#[test]
fn test_written_defaults_load_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    QuillConfig::default().write_to_file(&path).unwrap();

    let loaded = QuillConfig::from_file(&path).unwrap();
    assert_eq!(loaded, QuillConfig::default());
    assert!(Setup::new().settings(loaded).build().settings().cache.enabled);
}

#[test]
fn test_unreadable_file_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let err = QuillConfig::from_file(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}
