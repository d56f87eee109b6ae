//! Common test utilities for facade tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quill::*;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    #[serde(deserialize_with = "int_flag")]
    pub active: bool,
}

// SQLite stores booleans as integers
fn int_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(i64::deserialize(deserializer)? != 0)
}

impl Entity for Person {
    fn column_aliases() -> &'static [(&'static str, &'static str)] {
        &[("person_id", "id"), ("person_name", "name"), ("is_active", "active")]
    }
}

pub const PERSON_COLUMNS: &str = "person_id, person_name, is_active";

const SCHEMA: &str = "
    CREATE TABLE person (
        person_id INTEGER PRIMARY KEY,
        person_name TEXT NOT NULL UNIQUE,
        is_active INTEGER NOT NULL DEFAULT 1
    );
";

static NEXT_DB: AtomicU64 = AtomicU64::new(0);

/// Inserts a person, returning the stored row
pub struct AddPerson {
    pub name: String,
}

impl Cacheable for AddPerson {}

impl Request for AddPerson {
    type Output = Person;

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("name is required"));
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &SqlContext) -> Result<Person> {
        ctx.insert_get_first(
            Statement::new(format!(
                "INSERT INTO person (person_name) VALUES (:name) RETURNING {}",
                PERSON_COLUMNS
            ))
            .bind("name", self.name.as_str()),
        )
    }
}

impl Command for AddPerson {}

/// A configured, schema-initialized in-memory database
pub fn create_config() -> Arc<Configuration> {
    let name = format!("quill_facade_{}", NEXT_DB.fetch_add(1, Ordering::Relaxed));
    let config = Setup::new()
        .connection_factory(SqliteConnectionFactory::memory(&name).unwrap())
        .map_entity::<Person>()
        .build();
    CommandExecutor::new(Arc::clone(&config))
        .execute(&mut DdlCommand::new(SCHEMA))
        .unwrap();
    config
}

/// Insert a person and return the new id
pub fn add_person(config: &Arc<Configuration>, name: &str) -> i64 {
    CommandExecutor::new(Arc::clone(config))
        .execute(&mut AddPerson { name: name.into() })
        .unwrap()
        .id
}
