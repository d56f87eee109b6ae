//! A small people directory built from custom requests

use std::sync::Arc;

use quill::*;

use crate::common::*;

struct FindPerson {
    id: i64,
}

impl Cacheable for FindPerson {
    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::sliding_secs(120).with_fields(["Id"])
    }

    fn key_fields(&self) -> Vec<KeyField> {
        vec![KeyField::scalar("Id", &self.id)]
    }
}

impl Request for FindPerson {
    type Output = Person;

    fn execute(&mut self, ctx: &SqlContext) -> Result<Person> {
        ctx.through(|| {
            ctx.select_first(
                Statement::new(format!("SELECT {} FROM person WHERE person_id = :id", PERSON_COLUMNS))
                    .bind("id", self.id)
                    .entity("Person"),
            )
        })
    }
}

impl Query for FindPerson {}

struct PeopleByIds {
    ids: Option<Vec<i64>>,
}

impl Cacheable for PeopleByIds {
    fn cache_policy(&self) -> CachePolicy {
        CachePolicy::absolute_secs(120)
    }

    fn key_fields(&self) -> Vec<KeyField> {
        vec![KeyField::collection("Ids", self.ids.as_ref())]
    }
}

impl Request for PeopleByIds {
    type Output = Vec<Person>;

    fn validate(&self) -> Result<()> {
        match &self.ids {
            Some(ids) if ids.len() > 100 => Err(Error::validation("at most 100 ids per lookup")),
            _ => Ok(()),
        }
    }

    fn execute(&mut self, ctx: &SqlContext) -> Result<Vec<Person>> {
        let ids = self.ids.clone().unwrap_or_default();
        ctx.through(|| {
            let mut people = Vec::with_capacity(ids.len());
            for id in &ids {
                people.extend(ctx.select_many::<Person>(
                    Statement::new(format!("SELECT {} FROM person WHERE person_id = :id", PERSON_COLUMNS))
                        .bind("id", *id),
                )?);
            }
            Ok(people)
        })
    }
}

impl Query for PeopleByIds {}

/// Deactivates a person and evicts the cached lookup
struct DeactivatePerson {
    id: i64,
}

impl Cacheable for DeactivatePerson {}

impl Request for DeactivatePerson {
    type Output = u64;

    fn execute(&mut self, ctx: &SqlContext) -> Result<u64> {
        let changed = ctx.execute_update(
            Statement::new("UPDATE person SET is_active = 0 WHERE person_id = :id").bind("id", self.id),
        )?;
        ctx.cache().remove(&format!("FindPerson-Id:{}", self.id));
        Ok(changed)
    }
}

impl Command for DeactivatePerson {}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    error.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
}

#[test]
fn find_person_maps_aliased_columns() {
    let config = create_config();
    let id = add_person(&config, "Ada");

    let ada = QueryExecutor::new(config).execute(&mut FindPerson { id }).unwrap();
    assert_eq!(
        ada,
        Person {
            id,
            name: "Ada".into(),
            active: true
        }
    );
}

#[test]
fn find_person_uses_cache_until_evicted() {
    let config = create_config();
    let id = add_person(&config, "Ada");
    let queries = QueryExecutor::new(Arc::clone(&config));

    assert!(queries.execute(&mut FindPerson { id }).unwrap().active);
    assert!(config.cache().contains_key(&format!("FindPerson-Id:{}", id)));

    assert_eq!(queries.commands().execute(&mut DeactivatePerson { id }).unwrap(), 1);
    assert!(!queries.execute(&mut FindPerson { id }).unwrap().active);
}

#[test]
fn missing_person_reports_entity_label() {
    let config = create_config();
    match QueryExecutor::new(config).execute(&mut FindPerson { id: 99 }) {
        Err(Error::EntityNotFound { entity, message }) => {
            assert_eq!(entity, "Person");
            assert_eq!(message, "Person does not exist");
        }
        other => panic!("expected EntityNotFound, got {:?}", other),
    }
}

#[test]
fn collection_keys_distinguish_lookups() {
    let config = create_config();
    let a = add_person(&config, "Ada");
    let b = add_person(&config, "Grace");
    let queries = QueryExecutor::new(Arc::clone(&config));

    let both = queries
        .execute(&mut PeopleByIds { ids: Some(vec![a, b]) })
        .unwrap();
    let none = queries.execute(&mut PeopleByIds { ids: None }).unwrap();

    assert_eq!(both.len(), 2);
    assert!(none.is_empty());
    assert!(config
        .cache()
        .contains_key(&format!("PeopleByIds-Ids::{},{}", a, b)));
    assert!(config.cache().contains_key("PeopleByIds-Ids::(null)"));
}

#[test]
fn oversized_lookup_fails_validation() {
    let config = create_config();
    let err = QueryExecutor::new(config)
        .execute(&mut PeopleByIds {
            ids: Some((0..101).collect()),
        })
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[test]
fn duplicate_names_handled_for_inserts_only() {
    let config = create_config();
    let id = add_person(&config, "Ada");
    let commands = CommandExecutor::new(Arc::clone(&config));

    let err = commands
        .execute(&mut AddPerson { name: "Ada".into() })
        .unwrap_err();
    assert!(err.as_provider().map(|e| e.is::<rusqlite::Error>()).unwrap_or(false));

    let handler = config.install_handler_for::<rusqlite::Error, _>(Operation::Insert, |_, e| {
        is_constraint_violation(e)
    });
    let duplicate = commands
        .execute(&mut AddPerson { name: "Ada".into() })
        .unwrap();
    assert_eq!(duplicate, Person::default());

    // Updates are not covered by the insert handler
    let mut rename = UpdateCommand::new(
        Statement::new("UPDATE person SET person_name = 'Ada' WHERE person_id <> :id").bind("id", id),
    );
    add_person(&config, "Grace");
    assert!(commands.execute(&mut rename).is_err());

    assert!(config.uninstall_handler(handler));
    assert!(commands.execute(&mut AddPerson { name: "Ada".into() }).is_err());
}
