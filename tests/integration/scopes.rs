//! Ambient transaction scopes around executor calls

use std::sync::Arc;

use parking_lot::Mutex;
use quill::*;

use crate::common::*;

/// Records what the transaction asked of it
struct Journal {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Enlistment for Journal {
    fn commit(&mut self) -> DbResult<()> {
        self.log.lock().push(format!("{}:commit", self.name));
        Ok(())
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.log.lock().push(format!("{}:rollback", self.name));
        Ok(())
    }
}

/// Adds a person and enlists a journal entry in the ambient transaction
struct AddJournaled {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Cacheable for AddJournaled {}

impl Request for AddJournaled {
    type Output = Person;

    fn execute(&mut self, ctx: &SqlContext) -> Result<Person> {
        let transaction = ctx.require_transaction()?;
        transaction.enlist(Box::new(Journal {
            name: self.name,
            log: Arc::clone(&self.log),
        }))?;
        ctx.commands().execute(&mut AddPerson {
            name: self.name.to_string(),
        })
    }
}

impl Command for AddJournaled {}

#[test]
fn completed_scope_commits_enlistments_in_order() {
    let config = create_config();
    let commands = CommandExecutor::new(config);
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut scope = commands
        .ambient()
        .read_committed(ScopeOption::Required, 30)
        .unwrap();
    for name in ["Ada", "Grace"] {
        commands
            .execute(&mut AddJournaled {
                name,
                log: Arc::clone(&log),
            })
            .unwrap();
    }
    scope.complete().unwrap();
    assert_eq!(scope.dispose().unwrap(), TransactionStatus::Committed);

    assert_eq!(*log.lock(), vec!["Ada:commit", "Grace:commit"]);
}

#[test]
fn abandoned_scope_rolls_back() {
    let config = create_config();
    let commands = CommandExecutor::new(config);
    let log = Arc::new(Mutex::new(Vec::new()));
    let outcome = Arc::new(Mutex::new(None));

    {
        let _scope = commands
            .ambient()
            .serializable(ScopeOption::Required, 30)
            .unwrap();
        let seen = Arc::clone(&outcome);
        commands
            .ambient()
            .on_transaction_completed(move |status| *seen.lock() = Some(status));
        commands
            .execute(&mut AddJournaled {
                name: "Ada",
                log: Arc::clone(&log),
            })
            .unwrap();
    }

    assert_eq!(*log.lock(), vec!["Ada:rollback"]);
    assert_eq!(*outcome.lock(), Some(TransactionStatus::Aborted));
    assert_eq!(commands.config().coordinator().metrics().aborted, 1);
}

#[test]
fn journaled_command_needs_a_scope() {
    let config = create_config();
    let err = CommandExecutor::new(config)
        .execute(&mut AddJournaled {
            name: "Ada",
            log: Arc::new(Mutex::new(Vec::new())),
        })
        .unwrap_err();
    assert!(matches!(err, Error::TransactionRequired));
}

#[test]
fn requires_new_isolates_inner_work() {
    let config = create_config();
    let commands = CommandExecutor::new(config);
    let log = Arc::new(Mutex::new(Vec::new()));

    let outer = commands
        .ambient()
        .read_committed(ScopeOption::Required, 30)
        .unwrap();
    {
        let mut inner = commands
            .ambient()
            .read_committed(ScopeOption::RequiresNew, 30)
            .unwrap();
        commands
            .execute(&mut AddJournaled {
                name: "Inner",
                log: Arc::clone(&log),
            })
            .unwrap();
        inner.complete().unwrap();
        inner.dispose().unwrap();
    }
    commands
        .execute(&mut AddJournaled {
            name: "Outer",
            log: Arc::clone(&log),
        })
        .unwrap();
    assert_eq!(outer.dispose().unwrap(), TransactionStatus::Aborted);

    assert_eq!(*log.lock(), vec!["Inner:commit", "Outer:rollback"]);
}
