//! Ready-made requests for single-statement patterns
//!
//! | Type | Executor | Output |
//! |------|----------|--------|
//! | [`SelectQuery<T>`] | query | `Vec<T>` |
//! | [`SelectFirstQuery<T>`] | query | `T` |
//! | [`InsertCommand`] | command | affected rows |
//! | [`UpdateCommand`] | command | affected rows |
//! | [`DeleteCommand`] | command | affected rows |
//! | [`DdlCommand`] | command | `()` |
//!
//! The select helpers can cache their result. Their key is the full type
//! path (output type included), the SQL and the bound parameters, since they
//! have no fields of their own.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use quill_cache::CachePolicy;
use quill_core::Result;

use crate::context::SqlContext;
use crate::request::{CacheUsage, Cacheable, Command, Query, Request};
use crate::statement::Statement;

fn statement_key(type_path: &str, stmt: &Statement) -> String {
    format!("{}-{}-{}", type_path, stmt.sql(), stmt.parameters().to_json())
}

macro_rules! select_helper {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<T> {
            statement: Statement,
            policy: CachePolicy,
            usage: CacheUsage,
            _output: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            /// Run `statement` without caching
            pub fn new(statement: impl Into<Statement>) -> Self {
                Self {
                    statement: statement.into(),
                    policy: CachePolicy::disabled(),
                    usage: CacheUsage::Full,
                    _output: PhantomData,
                }
            }

            /// Cache results under `policy`
            pub fn cached(mut self, policy: CachePolicy) -> Self {
                self.policy = policy;
                self
            }

            /// Override the cache usage
            pub fn usage(mut self, usage: CacheUsage) -> Self {
                self.usage = usage;
                self
            }

            /// The statement this request runs
            pub fn statement(&self) -> &Statement {
                &self.statement
            }
        }

        impl<T> Cacheable for $name<T> {
            fn cache_policy(&self) -> CachePolicy {
                self.policy.clone()
            }

            fn instance_policy(&self) -> bool {
                true
            }

            fn cache_key(&self, _policy: &CachePolicy) -> Result<String> {
                Ok(statement_key(self.type_path(), &self.statement))
            }

            fn cache_usage(&self) -> CacheUsage {
                self.usage
            }
        }
    };
}

select_helper!(
    /// Every row of a SELECT mapped to `T`
    SelectQuery
);

select_helper!(
    /// First row of a SELECT mapped to `T`; zero rows is `EntityNotFound`
    SelectFirstQuery
);

impl<T> Request for SelectQuery<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Output = Vec<T>;

    fn execute(&mut self, ctx: &SqlContext) -> Result<Vec<T>> {
        let statement = self.statement.clone();
        ctx.through(|| ctx.select_many(statement))
    }
}

impl<T> Query for SelectQuery<T> where T: DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Request for SelectFirstQuery<T>
where
    T: DeserializeOwned + Default + Clone + Send + Sync + 'static,
{
    type Output = T;

    fn execute(&mut self, ctx: &SqlContext) -> Result<T> {
        let statement = self.statement.clone();
        ctx.through(|| ctx.select_first(statement))
    }
}

impl<T> Query for SelectFirstQuery<T> where
    T: DeserializeOwned + Default + Clone + Send + Sync + 'static
{
}

macro_rules! write_helper {
    ($(#[$doc:meta])* $name:ident, $method:ident, $output:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            statement: Statement,
        }

        impl $name {
            /// Run `statement`
            pub fn new(statement: impl Into<Statement>) -> Self {
                Self {
                    statement: statement.into(),
                }
            }

            /// The statement this request runs
            pub fn statement(&self) -> &Statement {
                &self.statement
            }
        }

        impl Cacheable for $name {}

        impl Request for $name {
            type Output = $output;

            fn execute(&mut self, ctx: &SqlContext) -> Result<$output> {
                ctx.$method(self.statement.clone())
            }
        }

        impl Command for $name {}
    };
}

write_helper!(
    /// An INSERT returning the affected row count
    InsertCommand,
    execute_insert,
    u64
);

write_helper!(
    /// An UPDATE returning the affected row count
    UpdateCommand,
    execute_update,
    u64
);

write_helper!(
    /// A DELETE returning the affected row count
    DeleteCommand,
    execute_delete,
    u64
);

write_helper!(
    /// A schema statement
    DdlCommand,
    execute_ddl,
    ()
);
