//! # relmap: relationship mapping for SQL models
//!
//! Schemas describe a table and the relations it owns. Relation definitions
//! resolve their keys once, build constrained relation queries, compile
//! `has`/`with_count` subqueries, batch eager loads through a `Preloader`
//! and persist related records through per-parent relation clients.
//!
//! Statements run through the `QueryClient` collaborator; sqlx-backed
//! PostgreSQL and SQLite clients are included.

pub mod backends;
pub mod config;
pub mod database;
pub mod error;
pub mod model;
pub mod query;
pub mod relationships;
pub mod transaction;

pub use backends::{
    ClientMode, DatabaseBackendType, PostgresClient, QueryClient, SqlDialect, SqliteClient,
    TransactionClient,
};
pub use config::{ConfigError, OrmConfig};
pub use database::connect;
pub use error::{ModelError, ModelResult, OrmError, OrmResult};
pub use model::{
    ColumnDefinition, MorphMap, NamingStrategy, Record, Related, Schema, SchemaBuilder,
    SchemaFactory, SnakeCaseNaming,
};
pub use query::{AliasGenerator, ModelQueryBuilder, QueryBuilder, QueryFilters, QueryOperator};
pub use relationships::{
    BelongsToClient, HasOneOrManyClient, ManyToManyClient, Preloader, RelationClient,
    RelationDefinition, RelationKind, RelationOptions, RelationQueries, RelationQueryBuilder,
    SyncChanges, ThroughClient,

};
pub use transaction::TransactionScope;
