//! Query Builder Module - fluent statement builder, model queries and SQL rendering

pub mod alias;
pub mod builder;
pub mod clauses;
pub mod dml;
pub mod model_query;
pub mod sql_generation;
pub mod types;
pub mod where_clause;

pub use alias::AliasGenerator;
pub use builder::QueryBuilder;
pub use model_query::ModelQueryBuilder;
pub use types::*;
pub use where_clause::QueryFilters;
