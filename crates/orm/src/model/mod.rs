//! Model System - schemas and the records they describe
//!
//! - `schema`: compiled per-type description (table, columns, relations, scopes)
//! - `naming`: conventions for default column and key names
//! - `record`: attribute storage and loaded relations
//! - `persistence`: save/delete/refresh through a query client
//! - `serialize`: serde output honoring serialization aliases
//! - `morph_map`: polymorphic type tag registry

pub mod morph_map;
pub mod naming;
pub mod persistence;
pub mod record;
pub mod schema;
pub mod serialize;

pub use morph_map::MorphMap;
pub use naming::{singularize, to_snake_case, NamingStrategy, SnakeCaseNaming};
pub use record::{Record, Related};
pub use schema::{Column, ColumnDefinition, Schema, SchemaBuilder, SchemaFactory};
