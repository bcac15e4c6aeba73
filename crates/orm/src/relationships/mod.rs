//! Relationships Module - relation definitions, relation queries and eager loading
//!
//! - `kinds`: relation shapes and per-relation options
//! - `keys`: key slot resolution against owner and related schemas
//! - `definition`: a booted relation and the queries it builds
//! - `query`: relation-bound query builder and its constraint algorithm
//! - `existence`: `has`/`where_has`/`with_count`/`preload` on any query
//! - `partition`: attaching fetched records to their parents
//! - `preloader`: batched eager loading
//! - `scopes`: named global query scopes
//! - `clients`: per-parent persistence

pub mod clients;
pub mod definition;
pub mod existence;
pub mod keys;
pub mod kinds;
pub mod partition;
pub mod preloader;
pub mod query;
pub mod scopes;

pub use clients::{
    BelongsToClient, HasOneOrManyClient, ManyToManyClient, RelationClient, SyncChanges,
    ThroughClient,
};

pub use definition::RelationDefinition;
pub use existence::RelationQueries;
pub use keys::{KeyRequest, KeyResolver, KeySlot, ResolvedKeyPair, ResolvedKeys};
pub use kinds::{RelationKind, RelationOptions};
pub use preloader::{PreloadRefine, Preloader};
pub use query::RelationQueryBuilder;
pub use scopes::{GlobalScopes, ScopeFn};
