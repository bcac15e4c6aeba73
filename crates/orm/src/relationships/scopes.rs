//! Global query scopes
//!
//! An ordered list of named refinements. Cloning a query clones the list,
//! so removing a scope from one query never affects another.

use std::fmt;
use std::sync::Arc;

use crate::query::QueryBuilder;

/// Refinement over a statement; receives the name to qualify columns with
pub type ScopeFn = Arc<dyn Fn(QueryBuilder, &str) -> QueryBuilder + Send + Sync>;

#[derive(Clone, Default)]
pub struct GlobalScopes {
    entries: Vec<(String, ScopeFn)>,
}

impl GlobalScopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scope; re-registering a name replaces it in place
    pub fn add(&mut self, name: &str, scope: ScopeFn) {
        match self.entries.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = scope,
            None => self.entries.push((name.to_string(), scope)),
        }
    }

    /// Remove a scope by name; returns whether it was present
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| existing != name);
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply every scope in registration order
    pub fn apply(&self, mut statement: QueryBuilder, table_ref: &str) -> QueryBuilder {
        for (_, scope) in &self.entries {
            statement = scope(statement, table_ref);
        }
        statement
    }
}

impl fmt::Debug for GlobalScopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
