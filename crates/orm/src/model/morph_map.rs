//! Polymorphic type registry
//!
//! Maps the type tag stored in a `*_type` column to the schema it names.
//! Unmapped schemas use their own name as tag.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::schema::{Schema, SchemaFactory};

static GLOBAL_MORPH_MAP: Lazy<MorphMap> = Lazy::new(MorphMap::new);

#[derive(Default)]
pub struct MorphMap {
    by_tag: DashMap<String, SchemaFactory>,
    tag_cache: DashMap<String, String>,
}

impl MorphMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry consulted by polymorphic relations
    pub fn global() -> &'static MorphMap {
        &GLOBAL_MORPH_MAP
    }

    /// Register `factory` under `tag`, replacing an earlier registration
    pub fn register<F>(&self, tag: &str, factory: F)
    where
        F: Fn() -> Arc<Schema> + Send + Sync + 'static,
    {
        self.by_tag.insert(tag.to_string(), Arc::new(factory));
        self.tag_cache.clear();
    }

    pub fn unregister(&self, tag: &str) -> bool {
        self.tag_cache.clear();
        self.by_tag.remove(tag).is_some()
    }

    /// Schema registered under `tag`
    pub fn resolve(&self, tag: &str) -> Option<Arc<Schema>> {
        let factory = self.by_tag.get(tag).map(|entry| entry.value().clone())?;
        Some(factory())
    }

    /// Tag stored for records of `schema`
    pub fn tag_for(&self, schema: &Schema) -> String {
        if let Some(tag) = self.tag_cache.get(schema.name()) {
            return tag.value().clone();
        }

        // Factories run outside the map guards; they may initialize other schemas.
        let candidates: Vec<(String, SchemaFactory)> = self
            .by_tag
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let tag = candidates
            .into_iter()
            .find(|(_, factory)| factory().name() == schema.name())
            .map(|(tag, _)| tag)
            .unwrap_or_else(|| schema.name().to_string());

        self.tag_cache.insert(schema.name().to_string(), tag.clone());
        tag
    }
}
