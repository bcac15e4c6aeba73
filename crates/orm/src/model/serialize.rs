//! Record serialization
//!
//! Attributes are emitted under their `serialize_as` names and loaded
//! relations under the relation's name; a `None` name hides the entry.
//! Extra columns (pivot values, counts) go under `meta`.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use super::record::{Record, Related};
use crate::error::ModelResult;

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;

        for column in self.schema().columns() {
            let Some(name) = &column.serialize_as else {
                continue;
            };
            let Some(value) = self.get(&column.attribute) else {
                continue;
            };

            map.serialize_entry(name, value)?;
        }

        for (relation, related) in self.loaded_relations() {
            let name = match self.schema().relation(relation) {
                Ok(definition) => definition.serialize_as().map(str::to_string),
                Err(_) => Some(relation.to_string()),
            };
            let Some(name) = name else { continue };
            match related {
                Related::One(one) => map.serialize_entry(&name, one)?,
                Related::Many(many) => map.serialize_entry(&name, many)?,
            }
        }

        if !self.extras().is_empty() {
            map.serialize_entry("meta", self.extras())?;
        }

        map.end()
    }
}

impl Record {
    /// Serialize to a JSON value
    pub fn to_json(&self) -> ModelResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
