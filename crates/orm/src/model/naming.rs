//! Naming conventions used to derive default column and key names

use super::schema::Schema;

/// Derives physical names and default relation keys from logical ones
pub trait NamingStrategy: Send + Sync {
    /// Column name for a declared attribute
    fn column_name(&self, attribute: &str) -> String {
        to_snake_case(attribute)
    }

    /// Key an attribute is emitted under when a record is serialized
    fn serialized_name(&self, attribute: &str) -> String {
        attribute.to_string()
    }

    /// Key a loaded relation is emitted under when a record is serialized
    fn relation_serialized_name(&self, relation: &str) -> String {
        relation.to_string()
    }

    /// Attribute that references `schema` from another table, e.g. `user_id`
    fn foreign_key(&self, schema: &Schema) -> String {
        format!("{}_{}", singularize(schema.table()), schema.primary_key())
    }

    /// Pivot table joining two schemas, e.g. `skill_user`
    fn pivot_table(&self, owner: &Schema, related: &Schema) -> String {
        let mut names = [singularize(owner.table()), singularize(related.table())];
        names.sort();
        names.join("_")
    }

    /// Pivot column referencing `schema`
    fn pivot_foreign_key(&self, schema: &Schema) -> String {
        format!("{}_{}", singularize(schema.table()), schema.primary_key_column())
    }

    /// Discriminator attribute of a polymorphic relation
    fn morph_type(&self, morph_name: &str) -> String {
        format!("{}_type", morph_name)
    }

    /// Id attribute of a polymorphic relation
    fn morph_id(&self, morph_name: &str) -> String {
        format!("{}_id", morph_name)
    }
}

/// snake_case columns, attribute names serialized as declared
#[derive(Debug, Clone, Copy, Default)]
pub struct SnakeCaseNaming;

impl NamingStrategy for SnakeCaseNaming {}

/// Convert camelCase or PascalCase to snake_case
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

/// Simple singularization (English-centric)
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{}y", stem)
    } else if ["ses", "ches", "shes", "xes", "zes"].iter().any(|suffix| name.ends_with(suffix)) {
        name[..name.len() - 2].to_string()
    } else if name.ends_with('s') && !name.ends_with("ss") && name.len() > 1 {
        name[..name.len() - 1].to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("createdAt"), "created_at");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("Post"), "post");
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("users"), "user");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("skill"), "skill");
    }
}
