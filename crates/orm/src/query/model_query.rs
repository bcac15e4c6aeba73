//! Model queries
//!
//! `ModelQueryBuilder` is a statement over one schema's table that returns
//! records. It carries the schema's global scopes, a preloader and the
//! alias generator shared with every existence subquery compiled into it.

use std::sync::Arc;

use serde_json::Value;

use super::alias::AliasGenerator;
use super::builder::QueryBuilder;
use super::types::SelectField;
use super::where_clause::QueryFilters;
use crate::backends::{fetch_json_rows, QueryClient};
use crate::error::{ModelError, ModelResult};
use crate::model::{Record, Schema};
use crate::relationships::query::group_user_predicates;
use crate::relationships::{GlobalScopes, Preloader, RelationQueries};

#[derive(Clone)]
pub struct ModelQueryBuilder {
    schema: Arc<Schema>,
    client: Arc<dyn QueryClient>,
    statement: QueryBuilder,
    preloader: Preloader,
    scopes: GlobalScopes,
    aliases: AliasGenerator,
    sideload: Option<Arc<Value>>,
}

impl ModelQueryBuilder {
    pub fn new(schema: Arc<Schema>, client: Arc<dyn QueryClient>) -> Self {
        let statement = client.query().from(schema.table());
        let aliases = AliasGenerator::new(&client.config().self_join_alias_prefix);
        Self {
            scopes: schema.global_scopes().clone(),
            schema,
            client,
            statement,
            preloader: Preloader::new(),
            aliases,
            sideload: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn statement(&self) -> &QueryBuilder {
        &self.statement
    }

    pub fn preloader(&self) -> &Preloader {
        &self.preloader
    }

    /// Refine the underlying statement
    pub fn map_statement<F>(mut self, refine: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.statement = refine(std::mem::take(&mut self.statement));
        self
    }

    pub fn select(self, fields: &str) -> Self {
        self.map_statement(|s| s.select(fields))
    }

    pub fn order_by(self, column: &str) -> Self {
        self.map_statement(|s| s.order_by(column))
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.map_statement(|s| s.order_by_desc(column))
    }

    pub fn limit(self, count: i64) -> Self {
        self.map_statement(|s| s.limit(count))
    }

    pub fn offset(self, count: i64) -> Self {
        self.map_statement(|s| s.offset(count))
    }

    /// LIMIT/OFFSET for `page`, counting from 1
    pub fn paginate(self, per_page: i64, page: i64) -> Self {
        self.map_statement(|s| s.paginate(per_page, page))
    }

    /// Apply a named scope registered on the schema
    pub fn apply_scope(mut self, name: &str) -> ModelResult<Self> {
        let scope = self.schema.scope(name).cloned().ok_or_else(|| {
            ModelError::Configuration(format!(
                "scope '{}' is not defined on {}",
                name,
                self.schema.name()
            ))
        })?;
        let statement = std::mem::take(&mut self.statement);
        self.statement = scope(statement, self.schema.table());
        Ok(self)
    }

    pub fn without_global_scope(mut self, name: &str) -> Self {
        self.scopes.remove(name);
        self
    }

    pub fn without_global_scopes(mut self) -> Self {
        self.scopes.clear();
        self
    }

    /// Auxiliary value handed to every record this query creates, and to their preloads
    pub fn sideload(mut self, value: Value) -> Self {
        self.sideload = Some(Arc::new(value));
        self
    }

    /// Statement with caller predicates grouped and global scopes applied
    fn materialize(&self) -> QueryBuilder {
        let mut statement = self.statement.clone();
        if !self.scopes.is_empty() {
            group_user_predicates(&mut statement);
        }
        self.scopes.apply(statement, self.schema.table())
    }

    pub fn to_sql(&self) -> String {
        self.materialize().to_sql()
    }

    pub fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        self.materialize().to_sql_with_params(self.client.dialect())
    }

    pub fn into_statement(self) -> QueryBuilder {
        self.materialize()
    }

    fn origin(&self) -> String {
        format!("select {}", self.schema.name())
    }

    /// Run the query, then process registered preloads over the results
    pub async fn exec(self) -> ModelResult<Vec<Record>> {
        let (sql, params) = self.to_sql_with_params();
        let rows = fetch_json_rows(self.client.as_ref(), &self.origin(), &sql, &params).await?;
        let mut records: Vec<Record> = rows
            .into_iter()
            .map(|row| Record::from_row(self.schema.clone(), row, self.sideload.clone()))
            .collect();
        self.preloader.process_all_for_many(&mut records, &self.client).await?;
        Ok(records)
    }

    pub async fn first(mut self) -> ModelResult<Option<Record>> {
        self.statement.set_limit(Some(1));
        Ok(self.exec().await?.into_iter().next())
    }

    pub async fn first_or_fail(self) -> ModelResult<Record> {
        let name = self.schema.name().to_string();
        self.first()
            .await?
            .ok_or_else(|| ModelError::RowNotFound(format!("no {} matched the query", name)))
    }

    /// Record with primary key `id`
    pub async fn find<T: Into<Value>>(self, id: T) -> ModelResult<Option<Record>> {
        let column = format!("{}.{}", self.schema.table(), self.schema.primary_key_column());
        self.where_eq(&column, id).first().await
    }

    /// Number of matching rows
    pub async fn count(self) -> ModelResult<i64> {
        let mut statement = self.materialize();
        statement.clear_select();
        statement.push_select(SelectField::Expression("COUNT(*) AS aggregate".to_string()));
        statement.set_limit(None);
        let (sql, params) = statement.to_sql_with_params(self.client.dialect());
        let rows = fetch_json_rows(self.client.as_ref(), &self.origin(), &sql, &params).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("aggregate"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}

impl QueryFilters for ModelQueryBuilder {
    fn statement_mut(&mut self) -> &mut QueryBuilder {
        &mut self.statement
    }
}

impl RelationQueries for ModelQueryBuilder {
    fn relation_source(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn outer_reference(&self) -> (String, String) {
        (self.schema.table().to_string(), self.schema.table().to_string())
    }

    fn query_client(&self) -> &Arc<dyn QueryClient> {
        &self.client
    }

    fn alias_generator(&self) -> &AliasGenerator {
        &self.aliases
    }

    fn ensure_base_selection(&mut self) {
        if !self.statement.has_select() {
            let all = format!("{}.*", self.schema.table());
            self.statement.push_select(SelectField::Expression(all));
        }
    }

    fn preloads_mut(&mut self) -> &mut Preloader {
        &mut self.preloader
    }
}

impl std::fmt::Debug for ModelQueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelQueryBuilder")
            .field("model", &self.schema.name())
            .field("preloads", &self.preloader)
            .field("scopes", &self.scopes)
            .field("statement", &self.to_sql())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteClient;
    use crate::config::OrmConfig;
    use crate::model::SchemaBuilder;
    use crate::relationships::RelationOptions;
    use once_cell::sync::Lazy;

    static USER: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("User", "users")
            .columns(&["id", "name", "active"])
            .has_many("posts", || POST.clone(), RelationOptions::new())
            .scope("active", |q, table| q.where_eq(&format!("{}.active", table), true))
            .build()
    });

    static POST: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Post", "posts")
            .columns(&["id", "user_id", "title", "deleted_at"])
            .global_scope("not_deleted", |q, table| q.where_null(&format!("{}.deleted_at", table)))
            .build()
    });

    static CATEGORY: Lazy<Arc<Schema>> = Lazy::new(|| {
        SchemaBuilder::new("Category", "categories")
            .columns(&["id", "parent_id"])
            .has_many(
                "children",
                || CATEGORY.clone(),
                RelationOptions::new().foreign_key("parent_id"),
            )
            .build()
    });

    async fn client() -> Arc<dyn QueryClient> {
        Arc::new(SqliteClient::in_memory(OrmConfig::default()).await.unwrap())
    }

    #[tokio::test]
    async fn test_has_compiles_to_exists() {
        let query = USER.query(client().await).has("posts").unwrap();
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM users WHERE EXISTS (SELECT * FROM posts WHERE posts.user_id = users.id \
             AND posts.deleted_at IS NULL)"
        );
    }

    #[tokio::test]
    async fn test_count_comparison_uses_scalar_subquery() {
        let query = USER.query(client().await).has_count("posts", ">", 2).unwrap();
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM users WHERE (SELECT COUNT(*) FROM posts WHERE posts.user_id = users.id \
             AND posts.deleted_at IS NULL) > 2"
        );

        let query = USER.query(client().await).doesnt_have("posts").unwrap();
        assert!(query
            .to_sql()
            .starts_with("SELECT * FROM users WHERE NOT EXISTS (SELECT * FROM posts"));
    }

    #[tokio::test]
    async fn test_self_referencing_existence_gets_distinct_aliases() {
        let query = CATEGORY.query(client().await).has("children.children").unwrap();
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM categories WHERE EXISTS (SELECT * FROM categories AS self_join_0 \
             WHERE EXISTS (SELECT * FROM categories AS self_join_1 \
             WHERE self_join_1.parent_id = self_join_0.id) \
             AND self_join_0.parent_id = categories.id)"
        );
    }

    #[tokio::test]
    async fn test_global_scope_binds_to_grouped_predicates() {
        let query = POST
            .query(client().await)
            .where_eq("posts.user_id", 1)
            .or_where_eq("posts.user_id", 2);
        assert_eq!(
            query.to_sql(),
            "SELECT * FROM posts WHERE (posts.user_id = 1 OR posts.user_id = 2) \
             AND posts.deleted_at IS NULL"

        );
        assert_eq!(
            query.without_global_scope("not_deleted").to_sql(),
            "SELECT * FROM posts WHERE posts.user_id = 1 OR posts.user_id = 2"
        );
    }

    #[tokio::test]
    async fn test_named_scopes() {
        let query = USER.query(client().await).apply_scope("active").unwrap();
        assert_eq!(query.to_sql(), "SELECT * FROM users WHERE users.active = true");
        assert!(matches!(
            USER.query(client().await).apply_scope("banned"),
            Err(ModelError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_with_count_selects_base_columns() {
        let query = USER.query(client().await).with_count("posts").unwrap();
        assert_eq!(
            query.to_sql(),
            "SELECT users.*, (SELECT COUNT(*) FROM posts WHERE posts.user_id = users.id \
             AND posts.deleted_at IS NULL) AS posts_count FROM users"
        );
    }

    #[tokio::test]
    async fn test_unknown_relation_fails_before_sql() {
        let err = USER.query(client().await).has("comments").unwrap_err();
        assert!(matches!(err, ModelError::UndefinedRelationship { .. }));
        let err = USER.query(client().await).preload("posts.author").unwrap_err();
        assert!(matches!(err, ModelError::UndefinedRelationship { .. }));
    }
}
