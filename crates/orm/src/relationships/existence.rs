//! Relationship existence predicates, relation counts and preload registration
//!
//! Shared by model queries and relation queries so the same chain reads the
//! same at every level: `has("posts.comments")` on a model query compiles to
//! nested correlated subqueries, each level aliased through one generator.

use std::sync::Arc;

use super::preloader::{PreloadRefine, Preloader};
use super::query::{RelationQueryBuilder, Selection};
use crate::backends::QueryClient;
use crate::error::ModelResult;
use crate::model::Schema;
use crate::query::{
    AliasGenerator, Connector, QueryFilters, QueryOperator, SelectField, WhereClause,
};

/// Relationship-aware predicates over a query whose rows belong to one schema
pub trait RelationQueries: QueryFilters {
    /// Schema whose relations are looked up
    fn relation_source(&self) -> &Arc<Schema>;

    /// Physical table of the outer rows and the name qualifying their columns
    fn outer_reference(&self) -> (String, String);

    fn query_client(&self) -> &Arc<dyn QueryClient>;

    fn alias_generator(&self) -> &AliasGenerator;

    /// Select the outer rows explicitly so extra selections can be appended
    fn ensure_base_selection(&mut self);

    fn preloads_mut(&mut self) -> &mut Preloader;

    /// Rows with at least one related record
    fn has(self, relation: &str) -> ModelResult<Self> {
        self.has_count(relation, ">=", 1)
    }

    /// Rows whose related record count compares to `count`
    fn has_count(self, relation: &str, operator: &str, count: i64) -> ModelResult<Self> {
        self.where_has_count(relation, Ok, operator, count)
    }

    fn or_has(self, relation: &str) -> ModelResult<Self> {
        self.push_existence(Connector::Or, relation, Ok, QueryOperator::GreaterThanOrEqual, 1)
    }

    /// Rows without related records
    fn doesnt_have(self, relation: &str) -> ModelResult<Self> {
        self.has_count(relation, "<", 1)
    }

    /// Rows with at least one related record matching `refine`
    fn where_has<F>(self, relation: &str, refine: F) -> ModelResult<Self>
    where
        F: FnOnce(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder>,
    {
        self.where_has_count(relation, refine, ">=", 1)
    }

    fn or_where_has<F>(self, relation: &str, refine: F) -> ModelResult<Self>
    where
        F: FnOnce(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder>,
    {
        self.push_existence(Connector::Or, relation, refine, QueryOperator::GreaterThanOrEqual, 1)
    }

    fn where_has_count<F>(
        self,
        relation: &str,
        refine: F,
        operator: &str,
        count: i64,
    ) -> ModelResult<Self>
    where
        F: FnOnce(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder>,
    {
        let operator = QueryOperator::parse(operator)?;
        self.push_existence(Connector::And, relation, refine, operator, count)
    }

    /// Rows without related records matching `refine`
    fn where_doesnt_have<F>(self, relation: &str, refine: F) -> ModelResult<Self>
    where
        F: FnOnce(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder>,
    {
        self.where_has_count(relation, refine, "<", 1)
    }

    /// Add the existence predicate for a possibly dotted relation path.
    /// `refine` applies to the innermost relation.
    fn push_existence<F>(
        self,
        connector: Connector,
        path: &str,
        refine: F,
        operator: QueryOperator,
        count: i64,
    ) -> ModelResult<Self>
    where
        F: FnOnce(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder>,
    {
        let (outer_table, outer_ref) = self.outer_reference();
        let clause = existence_clause(
            self.relation_source(),
            &outer_table,
            &outer_ref,
            self.query_client(),
            self.alias_generator(),
            path,
            refine,
            operator,
            count,
        )?;
        Ok(self.push_where(connector, clause))
    }

    /// Select the related record count as `<relation>_count`
    fn with_count(self, relation: &str) -> ModelResult<Self> {
        self.with_count_as(relation, None, Ok)
    }

    fn with_count_where<F>(self, relation: &str, refine: F) -> ModelResult<Self>
    where
        F: FnOnce(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder>,
    {
        self.with_count_as(relation, None, refine)
    }

    /// Select a correlated count of related records under `alias`
    fn with_count_as<F>(
        mut self,
        relation: &str,
        alias: Option<&str>,
        refine: F,
    ) -> ModelResult<Self>
    where
        F: FnOnce(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder>,
    {
        let definition = self.relation_source().relation(relation)?;
        let (outer_table, outer_ref) = self.outer_reference();
        let query = definition.relation_existence_count_query(
            &outer_table,
            &outer_ref,
            self.query_client().clone(),
            self.alias_generator().clone(),
        )?;
        let subquery = refine(query)?.into_existence_statement(Selection::Count)?;
        let alias = alias
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_count", relation));

        self.ensure_base_selection();
        self.statement_mut().push_select(SelectField::Subquery {
            query: Box::new(subquery),
            alias,
        });
        Ok(self)
    }

    /// Eager load a relation, or a dotted path of relations, with the results
    fn preload(self, path: &str) -> ModelResult<Self> {
        self.preload_refined(path, None)
    }

    /// Eager load with a refinement applied to the innermost relation query
    fn preload_with<F>(self, path: &str, refine: F) -> ModelResult<Self>
    where
        F: Fn(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder> + Send + Sync + 'static,
    {
        self.preload_refined(path, Some(Arc::new(refine)))
    }

    fn preload_refined(mut self, path: &str, refine: Option<PreloadRefine>) -> ModelResult<Self> {
        let schema = self.relation_source().clone();
        self.preloads_mut().preload(&schema, path, refine)?;
        Ok(self)
    }
}

/// Counts of one compared with `>=` or `<` reduce to `[NOT] EXISTS`
fn is_existence_check(operator: QueryOperator, count: i64) -> bool {
    count == 1 && matches!(operator, QueryOperator::GreaterThanOrEqual | QueryOperator::LessThan)
}

#[allow(clippy::too_many_arguments)]
fn existence_clause<F>(
    schema: &Arc<Schema>,
    outer_table: &str,
    outer_ref: &str,
    client: &Arc<dyn QueryClient>,
    aliases: &AliasGenerator,
    path: &str,
    refine: F,
    operator: QueryOperator,
    count: i64,
) -> ModelResult<WhereClause>
where
    F: FnOnce(RelationQueryBuilder) -> ModelResult<RelationQueryBuilder>,
{
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let relation = schema.relation(head)?;

    if let Some(rest) = rest {
        // Outer hops only test existence; the comparison belongs to the innermost relation.
        let negated = operator == QueryOperator::LessThan && count == 1;
        let (inner_operator, inner_count) = if negated {
            (QueryOperator::GreaterThanOrEqual, 1)
        } else {
            (operator, count)
        };
        let query = relation.relation_existence_query(
            outer_table,
            outer_ref,
            client.clone(),
            aliases.clone(),
        )?;
        let query =
            query.push_existence(Connector::And, rest, refine, inner_operator, inner_count)?;
        return Ok(WhereClause::Exists {
            query: Box::new(query.into_existence_statement(Selection::Exists)?),
            negated,
        });
    }

    if is_existence_check(operator, count) {
        let query = relation.relation_existence_query(
            outer_table,
            outer_ref,
            client.clone(),
            aliases.clone(),
        )?;
        return Ok(WhereClause::Exists {
            query: Box::new(refine(query)?.into_existence_statement(Selection::Exists)?),
            negated: operator == QueryOperator::LessThan,
        });
    }

    let query = relation.relation_existence_count_query(
        outer_table,
        outer_ref,
        client.clone(),
        aliases.clone(),
    )?;
    Ok(WhereClause::Subquery {
        query: Box::new(refine(query)?.into_existence_statement(Selection::Count)?),
        operator,
        value: count.into(),
    })
}

impl RelationQueries for RelationQueryBuilder {
    fn relation_source(&self) -> &Arc<Schema> {
        self.related_schema()
    }

    fn outer_reference(&self) -> (String, String) {
        (self.related_schema().table().to_string(), self.related_ref().to_string())
    }

    fn query_client(&self) -> &Arc<dyn QueryClient> {
        self.client()
    }

    fn alias_generator(&self) -> &AliasGenerator {
        self.aliases()
    }

    fn ensure_base_selection(&mut self) {
        self.select_default_columns();
    }

    fn preloads_mut(&mut self) -> &mut Preloader {
        self.preloader_mut()
    }
}
