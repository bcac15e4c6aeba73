//! SELECT list, FROM, JOIN and result window clauses

use super::builder::QueryBuilder;
use super::types::*;

fn split_list(list: &str) -> impl Iterator<Item = String> + '_ {
    list.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_string)
}

impl QueryBuilder {
    /// Comma separated expressions for the SELECT list
    pub fn select(mut self, fields: &str) -> Self {
        self.select_fields.extend(split_list(fields).map(SelectField::Expression));
        self
    }

    /// One expression, commas and all
    pub fn select_raw(mut self, expression: &str) -> Self {
        self.push_select(SelectField::Expression(expression.to_string()));
        self
    }

    pub fn select_subquery(mut self, subquery: QueryBuilder, alias: &str) -> Self {
        self.push_select(SelectField::Subquery {
            query: Box::new(subquery),
            alias: alias.to_string(),
        });
        self
    }

    pub fn from(mut self, table: &str) -> Self {
        self.set_table(TableRef::new(table));
        self
    }

    pub fn from_as(mut self, table: &str, alias: &str) -> Self {
        self.set_table(TableRef::aliased(table, alias));
        self
    }

    /// `<join_type> table ON left = right`
    pub fn join_on(
        mut self,
        join_type: JoinType,
        table: TableRef,
        left: &str,
        right: &str,
    ) -> Self {

        self.push_join(JoinClause {
            join_type,
            table,
            on_conditions: vec![(left.to_string(), right.to_string())],
        });
        self
    }

    pub fn join(self, table: &str, left: &str, right: &str) -> Self {
        self.join_on(JoinType::Inner, TableRef::new(table), left, right)
    }

    pub fn left_join(self, table: &str, left: &str, right: &str) -> Self {
        self.join_on(JoinType::Left, TableRef::new(table), left, right)
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), OrderDirection::Asc));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), OrderDirection::Desc));
        self
    }

    pub fn group_by(mut self, columns: &str) -> Self {
        self.group_by.extend(split_list(columns));
        self
    }

    pub fn limit(mut self, count: i64) -> Self {
        self.set_limit(Some(count));
        self
    }

    pub fn offset(mut self, count: i64) -> Self {
        self.offset_value = Some(count);
        self
    }

    /// LIMIT/OFFSET for `page`; pages below 1 clamp to the first
    pub fn paginate(self, per_page: i64, page: i64) -> Self {
        let skip = (page.max(1) - 1) * per_page;
        self.limit(per_page).offset(skip)
    }

    /// Comma separated columns handed back by INSERT and UPDATE
    pub fn returning(mut self, columns: &str) -> Self {
        self.returning.extend(split_list(columns));
        self
    }
}
