//! Query Builder SQL generation
//!
//! One renderer serves both output forms: placeholders plus a parameter
//! list for execution, or inline literals for logging and tests. Nested
//! subqueries share the parent's writer so placeholder numbering stays
//! continuous.

use serde_json::Value;

use super::builder::QueryBuilder;
use super::types::*;
use crate::backends::SqlDialect;

#[derive(Clone, Copy)]
enum RenderMode {
    Inline,
    Bound(SqlDialect),
}

struct SqlWriter {
    sql: String,
    params: Vec<Value>,
    mode: RenderMode,
}

impl SqlWriter {
    fn new(mode: RenderMode) -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            mode,
        }
    }

    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn value(&mut self, value: &Value) {
        match self.mode {
            RenderMode::Inline => {
                let literal = format_value(value);
                self.sql.push_str(&literal);
            }
            RenderMode::Bound(dialect) => {
                let placeholder = dialect.parameter_placeholder(self.params.len());
                self.sql.push_str(&placeholder);
                self.params.push(value.clone());
            }
        }
    }

    fn values(&mut self, values: &[Value]) {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.value(value);
        }
    }
}

impl QueryBuilder {
    /// Generate SQL with dialect placeholders and return the parameters in order
    pub fn to_sql_with_params(&self, dialect: SqlDialect) -> (String, Vec<Value>) {
        let mut writer = SqlWriter::new(RenderMode::Bound(dialect));
        self.write(&mut writer);
        (writer.sql, writer.params)
    }

    /// Generate SQL with values rendered as literals
    pub fn to_sql(&self) -> String {
        let mut writer = SqlWriter::new(RenderMode::Inline);
        self.write(&mut writer);
        writer.sql
    }

    fn write(&self, w: &mut SqlWriter) {
        match self.query_type {
            QueryType::Select => self.write_select(w),
            QueryType::Insert => self.write_insert(w),
            QueryType::Update => self.write_update(w),
            QueryType::Delete => self.write_delete(w),
        }
    }

    fn write_select(&self, w: &mut SqlWriter) {
        w.push("SELECT ");

        if self.select_fields.is_empty() {
            w.push("*");
        } else {
            for (i, field) in self.select_fields.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                match field {
                    SelectField::Expression(expression) => w.push(expression),
                    SelectField::Subquery { query, alias } => {
                        w.push("(");
                        query.write(w);
                        w.push(") AS ");
                        w.push(alias);
                    }
                }
            }
        }

        if let Some(table) = &self.table {
            w.push(" FROM ");
            w.push(&table.to_string());
        }

        for join in &self.joins {
            w.push(&format!(" {} {}", join.join_type, join.table));
            if !join.on_conditions.is_empty() {
                let conditions: Vec<String> = join
                    .on_conditions
                    .iter()
                    .map(|(left, right)| format!("{} = {}", left, right))
                    .collect();
                w.push(" ON ");
                w.push(&conditions.join(" AND "));
            }
        }

        self.write_where(w);

        if !self.group_by.is_empty() {
            w.push(" GROUP BY ");
            w.push(&self.group_by.join(", "));
        }

        if !self.order_by.is_empty() {
            let order_clauses: Vec<String> = self
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", column, direction))
                .collect();
            w.push(" ORDER BY ");
            w.push(&order_clauses.join(", "));
        }

        if let Some(limit) = self.limit_count {
            w.push(&format!(" LIMIT {}", limit));
        }

        if let Some(offset) = self.offset_value {
            w.push(&format!(" OFFSET {}", offset));
        }
    }

    fn write_insert(&self, w: &mut SqlWriter) {
        let Some(table) = &self.table else { return };
        w.push(&format!("INSERT INTO {}", table.name));

        if self.set_clauses.is_empty() {
            w.push(" DEFAULT VALUES");
        } else {
            let columns: Vec<&str> =
                self.set_clauses.iter().map(|clause| clause.column.as_str()).collect();
            w.push(&format!(" ({}) VALUES (", columns.join(", ")));
            for (i, clause) in self.set_clauses.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.value(&clause.value);
            }
            w.push(")");
        }

        self.write_returning(w);
    }

    fn write_update(&self, w: &mut SqlWriter) {
        let Some(table) = &self.table else { return };
        w.push(&format!("UPDATE {} SET ", table.name));
        for (i, clause) in self.set_clauses.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(&format!("{} = ", clause.column));
            w.value(&clause.value);
        }
        self.write_where(w);
        self.write_returning(w);
    }

    fn write_delete(&self, w: &mut SqlWriter) {
        let Some(table) = &self.table else { return };
        w.push(&format!("DELETE FROM {}", table.name));
        self.write_where(w);
    }

    fn write_returning(&self, w: &mut SqlWriter) {
        if !self.returning.is_empty() {
            w.push(&format!(" RETURNING {}", self.returning.join(", ")));
        }
    }

    fn write_where(&self, w: &mut SqlWriter) {
        if !self.where_clauses.is_empty() {
            w.push(" WHERE ");
            write_predicates(&self.where_clauses, w);
        }
    }
}

fn write_predicates(predicates: &[Predicate], w: &mut SqlWriter) {
    for (i, predicate) in predicates.iter().enumerate() {
        if i > 0 {
            w.push(&format!(" {} ", predicate.connector));
        }
        write_clause(&predicate.clause, w);
    }
}

fn write_clause(clause: &WhereClause, w: &mut SqlWriter) {
    match clause {
        WhereClause::Basic { column, operator, value } => match (operator, value) {
            (QueryOperator::Equal, Value::Null) => w.push(&format!("{} IS NULL", column)),
            (QueryOperator::NotEqual, Value::Null) => w.push(&format!("{} IS NOT NULL", column)),
            _ => {
                w.push(&format!("{} {} ", column, operator));
                w.value(value);
            }
        },
        WhereClause::In { column, values, negated } => {
            if values.is_empty() {
                w.push(if *negated { "1 = 1" } else { "1 = 0" });
            } else {
                w.push(&format!("{} {} (", column, if *negated { "NOT IN" } else { "IN" }));
                w.values(values);
                w.push(")");
            }
        }
        WhereClause::Null { column, negated } => {
            w.push(&format!("{} {}", column, if *negated { "IS NOT NULL" } else { "IS NULL" }));
        }
        WhereClause::Column { left, operator, right } => {
            w.push(&format!("{} {} {}", left, operator, right));
        }
        WhereClause::Raw { sql, bindings } => {
            let mut pending = bindings.iter();
            for ch in sql.chars() {
                match ch {
                    '?' => match pending.next() {
                        Some(value) => w.value(value),
                        None => w.sql.push('?'),
                    },
                    other => w.sql.push(other),
                }
            }
        }
        WhereClause::Exists { query, negated } => {
            w.push(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
            query.write(w);
            w.push(")");
        }
        WhereClause::Subquery { query, operator, value } => {
            w.push("(");
            query.write(w);
            w.push(&format!(") {} ", operator));
            w.value(value);
        }
        WhereClause::Group(predicates) => {
            if predicates.is_empty() {
                w.push("1 = 1");
            } else {
                w.push("(");
                write_predicates(predicates, w);
                w.push(")");
            }
        }
    }
}

/// Format a value as an SQL literal
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")), // Escape single quotes
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}
