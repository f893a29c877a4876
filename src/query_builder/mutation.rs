//! UPDATE / DELETE / INSERT ... SELECT builders.
//!
//! Joined sources of an UPDATE or DELETE are rendered as PostgreSQL `FROM` / `USING`
//! lists with their join conditions folded into the WHERE clause, so only inner joins
//! are accepted there.

use super::builder::render_where;
use super::{Join, QueryBuilder, WhereClause};

#[derive(Debug, Clone)]
pub struct UpdateStatement {
    table: String,
    assignments: Vec<(String, String)>,
    from: Vec<Join>,
    where_clauses: Vec<WhereClause>,
}

impl UpdateStatement {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            assignments: Vec::new(),
            from: Vec::new(),
            where_clauses: Vec::new(),
        }
    }

    /// `column = expression`; the expression is emitted verbatim
    pub fn set(mut self, column: &str, expression: &str) -> Self {
        self.assignments
            .push((column.to_string(), expression.to_string()));
        self
    }

    pub fn from(mut self, join: Join) -> Self {
        self.from.push(join);
        self
    }

    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    pub fn build_sql(&self) -> String {
        let assignments: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, expression)| format!("{column} = {expression}"))
            .collect();

        let mut sql = format!("UPDATE {} SET {}", self.table, assignments.join(", "));

        if !self.from.is_empty() {
            let sources: Vec<&str> = self.from.iter().map(|j| j.table.as_str()).collect();
            sql.push_str(&format!(" FROM {}", sources.join(", ")));
        }

        sql.push_str(&render_where(&with_join_conditions(
            &self.from,
            &self.where_clauses,
        )));
        sql
    }
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    table: String,
    using: Vec<Join>,
    where_clauses: Vec<WhereClause>,
}

impl DeleteStatement {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            using: Vec::new(),
            where_clauses: Vec::new(),
        }
    }

    pub fn using(mut self, join: Join) -> Self {
        self.using.push(join);
        self
    }

    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    pub fn build_sql(&self) -> String {
        let mut sql = format!("DELETE FROM {}", self.table);

        if !self.using.is_empty() {
            let sources: Vec<&str> = self.using.iter().map(|j| j.table.as_str()).collect();
            sql.push_str(&format!(" USING {}", sources.join(", ")));
        }

        sql.push_str(&render_where(&with_join_conditions(
            &self.using,
            &self.where_clauses,
        )));
        sql
    }
}

#[derive(Debug, Clone)]
pub enum ConflictAction {
    /// Plain INSERT
    None,
    /// `ON CONFLICT DO NOTHING`
    DoNothing,
    /// `ON CONFLICT (columns) DO NOTHING`
    DoNothingOn(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct InsertSelectStatement {
    target_table: String,
    columns: Vec<String>,
    select: QueryBuilder,
    conflict: ConflictAction,
}

impl InsertSelectStatement {
    pub fn new(target_table: &str, columns: &[&str], select: QueryBuilder) -> Self {
        Self {
            target_table: target_table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            select,
            conflict: ConflictAction::None,
        }
    }

    pub fn on_conflict(mut self, conflict: ConflictAction) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn build_sql(&self) -> String {
        let mut sql = format!(
            "INSERT INTO {} ({}) {}",
            self.target_table,
            self.columns.join(", "),
            self.select.build_sql()
        );

        match &self.conflict {
            ConflictAction::None => {}
            ConflictAction::DoNothing => sql.push_str(" ON CONFLICT DO NOTHING"),
            ConflictAction::DoNothingOn(columns) => {
                sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", columns.join(", ")))
            }
        }

        sql
    }
}

fn with_join_conditions(joins: &[Join], clauses: &[WhereClause]) -> Vec<WhereClause> {
    joins
        .iter()
        .map(|join| WhereClause::raw(&join.on_condition))
        .chain(clauses.iter().cloned())
        .collect()
}
