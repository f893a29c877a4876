use super::{Join, WhereClause};

/// SELECT builder used for key discovery and candidate-key lookups.
///
/// LIMIT and OFFSET take SQL fragments so they can be bound placeholders (`$3`)
/// as well as literals.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    base_table: String,
    select_fields: Vec<String>,
    distinct: bool,
    joins: Vec<Join>,
    where_clauses: Vec<WhereClause>,
    order_by: Vec<String>,
    limit: Option<String>,
    offset: Option<String>,
}

impl QueryBuilder {
    /// Create a new query builder for the given table
    pub fn new(table: &str) -> Self {
        Self {
            base_table: table.to_string(),
            select_fields: vec!["*".to_string()],
            distinct: false,
            joins: Vec::new(),
            where_clauses: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Set specific fields to select
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// SELECT DISTINCT
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// Add a JOIN clause
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a WHERE clause
    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    /// Add an optional WHERE clause
    pub fn where_optional(self, clause: Option<&WhereClause>) -> Self {
        match clause {
            Some(clause) => self.where_clause(clause.clone()),
            None => self,
        }
    }

    /// Add ORDER BY ASC
    pub fn order_asc(mut self, field: &str) -> Self {
        self.order_by.push(format!("{field} ASC"));
        self
    }

    /// Add LIMIT clause
    pub fn limit(mut self, limit: &str) -> Self {
        self.limit = Some(limit.to_string());
        self
    }

    /// Add OFFSET clause
    pub fn offset(mut self, offset: &str) -> Self {
        self.offset = Some(offset.to_string());
        self
    }

    /// Build the complete SQL query string
    pub fn build_sql(&self) -> String {
        let mut sql = String::from("SELECT ");

        if self.distinct {
            sql.push_str("DISTINCT ");
        }

        sql.push_str(&self.select_fields.join(", "));

        sql.push_str(&format!(" FROM {}", self.base_table));

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }

        sql.push_str(&render_where(&self.where_clauses));

        if !self.order_by.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.order_by.join(", ")));
        }

        if let Some(ref offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        if let Some(ref limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        sql
    }
}

/// Render ` WHERE a AND b`, or nothing when there are no clauses
pub(crate) fn render_where(clauses: &[WhereClause]) -> String {
    let parts: Vec<String> = clauses
        .iter()
        .filter(|clause| !clause.is_empty())
        .map(|clause| clause.to_sql())
        .collect();

    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}
