//! # Schema Descriptors
//!
//! Typed, validated names for the tables and columns a migration touches. Names are
//! checked once when a job is built; everything downstream renders them verbatim.

use crate::constants::MAX_IDENTIFIER_LENGTH;
use crate::error::{MigrationError, Result};
use crate::query_builder::{QueryBuilder, WhereClause};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A plain or schema-qualified SQL identifier (`issues`, `public.issues`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(value: &str) -> Result<Self> {
        let parts: Vec<&str> = value.split('.').collect();
        if parts.len() > 2 {
            return Err(invalid(value, "at most one schema qualifier is allowed"));
        }

        for part in &parts {
            validate_part(value, part)?;
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unqualified name, e.g. `issues` for `public.issues`
    pub fn name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// `table.column`
    pub fn qualify(&self, column: &Identifier) -> String {
        format!("{}.{}", self.0, column.0)
    }
}

fn validate_part(identifier: &str, part: &str) -> Result<()> {
    let mut chars = part.chars();
    match chars.next() {
        None => return Err(invalid(identifier, "empty name segment")),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => {
            return Err(invalid(identifier, "must start with a letter or underscore"))
        }
        Some(_) => {}
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(
            identifier,
            "only ASCII letters, digits and underscores are allowed",
        ));
    }

    if part.len() > MAX_IDENTIFIER_LENGTH {
        return Err(invalid(identifier, "longer than 63 characters"));
    }

    Ok(())
}

fn invalid(identifier: &str, reason: &str) -> MigrationError {
    MigrationError::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    }
}

impl TryFrom<String> for Identifier {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self> {
        Identifier::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(identifier: Identifier) -> Self {
        identifier.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The table being batched over, its batching column and optional row scope.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRelation {
    table: Identifier,
    column: Identifier,
    scope: Option<WhereClause>,
    distinct: bool,
}

impl BatchRelation {
    pub fn new(table: Identifier, column: Identifier) -> Self {
        Self {
            table,
            column,
            scope: None,
            distinct: false,
        }
    }

    /// Restrict batching and the operation to rows matching `scope`
    pub fn with_scope(mut self, scope: Option<WhereClause>) -> Self {
        self.scope = scope.filter(|clause| !clause.is_empty());
        self
    }

    /// Count distinct values of a non-unique batch column
    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    pub fn column(&self) -> &Identifier {
        &self.column
    }

    pub fn scope(&self) -> Option<&WhereClause> {
        self.scope.as_ref()
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn qualified_column(&self) -> String {
        self.table.qualify(&self.column)
    }

    /// `table.column BETWEEN $1 AND $2`
    pub fn window_condition(&self) -> WhereClause {
        WhereClause::raw(&format!("{} BETWEEN $1 AND $2", self.qualified_column()))
    }

    /// Key at offset `$3` among keys in `[$1, $2]`, ascending
    pub fn key_at_offset_sql(&self) -> String {
        let column = self.qualified_column();
        QueryBuilder::new(self.table.as_str())
            .select(&[format!("{column}::bigint AS batch_key").as_str()])
            .distinct(self.distinct)
            .where_clause(WhereClause::raw(&format!(
                "{column} >= $1 AND {column} <= $2"
            )))
            .where_optional(self.scope.as_ref())
            .order_asc("batch_key")
            .offset("$3")
            .limit("1")
            .build_sql()
    }

    /// All distinct keys in `[$1, $2]`, ascending
    pub fn keys_in_window_sql(&self) -> String {
        let column = self.qualified_column();
        QueryBuilder::new(self.table.as_str())
            .select(&[format!("{column}::bigint AS batch_key").as_str()])
            .distinct(true)
            .where_clause(self.window_condition())
            .where_optional(self.scope.as_ref())
            .order_asc("batch_key")
            .build_sql()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_plain_and_qualified_names() {
        assert!(Identifier::parse("issues").is_ok());
        assert!(Identifier::parse("_tmp_backfill").is_ok());
        let qualified = Identifier::parse("gitlab_partitions.events_2024").unwrap();
        assert_eq!(qualified.name(), "events_2024");
    }

    #[test]
    fn rejects_injection_and_malformed_names() {
        for bad in [
            "",
            "1issues",
            "issues; DROP TABLE users",
            "issues\"",
            "a.b.c",
            "issues.",
            "Ärger",
        ] {
            assert!(
                matches!(
                    Identifier::parse(bad),
                    Err(MigrationError::InvalidIdentifier { .. })
                ),
                "{bad} should be rejected"
            );
        }

        let long = "a".repeat(64);
        assert!(Identifier::parse(&long).is_err());
    }

    #[test]
    fn deserializes_through_validation() {
        let ok: Identifier = serde_json::from_value(json!("projects")).unwrap();
        assert_eq!(ok.as_str(), "projects");

        let bad: std::result::Result<Identifier, _> = serde_json::from_value(json!("x y"));
        assert!(bad.is_err());
    }

    #[test]
    fn renders_key_queries() {
        let relation = BatchRelation::new(
            Identifier::parse("issues").unwrap(),
            Identifier::parse("id").unwrap(),
        )
        .with_scope(Some(WhereClause::eq("issues.state_id", json!(1))));

        assert_eq!(
            relation.key_at_offset_sql(),
            "SELECT issues.id::bigint AS batch_key FROM issues \
             WHERE (issues.id >= $1 AND issues.id <= $2) AND issues.state_id = 1 \
             ORDER BY batch_key ASC OFFSET $3 LIMIT 1"
        );
        assert_eq!(
            relation.keys_in_window_sql(),
            "SELECT DISTINCT issues.id::bigint AS batch_key FROM issues \
             WHERE (issues.id BETWEEN $1 AND $2) AND issues.state_id = 1 \
             ORDER BY batch_key ASC"
        );
    }

    #[test]
    fn distinct_relation_selects_distinct_keys() {
        let relation = BatchRelation::new(
            Identifier::parse("merge_requests").unwrap(),
            Identifier::parse("target_project_id").unwrap(),
        )
        .with_distinct(true);

        assert!(relation
            .key_at_offset_sql()
            .starts_with("SELECT DISTINCT merge_requests.target_project_id::bigint"));
    }

    #[test]
    fn empty_scope_is_dropped() {
        let relation = BatchRelation::new(
            Identifier::parse("issues").unwrap(),
            Identifier::parse("id").unwrap(),
        )
        .with_scope(Some(WhereClause::and(vec![])));
        assert!(relation.scope().is_none());
    }
}
