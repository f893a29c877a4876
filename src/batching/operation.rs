//! # Migration Operations
//!
//! The data correction a migration applies to each sub-batch, described as data and
//! compiled to SQL once per job. Every kind carries a guard that turns a re-run over
//! already migrated rows into a no-op:
//!
//! - [`UpdateOperation`] requires a precondition such as `target IS NULL`
//! - [`DeleteOperation`] requires the predicate selecting the rows to remove
//! - [`InsertMissingOperation`] requires a `NOT EXISTS` guard or `ON CONFLICT DO NOTHING`
//! - [`SqlOperation`] is a hand-written statement; its author owns the guard
//!
//! Compiled statements bind the window bounds as `$1` and `$2`.

use crate::constants::operation_names;
use crate::error::{MigrationError, Result};
use crate::query_builder::{
    ConflictAction, DeleteStatement, InsertSelectStatement, Join, QueryBuilder, UpdateStatement,
    WhereClause,
};
use crate::schema::{BatchRelation, Identifier};

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOperation {
    Update(UpdateOperation),
    Delete(DeleteOperation),
    InsertMissing(InsertMissingOperation),
    Sql(SqlOperation),
}

impl MigrationOperation {
    /// Default metrics label for this kind of operation
    pub fn default_name(&self) -> &'static str {
        match self {
            MigrationOperation::Update(_) => operation_names::UPDATE_ALL,
            MigrationOperation::Delete(_) => operation_names::DELETE_ALL,
            MigrationOperation::InsertMissing(_) => operation_names::INSERT_MISSING,
            MigrationOperation::Sql(_) => operation_names::EXECUTE_SQL,
        }
    }

    /// Validate against the batch relation and render the SQL
    pub fn compile(
        &self,
        migration: &str,
        operation_name: Option<&str>,
        relation: &BatchRelation,
    ) -> Result<CompiledOperation> {
        let sql = match self {
            MigrationOperation::Update(update) => update.build_sql(relation)?,
            MigrationOperation::Delete(delete) => delete.build_sql(relation)?,
            MigrationOperation::InsertMissing(insert) => insert.build_sql(relation)?,
            MigrationOperation::Sql(raw) => raw.build_sql()?,
        };

        Ok(CompiledOperation {
            migration: migration.to_string(),
            operation_name: operation_name.unwrap_or(self.default_name()).to_string(),
            sql,
            keys_sql: relation.keys_in_window_sql(),
        })
    }
}

/// UPDATE of the batch table, optionally from inner-joined sources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOperation {
    assignments: Vec<(String, String)>,
    from: Vec<Join>,
    precondition: Option<WhereClause>,
}

impl UpdateOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = expression`; the column is unqualified, the expression verbatim SQL
    pub fn set(mut self, column: &str, expression: &str) -> Self {
        self.assignments
            .push((column.to_string(), expression.to_string()));
        self
    }

    /// Source joined into the update; only inner joins are allowed
    pub fn from(mut self, join: Join) -> Self {
        self.from.push(join);
        self
    }

    /// Rows still needing migration; required
    pub fn precondition(mut self, clause: WhereClause) -> Self {
        self.precondition = Some(clause);
        self
    }

    fn build_sql(&self, relation: &BatchRelation) -> Result<String> {
        if self.assignments.is_empty() {
            return Err(invalid("update sets no columns"));
        }
        let precondition = required_guard(
            self.precondition.as_ref(),
            "update requires a precondition excluding already migrated rows",
        )?;
        ensure_inner_joins(&self.from, "update")?;

        let mut statement = UpdateStatement::new(relation.table().as_str());
        for (column, expression) in &self.assignments {
            let column = unqualified_column(column)?;
            statement = statement.set(column.as_str(), expression);
        }
        for join in &self.from {
            statement = statement.from(join.clone());
        }

        statement = statement.where_clause(relation.window_condition());
        if let Some(scope) = relation.scope() {
            statement = statement.where_clause(scope.clone());
        }

        Ok(statement.where_clause(precondition.clone()).build_sql())
    }
}

/// DELETE from the batch table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOperation {
    using: Vec<Join>,
    predicate: Option<WhereClause>,
}

impl DeleteOperation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn using(mut self, join: Join) -> Self {
        self.using.push(join);
        self
    }

    /// Rows to remove, e.g. orphans; required
    pub fn predicate(mut self, clause: WhereClause) -> Self {
        self.predicate = Some(clause);
        self
    }

    fn build_sql(&self, relation: &BatchRelation) -> Result<String> {
        let predicate = required_guard(
            self.predicate.as_ref(),
            "delete requires a predicate selecting the rows to remove",
        )?;
        ensure_inner_joins(&self.using, "delete")?;

        let mut statement = DeleteStatement::new(relation.table().as_str());
        for join in &self.using {
            statement = statement.using(join.clone());
        }

        statement = statement.where_clause(relation.window_condition());
        if let Some(scope) = relation.scope() {
            statement = statement.where_clause(scope.clone());
        }

        Ok(statement.where_clause(predicate.clone()).build_sql())
    }
}

/// INSERT of dependent rows derived from the batch table
#[derive(Debug, Clone, PartialEq)]
pub struct InsertMissingOperation {
    target_table: String,
    columns: Vec<(String, String)>,
    joins: Vec<Join>,
    filter: Option<WhereClause>,
    missing_guard: Option<WhereClause>,
    conflict: Option<Vec<String>>,
}

impl InsertMissingOperation {
    pub fn into_table(target_table: &str) -> Self {
        Self {
            target_table: target_table.to_string(),
            columns: Vec::new(),
            joins: Vec::new(),
            filter: None,
            missing_guard: None,
            conflict: None,
        }
    }

    /// Target column and the SELECT expression producing it
    pub fn value(mut self, column: &str, expression: &str) -> Self {
        self.columns
            .push((column.to_string(), expression.to_string()));
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Extra restriction on source rows
    pub fn filter(mut self, clause: WhereClause) -> Self {
        self.filter = Some(clause);
        self
    }

    /// Condition true only while the dependent row is absent, usually `NOT EXISTS (...)`
    pub fn missing_guard(mut self, clause: WhereClause) -> Self {
        self.missing_guard = Some(clause);
        self
    }

    /// `ON CONFLICT (columns) DO NOTHING`; an empty list means `ON CONFLICT DO NOTHING`
    pub fn on_conflict_do_nothing(mut self, columns: &[&str]) -> Self {
        self.conflict = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    fn build_sql(&self, relation: &BatchRelation) -> Result<String> {
        let target = Identifier::parse(&self.target_table)?;
        if self.columns.is_empty() {
            return Err(invalid("insert lists no columns"));
        }
        let missing_guard = self.missing_guard.as_ref().filter(|g| !g.is_empty());
        if missing_guard.is_none() && self.conflict.is_none() {
            return Err(invalid(
                "insert requires a missing-row guard or ON CONFLICT DO NOTHING",
            ));
        }

        let mut target_columns = Vec::with_capacity(self.columns.len());
        for (column, _) in &self.columns {
            target_columns.push(unqualified_column(column)?);
        }
        let column_names: Vec<&str> = target_columns.iter().map(Identifier::as_str).collect();
        let expressions: Vec<&str> = self.columns.iter().map(|(_, e)| e.as_str()).collect();

        let mut select = QueryBuilder::new(relation.table().as_str()).select(&expressions);
        for join in &self.joins {
            select = select.join(join.clone());
        }
        select = select
            .where_clause(relation.window_condition())
            .where_optional(relation.scope())
            .where_optional(self.filter.as_ref())
            .where_optional(missing_guard);

        let conflict = match &self.conflict {
            None => ConflictAction::None,
            Some(columns) if columns.is_empty() => ConflictAction::DoNothing,
            Some(columns) => {
                for column in columns {
                    unqualified_column(column)?;
                }
                ConflictAction::DoNothingOn(columns.clone())
            }
        };

        Ok(
            InsertSelectStatement::new(target.as_str(), &column_names, select)
                .on_conflict(conflict)
                .build_sql(),
        )
    }
}

/// Hand-written statement taking the window bounds as `$1` and `$2`
#[derive(Debug, Clone, PartialEq)]
pub struct SqlOperation {
    statement: String,
}

impl SqlOperation {
    pub fn new(statement: &str) -> Self {
        Self {
            statement: statement.to_string(),
        }
    }

    fn build_sql(&self) -> Result<String> {
        let statement = self.statement.trim();
        if statement.is_empty() {
            return Err(invalid("SQL statement is empty"));
        }
        if !(statement.contains("$1") && statement.contains("$2")) {
            return Err(invalid(
                "SQL statement must reference the window bounds as $1 and $2",
            ));
        }
        Ok(statement.to_string())
    }
}

/// An operation rendered for one batch relation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledOperation {
    migration: String,
    operation_name: String,
    sql: String,
    keys_sql: String,
}

impl CompiledOperation {
    pub fn migration(&self) -> &str {
        &self.migration
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Statement scoped to `[$1, $2]`
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Distinct batch keys in `[$1, $2]`, for per-key fault isolation
    pub fn keys_sql(&self) -> &str {
        &self.keys_sql
    }
}

fn invalid(reason: &str) -> MigrationError {
    MigrationError::InvalidOperation(reason.to_string())
}

fn required_guard<'a>(clause: Option<&'a WhereClause>, reason: &str) -> Result<&'a WhereClause> {
    clause
        .filter(|clause| !clause.is_empty())
        .ok_or_else(|| invalid(reason))
}

fn ensure_inner_joins(joins: &[Join], kind: &str) -> Result<()> {
    match joins.iter().find(|join| !join.is_inner()) {
        Some(join) => Err(invalid(&format!(
            "{kind} sources must be inner joins, got {} {}",
            join.join_type.to_sql(),
            join.table
        ))),
        None => Ok(()),
    }
}

fn unqualified_column(column: &str) -> Result<Identifier> {
    let identifier = Identifier::parse(column)?;
    if identifier.as_str().contains('.') {
        return Err(MigrationError::InvalidIdentifier {
            identifier: column.to_string(),
            reason: "target columns cannot be qualified".to_string(),
        });
    }
    Ok(identifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issues() -> BatchRelation {
        BatchRelation::new(
            Identifier::parse("issues").unwrap(),
            Identifier::parse("id").unwrap(),
        )
    }

    #[test]
    fn update_compiles_with_window_scope_and_precondition() {
        let relation = issues().with_scope(Some(WhereClause::eq("issues.state_id", json!(1))));
        let operation = MigrationOperation::Update(
            UpdateOperation::new()
                .set("project_id", "merge_requests.target_project_id")
                .from(Join::inner(
                    "merge_requests",
                    "merge_requests.id = issues.merge_request_id",
                ))
                .precondition(WhereClause::is_null("issues.project_id")),
        );

        let compiled = operation
            .compile("BackfillIssuesProjectId", None, &relation)
            .unwrap();

        assert_eq!(compiled.operation_name(), "update_all");
        assert_eq!(compiled.migration(), "BackfillIssuesProjectId");
        assert_eq!(
            compiled.sql(),
            "UPDATE issues SET project_id = merge_requests.target_project_id FROM merge_requests \
             WHERE (merge_requests.id = issues.merge_request_id) AND (issues.id BETWEEN $1 AND $2) \
             AND issues.state_id = 1 AND issues.project_id IS NULL"
        );
        assert!(compiled.keys_sql().starts_with("SELECT DISTINCT issues.id::bigint"));
    }

    #[test]
    fn update_without_precondition_is_rejected() {
        let operation = MigrationOperation::Update(UpdateOperation::new().set("a", "1"));
        assert!(matches!(
            operation.compile("m", None, &issues()),
            Err(MigrationError::InvalidOperation(_))
        ));

        let empty_guard = MigrationOperation::Update(
            UpdateOperation::new()
                .set("a", "1")
                .precondition(WhereClause::and(vec![])),
        );
        assert!(empty_guard.compile("m", None, &issues()).is_err());
    }

    #[test]
    fn update_rejects_left_joins_and_qualified_targets() {
        let left = MigrationOperation::Update(
            UpdateOperation::new()
                .set("a", "p.a")
                .from(Join::left("projects p", "p.id = issues.project_id"))
                .precondition(WhereClause::is_null("issues.a")),
        );
        assert!(matches!(
            left.compile("m", None, &issues()),
            Err(MigrationError::InvalidOperation(_))
        ));

        let qualified = MigrationOperation::Update(
            UpdateOperation::new()
                .set("issues.a", "1")
                .precondition(WhereClause::is_null("issues.a")),
        );
        assert!(matches!(
            qualified.compile("m", None, &issues()),
            Err(MigrationError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn delete_requires_predicate() {
        let operation = MigrationOperation::Delete(DeleteOperation::new());
        assert!(operation.compile("m", None, &issues()).is_err());

        let orphans = MigrationOperation::Delete(DeleteOperation::new().predicate(
            WhereClause::not_exists("SELECT 1 FROM projects WHERE projects.id = issues.project_id"),
        ));
        let compiled = orphans.compile("m", Some("delete_orphans"), &issues()).unwrap();
        assert_eq!(compiled.operation_name(), "delete_orphans");
        assert_eq!(
            compiled.sql(),
            "DELETE FROM issues WHERE (issues.id BETWEEN $1 AND $2) \
             AND NOT EXISTS (SELECT 1 FROM projects WHERE projects.id = issues.project_id)"
        );
    }

    #[test]
    fn insert_requires_a_guard() {
        let unguarded = MigrationOperation::InsertMissing(
            InsertMissingOperation::into_table("issue_metrics").value("issue_id", "issues.id"),
        );
        assert!(matches!(
            unguarded.compile("m", None, &issues()),
            Err(MigrationError::InvalidOperation(_))
        ));
    }

    #[test]
    fn insert_compiles_select_with_guard_and_conflict() {
        let operation = MigrationOperation::InsertMissing(
            InsertMissingOperation::into_table("issue_metrics")
                .value("issue_id", "issues.id")
                .value("created_at", "NOW()")
                .missing_guard(WhereClause::not_exists(
                    "SELECT 1 FROM issue_metrics WHERE issue_metrics.issue_id = issues.id",
                ))
                .on_conflict_do_nothing(&[]),
        );

        let compiled = operation.compile("m", None, &issues()).unwrap();
        assert_eq!(compiled.operation_name(), "insert_missing");
        assert_eq!(
            compiled.sql(),
            "INSERT INTO issue_metrics (issue_id, created_at) SELECT issues.id, NOW() FROM issues \
             WHERE (issues.id BETWEEN $1 AND $2) \
             AND NOT EXISTS (SELECT 1 FROM issue_metrics WHERE issue_metrics.issue_id = issues.id) \
             ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn raw_sql_must_bind_window() {
        let missing = MigrationOperation::Sql(SqlOperation::new("UPDATE issues SET a = 1"));
        assert!(missing.compile("m", None, &issues()).is_err());

        let ok = MigrationOperation::Sql(SqlOperation::new(
            "  UPDATE issues SET a = 1 WHERE id BETWEEN $1 AND $2 AND a IS NULL  ",
        ));
        let compiled = ok.compile("m", None, &issues()).unwrap();
        assert_eq!(
            compiled.sql(),
            "UPDATE issues SET a = 1 WHERE id BETWEEN $1 AND $2 AND a IS NULL"
        );
        assert_eq!(compiled.operation_name(), "execute_sql");
    }
}
