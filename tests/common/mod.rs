//! Shared fixtures for the PostgreSQL integration tests.
//!
//! Every test receives its own database from `#[sqlx::test]` and creates the tables it
//! needs through these helpers.

#![allow(dead_code)]

use batched_migrations::batching::{
    DeleteOperation, InsertMissingOperation, MigrationOperation, UpdateOperation,
};
use batched_migrations::job::{
    BatchedMigration, BatchedMigrationJob, JobArguments, MigrationJobDescriptor,
};
use batched_migrations::query_builder::{Join, WhereClause};
use batched_migrations::schema::BatchRelation;
use batched_migrations::PgMigrationConnection;
use sqlx::PgPool;

pub async fn create_issue_tables(pool: &PgPool) {
    sqlx::raw_sql(
        "CREATE TABLE projects (id BIGINT PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE merge_requests (
             id BIGINT PRIMARY KEY,
             target_project_id BIGINT NOT NULL REFERENCES projects (id)
         );
         CREATE TABLE issues (
             id BIGINT PRIMARY KEY,
             merge_request_id BIGINT,
             project_id BIGINT,
             title TEXT NOT NULL DEFAULT '',
             updated_at TIMESTAMPTZ NOT NULL DEFAULT '2020-01-01T00:00:00Z'
         );
         CREATE TABLE issue_metrics (
             issue_id BIGINT PRIMARY KEY,
             first_mentioned_at TIMESTAMPTZ
         );",
    )
    .execute(pool)
    .await
    .expect("create issue tables");
}

/// Projects 1..=3; merge request `n` targets project `n % 3 + 1`
pub async fn seed_projects_and_merge_requests(pool: &PgPool, merge_requests: i64) {
    sqlx::query(
        "INSERT INTO projects (id, name) SELECT g, 'project-' || g FROM generate_series(1, 3) g",
    )
    .execute(pool)
    .await
    .expect("seed projects");
    sqlx::query(
        "INSERT INTO merge_requests (id, target_project_id)
         SELECT g, g % 3 + 1 FROM generate_series(1, $1) g",
    )
    .bind(merge_requests)
    .execute(pool)
    .await
    .expect("seed merge requests");
}

/// Issue `id` pointing at merge request `merge_request_id`, with no project
pub async fn insert_issue(pool: &PgPool, id: i64, merge_request_id: Option<i64>) {
    sqlx::query("INSERT INTO issues (id, merge_request_id) VALUES ($1, $2)")
        .bind(id)
        .bind(merge_request_id)
        .execute(pool)
        .await
        .expect("insert issue");
}

pub async fn count(pool: &PgPool, sql: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(pool)
        .await
        .expect("count query")
}

pub fn descriptor(start_id: i64, end_id: i64, sub_batch_size: u32) -> MigrationJobDescriptor {
    MigrationJobDescriptor::new("issues", "id", start_id, end_id)
        .expect("valid descriptor")
        .with_sub_batch_size(sub_batch_size)
        .with_pause_ms(0)
}

pub fn job<M: BatchedMigration>(
    pool: &PgPool,
    descriptor: MigrationJobDescriptor,
    migration: &M,
) -> BatchedMigrationJob<PgMigrationConnection> {
    BatchedMigrationJob::new(descriptor, PgMigrationConnection::new(pool.clone()), migration)
        .expect("job construction")
}

/// Copies the merge request's target project onto issues that have none
pub struct BackfillIssuesProjectId;

impl BatchedMigration for BackfillIssuesProjectId {
    fn name(&self) -> &str {
        "BackfillIssuesProjectId"
    }

    fn operation(
        &self,
        _relation: &BatchRelation,
        _arguments: &JobArguments,
    ) -> batched_migrations::Result<MigrationOperation> {
        Ok(MigrationOperation::Update(
            UpdateOperation::new()
                .set("project_id", "merge_requests.target_project_id")
                .set("updated_at", "NOW()")
                .from(Join::inner(
                    "merge_requests",
                    "merge_requests.id = issues.merge_request_id",
                ))
                .precondition(WhereClause::is_null("issues.project_id")),
        ))
    }
}

/// Removes issues whose merge request no longer exists
pub struct DeleteOrphanedIssues;

impl BatchedMigration for DeleteOrphanedIssues {
    fn name(&self) -> &str {
        "DeleteOrphanedIssues"
    }

    fn operation(
        &self,
        _relation: &BatchRelation,
        _arguments: &JobArguments,
    ) -> batched_migrations::Result<MigrationOperation> {
        Ok(MigrationOperation::Delete(
            DeleteOperation::new().predicate(
                WhereClause::is_not_null("issues.merge_request_id").and_also(
                    WhereClause::not_exists(
                        "SELECT 1 FROM merge_requests \
                         WHERE merge_requests.id = issues.merge_request_id",
                    ),
                ),
            ),
        ))
    }
}

/// Creates the metrics row every issue should have
pub struct CreateMissingIssueMetrics;

impl BatchedMigration for CreateMissingIssueMetrics {
    fn name(&self) -> &str {
        "CreateMissingIssueMetrics"
    }

    fn operation(
        &self,
        _relation: &BatchRelation,
        _arguments: &JobArguments,
    ) -> batched_migrations::Result<MigrationOperation> {
        Ok(MigrationOperation::InsertMissing(
            InsertMissingOperation::into_table("issue_metrics")
                .value("issue_id", "issues.id")
                .value("first_mentioned_at", "NOW()")
                .missing_guard(WhereClause::not_exists(
                    "SELECT 1 FROM issue_metrics WHERE issue_metrics.issue_id = issues.id",
                ))
                .on_conflict_do_nothing(&["issue_id"]),
        ))
    }
}

/// `BackfillIssuesProjectId` restricted to issues titled "bug"
pub struct BackfillBugProjectId;

impl BatchedMigration for BackfillBugProjectId {
    fn name(&self) -> &str {
        "BackfillBugProjectId"
    }

    fn scope(&self, _arguments: &JobArguments) -> Option<WhereClause> {
        Some(WhereClause::eq("issues.title", serde_json::json!("bug")))
    }

    fn operation(
        &self,
        relation: &BatchRelation,
        arguments: &JobArguments,
    ) -> batched_migrations::Result<MigrationOperation> {
        BackfillIssuesProjectId.operation(relation, arguments)
    }
}

/// `BackfillIssuesProjectId` batched over the non-unique `issues.merge_request_id`
pub struct BackfillProjectIdByMergeRequest;

impl BatchedMigration for BackfillProjectIdByMergeRequest {
    fn name(&self) -> &str {
        "BackfillProjectIdByMergeRequest"
    }

    fn distinct_batch_column(&self) -> bool {
        true
    }

    fn operation(
        &self,
        relation: &BatchRelation,
        arguments: &JobArguments,
    ) -> batched_migrations::Result<MigrationOperation> {
        BackfillIssuesProjectId.operation(relation, arguments)
    }
}
