//! # Query Builder System
//!
//! SQL generation for batched migrations. Statements are rendered once when a job is
//! constructed; only the window bounds (`$1`, `$2`) and the key-discovery offset
//! (`$3`) are bound at execution time.
//!
//! ## Key Components
//!
//! - [`builder`] - SELECT builder for key discovery and candidate keys
//! - [`conditions`] - WHERE clause building
//! - [`joins`] - JOIN clauses
//! - [`mutation`] - UPDATE, DELETE and INSERT ... SELECT statements
//!
//! ## Example Usage
//!
//! ```rust
//! use batched_migrations::query_builder::{UpdateStatement, WhereClause};
//!
//! let sql = UpdateStatement::new("issues")
//!     .set("confidential", "false")
//!     .where_clause(WhereClause::raw("issues.id BETWEEN $1 AND $2"))
//!     .where_clause(WhereClause::is_null("issues.confidential"))
//!     .build_sql();
//! assert!(sql.starts_with("UPDATE issues SET confidential = false"));
//! ```

pub mod builder;
pub mod conditions;
pub mod joins;
pub mod mutation;

pub use builder::QueryBuilder;
pub use conditions::{Condition, LogicalOperator, WhereClause};
pub use joins::{Join, JoinType};
pub use mutation::{ConflictAction, DeleteStatement, InsertSelectStatement, UpdateStatement};
