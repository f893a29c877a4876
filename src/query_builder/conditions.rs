/// Represents different types of SQL conditions
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Simple {
        field: String,
        operator: String,
        value: serde_json::Value,
    },
    /// Column-to-column comparison, e.g. `issues.project_id = projects.id`
    Columns {
        left: String,
        operator: String,
        right: String,
    },
    In {
        field: String,
        values: Vec<serde_json::Value>,
    },
    IsNull {
        field: String,
    },
    IsNotNull {
        field: String,
    },
    Exists {
        subquery: String,
    },
    NotExists {
        subquery: String,
    },
    Group(WhereClause),
    Raw {
        sql: String,
    },
}

impl Condition {
    /// Convert condition to SQL string
    pub fn to_sql(&self) -> String {
        match self {
            Condition::Simple {
                field,
                operator,
                value,
            } => {
                format!("{} {} {}", field, operator, format_value(value))
            }
            Condition::Columns {
                left,
                operator,
                right,
            } => format!("{left} {operator} {right}"),
            Condition::In { field, values } => {
                let value_list = values
                    .iter()
                    .map(format_value)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{field} IN ({value_list})")
            }
            Condition::IsNull { field } => {
                format!("{field} IS NULL")
            }
            Condition::IsNotNull { field } => {
                format!("{field} IS NOT NULL")
            }
            Condition::Exists { subquery } => {
                format!("EXISTS ({subquery})")
            }
            Condition::NotExists { subquery } => {
                format!("NOT EXISTS ({subquery})")
            }
            Condition::Group(clause) => clause.to_sql(),
            Condition::Raw { sql } => format!("({sql})"),
        }
    }
}

/// Represents a WHERE clause that can contain multiple conditions
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub conditions: Vec<Condition>,
    pub operator: LogicalOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl WhereClause {
    fn single(condition: Condition) -> Self {
        Self {
            conditions: vec![condition],
            operator: LogicalOperator::And,
        }
    }

    /// Create a simple WHERE clause with a single condition
    pub fn simple(field: &str, operator: &str, value: serde_json::Value) -> Self {
        Self::single(Condition::Simple {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        })
    }

    pub fn eq(field: &str, value: serde_json::Value) -> Self {
        Self::simple(field, "=", value)
    }

    /// Compare two columns
    pub fn columns(left: &str, operator: &str, right: &str) -> Self {
        Self::single(Condition::Columns {
            left: left.to_string(),
            operator: operator.to_string(),
            right: right.to_string(),
        })
    }

    /// Create WHERE IN clause
    pub fn in_condition(field: &str, values: Vec<serde_json::Value>) -> Self {
        Self::single(Condition::In {
            field: field.to_string(),
            values,
        })
    }

    /// Create WHERE EXISTS clause
    pub fn exists(subquery: &str) -> Self {
        Self::single(Condition::Exists {
            subquery: subquery.to_string(),
        })
    }

    /// Create WHERE NOT EXISTS clause
    pub fn not_exists(subquery: &str) -> Self {
        Self::single(Condition::NotExists {
            subquery: subquery.to_string(),
        })
    }

    /// Create WHERE IS NULL clause
    pub fn is_null(field: &str) -> Self {
        Self::single(Condition::IsNull {
            field: field.to_string(),
        })
    }

    /// Create WHERE IS NOT NULL clause
    pub fn is_not_null(field: &str) -> Self {
        Self::single(Condition::IsNotNull {
            field: field.to_string(),
        })
    }

    /// Create raw SQL condition
    pub fn raw(sql: &str) -> Self {
        Self::single(Condition::Raw {
            sql: sql.to_string(),
        })
    }

    /// Combine multiple conditions with AND
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            operator: LogicalOperator::And,
        }
    }

    /// Combine multiple conditions with OR
    pub fn or(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            operator: LogicalOperator::Or,
        }
    }

    /// AND this clause with another one, keeping both groupings intact
    pub fn and_also(self, other: WhereClause) -> Self {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        Self::and(vec![Condition::Group(self), Condition::Group(other)])
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Convert to SQL string
    pub fn to_sql(&self) -> String {
        if self.conditions.is_empty() {
            return "1=1".to_string();
        }

        if self.conditions.len() == 1 {
            return self.conditions[0].to_sql();
        }

        let operator_str = match self.operator {
            LogicalOperator::And => " AND ",
            LogicalOperator::Or => " OR ",
        };

        let condition_sqls: Vec<String> = self.conditions.iter().map(|c| c.to_sql()).collect();

        format!("({})", condition_sqls.join(operator_str))
    }
}

/// Format a JSON value as a SQL literal
pub(crate) fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        _ => format!("'{}'::jsonb", value.to_string().replace('\'', "''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_literals_are_escaped() {
        let clause = WhereClause::eq("title", json!("it's"));
        assert_eq!(clause.to_sql(), "title = 'it''s'");
    }

    #[test]
    fn test_or_clause_is_parenthesized() {
        let clause = WhereClause::or(vec![
            Condition::IsNull {
                field: "project_id".to_string(),
            },
            Condition::Simple {
                field: "project_id".to_string(),
                operator: "=".to_string(),
                value: json!(0),
            },
        ]);
        assert_eq!(clause.to_sql(), "(project_id IS NULL OR project_id = 0)");
    }

    #[test]
    fn test_and_also_keeps_groups() {
        let clause = WhereClause::is_null("a")
            .and_also(WhereClause::or(vec![
                Condition::IsNull {
                    field: "b".to_string(),
                },
                Condition::IsNull {
                    field: "c".to_string(),
                },
            ]));
        assert_eq!(clause.to_sql(), "(a IS NULL AND (b IS NULL OR c IS NULL))");
    }

    #[test]
    fn test_and_also_with_empty_side() {
        let empty = WhereClause::and(vec![]);
        let clause = empty.and_also(WhereClause::is_not_null("x"));
        assert_eq!(clause.to_sql(), "x IS NOT NULL");
    }

    #[test]
    fn test_in_and_not_exists() {
        let clause = WhereClause::in_condition("state", vec![json!("opened"), json!(2)]);
        assert_eq!(clause.to_sql(), "state IN ('opened', 2)");

        let orphan = WhereClause::not_exists("SELECT 1 FROM projects WHERE projects.id = issues.project_id");
        assert_eq!(
            orphan.to_sql(),
            "NOT EXISTS (SELECT 1 FROM projects WHERE projects.id = issues.project_id)"
        );
    }

    #[test]
    fn test_column_comparison_and_exists() {
        let clause = WhereClause::columns("issues.project_id", "<>", "merge_requests.target_project_id")
            .and_also(WhereClause::exists(
                "SELECT 1 FROM projects WHERE projects.id = merge_requests.target_project_id",
            ));
        assert_eq!(
            clause.to_sql(),
            "(issues.project_id <> merge_requests.target_project_id AND \
             EXISTS (SELECT 1 FROM projects WHERE projects.id = merge_requests.target_project_id))"
        );
    }

    #[test]
    fn test_raw_is_wrapped() {
        assert_eq!(WhereClause::raw("a = 1 OR b = 2").to_sql(), "(a = 1 OR b = 2)");
    }
}
