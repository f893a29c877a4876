/// Represents different types of SQL JOINs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// Represents a SQL JOIN clause
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    pub on_condition: String,
}

impl Join {
    /// Create an INNER JOIN
    pub fn inner(table: &str, on_condition: &str) -> Self {
        Self {
            join_type: JoinType::Inner,
            table: table.to_string(),
            on_condition: on_condition.to_string(),
        }
    }

    /// Create a LEFT JOIN
    pub fn left(table: &str, on_condition: &str) -> Self {
        Self {
            join_type: JoinType::Left,
            table: table.to_string(),
            on_condition: on_condition.to_string(),
        }
    }

    pub fn is_inner(&self) -> bool {
        self.join_type == JoinType::Inner
    }

    /// Convert to SQL string
    pub fn to_sql(&self) -> String {
        format!(
            "{} {} ON {}",
            self.join_type.to_sql(),
            self.table,
            self.on_condition
        )
    }
}
