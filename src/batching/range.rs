//! # Batch Range
//!
//! Splits an inclusive key interval into consecutive windows of at most
//! `sub_batch_size` rows. Boundaries come from the rows that actually exist, so sparse
//! key spaces still produce evenly filled windows.
//!
//! Windows are contiguous and non-overlapping: the first starts at `start_id`, each
//! following window starts one above the previous upper bound, and the last ends at
//! `end_id`. An interval without rows yields no windows at all.

use crate::database::MigrationConnection;
use crate::error::{MigrationError, Result};
use crate::schema::BatchRelation;
use futures::stream::{self, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive `[lower, upper]` key window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchWindow {
    pub lower: i64,
    pub upper: i64,
}

impl BatchWindow {
    pub fn new(lower: i64, upper: i64) -> Self {
        debug_assert!(lower <= upper, "window lower bound above upper bound");
        Self { lower, upper }
    }

    /// Window holding exactly one key
    pub fn single(key: i64) -> Self {
        Self {
            lower: key,
            upper: key,
        }
    }

    pub fn contains(&self, key: i64) -> bool {
        self.lower <= key && key <= self.upper
    }
}

impl fmt::Display for BatchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

enum Cursor {
    Start,
    At(i64),
    Done,
}

#[derive(Debug, Clone)]
pub struct BatchRange {
    relation: BatchRelation,
    start_id: i64,
    end_id: i64,
    sub_batch_size: u32,
}

impl BatchRange {
    pub fn new(
        relation: BatchRelation,
        start_id: i64,
        end_id: i64,
        sub_batch_size: u32,
    ) -> Result<Self> {
        if start_id > end_id {
            return Err(MigrationError::InvalidDescriptor(format!(
                "start_id {start_id} is greater than end_id {end_id}"
            )));
        }
        if sub_batch_size == 0 {
            return Err(MigrationError::InvalidDescriptor(
                "sub_batch_size must be positive".to_string(),
            ));
        }

        Ok(Self {
            relation,
            start_id,
            end_id,
            sub_batch_size,
        })
    }

    pub fn relation(&self) -> &BatchRelation {
        &self.relation
    }

    pub fn bounds(&self) -> BatchWindow {
        BatchWindow::new(self.start_id, self.end_id)
    }

    /// Lazily discovered windows, in ascending key order
    pub fn each_batch<'a, C>(
        &'a self,
        connection: &'a C,
    ) -> impl Stream<Item = Result<BatchWindow>> + Send + 'a
    where
        C: MigrationConnection,
    {
        stream::try_unfold(Cursor::Start, move |cursor| self.advance(connection, cursor))
    }

    async fn advance<C>(
        &self,
        connection: &C,
        cursor: Cursor,
    ) -> Result<Option<(BatchWindow, Cursor)>>
    where
        C: MigrationConnection,
    {
        let lower = match cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => {
                let first = connection
                    .key_at_offset(&self.relation, self.start_id, self.end_id, 0)
                    .await?;
                if first.is_none() {
                    return Ok(None);
                }
                self.start_id
            }
            Cursor::At(lower) => lower,
        };

        match self.next_lower_bound(connection, lower).await? {
            Some(next) => Ok(Some((BatchWindow::new(lower, next - 1), Cursor::At(next)))),
            None => Ok(Some((BatchWindow::new(lower, self.end_id), Cursor::Done))),
        }
    }

    /// All windows at once; mostly useful for planning and inspection
    pub async fn windows<C>(&self, connection: &C) -> Result<Vec<BatchWindow>>
    where
        C: MigrationConnection,
    {
        self.each_batch(connection).try_collect().await
    }

    /// First key of the window following the one starting at `lower`
    async fn next_lower_bound<C>(&self, connection: &C, lower: i64) -> Result<Option<i64>>
    where
        C: MigrationConnection,
    {
        let next = connection
            .key_at_offset(
                &self.relation,
                lower,
                self.end_id,
                u64::from(self.sub_batch_size),
            )
            .await?;

        match next {
            // A non-unique column can repeat `lower` past the offset; skip to the next
            // distinct key so the window still advances.
            Some(next) if next <= lower => match lower.checked_add(1) {
                Some(after) if after <= self.end_id => {
                    connection
                        .key_at_offset(&self.relation, after, self.end_id, 0)
                        .await
                }
                _ => Ok(None),
            },
            other => Ok(other),
        }
    }
}
