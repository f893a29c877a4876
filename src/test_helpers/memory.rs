//! In-memory migration backend.
//!
//! Models a batch table as a list of rows keyed by the batch column, each either
//! migrated or not. Applying any operation to a window migrates the window's
//! unmigrated rows, which mirrors an UPDATE guarded by `target IS NULL`. Keys can be
//! made to fail with a SQLSTATE to exercise fault handling, or placed outside a
//! relation's scope, in which case a scoped relation neither counts nor migrates them.

use crate::batching::{BatchWindow, CompiledOperation};
use crate::database::{MigrationConnection, SubBatchTransaction};
use crate::error::{MigrationError, Result};
use crate::schema::BatchRelation;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct MemoryRow {
    key: i64,
    migrated: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<MemoryRow>,
    faults: HashMap<i64, String>,
    out_of_scope: BTreeSet<i64>,
    commits: usize,
    rollbacks: usize,
    statements: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnection {
    /// One row per distinct key
    pub fn with_keys(keys: impl IntoIterator<Item = i64>) -> Self {
        let unique: BTreeSet<i64> = keys.into_iter().collect();
        Self::with_duplicate_keys(unique.into_iter().collect())
    }

    /// One row per entry, keys may repeat
    pub fn with_duplicate_keys(mut keys: Vec<i64>) -> Self {
        keys.sort_unstable();
        let rows = keys
            .into_iter()
            .map(|key| MemoryRow {
                key,
                migrated: false,
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(MemoryState {
                rows,
                ..MemoryState::default()
            })),
        }
    }

    /// Any statement touching an unmigrated row with `key` fails with `sqlstate`
    pub fn fail_key(self, key: i64, sqlstate: &str) -> Self {
        self.state.lock().faults.insert(key, sqlstate.to_string());
        self
    }

    /// Rows with these keys fail any relation scope
    pub fn out_of_scope(self, keys: impl IntoIterator<Item = i64>) -> Self {
        self.state.lock().out_of_scope.extend(keys);
        self
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Committed migrated keys, ascending, one entry per row
    pub fn migrated_keys(&self) -> Vec<i64> {
        self.keys_where(true)
    }

    pub fn unmigrated_keys(&self) -> Vec<i64> {
        self.keys_where(false)
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    /// Statements attempted through `apply`, including failed ones
    pub fn statements(&self) -> usize {
        self.state.lock().statements
    }

    fn keys_where(&self, migrated: bool) -> Vec<i64> {
        self.state
            .lock()
            .rows
            .iter()
            .filter(|row| row.migrated == migrated)
            .map(|row| row.key)
            .collect()
    }
}

#[async_trait]
impl MigrationConnection for MemoryConnection {
    type Transaction = MemoryTransaction;

    async fn key_at_offset(
        &self,
        relation: &BatchRelation,
        from: i64,
        end: i64,
        offset: u64,
    ) -> Result<Option<i64>> {
        let state = self.state.lock();
        let mut keys: Vec<i64> = state
            .rows
            .iter()
            .map(|row| row.key)
            .filter(|key| *key >= from && *key <= end)
            .filter(|key| relation.scope().is_none() || !state.out_of_scope.contains(key))
            .collect();
        if relation.is_distinct() {
            keys.dedup();
        }

        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(keys.get(offset).copied())
    }

    async fn begin(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            pending: BTreeSet::new(),
        })
    }
}

/// Holds the row indexes migrated in this transaction until commit
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    pending: BTreeSet<usize>,
}

#[async_trait]
impl SubBatchTransaction for MemoryTransaction {
    async fn apply(&mut self, _operation: &CompiledOperation, window: BatchWindow) -> Result<u64> {
        let mut state = self.state.lock();
        state.statements += 1;

        let candidates: Vec<usize> = state
            .rows
            .iter()
            .enumerate()
            .filter(|(index, row)| {
                window.contains(row.key)
                    && !row.migrated
                    && !self.pending.contains(index)
                    && !state.out_of_scope.contains(&row.key)
            })
            .map(|(index, _)| index)
            .collect();

        let fault = candidates
            .iter()
            .find_map(|index| state.faults.get(&state.rows[*index].key));
        if let Some(code) = fault {
            return Err(MigrationError::DatabaseError {
                operation: "apply_sub_batch".to_string(),
                reason: format!("injected failure with SQLSTATE {code}"),
                code: Some(code.clone()),
            });
        }

        let affected = candidates.len() as u64;
        self.pending.extend(candidates);
        Ok(affected)
    }

    async fn keys_in_window(
        &mut self,
        _operation: &CompiledOperation,
        window: BatchWindow,
    ) -> Result<Vec<i64>> {
        let state = self.state.lock();
        let keys: BTreeSet<i64> = state
            .rows
            .iter()
            .map(|row| row.key)
            .filter(|key| window.contains(*key) && !state.out_of_scope.contains(key))
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.state.lock();
        for index in &self.pending {
            state.rows[*index].migrated = true;
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.state.lock().rollbacks += 1;
        Ok(())
    }
}
