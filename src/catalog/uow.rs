use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::model::{Commit, Mutation};

use super::{Catalog, CatalogError, Claim};

/// Row whose counter a unit of work may read-modify-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKey {
    Slot(i64),
    Ticket(i64),
}

/// One atomic unit of work against the catalog.
///
/// Holds the row locks it acquired, the uniqueness claims it made and the
/// mutations it staged. [`commit`](Self::commit) writes the staged mutations
/// to the WAL as a single record and then publishes them. Dropping the unit
/// of work without committing discards everything and releases claims and
/// locks, whatever the exit path.
pub struct UnitOfWork<'a> {
    catalog: &'a Catalog,
    staged: Vec<Mutation>,
    claims: Vec<Claim>,
    locks: HashMap<RowKey, OwnedMutexGuard<()>>,
    /// Counter values written in this unit of work, not yet committed.
    counters: HashMap<RowKey, i64>,
}

impl<'a> UnitOfWork<'a> {
    pub(super) fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            staged: Vec::new(),
            claims: Vec::new(),
            locks: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    pub fn staged(&self) -> &[Mutation] {
        &self.staged
    }

    pub fn holds(&self, key: RowKey) -> bool {
        self.locks.contains_key(&key)
    }

    pub(super) fn stage(&mut self, mutation: Mutation) {
        self.staged.push(mutation);
    }

    /// Take a uniqueness claim. False if another unit of work holds it.
    pub(super) fn claim(&mut self, claim: Claim) -> bool {
        if self.catalog.claims.insert(claim.clone()) {
            self.claims.push(claim);
            true
        } else {
            false
        }
    }

    /// Acquire a row lock for the rest of this unit of work. Re-entrant.
    pub(super) async fn lock(&mut self, key: RowKey, lock: &Arc<Mutex<()>>) {
        if !self.locks.contains_key(&key) {
            let guard = lock.clone().lock_owned().await;
            self.locks.insert(key, guard);
        }
    }

    /// Give back a row lock that was only taken to inspect the row.
    /// Rows with a staged write stay locked until the end.
    pub fn release(&mut self, key: RowKey) {
        if !self.counters.contains_key(&key) {
            self.locks.remove(&key);
        }
    }

    pub(super) fn staged_counter(&self, key: RowKey) -> Option<i64> {
        self.counters.get(&key).copied()
    }

    pub(super) fn write_counter(&mut self, key: RowKey, value: i64) {
        debug_assert!(self.holds(key), "counter written without its row lock");
        self.counters.insert(key, value);
        self.staged.push(match key {
            RowKey::Slot(slot_id) => Mutation::ReservationsWritten { slot_id, reservations: value },
            RowKey::Ticket(ticket_id) => Mutation::PresentmentsWritten { ticket_id, presentments: value },
        });
    }

    /// Make every staged mutation durable, then visible.
    pub async fn commit(mut self) -> Result<(), CatalogError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let commit = Commit { mutations: std::mem::take(&mut self.staged) };
        let _gate = self.catalog.gate.read().await;
        if let Err(e) = self.catalog.wal_append(&commit).await {
            tracing::warn!(mutations = commit.mutations.len(), "commit failed: {e}");
            return Err(e);
        }
        self.catalog.apply_commit(&commit);
        Ok(())
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        for claim in self.claims.drain(..) {
            self.catalog.claims.remove(&claim);
        }
        if !self.staged.is_empty() {
            debug!(mutations = self.staged.len(), "unit of work rolled back");
        }
    }
}
