mod error;
mod mutations;
mod queries;
mod uow;

pub use error::CatalogError;
pub use uow::{RowKey, UnitOfWork};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::{info, warn};

use crate::model::*;
use crate::wal::Wal;

// ── Rows ─────────────────────────────────────────────────

/// A slot as held in memory. Descriptive fields never change after creation;
/// the counter is atomic so readers never wait on the row lock.
pub struct SlotRow {
    pub id: i64,
    pub spot_id: i64,
    pub start: Secs,
    pub end: Option<Secs>,
    pub capacity: i64,
    pub note: Option<String>,
    reservations: AtomicI64,
    /// Held by a unit of work for its whole read-modify-write cycle.
    lock: Arc<Mutex<()>>,
}

impl SlotRow {
    fn from_record(rec: SlotRecord) -> Self {
        Self {
            id: rec.id,
            spot_id: rec.spot_id,
            start: rec.start,
            end: rec.end,
            capacity: rec.capacity,
            note: rec.note,
            reservations: AtomicI64::new(rec.reservations),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn reservations(&self) -> i64 {
        self.reservations.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> SlotRecord {
        SlotRecord {
            id: self.id,
            spot_id: self.spot_id,
            start: self.start,
            end: self.end,
            capacity: self.capacity,
            note: self.note.clone(),
            reservations: self.reservations(),
        }
    }
}

pub struct TicketRow {
    pub ticket_id: i64,
    pub slot_id: i64,
    pub spot_id: i64,
    pub note: Option<String>,
    pub serial_number: i64,
    presentments: AtomicI64,
    lock: Arc<Mutex<()>>,
}

impl TicketRow {
    fn from_record(rec: TicketRecord) -> Self {
        Self {
            ticket_id: rec.ticket_id,
            slot_id: rec.slot_id,
            spot_id: rec.spot_id,
            note: rec.note,
            serial_number: rec.serial_number,
            presentments: AtomicI64::new(rec.presentments),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn presentments(&self) -> i64 {
        self.presentments.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> TicketRecord {
        TicketRecord {
            ticket_id: self.ticket_id,
            slot_id: self.slot_id,
            spot_id: self.spot_id,
            presentments: self.presentments(),
            note: self.note.clone(),
            serial_number: self.serial_number,
        }
    }
}

/// A spot and its slots, sorted by `start`. Immutable once published.
pub struct SpotRow {
    pub id: i64,
    pub name: String,
    pub note: Option<String>,
    pub slots: Vec<Arc<SlotRow>>,
}

/// Uniqueness reservations taken by in-flight units of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Claim {
    SpotName(String),
    SpotId(i64),
    SlotId(i64),
    TicketId(i64),
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        commits: Vec<Commit>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Stage it in memory (no write yet).
/// 3. Drain all immediately available Appends.
/// 4. One flush_sync for the whole batch; a failed batch leaves no bytes behind.
/// 5. Respond to every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let mut batch = vec![(commit, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { commit, response }) => batch.push((commit, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Commit, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (commit, _) in batch {
        if let Err(e) = wal.append_buffered(commit) {
            // Every sender hears about the failure, so none of the batch may land.
            wal.discard_pending();
            return Err(e);
        }
    }
    wal.flush_sync()
}

fn respond_batch(batch: Vec<(Commit, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { commits, response } => {
            let result = Wal::write_compact_file(wal.path(), &commits)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The single authoritative store for spots, slots and tickets.
///
/// Committed rows live in concurrent indexes; every change goes through a
/// [`UnitOfWork`], is framed into the WAL as one commit, and only then
/// becomes visible.
pub struct Catalog {
    spots: DashMap<i64, Arc<SpotRow>>,
    /// Spot name → ids. More than one id means the log was tampered with.
    names: DashMap<String, Vec<i64>>,
    slots: DashMap<i64, Arc<SlotRow>>,
    tickets: DashMap<i64, Arc<TicketRow>>,
    claims: DashSet<Claim>,
    /// Shared by commits, exclusive for compaction.
    gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl Catalog {
    /// Replay the WAL at `wal_path` (creating it if missing) and start the
    /// group-commit writer. Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, commits) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let catalog = Self {
            spots: DashMap::new(),
            names: DashMap::new(),
            slots: DashMap::new(),
            tickets: DashMap::new(),
            claims: DashSet::new(),
            gate: RwLock::new(()),
            wal_tx,
        };
        for commit in &commits {
            catalog.apply_commit(commit);
        }
        info!(
            commits = commits.len(),
            spots = catalog.spots.len(),
            tickets = catalog.tickets.len(),
            "catalog loaded from {}",
            wal_path.display()
        );
        Ok(catalog)
    }

    /// Make a durable commit visible. Callers hold the row locks the commit
    /// writes to, or own the rows outright (replay).
    pub(super) fn apply_commit(&self, commit: &Commit) {
        let mut new_spots: Vec<(&SpotRecord, Vec<Arc<SlotRow>>)> = Vec::new();

        for mutation in &commit.mutations {
            match mutation {
                Mutation::SpotCreated(rec) => new_spots.push((rec, Vec::new())),
                Mutation::SlotCreated(rec) => {
                    let row = Arc::new(SlotRow::from_record(rec.clone()));
                    self.slots.insert(rec.id, row.clone());
                    match new_spots.iter_mut().find(|(spot, _)| spot.id == rec.spot_id) {
                        Some((_, slots)) => slots.push(row),
                        None => warn!(
                            slot_id = rec.id,
                            spot_id = rec.spot_id,
                            "slot committed without its spot; it will not be listed"
                        ),
                    }
                }
                Mutation::TicketCreated(rec) => {
                    self.tickets
                        .entry(rec.ticket_id)
                        .or_insert_with(|| Arc::new(TicketRow::from_record(rec.clone())));
                }
                Mutation::ReservationsWritten { slot_id, reservations } => {
                    match self.slots.get(slot_id) {
                        Some(slot) => slot.reservations.store(*reservations, Ordering::Release),
                        None => warn!(slot_id, "reservation count for unknown slot"),
                    }
                }
                Mutation::PresentmentsWritten { ticket_id, presentments } => {
                    match self.tickets.get(ticket_id) {
                        Some(ticket) => ticket.presentments.store(*presentments, Ordering::Release),
                        None => warn!(ticket_id, "presentment count for unknown ticket"),
                    }
                }
            }
        }

        // Spot rows go in last, so a spot becomes reachable by name only
        // once all of its slots are in place.
        for (rec, mut slots) in new_spots {
            slots.sort_by_key(|s| s.start);
            self.spots.insert(
                rec.id,
                Arc::new(SpotRow {
                    id: rec.id,
                    name: rec.name.clone(),
                    note: rec.note.clone(),
                    slots,
                }),
            );
            self.names.entry(rec.name.clone()).or_default().push(rec.id);
        }
    }

    /// Write a commit through the group-commit writer.
    pub(super) async fn wal_append(&self, commit: &Commit) -> Result<(), CatalogError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                commit: commit.clone(),
                response: tx,
            })
            .await
            .map_err(|_| CatalogError::TransactionFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| CatalogError::TransactionFailure("WAL writer dropped response".into()))?
            .map_err(|e| CatalogError::TransactionFailure(format!("WAL append: {e}")))
    }
}
