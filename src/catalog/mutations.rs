use tokio::sync::oneshot;
use tracing::info;

use crate::ids::make_id;
use crate::limits::*;
use crate::model::*;

use super::{Catalog, CatalogError, Claim, RowKey, UnitOfWork, WalCommand};

fn validate_note(note: &Option<String>) -> Result<(), CatalogError> {
    match note {
        Some(n) if n.len() > MAX_NOTE_LEN => Err(CatalogError::Invalid("note too long")),
        _ => Ok(()),
    }
}

fn validate_spot(spot: &SpotView) -> Result<(), CatalogError> {
    if spot.name.is_empty() {
        return Err(CatalogError::Invalid("spot name is empty"));
    }
    if spot.name.len() > MAX_NAME_LEN {
        return Err(CatalogError::Invalid("spot name too long"));
    }
    validate_note(&spot.note)?;
    if spot.slots.len() > MAX_SLOTS_PER_SPOT {
        return Err(CatalogError::Invalid("too many slots"));
    }
    for slot in &spot.slots {
        let capacity = slot.effective_capacity();
        if !(0..=MAX_CAPACITY).contains(&capacity) {
            return Err(CatalogError::Invalid("capacity out of range"));
        }
        if let Some(end) = slot.end
            && end < slot.start
        {
            return Err(CatalogError::Invalid("slot ends before it starts"));
        }
        validate_note(&slot.note)?;
    }
    Ok(())
}

impl Catalog {
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self)
    }

    /// Create a spot and all of its slots in one unit of work.
    pub async fn create_spot(&self, spot: &SpotView) -> Result<i64, CatalogError> {
        let mut uow = self.begin();
        let id = self.stage_spot(&mut uow, spot)?;
        uow.commit().await?;
        info!(spot_id = id, name = %spot.name, slots = spot.slots.len(), "spot created");
        Ok(id)
    }

    /// Stage a spot row plus one slot row per slot view. The name stays
    /// claimed until `uow` commits or is dropped.
    pub fn stage_spot(&self, uow: &mut UnitOfWork<'_>, spot: &SpotView) -> Result<i64, CatalogError> {
        validate_spot(spot)?;

        // Claim first, then look: a creation that commits in between has
        // already published the name by the time it lets go of the claim.
        if !uow.claim(Claim::SpotName(spot.name.clone())) {
            return Err(CatalogError::Conflict(format!("spot {:?} is being created", spot.name)));
        }
        if self.names.get(&spot.name).is_some_and(|ids| !ids.is_empty()) {
            return Err(CatalogError::Conflict(format!("spot {:?} already exists", spot.name)));
        }

        let id = make_id(spot)?;
        if !uow.claim(Claim::SpotId(id)) || self.spots.contains_key(&id) {
            return Err(CatalogError::Conflict(format!("spot id {id} already exists")));
        }
        uow.stage(Mutation::SpotCreated(SpotRecord {
            id,
            name: spot.name.clone(),
            note: spot.note.clone(),
        }));

        for slot in &spot.slots {
            let slot_id = make_id(slot)?;
            if !uow.claim(Claim::SlotId(slot_id)) || self.slots.contains_key(&slot_id) {
                return Err(CatalogError::Conflict(format!("slot id {slot_id} already exists")));
            }
            uow.stage(Mutation::SlotCreated(SlotRecord {
                id: slot_id,
                spot_id: id,
                start: slot.start.seconds,
                end: slot.end.map(|t| t.seconds),
                capacity: slot.effective_capacity(),
                note: slot.note.clone(),
                reservations: 0,
            }));
        }
        Ok(id)
    }

    /// Stage a new ticket. Conflict if its id is taken, committed or not.
    pub fn create_ticket(&self, uow: &mut UnitOfWork<'_>, ticket: TicketRecord) -> Result<(), CatalogError> {
        validate_note(&ticket.note)?;
        if !uow.claim(Claim::TicketId(ticket.ticket_id)) || self.tickets.contains_key(&ticket.ticket_id) {
            return Err(CatalogError::Conflict(format!("ticket {} already issued", ticket.ticket_id)));
        }
        uow.stage(Mutation::TicketCreated(ticket));
        Ok(())
    }

    /// Lock a slot row for the rest of `uow` and read it, staged writes included.
    pub async fn lock_slot(&self, uow: &mut UnitOfWork<'_>, slot_id: i64) -> Result<SlotRecord, CatalogError> {
        let row = self
            .slots
            .get(&slot_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CatalogError::NotFound(format!("slot {slot_id}")))?;
        uow.lock(RowKey::Slot(slot_id), &row.lock).await;
        let mut rec = row.snapshot();
        if let Some(reservations) = uow.staged_counter(RowKey::Slot(slot_id)) {
            rec.reservations = reservations;
        }
        Ok(rec)
    }

    /// Read-increment-write the slot's reservation counter. Returns the
    /// value before the increment.
    pub async fn increment_reservation_counter(
        &self,
        uow: &mut UnitOfWork<'_>,
        slot_id: i64,
    ) -> Result<i64, CatalogError> {
        let current = self.lock_slot(uow, slot_id).await?.reservations;
        uow.write_counter(RowKey::Slot(slot_id), current + 1);
        Ok(current)
    }

    /// Read-increment-write the ticket's presentment counter. Returns the
    /// value before the increment.
    pub async fn increment_presentment_counter(
        &self,
        uow: &mut UnitOfWork<'_>,
        ticket_id: i64,
        spot_id: i64,
    ) -> Result<i64, CatalogError> {
        let row = self
            .tickets
            .get(&ticket_id)
            .filter(|t| t.spot_id == spot_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| CatalogError::NotFound(format!("ticket {ticket_id} at spot {spot_id}")))?;
        uow.lock(RowKey::Ticket(ticket_id), &row.lock).await;
        let current = uow
            .staged_counter(RowKey::Ticket(ticket_id))
            .unwrap_or_else(|| row.presentments());
        uow.write_counter(RowKey::Ticket(ticket_id), current + 1);
        Ok(current)
    }

    /// Rewrite the WAL as the minimal set of commits that recreates the
    /// current state. No commit runs while the snapshot is taken.
    pub async fn compact_wal(&self) -> Result<(), CatalogError> {
        let _gate = self.gate.write().await;

        let mut commits = Vec::with_capacity(self.spots.len() + self.tickets.len());
        for entry in self.spots.iter() {
            let spot = entry.value();
            let mut mutations = Vec::with_capacity(spot.slots.len() + 1);
            mutations.push(Mutation::SpotCreated(SpotRecord {
                id: spot.id,
                name: spot.name.clone(),
                note: spot.note.clone(),
            }));
            mutations.extend(spot.slots.iter().map(|slot| Mutation::SlotCreated(slot.snapshot())));
            commits.push(Commit { mutations });
        }
        for entry in self.tickets.iter() {
            commits.push(Commit {
                mutations: vec![Mutation::TicketCreated(entry.value().snapshot())],
            });
        }
        let count = commits.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { commits, response: tx })
            .await
            .map_err(|_| CatalogError::TransactionFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| CatalogError::TransactionFailure("WAL writer dropped response".into()))?
            .map_err(|e| CatalogError::TransactionFailure(format!("WAL compaction: {e}")))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(commits = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
