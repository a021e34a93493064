use std::sync::Arc;

use tracing::debug;

use crate::catalog::{Catalog, CatalogError, RowKey};
use crate::ids::make_ticket_id;
use crate::limits::MAX_NOTE_LEN;
use crate::model::*;

/// Issues tickets against the earliest open slot of a spot.
#[derive(Clone)]
pub struct ReservationEngine {
    catalog: Arc<Catalog>,
}

impl ReservationEngine {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Reserve the earliest-starting available slot at `spot_name`.
    ///
    /// `Ok(None)` means the spot exists but has nothing left at or after
    /// `now` (wall clock when `None`). The ticket row and the slot counter
    /// are written in one unit of work, under the slot's row lock, and the
    /// ticket's serial number is the counter value read under that lock.
    pub async fn reserve(
        &self,
        spot_name: &str,
        note: Option<String>,
        now: Option<Secs>,
    ) -> Result<Option<TicketView>, CatalogError> {
        if note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(CatalogError::Invalid("note too long"));
        }
        let now = now.unwrap_or_else(now_secs);
        let spot_id = self.catalog.find_spot_id_by_name(spot_name)?;
        let candidates = self.catalog.list_available_slots(spot_id, now);

        let mut uow = self.catalog.begin();
        for candidate in candidates {
            let slot = self.catalog.lock_slot(&mut uow, candidate.id).await?;
            if !slot.is_available(now) {
                // Filled up between listing and locking; try the next one.
                uow.release(RowKey::Slot(slot.id));
                continue;
            }

            let ticket_id = make_ticket_id();
            self.catalog.create_ticket(
                &mut uow,
                TicketRecord {
                    ticket_id,
                    slot_id: slot.id,
                    spot_id,
                    presentments: 0,
                    note: note.clone(),
                    serial_number: slot.reservations,
                },
            )?;
            self.catalog.increment_reservation_counter(&mut uow, slot.id).await?;
            uow.commit().await?;

            metrics::counter!(crate::observability::TICKETS_ISSUED_TOTAL).increment(1);
            debug!(
                spot = spot_name,
                slot_id = slot.id,
                ticket_id,
                serial_number = slot.reservations,
                "ticket issued"
            );
            return Ok(Some(TicketView {
                slot: slot.to_view(),
                spot_name: spot_name.to_string(),
                spot_id,
                ticket_id,
                note,
            }));
        }

        metrics::counter!(crate::observability::SOLD_OUT_TOTAL).increment(1);
        debug!(spot = spot_name, now, "no available slot");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;

    use super::*;

    const FUTURE: Secs = 4_000_000_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spotbook_test_reservation");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str) -> ReservationEngine {
        ReservationEngine::new(Arc::new(Catalog::open(test_wal_path(name)).unwrap()))
    }

    fn spot(name: &str, slots: Vec<SlotView>) -> SpotView {
        SpotView { name: name.into(), note: None, slots }
    }

    #[tokio::test]
    async fn unknown_spot_is_not_found() {
        let engine = engine("unknown_spot.wal");
        let result = engine.reserve("Nowhere", None, None).await;
        assert!(matches!(result, Err(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn no_slots_is_empty_result() {
        let engine = engine("no_slots.wal");
        engine.catalog().create_spot(&spot("Empty", vec![])).await.unwrap();
        assert_eq!(engine.reserve("Empty", None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn past_slots_are_skipped() {
        let engine = engine("past_slots.wal");
        engine
            .catalog()
            .create_spot(&spot("Matinee", vec![SlotView::new(100), SlotView::new(200)]))
            .await
            .unwrap();
        assert_eq!(engine.reserve("Matinee", None, Some(201)).await.unwrap(), None);

        let ticket = engine.reserve("Matinee", None, Some(150)).await.unwrap().unwrap();
        assert_eq!(ticket.slot.start, UnixTime::new(200));
    }

    #[tokio::test]
    async fn earliest_slot_wins_regardless_of_declaration_order() {
        let engine = engine("earliest.wal");
        engine
            .catalog()
            .create_spot(&spot(
                "Clinic",
                vec![
                    SlotView::new(FUTURE + 300).with_note("late"),
                    SlotView::new(FUTURE + 100).with_note("early"),
                    SlotView::new(FUTURE + 200).with_note("middle"),
                ],
            ))
            .await
            .unwrap();

        let ticket = engine.reserve("Clinic", None, None).await.unwrap().unwrap();
        assert_eq!(ticket.slot.note.as_deref(), Some("early"));
    }

    #[tokio::test]
    async fn ticket_view_is_fully_populated() {
        let engine = engine("ticket_view.wal");
        let spot_id = engine
            .catalog()
            .create_spot(&spot(
                "Gallery",
                vec![SlotView::new(FUTURE).with_end(FUTURE + 3600).with_capacity(4).with_note("tour")],
            ))
            .await
            .unwrap();

        let ticket = engine
            .reserve("Gallery", Some("group of 3".into()), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ticket.spot_name, "Gallery");
        assert_eq!(ticket.spot_id, spot_id);
        assert_eq!(ticket.note.as_deref(), Some("group of 3"));
        assert_eq!(ticket.slot.start, UnixTime::new(FUTURE));
        assert_eq!(ticket.slot.end, Some(UnixTime::new(FUTURE + 3600)));
        assert_eq!(ticket.slot.capacity, Some(4));
        assert_eq!(ticket.slot.note.as_deref(), Some("tour"));

        let stored = engine.catalog().get_ticket(ticket.ticket_id).unwrap();
        assert_eq!(stored.spot_id, spot_id);
        assert_eq!(stored.presentments, 0);
        assert_eq!(stored.serial_number, 0);
        assert_eq!(stored.note.as_deref(), Some("group of 3"));
    }

    #[tokio::test]
    async fn concert_capacity_one_issues_twice() {
        let engine = engine("concert.wal");
        engine
            .catalog()
            .create_spot(&spot("Concert", vec![SlotView::new(FUTURE).with_capacity(1)]))
            .await
            .unwrap();

        let first = engine.reserve("Concert", None, None).await.unwrap().unwrap();
        let second = engine.reserve("Concert", None, None).await.unwrap().unwrap();
        assert_eq!(engine.reserve("Concert", None, None).await.unwrap(), None);

        assert_eq!(engine.catalog().get_ticket(first.ticket_id).unwrap().serial_number, 0);
        assert_eq!(engine.catalog().get_ticket(second.ticket_id).unwrap().serial_number, 1);
    }

    #[tokio::test]
    async fn zero_capacity_still_issues_once() {
        let engine = engine("zero_capacity.wal");
        engine
            .catalog()
            .create_spot(&spot("Closed", vec![SlotView::new(FUTURE).with_capacity(0)]))
            .await
            .unwrap();
        assert!(engine.reserve("Closed", None, None).await.unwrap().is_some());
        assert_eq!(engine.reserve("Closed", None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_slot_moves_to_next() {
        let engine = engine("next_slot.wal");
        engine
            .catalog()
            .create_spot(&spot(
                "Ferry",
                vec![
                    SlotView::new(FUTURE).with_capacity(0),
                    SlotView::new(FUTURE + 60).with_capacity(0),
                ],
            ))
            .await
            .unwrap();

        let a = engine.reserve("Ferry", None, None).await.unwrap().unwrap();
        let b = engine.reserve("Ferry", None, None).await.unwrap().unwrap();
        assert_eq!(a.slot.start, UnixTime::new(FUTURE));
        assert_eq!(b.slot.start, UnixTime::new(FUTURE + 60));
        assert_eq!(engine.reserve("Ferry", None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_reservations_get_contiguous_serials() {
        const K: i64 = 32;
        let engine = engine("concurrent.wal");
        let spot_id = engine
            .catalog()
            .create_spot(&spot("Arena", vec![SlotView::new(FUTURE).with_capacity(K - 1)]))
            .await
            .unwrap();

        let handles: Vec<_> = (0..K)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.reserve("Arena", None, None).await })
            })
            .collect();
        let tickets: Vec<TicketView> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap().unwrap())
            .collect();

        let ids: HashSet<i64> = tickets.iter().map(|t| t.ticket_id).collect();
        assert_eq!(ids.len(), K as usize);

        let mut serials: Vec<i64> = tickets
            .iter()
            .map(|t| engine.catalog().get_ticket(t.ticket_id).unwrap().serial_number)
            .collect();
        serials.sort();
        assert_eq!(serials, (0..K).collect::<Vec<_>>());

        let slot = &engine.catalog().slots_of(spot_id)[0];
        assert_eq!(slot.reservations, K);
        assert_eq!(engine.reserve("Arena", None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversubscribed_never_over_issues() {
        let engine = engine("oversubscribed.wal");
        let spot_id = engine
            .catalog()
            .create_spot(&spot("Tiny", vec![SlotView::new(FUTURE).with_capacity(4)]))
            .await
            .unwrap();

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.reserve("Tiny", None, None).await })
            })
            .collect();
        let issued = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(Some(_)))))
            .count();

        // capacity 4 admits 5 issuances
        assert_eq!(issued, 5);
        assert_eq!(engine.catalog().slots_of(spot_id)[0].reservations, 5);
    }

    #[tokio::test]
    async fn oversized_note_rejected() {
        let engine = engine("long_note.wal");
        engine
            .catalog()
            .create_spot(&spot("Notes", vec![SlotView::new(FUTURE)]))
            .await
            .unwrap();
        let note = "x".repeat(MAX_NOTE_LEN + 1);
        let result = engine.reserve("Notes", Some(note), None).await;
        assert!(matches!(result, Err(CatalogError::Invalid(_))));
        assert_eq!(engine.catalog().ticket_count(), 0);
    }
}
