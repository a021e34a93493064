use crate::model::*;

use super::{Catalog, CatalogError};

impl Catalog {
    /// Resolve a spot name to its id.
    pub fn find_spot_id_by_name(&self, name: &str) -> Result<i64, CatalogError> {
        let ids = self
            .names
            .get(name)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        match ids.as_slice() {
            [id] => Ok(*id),
            [] => Err(CatalogError::NotFound(format!("spot {name:?}"))),
            many => Err(CatalogError::Inconsistent(format!(
                "spot name {name:?} associated with {} ids",
                many.len()
            ))),
        }
    }

    /// Slots of `spot_id` that still admit a reservation and start at or
    /// after `now`, earliest first. Empty for an unknown spot.
    pub fn list_available_slots(&self, spot_id: i64, now: Secs) -> Vec<SlotRecord> {
        let Some(spot) = self.spots.get(&spot_id).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        spot.slots
            .iter()
            .map(|slot| slot.snapshot())
            .filter(|slot| slot.is_available(now))
            .collect()
    }

    pub fn get_spot(&self, spot_id: i64) -> Option<SpotRecord> {
        self.spots.get(&spot_id).map(|e| SpotRecord {
            id: e.id,
            name: e.name.clone(),
            note: e.note.clone(),
        })
    }

    /// Every slot of a spot regardless of availability, earliest first.
    pub fn slots_of(&self, spot_id: i64) -> Vec<SlotRecord> {
        self.spots
            .get(&spot_id)
            .map(|e| e.slots.iter().map(|slot| slot.snapshot()).collect())
            .unwrap_or_default()
    }

    pub fn get_slot(&self, slot_id: i64) -> Option<SlotRecord> {
        self.slots.get(&slot_id).map(|e| e.snapshot())
    }

    pub fn get_ticket(&self, ticket_id: i64) -> Option<TicketRecord> {
        self.tickets.get(&ticket_id).map(|e| e.snapshot())
    }

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }
}
