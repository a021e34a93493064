use serde::{Deserialize, Serialize};

use crate::limits::MAX_CAPACITY;

/// Unix seconds. Every stored and wire time is one of these.
pub type Secs = i64;

pub fn now_secs() -> Secs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as Secs)
        .unwrap_or(0)
}

/// Availability predicate shared by listing and the reservation re-check.
///
/// Admits a slot while `reservations <= capacity`, so a slot of capacity N
/// hands out N + 1 tickets before it drops out.
pub fn slot_admits(reservations: i64, capacity: i64, start: Secs, now: Secs) -> bool {
    reservations <= capacity && start >= now
}

// ── Client-facing values ─────────────────────────────────────────

/// Integer unix seconds, wrapped so it never passes for some other integer.
/// Serialized as `{"seconds": N}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTime {
    pub seconds: Secs,
}

impl UnixTime {
    pub fn new(seconds: Secs) -> Self {
        Self { seconds }
    }
}

fn default_capacity() -> Option<i64> {
    Some(MAX_CAPACITY)
}

/// A reservable window of time as the client sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub start: UnixTime,
    #[serde(default)]
    pub end: Option<UnixTime>,
    #[serde(default = "default_capacity")]
    pub capacity: Option<i64>,
    #[serde(default)]
    pub note: Option<String>,
}

impl SlotView {
    pub fn new(start: Secs) -> Self {
        Self {
            start: UnixTime::new(start),
            end: None,
            capacity: default_capacity(),
            note: None,
        }
    }

    pub fn with_end(mut self, end: Secs) -> Self {
        self.end = Some(UnixTime::new(end));
        self
    }

    pub fn with_capacity(mut self, capacity: i64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Capacity stored for this slot; an explicit `null` falls back to the maximum.
    pub fn effective_capacity(&self) -> i64 {
        self.capacity.unwrap_or(MAX_CAPACITY)
    }
}

/// An event, venue or location and the slots it offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotView {
    pub name: String,
    #[serde(default)]
    pub note: Option<String>,
    pub slots: Vec<SlotView>,
}

/// What a client receives for a successful reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketView {
    pub slot: SlotView,
    pub spot_name: String,
    pub spot_id: i64,
    pub ticket_id: i64,
    #[serde(default)]
    pub note: Option<String>,
}

// ── Stored records ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotRecord {
    pub id: i64,
    pub name: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub id: i64,
    pub spot_id: i64,
    pub start: Secs,
    pub end: Option<Secs>,
    /// Max number of tickets to allow issuing.
    pub capacity: i64,
    pub note: Option<String>,
    /// Number of tickets issued so far.
    pub reservations: i64,
}

impl SlotRecord {
    pub fn is_available(&self, now: Secs) -> bool {
        slot_admits(self.reservations, self.capacity, self.start, now)
    }

    /// Client view carrying the stored capacity, not the input default.
    pub fn to_view(&self) -> SlotView {
        SlotView {
            start: UnixTime::new(self.start),
            end: self.end.map(UnixTime::new),
            capacity: Some(self.capacity),
            note: self.note.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub ticket_id: i64,
    pub slot_id: i64,
    pub spot_id: i64,
    pub presentments: i64,
    pub note: Option<String>,
    /// 0-based position of this ticket within its slot.
    pub serial_number: i64,
}

// ── WAL record ───────────────────────────────────────────────────

/// A single row-level change. Counter changes carry the written-back value,
/// not a delta, so replay reproduces state exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    SpotCreated(SpotRecord),
    SlotCreated(SlotRecord),
    TicketCreated(TicketRecord),
    ReservationsWritten { slot_id: i64, reservations: i64 },
    PresentmentsWritten { ticket_id: i64, presentments: i64 },
}

/// Everything one unit of work changed. The WAL frames whole commits, so a
/// torn write loses the entire commit and never half of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub mutations: Vec<Mutation>,
}
