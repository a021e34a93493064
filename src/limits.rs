/// Largest capacity a slot may declare (and the default when none is given).
pub const MAX_CAPACITY: i64 = 1 << 13;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTE_LEN: usize = 1024;
pub const MAX_SLOTS_PER_SPOT: usize = 1024;
