//! Identifier generation for spots, slots and tickets.
//!
//! Ids are 64-bit signed so they fit a single integer column. Spot and slot
//! ids mix fresh randomness with a hash of the value being stored, so two
//! calls on identical content still differ while every id stays tied to the
//! content that produced it.

use std::io::Cursor;

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("cannot serialize id input: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cannot hash id input: {0}")]
    Hash(#[from] std::io::Error),
}

fn fold(value: u128) -> u64 {
    (value >> 64) as u64 ^ value as u64
}

/// 128-bit MurmurHash3 (x64 variant, seed 0) of the canonical JSON form.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<u128, IdError> {
    let canonical = serde_json::to_vec(value)?;
    Ok(murmur3::murmur3_x64_128(&mut Cursor::new(canonical), 0)?)
}

/// Random 128 bits XOR content hash, folded to 64 bits.
pub fn make_id<T: Serialize + ?Sized>(value: &T) -> Result<i64, IdError> {
    let random = Uuid::new_v4().as_u128();
    let hash = content_hash(value)?;
    Ok((fold(random) ^ fold(hash)) as i64)
}

/// Tickets have no client-supplied content at issuance; randomness only.
pub fn make_ticket_id() -> i64 {
    fold(Uuid::new_v4().as_u128()) as i64
}
