//! Fixed-width binary record codec for the `calls` output stream.
//!
//! One record per distinct call edge:
//! `caller (W bytes) || callsite (W bytes) || count (8 bytes)`, host byte
//! order, no header or footer. W is 4 or 8 depending on the configured
//! [`AddressWidth`]; consumers recover the record count from the file
//! length.
//!
//! Encoding writes into a caller-provided stack buffer so the flush path,
//! which may run in a signal context, performs no heap allocation.

use crate::call_edge::{AddressWidth, CallEdge};
use crate::counter_store::CounterEntry;

/// Serialized size of the count field.
pub const COUNT_BYTES: usize = 8;

/// Largest possible record (64-bit addresses).
pub const MAX_RECORD_BYTES: usize = 8 + 8 + COUNT_BYTES;

/// Serialized size of one record at `width`.
pub const fn record_bytes(width: AddressWidth) -> usize {
    width.addr_bytes() * 2 + COUNT_BYTES
}

/// One decoded record, identical in content to a [`CounterEntry`].
pub type CallRecord = CounterEntry;

/// Encode `entry` into the front of `buf`, returning the number of bytes
/// written (`record_bytes(width)`).
///
/// The caller guarantees both addresses fit `width`; the session enforces
/// this by promoting the width before flush when an oversized address was
/// recorded.
pub fn encode_record(width: AddressWidth, entry: &CounterEntry, buf: &mut [u8; MAX_RECORD_BYTES]) -> usize {
    let mut at = 0;
    match width {
        AddressWidth::W32 => {
            buf[at..at + 4].copy_from_slice(&(entry.edge.caller() as u32).to_ne_bytes());
            at += 4;
            buf[at..at + 4].copy_from_slice(&(entry.edge.callsite() as u32).to_ne_bytes());
            at += 4;
        }
        AddressWidth::W64 => {
            buf[at..at + 8].copy_from_slice(&entry.edge.caller().to_ne_bytes());
            at += 8;
            buf[at..at + 8].copy_from_slice(&entry.edge.callsite().to_ne_bytes());
            at += 8;
        }
    }
    buf[at..at + COUNT_BYTES].copy_from_slice(&entry.count.to_ne_bytes());
    at + COUNT_BYTES
}

/// Decode one record from `bytes`, which must be exactly
/// `record_bytes(width)` long.
pub fn decode_record(width: AddressWidth, bytes: &[u8]) -> CallRecord {
    debug_assert_eq!(bytes.len(), record_bytes(width));
    let (caller, callsite, count_at) = match width {
        AddressWidth::W32 => {
            let caller = u32::from_ne_bytes(bytes[0..4].try_into().unwrap()) as u64;
            let callsite = u32::from_ne_bytes(bytes[4..8].try_into().unwrap()) as u64;
            (caller, callsite, 8)
        }
        AddressWidth::W64 => {
            let caller = u64::from_ne_bytes(bytes[0..8].try_into().unwrap());
            let callsite = u64::from_ne_bytes(bytes[8..16].try_into().unwrap());
            (caller, callsite, 16)
        }
    };
    let count = u64::from_ne_bytes(bytes[count_at..count_at + COUNT_BYTES].try_into().unwrap());
    CallRecord {
        edge: CallEdge::new(caller, callsite),
        count,
    }
}
