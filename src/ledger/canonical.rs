//! Canonical Encoder
//!
//! Deterministic byte layout hashed into every record:
//!
//! ```text
//! DOMAIN_TAG | len(stream_id) stream_id | sequence (u64 BE) | value
//! ```
//!
//! Values are tag-prefixed. Lengths and counts are u64 big-endian, integers
//! are 16-byte big-endian two's complement, floats are their IEEE-754 bits,
//! map entries are emitted in ascending key byte order.

use crate::ledger::payload::Payload;
use crate::ledger::stream::StreamId;

pub const DOMAIN_TAG: &[u8] = b"chain-ledger/v1\0";

const TAG_ABSENT: u8 = 0x00;
const TAG_NULL: u8 = 0x01;
const TAG_FALSE: u8 = 0x02;
const TAG_TRUE: u8 = 0x03;
const TAG_INT: u8 = 0x04;
const TAG_FLOAT: u8 = 0x05;
const TAG_TEXT: u8 = 0x06;
const TAG_LIST: u8 = 0x07;
const TAG_MAP: u8 = 0x08;

/// Canonical bytes of one record's hashed fields.
pub fn encode(payload: &Payload, stream_id: &StreamId, sequence: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(DOMAIN_TAG);
    write_len_prefixed(&mut out, stream_id.as_str().as_bytes());
    out.extend_from_slice(&sequence.to_be_bytes());
    write_value(&mut out, payload);
    out
}

fn write_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn write_value(out: &mut Vec<u8>, value: &Payload) {
    match value {
        Payload::Absent => out.push(TAG_ABSENT),
        Payload::Null => out.push(TAG_NULL),
        Payload::Bool(false) => out.push(TAG_FALSE),
        Payload::Bool(true) => out.push(TAG_TRUE),
        Payload::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i128::from(*i).to_be_bytes());
        }
        Payload::UInt(u) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i128::from(*u).to_be_bytes());
        }
        Payload::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Payload::Text(s) => {
            out.push(TAG_TEXT);
            write_len_prefixed(out, s.as_bytes());
        }
        Payload::List(items) => {
            out.push(TAG_LIST);
            out.extend_from_slice(&(items.len() as u64).to_be_bytes());
            for item in items {
                write_value(out, item);
            }
        }
        Payload::Map(entries) => {
            out.push(TAG_MAP);
            out.extend_from_slice(&(entries.len() as u64).to_be_bytes());
            // BTreeMap<String, _> iterates in byte order
            for (key, item) in entries {
                write_len_prefixed(out, key.as_bytes());
                write_value(out, item);
            }
        }
    }
}
