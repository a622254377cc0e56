//! Wire constants
//!
//! All multi-byte values are big-endian. Pool references are `u16` with
//! `0xFFFF` meaning null.

use super::events::Version;

/// Stream header magic, followed by major and minor version bytes.
pub const MAGIC: [u8; 4] = *b"BIGV";

// Record tags
pub const BEGIN_GROUP: u8 = 0x00;
pub const END_GROUP: u8 = 0x01;
pub const BEGIN_GRAPH: u8 = 0x02;
pub const END_GRAPH: u8 = 0x03;
pub const PROPERTY: u8 = 0x04;
pub const NODE: u8 = 0x05;
pub const EDGE: u8 = 0x06;
pub const POOL_DEFINE: u8 = 0x07;

// Pool entry kinds
pub const POOL_STRING: u8 = 0;
pub const POOL_CLASS: u8 = 1;
pub const POOL_METHOD: u8 = 2;
pub const POOL_FIELD: u8 = 3;
pub const POOL_NODE_CLASS: u8 = 4;
pub const POOL_SOURCE_POSITION: u8 = 5;

// Property value kinds
pub const PROPERTY_INT: u8 = 0;
pub const PROPERTY_LONG: u8 = 1;
pub const PROPERTY_DOUBLE: u8 = 2;
pub const PROPERTY_TRUE: u8 = 3;
pub const PROPERTY_FALSE: u8 = 4;
pub const PROPERTY_STRING: u8 = 5;
pub const PROPERTY_STRING_ARRAY: u8 = 6;
pub const PROPERTY_BLOB: u8 = 7;
pub const PROPERTY_POOL: u8 = 8;

// Edge kinds
pub const EDGE_INPUT: u8 = 0;
pub const EDGE_SUCCESSOR: u8 = 1;

pub fn is_supported(version: Version) -> bool {
    matches!(version.major, 5 | 6)
}

/// Header length: magic plus two version bytes.
pub const HEADER_LEN: u64 = MAGIC.len() as u64 + 2;
