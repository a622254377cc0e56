//! Binary Reader Module
//!
//! Turns the bytes of a dump into `Builder` callbacks:
//! - `ByteStream`: buffered, offset-tracking primitive decoder
//! - `BinaryReader`: tag-driven state machine (v5 and v6)
//! - `drive`: parse plus innermost-first unwind of unfinished regions

pub mod binary;
pub mod buffered;
pub mod events;
pub mod protocol;

pub use binary::{drive, BinaryReader};
pub use buffered::ByteStream;
pub use events::{
    Closure, Directive, GraphHeader, GroupHeader, RegionContent, RegionEnd, RegionHeader,
    RegionKind, RegionMark, StreamInfo, Version,
};
