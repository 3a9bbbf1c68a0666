//! Parallel CRC32C checksums of random-access sources.
//!
//! The source is split into fixed-size chunks, each chunk is checksummed on a
//! worker pool, and the partial checksums are combined into the value a single
//! sequential pass would have produced.

#[macro_use]
extern crate log;

pub mod checksummer;
pub mod combiner;
pub mod crc;
pub mod error;
pub mod planner;
pub mod progress_reporter;
pub mod shared_types;
pub mod source;

pub use checksummer::{parallel_checksum, parallel_checksum_file, ChecksumPreferences, DEFAULT_PART_SIZE};
pub use combiner::CombineStrategy;
pub use crc::{combine, crc32c};
pub use error::{ChecksumError, Result};
pub use source::{open_source, RandomAccessSource};
