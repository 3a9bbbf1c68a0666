use std::io;

use thiserror::Error;

use crate::combiner::CombineError;
use crate::planner::PlanError;
use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("invalid chunk plan: {0}")]
    Plan(#[from] PlanError),

    #[error("failed to read chunk {index} ({count} bytes at offset {offset}): {source}")]
    Read {
        index: usize,
        offset: u64,
        count: u64,
        source: io::Error,
    },

    #[error("internal error while combining checksums: {0}")]
    Combine(#[from] CombineError),

    #[error("a checksum worker stopped before reporting its chunk")]
    WorkerLost,
}

pub type Result<T> = std::result::Result<T, ChecksumError>;
