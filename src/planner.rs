use thiserror::Error;

use crate::shared_types::ByteRange;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("part size must be greater than zero")]
    ZeroPartSize,
}

/// Number of parts `[0, length)` splits into, `ceil(length / part_size)`.
pub fn part_count(length: u64, part_size: u64) -> Result<u64, PlanError> {
    if part_size == 0 {
        return Err(PlanError::ZeroPartSize);
    }
    Ok(length.div_ceil(part_size))
}

/// Splits `[0, length)` into ordered, contiguous ranges of `part_size` bytes.
/// The last range takes whatever is left, between 1 and `part_size` bytes.
/// An empty source has no ranges.
pub fn plan_chunks(length: u64, part_size: u64) -> Result<Vec<ByteRange>, PlanError> {
    let count = part_count(length, part_size)?;
    let ranges = (0..count)
        .map(|i| {
            let start = i * part_size;
            let end = start.saturating_add(part_size).min(length);
            ByteRange {
                index: i as usize,
                start,
                end,
            }
        })
        .collect::<Vec<_>>();
    Ok(ranges)
}
