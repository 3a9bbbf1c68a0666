//! Reduction of per-chunk checksums into the checksum of the whole source.
//!
//! Partial results may arrive in any order. Both strategies only ever merge
//! through [`Span::fuse`], which refuses operands that do not touch, so a
//! planning or bookkeeping bug surfaces as an error instead of a wrong number.

use clap::ValueEnum;
use rayon::prelude::*;
use thiserror::Error;

use crate::crc;
use crate::shared_types::PartialChecksum;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CombineError {
    #[error("cannot combine [{left_start}, {left_end}) with range starting at {right_start}: not adjacent")]
    NotAdjacent {
        left_start: u64,
        left_end: u64,
        right_start: u64,
    },
    #[error("chunk {index} is outside the expected {expected} chunks")]
    UnexpectedChunk { index: usize, expected: usize },
    #[error("chunk {index} was reported twice")]
    DuplicateChunk { index: usize },
    #[error("chunk {index} covers [{start}, {end}), overlapping an earlier result")]
    Overlap { index: usize, start: u64, end: u64 },
    #[error("chunk {index} has length {actual}, expected {expected}")]
    LengthMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },
    #[error("chunk {index} was never reported")]
    MissingChunk { index: usize },
    #[error("{remaining} unfused intervals remain after all chunks were combined")]
    Unfused { remaining: usize },
    #[error("combined checksum covers [{start}, {end}) instead of [0, {length})")]
    Incomplete { start: u64, end: u64, length: u64 },
}

/// Which reduction a checksum run uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CombineStrategy {
    /// Index-addressed slots reduced pairwise in parallel rounds.
    #[default]
    Tree,
    /// Sorted intervals fused as each result arrives.
    Fusion,
}

/// A checksum together with the byte range it covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: u64,
    pub len: u64,
    pub checksum: u32,
}

impl Span {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// The checksum of an empty prefix.
    pub fn empty() -> Self {
        Self {
            start: 0,
            len: 0,
            checksum: crc::crc32c(&[]),
        }
    }

    /// Joins `self` with the span that immediately follows it.
    pub fn fuse(self, right: Span) -> Result<Span, CombineError> {
        if self.end() != right.start {
            return Err(CombineError::NotAdjacent {
                left_start: self.start,
                left_end: self.end(),
                right_start: right.start,
            });
        }
        Ok(Span {
            start: self.start,
            len: self.len + right.len,
            checksum: crc::combine(self.checksum, right.checksum, right.len),
        })
    }
}

impl From<PartialChecksum> for Span {
    fn from(part: PartialChecksum) -> Self {
        Self {
            start: part.start,
            len: part.byte_length,
            checksum: part.checksum,
        }
    }
}

pub trait Combiner {
    /// Takes ownership of one worker result.
    fn absorb(&mut self, part: PartialChecksum) -> Result<(), CombineError>;

    /// Reduces everything absorbed so far to the checksum of `[0, length)`.
    fn finish(self) -> Result<u32, CombineError>;
}

fn check_covers(span: Span, length: u64) -> Result<u32, CombineError> {
    if span.start != 0 || span.len != length {
        return Err(CombineError::Incomplete {
            start: span.start,
            end: span.end(),
            length,
        });
    }
    Ok(span.checksum)
}

/// Strategy B: every result lands in `slots[index]`; once all are present the
/// slots are folded in rounds of doubling stride. Merges within a round are
/// independent and run on the rayon pool.
#[derive(Debug)]
pub struct TreeCombiner {
    slots: Vec<Option<Span>>,
    part_size: u64,
    length: u64,
}

impl TreeCombiner {
    pub fn new(part_count: usize, part_size: u64, length: u64) -> Self {
        Self {
            slots: vec![None; part_count],
            part_size,
            length,
        }
    }

    fn expected_len(&self, index: usize) -> u64 {
        let start = (index as u64).saturating_mul(self.part_size);
        start.saturating_add(self.part_size).min(self.length) - start.min(self.length)
    }
}

impl Combiner for TreeCombiner {
    fn absorb(&mut self, part: PartialChecksum) -> Result<(), CombineError> {
        let expected = self.slots.len();
        let expected_len = self.expected_len(part.index);
        let slot = self
            .slots
            .get_mut(part.index)
            .ok_or(CombineError::UnexpectedChunk {
                index: part.index,
                expected,
            })?;
        if slot.is_some() {
            return Err(CombineError::DuplicateChunk { index: part.index });
        }
        if part.byte_length != expected_len {
            return Err(CombineError::LengthMismatch {
                index: part.index,
                expected: expected_len,
                actual: part.byte_length,
            });
        }
        *slot = Some(part.into());
        Ok(())
    }

    fn finish(self) -> Result<u32, CombineError> {
        let mut spans = self
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or(CombineError::MissingChunk { index }))
            .collect::<Result<Vec<_>, _>>()?;
        if spans.is_empty() {
            return check_covers(Span::empty(), self.length);
        }

        // Each group of 2 * stride slots folds its second half's head into its
        // own head. Slot lengths accumulate, so a short tail or a part count
        // that is not a power of two never claims bytes past the end.
        let mut stride = 1;
        while stride < spans.len() {
            spans
                .par_chunks_mut(2 * stride)
                .try_for_each(|group| -> Result<(), CombineError> {
                    if group.len() > stride {
                        group[0] = group[0].fuse(group[stride])?;
                    }
                    Ok(())
                })?;
            trace!("tree round with stride {stride} done");
            stride *= 2;
        }

        check_covers(spans[0], self.length)
    }
}

/// Strategy A: keeps unmerged intervals sorted by end offset and fuses
/// neighbours as soon as they touch. Does not need to know chunk indices up
/// front, only how many bytes the whole source has.
#[derive(Debug)]
pub struct FusionCombiner {
    intervals: Vec<Span>,
    length: u64,
}

impl FusionCombiner {
    pub fn new(length: u64) -> Self {
        Self {
            intervals: Vec::new(),
            length,
        }
    }

    pub fn pending(&self) -> usize {
        self.intervals.len()
    }
}

impl Combiner for FusionCombiner {
    fn absorb(&mut self, part: PartialChecksum) -> Result<(), CombineError> {
        let span = Span::from(part);
        let overlap = CombineError::Overlap {
            index: part.index,
            start: span.start,
            end: span.end(),
        };

        let mut at = self.intervals.partition_point(|s| s.end() <= span.start);
        if let Some(next) = self.intervals.get(at) {
            if next.start < span.end() {
                return Err(overlap);
            }
        }
        if span.len == 0 {
            return Err(overlap);
        }

        self.intervals.insert(at, span);
        if at > 0 && self.intervals[at - 1].end() == span.start {
            let right = self.intervals.remove(at);
            at -= 1;
            self.intervals[at] = self.intervals[at].fuse(right)?;
        }
        if at + 1 < self.intervals.len() && self.intervals[at].end() == self.intervals[at + 1].start {
            let right = self.intervals.remove(at + 1);
            self.intervals[at] = self.intervals[at].fuse(right)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<u32, CombineError> {
        match self.intervals.as_slice() {
            [] => check_covers(Span::empty(), self.length),
            [only] => check_covers(*only, self.length),
            many => Err(CombineError::Unfused {
                remaining: many.len(),
            }),
        }
    }
}
