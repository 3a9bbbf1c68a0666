/// A half-open slice `[start, end)` of the source, tagged with its position in the plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// The checksum a worker produced for exactly one [`ByteRange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartialChecksum {
    pub index: usize,
    pub start: u64,
    pub byte_length: u64,
    pub checksum: u32,
}

pub type ByteCount = u64;
