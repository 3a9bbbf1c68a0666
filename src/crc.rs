//! CRC32C (Castagnoli) over in-memory buffers, and the combine operator that
//! joins the checksums of two adjacent ranges without touching their bytes.
//!
//! Combining relies on CRC being linear over GF(2):
//!
//! ```text
//! crc(A || B) = shift(crc(A), 8 * len(B)) XOR crc(B)
//! ```
//!
//! where `shift` is the effect of feeding zero bits through the CRC register.
//! Shifting by `n` bytes is a 32x32 bit-matrix raised to the `n`th power, which
//! square-and-multiply evaluates in `O(log n)` matrix products.

/// Reflected Castagnoli polynomial (0x1EDC6F41 bit-reversed).
pub const CRC32C_POLY: u32 = 0x82F6_3B78;

/// Byte-at-a-time lookup table, built at compile time and never written.
static CRC32C_TABLE: [u32; 256] = build_table(CRC32C_POLY);

/// Operator that advances a raw CRC register past one zero byte.
static SHIFT_ONE_BYTE: Gf2Matrix = Gf2Matrix::shift_one_bit(CRC32C_POLY)
    .square()
    .square()
    .square();

const fn build_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC32C of `data`, with the usual `!0` initial value and final inversion.
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c_append(0, data)
}

/// Continues a finalized checksum `crc` over more bytes, so that
/// `crc32c_append(crc32c(a), b) == crc32c(a ++ b)`.
pub fn crc32c_append(crc: u32, data: &[u8]) -> u32 {
    let mut reg = !crc;
    for &byte in data {
        reg = CRC32C_TABLE[((reg ^ byte as u32) & 0xff) as usize] ^ (reg >> 8);
    }
    !reg
}

/// Checksum of `A || B` given `crc_left = crc32c(A)`, `crc_right = crc32c(B)`
/// and `len_right = len(B)`.
///
/// Operand order follows byte order: `crc_left` must cover the bytes that come
/// first in the source. The operator is associative over contiguous ranges
/// but not commutative.
pub fn combine(crc_left: u32, crc_right: u32, len_right: u64) -> u32 {
    if len_right == 0 {
        return crc_left;
    }

    let mut power = SHIFT_ONE_BYTE;
    let mut shift = Gf2Matrix::identity();
    let mut remaining = len_right;
    while remaining > 0 {
        if remaining & 1 != 0 {
            shift = shift.mul_mat(&power);
        }
        power = power.square();
        remaining >>= 1;
    }

    shift.mul_vec(crc_left) ^ crc_right
}

/// A 32x32 matrix over GF(2). Column `i` is the image of bit `i`.
#[derive(Clone, Copy)]
struct Gf2Matrix([u32; 32]);

impl Gf2Matrix {
    const fn identity() -> Self {
        let mut cols = [0u32; 32];
        let mut i = 0;
        while i < 32 {
            cols[i] = 1 << i;
            i += 1;
        }
        Self(cols)
    }

    /// One reflected register step: `reg >> 1`, xored with `poly` when the
    /// low bit falls off.
    const fn shift_one_bit(poly: u32) -> Self {
        let mut cols = [0u32; 32];
        cols[0] = poly;
        let mut i = 1;
        while i < 32 {
            cols[i] = 1 << (i - 1);
            i += 1;
        }
        Self(cols)
    }

    const fn mul_vec(&self, vec: u32) -> u32 {
        let mut out = 0u32;
        let mut i = 0;
        while i < 32 {
            if vec & (1 << i) != 0 {
                out ^= self.0[i];
            }
            i += 1;
        }
        out
    }

    const fn mul_mat(&self, other: &Self) -> Self {
        let mut cols = [0u32; 32];
        let mut i = 0;
        while i < 32 {
            cols[i] = self.mul_vec(other.0[i]);
            i += 1;
        }
        Self(cols)
    }

    const fn square(self) -> Self {
        self.mul_mat(&self)
    }
}
