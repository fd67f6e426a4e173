//! Bit-granular codec for sorted position lists.
//!
//! `encode(value, outof)` spends `ceil(log2(outof))` bits, or one bit less for
//! values in the middle of the range when `outof` isn't a power of two.
//! Interpolative coding applies it recursively: the middle element of a run
//! is coded relative to the range its neighbours leave it, then each half is
//! coded the same way.
//!
//! Bits are packed least significant first.

use crate::core::error::{Error, Result};

/// Number of bits needed to write any value below `outof`
fn bits_for(outof: u32) -> u32 {
    let max = outof.saturating_sub(1);
    32 - max.leading_zeros()
}

pub struct BitWriter {
    buf: Vec<u8>,
    acc: u64,
    n_bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::with_prefix(Vec::new())
    }

    /// Start writing after bytes already in `buf`
    pub fn with_prefix(buf: Vec<u8>) -> Self {
        BitWriter { buf, acc: 0, n_bits: 0 }
    }

    pub fn encode(&mut self, value: u32, outof: u32) -> Result<()> {
        if value >= outof {
            return Err(Error::range(format!("{} doesn't fit in a range of {}", value, outof)));
        }
        let mut bits = bits_for(outof);
        let mut value = value as u64;
        let spare = (1u64 << bits) - outof as u64;
        if spare != 0 {
            let mid_start = (outof as u64 - spare) / 2;
            if value >= mid_start + spare {
                value = (value - (mid_start + spare)) | (1u64 << (bits - 1));
            } else if value >= mid_start {
                bits -= 1;
            }
        }

        self.acc |= value << self.n_bits;
        self.n_bits += bits;
        while self.n_bits >= 8 {
            self.buf.push(self.acc as u8);
            self.acc >>= 8;
            self.n_bits -= 8;
        }
        Ok(())
    }

    /// Code `pos[j+1..k]` given `pos[j]` and `pos[k]` are known to the reader.
    pub fn encode_interpolative(&mut self, pos: &[u32], mut j: usize, k: usize) -> Result<()> {
        while j + 1 < k {
            let mid = (j + k) / 2;
            let outof = pos[k] as i64 - pos[j] as i64 + j as i64 - k as i64 + 1;
            let lowest = pos[j] as i64 + (mid - j) as i64;
            let value = pos[mid] as i64 - lowest;
            if outof < 1 || value < 0 {
                return Err(Error::invalid_argument("Positions must be strictly increasing"));
            }
            self.encode(value as u32, outof as u32)?;
            self.encode_interpolative(pos, j, mid)?;
            j = mid;
        }
        Ok(())
    }

    /// Flush any partial byte and hand back the buffer
    pub fn freeze(mut self) -> Vec<u8> {
        if self.n_bits > 0 {
            self.buf.push(self.acc as u8);
        }
        self.buf
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// One pending interpolative range: everything strictly between `j` and `k`
/// is still to be decoded.
#[derive(Debug, Clone, Copy)]
struct Frame {
    j: u32,
    k: u32,
    pos_j: u32,
    pos_k: u32,
}

impl Frame {
    fn has_interior(&self) -> bool {
        self.j + 1 < self.k
    }

    fn outof(&self) -> i64 {
        self.pos_k as i64 - self.pos_j as i64 + self.j as i64 - self.k as i64 + 1
    }
}

pub struct BitReader {
    buf: Vec<u8>,
    idx: usize,
    acc: u64,
    n_bits: u32,
    current: Frame,
    stack: Vec<Frame>,
}

impl BitReader {
    /// Read bits from `buf[start..]`
    pub fn new(buf: Vec<u8>, start: usize) -> Self {
        BitReader {
            buf,
            idx: start,
            acc: 0,
            n_bits: 0,
            current: Frame { j: 0, k: 0, pos_j: 0, pos_k: 0 },
            stack: Vec::new(),
        }
    }

    fn read_bits(&mut self, count: u32) -> Result<u64> {
        while self.n_bits < count {
            let byte = *self.buf.get(self.idx)
                .ok_or_else(|| Error::corrupt("Bitstream ended early"))?;
            self.acc |= (byte as u64) << self.n_bits;
            self.idx += 1;
            self.n_bits += 8;
        }
        let value = self.acc & ((1u64 << count) - 1);
        self.acc >>= count;
        self.n_bits -= count;
        Ok(value)
    }

    pub fn decode(&mut self, outof: u32) -> Result<u32> {
        if outof == 0 {
            return Err(Error::corrupt("Bitstream range of zero"));
        }
        let bits = bits_for(outof);
        let spare = (1u64 << bits) - outof as u64;
        let value = if spare != 0 {
            let mid_start = (outof as u64 - spare) / 2;
            let mut p = self.read_bits(bits - 1)?;
            if p < mid_start && self.read_bits(1)? == 1 {
                p += mid_start + spare;
            }
            p
        } else {
            self.read_bits(bits)?
        };
        if value >= outof as u64 {
            return Err(Error::corrupt("Bitstream value out of range"));
        }
        Ok(value as u32)
    }

    /// Prime lazy decoding of the positions strictly between `j` and `k`.
    pub fn decode_interpolative(&mut self, j: u32, k: u32, pos_j: u32, pos_k: u32) {
        self.current = Frame { j, k, pos_j, pos_k };
        self.stack.clear();
    }

    /// Next position after the last one returned; after the interior runs out
    /// this yields `pos_k`.
    pub fn decode_interpolative_next(&mut self) -> Result<u32> {
        while !self.stack.is_empty() || self.current.has_interior() {
            if !self.current.has_interior() {
                let ret = self.current.pos_k;
                let Some(mut parent) = self.stack.pop() else {
                    break;
                };
                parent.j = (parent.j + parent.k) / 2;
                parent.pos_j = ret;
                self.current = parent;
                return Ok(ret);
            }
            self.stack.push(self.current);
            let frame = self.current;
            let mid = (frame.j + frame.k) / 2;
            let outof = frame.outof();
            if outof < 1 || outof > u32::MAX as i64 {
                return Err(Error::corrupt("Bad interpolative range"));
            }
            let offset = self.decode(outof as u32)?;
            let pos_mid = frame.pos_j as u64 + (mid - frame.j) as u64 + offset as u64;
            if pos_mid >= frame.pos_k as u64 {
                return Err(Error::corrupt("Interpolative position out of order"));
            }
            self.current.k = mid;
            self.current.pos_k = pos_mid as u32;
        }
        Ok(self.current.pos_k)
    }

    /// True once every byte is consumed and only zero padding remains
    pub fn check_all_gone(&self) -> bool {
        self.idx == self.buf.len() && self.n_bits <= 7 && self.acc == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_every_value() {
        for outof in 1..=70u32 {
            let mut writer = BitWriter::new();
            for v in 0..outof {
                writer.encode(v, outof).unwrap();
            }
            let mut reader = BitReader::new(writer.freeze(), 0);
            for v in 0..outof {
                assert_eq!(reader.decode(outof).unwrap(), v, "outof {}", outof);
            }
            assert!(reader.check_all_gone());
        }
    }

    #[test]
    fn test_middle_values_use_fewer_bits() {
        // outof 5: b = 3, spare = 3, middle values take 2 bits
        let mut writer = BitWriter::new();
        writer.encode(2, 5).unwrap();
        writer.encode(2, 5).unwrap();
        writer.encode(2, 5).unwrap();
        writer.encode(2, 5).unwrap();
        assert_eq!(writer.freeze().len(), 1);
    }

    #[test]
    fn test_value_out_of_range() {
        let mut writer = BitWriter::new();
        let err = writer.encode(7, 7).unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::Range);
    }

    #[test]
    fn test_interpolative_lazy() {
        let pos = vec![3u32, 4, 9, 10, 11, 40, 41, 97, 1000];
        let mut writer = BitWriter::new();
        writer.encode_interpolative(&pos, 0, pos.len() - 1).unwrap();
        let mut reader = BitReader::new(writer.freeze(), 0);
        reader.decode_interpolative(0, pos.len() as u32 - 1, pos[0], pos[pos.len() - 1]);
        let mut out = vec![pos[0]];
        for _ in 1..pos.len() {
            out.push(reader.decode_interpolative_next().unwrap());
        }
        assert_eq!(out, pos);
        assert!(reader.check_all_gone());
    }

    #[test]
    fn test_dense_run_needs_no_bits() {
        let pos: Vec<u32> = (10..30).collect();
        let mut writer = BitWriter::new();
        writer.encode_interpolative(&pos, 0, pos.len() - 1).unwrap();
        assert!(writer.freeze().is_empty());
    }

    #[test]
    fn test_truncated_stream_is_corrupt() {
        let mut reader = BitReader::new(Vec::new(), 0);
        assert!(reader.decode(1000).unwrap_err().is_corrupt());
    }
}
