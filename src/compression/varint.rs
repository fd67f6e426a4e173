use crate::core::error::{Error, Result};

/// Why an unpack stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackError {
    Short,     // Ran out of input
    Overflow,  // Value too big for the target type
}

pub type Unpacked<T> = std::result::Result<T, UnpackError>;

/// Turn an unpack failure into a corruption error naming the field
pub trait UnpackExt<T> {
    fn or_corrupt(self, field: &str) -> Result<T>;
}

impl<T> UnpackExt<T> for Unpacked<T> {
    fn or_corrupt(self, field: &str) -> Result<T> {
        self.map_err(|e| match e {
            UnpackError::Short => Error::corrupt(format!("Short read of {}", field)),
            UnpackError::Overflow => Error::corrupt(format!("Overflow reading {}", field)),
        })
    }
}

/// Append `value` as 7-bit groups, least significant first.
/// Values < 128 use 1 byte, < 16384 use 2 bytes, etc.
pub fn pack_uint(output: &mut Vec<u8>, mut value: u64) {
    while value >= 128 {
        output.push((value & 127) as u8 | 128);  // Set continuation bit
        value >>= 7;
    }
    output.push(value as u8);
}

pub fn unpack_uint(input: &mut &[u8]) -> Unpacked<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for (consumed, &byte) in input.iter().enumerate() {
        let bits = (byte & 127) as u64;
        if shift >= 64 || (shift > 57 && bits >> (64 - shift) != 0) {
            return Err(UnpackError::Overflow);
        }
        value |= bits << shift;

        if byte & 128 == 0 {
            *input = &input[consumed + 1..];
            return Ok(value);
        }
        shift += 7;
    }

    Err(UnpackError::Short)
}

pub fn unpack_u32(input: &mut &[u8]) -> Unpacked<u32> {
    let value = unpack_uint(input)?;
    u32::try_from(value).map_err(|_| UnpackError::Overflow)
}

pub fn pack_bool(output: &mut Vec<u8>, value: bool) {
    output.push(if value { b'1' } else { b'0' });
}

pub fn unpack_bool(input: &mut &[u8]) -> Unpacked<bool> {
    let (&first, rest) = input.split_first().ok_or(UnpackError::Short)?;
    let value = match first {
        b'0' => false,
        b'1' => true,
        _ => return Err(UnpackError::Overflow),
    };
    *input = rest;
    Ok(value)
}

/// Length byte followed by big-endian bytes, so byte order matches numeric order
pub fn pack_uint_preserving_sort(output: &mut Vec<u8>, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    output.push((bytes.len() - skip) as u8);
    output.extend_from_slice(&bytes[skip..]);
}

pub fn unpack_uint_preserving_sort(input: &mut &[u8]) -> Unpacked<u64> {
    let (&len, rest) = input.split_first().ok_or(UnpackError::Short)?;
    let len = len as usize;
    if len > 8 {
        return Err(UnpackError::Overflow);
    }
    if rest.len() < len {
        return Err(UnpackError::Short);
    }
    let value = rest[..len].iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);
    *input = &rest[len..];
    Ok(value)
}

/// Escapes `\0` as `\0\xff`; non-final strings end with `\0\0` so a shorter
/// string sorts before any string it prefixes.
pub fn pack_string_preserving_sort(output: &mut Vec<u8>, value: &[u8], last: bool) {
    for &b in value {
        output.push(b);
        if b == 0 {
            output.push(0xff);
        }
    }
    if !last {
        output.extend_from_slice(&[0, 0]);
    }
}

pub fn unpack_string_preserving_sort(input: &mut &[u8], last: bool) -> Unpacked<Vec<u8>> {
    let mut value = Vec::new();
    let mut i = 0;
    while i < input.len() {
        let b = input[i];
        if b == 0 {
            match input.get(i + 1) {
                Some(0xff) => {
                    value.push(0);
                    i += 2;
                    continue;
                }
                Some(0) if !last => {
                    *input = &input[i + 2..];
                    return Ok(value);
                }
                Some(_) => return Err(UnpackError::Overflow),
                None => return Err(UnpackError::Short),
            }
        }
        value.push(b);
        i += 1;
    }
    if last {
        *input = &input[input.len()..];
        Ok(value)
    } else {
        Err(UnpackError::Short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_widths() {
        let mut buf = Vec::new();
        pack_uint(&mut buf, 127);
        assert_eq!(buf.len(), 1);
        buf.clear();
        pack_uint(&mut buf, 128);
        assert_eq!(buf, vec![0x80, 0x01]);

        let mut input = &buf[..];
        assert_eq!(unpack_uint(&mut input), Ok(128));
        assert!(input.is_empty());
    }

    #[test]
    fn test_uint_short_and_overflow() {
        let mut input: &[u8] = &[0x80, 0x80];
        assert_eq!(unpack_uint(&mut input), Err(UnpackError::Short));

        let mut big = Vec::new();
        pack_uint(&mut big, u64::from(u32::MAX) + 1);
        let mut input = &big[..];
        assert_eq!(unpack_u32(&mut input), Err(UnpackError::Overflow));

        let mut input: &[u8] = &[0xff; 11];
        assert_eq!(unpack_uint(&mut input), Err(UnpackError::Overflow));
    }

    #[test]
    fn test_sort_preserving_uint_order() {
        let values = [0u64, 1, 255, 256, 65535, 100000, u64::from(u32::MAX), u64::MAX];
        let encoded: Vec<Vec<u8>> = values
            .iter()
            .map(|&v| {
                let mut buf = Vec::new();
                pack_uint_preserving_sort(&mut buf, v);
                buf
            })
            .collect();
        for pair in encoded.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for (bytes, &v) in encoded.iter().zip(values.iter()) {
            let mut input = &bytes[..];
            assert_eq!(unpack_uint_preserving_sort(&mut input), Ok(v));
        }
    }

    #[test]
    fn test_sort_preserving_string() {
        let mut a = Vec::new();
        pack_string_preserving_sort(&mut a, b"cat", false);
        let mut b = Vec::new();
        pack_string_preserving_sort(&mut b, b"cats", false);
        let mut c = Vec::new();
        pack_string_preserving_sort(&mut c, b"ca\0t", false);
        assert!(a < b);
        assert!(c < a);

        let mut input = &c[..];
        assert_eq!(unpack_string_preserving_sort(&mut input, false).unwrap(), b"ca\0t".to_vec());
        assert!(input.is_empty());
    }

    #[test]
    fn test_bool() {
        let mut buf = Vec::new();
        pack_bool(&mut buf, true);
        pack_bool(&mut buf, false);
        let mut input = &buf[..];
        assert_eq!(unpack_bool(&mut input), Ok(true));
        assert_eq!(unpack_bool(&mut input), Ok(false));
        assert_eq!(unpack_bool(&mut input), Err(UnpackError::Short));
    }
}
