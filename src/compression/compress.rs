use crate::core::error::{Error, ErrorKind, Result};

/// Codec used for tags above the table's `compress_min`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,   // Fast, ratio 2-3x
    Zstd,  // Better ratio, slower
}

/// Opaque byte-stream compressor owned by a table
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

pub struct NoCompression;

impl Compressor for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

pub struct Lz4Compressor;

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        // Size prefix lets decompress size its buffer
        Ok(lz4::block::compress(data, None, true)?)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None)
            .map_err(|e| Error::new(ErrorKind::DatabaseCorrupt, format!("Bad compressed tag: {}", e)))
    }
}

pub struct ZstdCompressor {
    pub level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        ZstdCompressor { level: 3 }  // Level 3 is balanced
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(zstd::encode_all(data, self.level)?)
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data)
            .map_err(|e| Error::new(ErrorKind::DatabaseCorrupt, format!("Bad compressed tag: {}", e)))
    }
}

impl CompressionType {
    pub fn compressor(self) -> Box<dyn Compressor> {
        match self {
            CompressionType::None => Box::new(NoCompression),
            CompressionType::Lz4 => Box::new(Lz4Compressor),
            CompressionType::Zstd => Box::new(ZstdCompressor::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codecs_restore_input() {
        let data: Vec<u8> = b"posting posting posting posting ".repeat(64);
        for kind in [CompressionType::None, CompressionType::Lz4, CompressionType::Zstd] {
            let codec = kind.compressor();
            let packed = codec.compress(&data).unwrap();
            assert_eq!(codec.decompress(&packed).unwrap(), data);
        }
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let codec = ZstdCompressor::default();
        let err = codec.decompress(b"definitely not zstd").unwrap_err();
        assert!(err.is_corrupt());
    }
}
