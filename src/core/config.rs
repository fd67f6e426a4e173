use std::path::PathBuf;
use crate::compression::compress::CompressionType;

/// Smallest and largest block sizes a table may be created with
pub const MIN_BLOCK_SIZE: usize = 2048;
pub const MAX_BLOCK_SIZE: usize = 32768;

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_path: PathBuf,
    pub block_size: usize,
    pub compress_min: usize,
    pub compression: CompressionType,
    pub block_cache_size: usize,
    pub lock: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./data"),
            block_size: 8192,
            compress_min: 1800,                 // Tags shorter than this stay raw
            compression: CompressionType::Zstd,
            block_cache_size: 64,               // Clean blocks kept per table
            lock: true,
        }
    }
}

impl Config {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Config {
            storage_path: path.into(),
            ..Config::default()
        }
    }

    pub fn table_config(&self) -> TableConfig {
        TableConfig {
            block_size: self.block_size,
            compress_min: self.compress_min,
            compression: self.compression,
            block_cache_size: self.block_cache_size,
            lock: self.lock,
        }
    }
}

/// Per-table knobs
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub block_size: usize,
    pub compress_min: usize,
    pub compression: CompressionType,
    pub block_cache_size: usize,
    pub lock: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Config::default().table_config()
    }
}

pub fn valid_block_size(block_size: usize) -> bool {
    block_size.is_power_of_two() && (MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
}
