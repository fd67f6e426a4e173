use std::fs::{self, File, OpenOptions};
use std::io::Write;
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::core::error::{Error, Result};
use crate::core::types::{BlockNo, Revision};
use crate::storage::bitmap::FreeBlockBitmap;
use crate::storage::layout::{BaseLetter, TableLayout};

const BASE_MAGIC: u32 = 0x5152_4231;  // "QRB1"
const BASE_FORMAT: u32 = 1;

/// Snapshot of one committed revision of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseFile {
    pub magic: u32,
    pub format: u32,
    pub revision: Revision,
    pub block_size: u32,
    pub root: BlockNo,
    pub level: u8,
    pub item_count: u64,
    pub last_block: BlockNo,
    pub bitmap: Vec<u8>,
    pub revision_again: Revision,  // Torn writes show up as a mismatch
}

impl BaseFile {
    pub fn new(
        revision: Revision,
        block_size: usize,
        root: BlockNo,
        level: u8,
        item_count: u64,
        bitmap: &FreeBlockBitmap,
    ) -> Result<Self> {
        Ok(BaseFile {
            magic: BASE_MAGIC,
            format: BASE_FORMAT,
            revision,
            block_size: block_size as u32,
            root,
            level,
            item_count,
            last_block: bitmap.last_block(),
            bitmap: bitmap.to_bytes()?,
            revision_again: revision,
        })
    }

    /// `[crc32 of body][bincode body]`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(body.len() + 4);
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corrupt("Base file too short"));
        }
        let stored = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let body = &data[4..];
        if crc32fast::hash(body) != stored {
            return Err(Error::corrupt("Base file checksum mismatch"));
        }
        let base: BaseFile = bincode::deserialize(body)?;
        if base.magic != BASE_MAGIC || base.format != BASE_FORMAT {
            return Err(Error::corrupt("Base file has unknown format"));
        }
        if base.revision != base.revision_again {
            return Err(Error::corrupt("Base file revision fields disagree"));
        }
        Ok(base)
    }

    /// Write to `<name>.base<letter>` and fsync before returning.
    pub fn write_to_file(&self, layout: &TableLayout, letter: BaseLetter) -> Result<()> {
        let data = self.encode()?;
        let path = layout.base_path(letter);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            // Make the directory entry durable too
            if let Ok(dir) = File::open(dir) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    /// Load and validate one letter. `Ok(None)` means the file is missing or
    /// doesn't validate; the caller can try the other letter.
    pub fn read(layout: &TableLayout, letter: BaseLetter) -> Result<Option<Self>> {
        let path = layout.base_path(letter);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Self::decode(&data) {
            Ok(base) => Ok(Some(base)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring invalid base file");
                Ok(None)
            }
        }
    }

    pub fn free_block_bitmap(&self) -> Result<FreeBlockBitmap> {
        FreeBlockBitmap::from_bytes(&self.bitmap)
    }
}
