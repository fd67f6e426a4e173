use roaring::RoaringBitmap;
use crate::core::error::{Error, Result};
use crate::core::types::BlockNo;

/// Free-block map for one table.
///
/// `at_start` is the set of blocks in use when the current transaction
/// began; `current` is the live set. A block is only handed out when it is
/// clear in both, so a block freed during a transaction can't be overwritten
/// while a reader of the previous revision may still need it.
#[derive(Debug, Clone)]
pub struct FreeBlockBitmap {
    pub at_start: RoaringBitmap,
    pub current: RoaringBitmap,
    first_clear: BlockNo,
}

impl FreeBlockBitmap {
    pub fn new() -> Self {
        FreeBlockBitmap {
            at_start: RoaringBitmap::new(),
            current: RoaringBitmap::new(),
            first_clear: 0,
        }
    }

    /// Rebuild from the serialized in-use set stored in a base file
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let in_use = RoaringBitmap::deserialize_from(bytes)
            .map_err(|e| Error::corrupt(format!("Bad free-block bitmap: {}", e)))?;
        Ok(FreeBlockBitmap {
            at_start: in_use.clone(),
            current: in_use,
            first_clear: 0,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.current.serialized_size());
        self.current.serialize_into(&mut bytes)?;
        Ok(bytes)
    }

    /// Claim the lowest block that is free now and was free at transaction start
    pub fn next_free_block(&mut self) -> BlockNo {
        let mut n = self.first_clear;
        while self.current.contains(n) || self.at_start.contains(n) {
            n += 1;
        }
        self.current.insert(n);
        self.first_clear = n + 1;
        n
    }

    /// Mark `n` unused; it becomes allocatable after the next commit
    pub fn free_block(&mut self, n: BlockNo) -> Result<()> {
        if !self.current.remove(n) {
            return Err(Error::corrupt(format!("Freeing block {} which isn't in use", n)));
        }
        // Claimed and released within this transaction: no reader can see it
        if !self.at_start.contains(n) && n < self.first_clear {
            self.first_clear = n;
        }
        Ok(())
    }

    /// True if `n` was unused when this transaction began, i.e. it's either
    /// never been allocated or was claimed during this transaction.
    pub fn block_free_at_start(&self, n: BlockNo) -> bool {
        !self.at_start.contains(n)
    }

    pub fn is_used(&self, n: BlockNo) -> bool {
        self.current.contains(n)
    }

    /// Mark a block in use without going through allocation (table creation)
    pub fn mark_used(&mut self, n: BlockNo) {
        self.current.insert(n);
        self.at_start.insert(n);
    }

    /// The live set becomes the baseline for the next transaction
    pub fn commit(&mut self) {
        self.at_start = self.current.clone();
        self.first_clear = 0;
    }

    pub fn cancel(&mut self) {
        self.current = self.at_start.clone();
        self.first_clear = 0;
    }

    pub fn blocks_in_use(&self) -> u64 {
        self.current.len()
    }

    /// One past the highest block number in use
    pub fn last_block(&self) -> BlockNo {
        self.current.max().map(|n| n + 1).unwrap_or(0)
    }
}

impl Default for FreeBlockBitmap {
    fn default() -> Self {
        Self::new()
    }
}
