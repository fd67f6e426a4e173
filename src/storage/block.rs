//! On-disk block layout.
//!
//! ```text
//! +--------------------------+ 0
//! | revision   u32           |
//! | level      u8            |
//! | max_free   u16           |  contiguous gap after the directory
//! | total_free u16           |  all unused bytes
//! | dir_end    u16           |
//! +--------------------------+ 11 (DIR_START)
//! | directory: u16 offsets   |  sorted by item key, grows forward
//! +--------------------------+ dir_end
//! |       free space         |
//! +--------------------------+
//! | items, packed            |  grow backward from the end
//! +--------------------------+ block_size
//! ```
//!
//! Item: `size:u16` (top bit = tag compressed), `key_len:u8`, key,
//! `component:u16`, then for leaves `components_of:u16` + tag bytes, and
//! for branches a `u32` child block number. All integers big-endian.

use std::cmp::Ordering;
use crate::core::error::{Error, Result};
use crate::core::types::{BlockNo, Revision};

pub const DIR_START: usize = 11;
pub const D2: usize = 2;
/// Each block must hold at least this many maximum-size items
pub const BLOCK_CAPACITY: usize = 4;
pub const MAX_KEY_LEN: usize = 252;

const REVISION_OFF: usize = 0;
const LEVEL_OFF: usize = 4;
const MAX_FREE_OFF: usize = 5;
const TOTAL_FREE_OFF: usize = 7;
const DIR_END_OFF: usize = 9;

const COMPRESSED_BIT: u16 = 0x8000;
/// size + key_len + component
const KEY_OVERHEAD: usize = 2 + 1 + 2;
const LEAF_EXTRA: usize = 2;
const BRANCH_EXTRA: usize = 4;

/// Largest item (directory slot excluded) a block of this size accepts
pub fn max_item_size(block_size: usize) -> usize {
    (block_size - DIR_START - BLOCK_CAPACITY * D2) / BLOCK_CAPACITY
}

/// Bytes of tag that fit in one leaf item for `key`
pub fn max_component_size(block_size: usize, key_len: usize) -> usize {
    max_item_size(block_size) - KEY_OVERHEAD - key_len - LEAF_EXTRA
}

fn get_u16(data: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([data[off], data[off + 1]])
}

fn set_u16(data: &mut [u8], off: usize, value: u16) {
    data[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

/// Builders for raw item bytes
pub struct Item;

impl Item {
    pub fn leaf(key: &[u8], component: u16, components_of: u16, tag: &[u8], compressed: bool) -> Vec<u8> {
        let size = KEY_OVERHEAD + key.len() + LEAF_EXTRA + tag.len();
        let mut item = Vec::with_capacity(size);
        let mut size_field = size as u16;
        if compressed {
            size_field |= COMPRESSED_BIT;
        }
        item.extend_from_slice(&size_field.to_be_bytes());
        item.push(key.len() as u8);
        item.extend_from_slice(key);
        item.extend_from_slice(&component.to_be_bytes());
        item.extend_from_slice(&components_of.to_be_bytes());
        item.extend_from_slice(tag);
        item
    }

    pub fn branch(key: &[u8], component: u16, child: BlockNo) -> Vec<u8> {
        let size = KEY_OVERHEAD + key.len() + BRANCH_EXTRA;
        let mut item = Vec::with_capacity(size);
        item.extend_from_slice(&(size as u16).to_be_bytes());
        item.push(key.len() as u8);
        item.extend_from_slice(key);
        item.extend_from_slice(&component.to_be_bytes());
        item.extend_from_slice(&child.to_be_bytes());
        item
    }
}

/// View of one item inside a block
#[derive(Debug, Clone, Copy)]
pub struct ItemRef<'a> {
    bytes: &'a [u8],
}

impl<'a> ItemRef<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ItemRef { bytes }
    }

    pub fn size(&self) -> usize {
        (get_u16(self.bytes, 0) & !COMPRESSED_BIT) as usize
    }

    pub fn compressed(&self) -> bool {
        get_u16(self.bytes, 0) & COMPRESSED_BIT != 0
    }

    pub fn bytes(&self) -> &'a [u8] {
        &self.bytes[..self.size()]
    }

    fn key_len(&self) -> usize {
        self.bytes[2] as usize
    }

    pub fn key(&self) -> &'a [u8] {
        &self.bytes[3..3 + self.key_len()]
    }

    pub fn component(&self) -> u16 {
        get_u16(self.bytes, 3 + self.key_len())
    }

    /// Leaf only: how many components the tag was split into
    pub fn components_of(&self) -> u16 {
        get_u16(self.bytes, KEY_OVERHEAD + self.key_len())
    }

    /// Leaf only: this component's share of the tag
    pub fn tag(&self) -> &'a [u8] {
        &self.bytes[KEY_OVERHEAD + self.key_len() + LEAF_EXTRA..self.size()]
    }

    /// Branch only
    pub fn child(&self) -> BlockNo {
        let off = KEY_OVERHEAD + self.key_len();
        BlockNo::from_be_bytes([
            self.bytes[off],
            self.bytes[off + 1],
            self.bytes[off + 2],
            self.bytes[off + 3],
        ])
    }

    pub fn cmp_key(&self, key: &[u8], component: u16) -> Ordering {
        self.key().cmp(key).then(self.component().cmp(&component))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub data: Vec<u8>,
}

impl Block {
    pub fn new(block_size: usize, level: u8, revision: Revision) -> Self {
        let mut block = Block { data: vec![0u8; block_size] };
        block.set_revision(revision);
        block.data[LEVEL_OFF] = level;
        block.set_dir_end(DIR_START);
        let free = (block_size - DIR_START) as u16;
        block.set_max_free(free as usize);
        block.set_total_free(free as usize);
        block
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Block { data }
    }

    pub fn block_size(&self) -> usize {
        self.data.len()
    }

    pub fn revision(&self) -> Revision {
        let d = &self.data;
        Revision::from_be_bytes([d[REVISION_OFF], d[REVISION_OFF + 1], d[REVISION_OFF + 2], d[REVISION_OFF + 3]])
    }

    pub fn set_revision(&mut self, revision: Revision) {
        self.data[REVISION_OFF..REVISION_OFF + 4].copy_from_slice(&revision.to_be_bytes());
    }

    pub fn level(&self) -> u8 {
        self.data[LEVEL_OFF]
    }

    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    pub fn max_free(&self) -> usize {
        get_u16(&self.data, MAX_FREE_OFF) as usize
    }

    fn set_max_free(&mut self, value: usize) {
        set_u16(&mut self.data, MAX_FREE_OFF, value as u16);
    }

    pub fn total_free(&self) -> usize {
        get_u16(&self.data, TOTAL_FREE_OFF) as usize
    }

    fn set_total_free(&mut self, value: usize) {
        set_u16(&mut self.data, TOTAL_FREE_OFF, value as u16);
    }

    pub fn dir_end(&self) -> usize {
        get_u16(&self.data, DIR_END_OFF) as usize
    }

    fn set_dir_end(&mut self, value: usize) {
        set_u16(&mut self.data, DIR_END_OFF, value as u16);
    }

    pub fn count(&self) -> usize {
        (self.dir_end() - DIR_START) / D2
    }

    /// Bytes taken by items and directory
    pub fn used(&self) -> usize {
        self.block_size() - DIR_START - self.total_free()
    }

    fn item_offset(&self, i: usize) -> usize {
        get_u16(&self.data, DIR_START + i * D2) as usize
    }

    pub fn item(&self, i: usize) -> ItemRef<'_> {
        ItemRef::new(&self.data[self.item_offset(i)..])
    }

    /// Does an item of `len` bytes (plus its directory slot) fit?
    pub fn has_room(&self, len: usize) -> bool {
        len + D2 <= self.total_free()
    }

    /// Insert raw item bytes so they become entry `i`.
    pub fn insert_item(&mut self, i: usize, item: &[u8]) {
        let needed = item.len() + D2;
        debug_assert!(needed <= self.total_free());
        if needed > self.max_free() {
            self.compact();
        }
        let dir_end = self.dir_end();
        let offset = dir_end + self.max_free() - item.len();
        self.data[offset..offset + item.len()].copy_from_slice(item);

        let slot = DIR_START + i * D2;
        self.data.copy_within(slot..dir_end, slot + D2);
        set_u16(&mut self.data, slot, offset as u16);

        self.set_dir_end(dir_end + D2);
        self.set_max_free(self.max_free() - needed);
        self.set_total_free(self.total_free() - needed);
    }

    /// Drop entry `i`; its bytes become a hole until the next compaction.
    pub fn delete_item(&mut self, i: usize) {
        let len = self.item(i).size();
        let dir_end = self.dir_end();
        let slot = DIR_START + i * D2;
        self.data.copy_within(slot + D2..dir_end, slot);
        self.set_dir_end(dir_end - D2);
        self.set_max_free(self.max_free() + D2);
        self.set_total_free(self.total_free() + len + D2);
    }

    /// Repack items at the end of the block so all free space is contiguous
    pub fn compact(&mut self) {
        let items: Vec<Vec<u8>> = (0..self.count()).map(|i| self.item(i).bytes().to_vec()).collect();
        let mut end = self.block_size();
        for (i, item) in items.iter().enumerate() {
            end -= item.len();
            self.data[end..end + item.len()].copy_from_slice(item);
            set_u16(&mut self.data, DIR_START + i * D2, end as u16);
        }
        self.set_max_free(end - self.dir_end());
        debug_assert_eq!(self.max_free(), self.total_free());
    }

    /// Copy of every item, in key order
    pub fn items(&self) -> Vec<Vec<u8>> {
        (0..self.count()).map(|i| self.item(i).bytes().to_vec()).collect()
    }

    /// Empty this block and refill it from `items` (already sorted)
    pub fn rebuild(&mut self, items: &[Vec<u8>]) {
        let level = self.level();
        let revision = self.revision();
        *self = Block::new(self.block_size(), level, revision);
        for (i, item) in items.iter().enumerate() {
            self.insert_item(i, item);
        }
    }

    /// Branch only: repoint entry `i` at another block
    pub fn set_child(&mut self, i: usize, child: BlockNo) {
        let offset = self.item_offset(i);
        let key_len = self.data[offset + 2] as usize;
        let off = offset + KEY_OVERHEAD + key_len;
        self.data[off..off + 4].copy_from_slice(&child.to_be_bytes());
    }

    /// Leaf: exact position, or where the key would be inserted.
    pub fn find_in_leaf(&self, key: &[u8], component: u16) -> std::result::Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.item(mid).cmp_key(key, component) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Branch: last entry whose key is <= the search key. Entry 0 acts as
    /// minus infinity whatever its stored key.
    pub fn find_in_branch(&self, key: &[u8], component: u16) -> usize {
        let (mut lo, mut hi) = (1, self.count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.item(mid).cmp_key(key, component) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo - 1
    }

    /// Structural checks run on every block read from disk.
    pub fn validate(&self, n: BlockNo, expected_level: u8, max_revision: Revision) -> Result<()> {
        let corrupt = |what: &str| Err(Error::corrupt(format!("Block {}: {}", n, what)));
        let block_size = self.block_size();
        if self.level() != expected_level {
            return corrupt(&format!("level {} where {} expected", self.level(), expected_level));
        }
        if self.revision() > max_revision {
            return corrupt(&format!("revision {} is newer than {}", self.revision(), max_revision));
        }
        let dir_end = self.dir_end();
        if dir_end < DIR_START || dir_end > block_size || (dir_end - DIR_START) % D2 != 0 {
            return corrupt("directory end out of bounds");
        }

        let extra = if self.is_leaf() { LEAF_EXTRA } else { BRANCH_EXTRA };
        let mut used = 0usize;
        let mut lowest = block_size;
        for i in 0..self.count() {
            let offset = self.item_offset(i);
            if offset < dir_end || offset + KEY_OVERHEAD > block_size {
                return corrupt(&format!("item {} offset {} out of bounds", i, offset));
            }
            let item = self.item(i);
            let size = item.size();
            if offset + size > block_size || size < KEY_OVERHEAD + item.key_len() + extra {
                return corrupt(&format!("item {} size {} out of bounds", i, size));
            }
            if item.key_len() > MAX_KEY_LEN {
                return corrupt(&format!("item {} key too long", i));
            }
            if !self.is_leaf() && size != KEY_OVERHEAD + item.key_len() + extra {
                return corrupt(&format!("branch item {} has wrong size", i));
            }
            // Branch entry 0 carries no meaningful key
            if i > 0 && (self.is_leaf() || i > 1) {
                let prev = self.item(i - 1);
                if prev.cmp_key(item.key(), item.component()) != Ordering::Less {
                    return corrupt(&format!("keys out of order at item {}", i));
                }
            }
            used += size;
            lowest = lowest.min(offset);
        }

        if self.total_free() != block_size - dir_end - used {
            return corrupt("free space accounting mismatch");
        }
        if self.max_free() > self.total_free() || dir_end + self.max_free() > lowest {
            return corrupt("contiguous free space overstated");
        }
        Ok(())
    }
}
