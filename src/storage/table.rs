//! Block-based B-tree table.
//!
//! Blocks are copy-on-write per transaction: the first change to a committed
//! block moves it to a block that was free when the transaction began, and
//! the parent is repointed (and so moved itself) up to the root. Changed
//! blocks live in `dirty` until `commit` writes them, then the base file for
//! the new revision is published. Readers of the previous revision never see
//! their blocks overwritten before the next transaction.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use lru::LruCache;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use crate::compression::compress::Compressor;
use crate::core::config::{valid_block_size, TableConfig};
use crate::core::error::{Error, Result};
use crate::core::types::{BlockNo, Revision};
use crate::storage::base::BaseFile;
use crate::storage::bitmap::FreeBlockBitmap;
use crate::storage::block::{max_component_size, Block, Item, ItemRef, D2, DIR_START, MAX_KEY_LEN};
use crate::storage::cursor::{Cursor, MutCursor};
use crate::storage::file_lock::FileLock;
use crate::storage::layout::TableLayout;
use crate::storage::revision::RevisionManager;

/// Consecutive appends at the end of a leaf before splits favour appending
const SEQ_THRESHOLD: u32 = 2;

/// A tag as stored, optionally still compressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub data: Vec<u8>,
    pub compressed: bool,
}

/// One level of a root-to-leaf path: the block image and the directory slot
#[derive(Debug, Clone)]
pub(crate) struct PathLevel {
    pub n: BlockNo,
    pub block: Block,
    pub c: usize,
}

/// Last committed shape of the tree, restored by `cancel`
#[derive(Debug, Clone, Copy)]
struct Committed {
    root: BlockNo,
    level: u8,
    item_count: u64,
}

pub(crate) struct TableCore {
    pub layout: TableLayout,
    pub config: TableConfig,
    revisions: RevisionManager,
    file: Option<File>,
    readonly: bool,
    block_size: usize,
    revision: Revision,
    root: BlockNo,
    level: u8,
    item_count: u64,
    committed: Committed,
    bitmap: FreeBlockBitmap,
    dirty: BTreeMap<BlockNo, Block>,
    cache: Option<LruCache<BlockNo, Block>>,
    compressor: Box<dyn Compressor>,
    /// Bumped on every change to what a cursor could observe
    pub version: u64,
    seq_count: u32,
    lock: Option<FileLock>,
}

/// Ordered key -> tag store over one `.DB` file
pub struct Table {
    core: Arc<RwLock<TableCore>>,
}

impl Drop for Table {
    /// Cursors share the core and may outlive the table. They keep reading the
    /// committed revision, but the writer lock goes with the table.
    fn drop(&mut self) {
        let mut core = self.core.write();
        if !core.readonly {
            core.discard_changes();
            core.readonly = true;
        }
        core.lock = None;
    }
}

impl Table {
    pub fn new<P: AsRef<Path>>(path: P, readonly: bool, config: TableConfig) -> Self {
        let layout = TableLayout::from_path(path.as_ref());
        let compressor = config.compression.compressor();
        Self::with_compressor(layout, readonly, config, compressor)
    }

    /// Use a caller-supplied compression service
    pub fn with_compressor(
        layout: TableLayout,
        readonly: bool,
        config: TableConfig,
        compressor: Box<dyn Compressor>,
    ) -> Self {
        let cache = NonZeroUsize::new(config.block_cache_size).map(LruCache::new);
        let core = TableCore {
            revisions: RevisionManager::new(layout.clone()),
            layout,
            file: None,
            readonly,
            block_size: config.block_size,
            config,
            revision: 0,
            root: 0,
            level: 0,
            item_count: 0,
            committed: Committed { root: 0, level: 0, item_count: 0 },
            bitmap: FreeBlockBitmap::new(),
            dirty: BTreeMap::new(),
            cache,
            compressor,
            version: 0,
            seq_count: 0,
            lock: None,
        };
        Table { core: Arc::new(RwLock::new(core)) }
    }

    /// Do the table's files exist on disk?
    pub fn exists(&self) -> bool {
        let core = self.core.read();
        core.layout.db_path().exists() && core.revisions.latest().map(|b| b.is_some()).unwrap_or(false)
    }

    pub fn create_and_open(&mut self, block_size: usize) -> Result<()> {
        self.core.write().create_and_open(block_size)
    }

    /// Open the latest valid revision
    pub fn open(&mut self) -> Result<()> {
        let mut core = self.core.write();
        let base = core.revisions.open_latest()?;
        core.load(base)
    }

    /// Open a specific revision; `false` if no base records it
    pub fn open_at(&mut self, revision: Revision) -> Result<bool> {
        let mut core = self.core.write();
        match core.revisions.open_revision(revision)? {
            Some(base) => {
                core.load(base)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn close(&mut self) {
        let mut core = self.core.write();
        core.file = None;
        core.dirty.clear();
        if let Some(cache) = core.cache.as_mut() {
            cache.clear();
        }
        core.lock = None;
        core.version += 1;
    }

    pub fn is_open(&self) -> bool {
        self.core.read().file.is_some()
    }

    pub fn is_writable(&self) -> bool {
        !self.core.read().readonly
    }

    pub fn get_exact_entry(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut core = self.core.write();
        Ok(core.read_tag_at(key, false)?.map(|tag| tag.data))
    }

    pub fn key_exists(&self, key: &[u8]) -> Result<bool> {
        let mut core = self.core.write();
        core.key_exists(key)
    }

    /// Insert or replace `key`. With `already_compressed` the tag is stored
    /// as-is and flagged compressed (bulk copy of `read_tag(true)` output).
    pub fn add(&mut self, key: &[u8], tag: &[u8], already_compressed: bool) -> Result<()> {
        self.core.write().add(key, tag, already_compressed)
    }

    pub fn del(&mut self, key: &[u8]) -> Result<bool> {
        self.core.write().del(key)
    }

    pub fn commit(&mut self, revision: Revision) -> Result<()> {
        self.core.write().commit(revision)
    }

    /// Throw away everything since the last commit
    pub fn cancel(&mut self) -> Result<()> {
        self.core.write().cancel()
    }

    pub fn cursor_get(&self) -> Cursor {
        Cursor::new(Arc::clone(&self.core))
    }

    pub fn cursor_mut(&mut self) -> Result<MutCursor> {
        if self.core.read().readonly {
            return Err(Error::invalid_operation("Table is read-only"));
        }
        Ok(MutCursor::new(Cursor::new(Arc::clone(&self.core))))
    }

    pub fn get_open_revision(&self) -> Revision {
        self.core.read().revision
    }

    /// Highest revision with a valid base on disk right now
    pub fn get_latest_revision(&self) -> Result<Option<Revision>> {
        self.core.read().revisions.latest_revision()
    }

    pub fn get_entry_count(&self) -> u64 {
        self.core.read().item_count
    }

    pub fn empty(&self) -> bool {
        self.get_entry_count() == 0
    }

    pub fn block_size(&self) -> usize {
        self.core.read().block_size
    }

    /// Height of the tree; 0 when the root is a leaf
    pub fn level(&self) -> u8 {
        self.core.read().level
    }

    pub fn is_modified(&self) -> bool {
        !self.core.read().dirty.is_empty()
    }

    pub fn layout(&self) -> TableLayout {
        self.core.read().layout.clone()
    }
}

impl TableCore {
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::invalid_operation(format!("Table {} is read-only", self.layout.name)));
        }
        if self.file.is_none() {
            return Err(Error::invalid_operation(format!("Table {} is not open", self.layout.name)));
        }
        Ok(())
    }

    fn take_lock(&mut self) -> Result<()> {
        if !self.readonly && self.config.lock && self.lock.is_none() {
            self.lock = Some(FileLock::acquire(self.layout.lock_path())?);
        }
        Ok(())
    }

    fn create_and_open(&mut self, block_size: usize) -> Result<()> {
        if self.readonly {
            return Err(Error::invalid_operation("Can't create a read-only table"));
        }
        if !valid_block_size(block_size) {
            return Err(Error::invalid_argument(format!(
                "Block size {} must be a power of two from 2048 to 32768",
                block_size
            )));
        }
        self.layout.ensure_dir()?;
        self.take_lock()?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.layout.db_path())?;

        // The leftmost leaf always starts with the null key
        let mut bitmap = FreeBlockBitmap::new();
        let root = bitmap.next_free_block();
        let mut block = Block::new(block_size, 0, 0);
        block.insert_item(0, &Item::leaf(b"", 0, 1, b"", false));
        file.seek(SeekFrom::Start(root as u64 * block_size as u64))?;
        file.write_all(&block.data)?;
        file.sync_all()?;
        bitmap.commit();

        let base = BaseFile::new(0, block_size, root, 0, 0, &bitmap)?;
        self.revisions.create(&base)?;

        info!(table = %self.layout.name, block_size, "created table");
        self.file = Some(file);
        self.block_size = block_size;
        self.apply_base(&base, bitmap);
        Ok(())
    }

    fn load(&mut self, base: BaseFile) -> Result<()> {
        let block_size = base.block_size as usize;
        if !valid_block_size(block_size) {
            return Err(Error::corrupt(format!("Base records bad block size {}", block_size)));
        }
        self.take_lock()?;
        let file = OpenOptions::new()
            .read(true)
            .write(!self.readonly)
            .open(self.layout.db_path())
            .map_err(|e| Error::opening(format!("Can't open {}: {}", self.layout.db_path().display(), e)))?;
        let bitmap = base.free_block_bitmap()?;
        self.file = Some(file);
        self.block_size = block_size;
        self.apply_base(&base, bitmap);
        info!(table = %self.layout.name, revision = base.revision, level = base.level, "opened table");
        Ok(())
    }

    fn apply_base(&mut self, base: &BaseFile, bitmap: FreeBlockBitmap) {
        self.revision = base.revision;
        self.root = base.root;
        self.level = base.level;
        self.item_count = base.item_count;
        self.committed = Committed { root: base.root, level: base.level, item_count: base.item_count };
        self.bitmap = bitmap;
        self.dirty.clear();
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
        self.seq_count = 0;
        self.version += 1;
    }

    pub(crate) fn read_block(&mut self, n: BlockNo, level: u8) -> Result<Block> {
        if let Some(block) = self.dirty.get(&n) {
            if block.level() != level {
                return Err(Error::corrupt(format!("Block {}: level {} where {} expected", n, block.level(), level)));
            }
            return Ok(block.clone());
        }
        if let Some(block) = self.cache.as_mut().and_then(|c| c.get(&n)) {
            if block.level() == level {
                return Ok(block.clone());
            }
        }

        let mut file = self
            .file
            .as_ref()
            .ok_or_else(|| Error::invalid_operation(format!("Table {} is not open", self.layout.name)))?;
        let mut data = vec![0u8; self.block_size];
        file.seek(SeekFrom::Start(n as u64 * self.block_size as u64))?;
        file.read_exact(&mut data).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::corrupt(format!("Block {} is past the end of the file", n))
            } else {
                Error::from(e)
            }
        })?;
        let block = Block::from_bytes(data);
        block.validate(n, level, self.revision)?;
        if let Some(cache) = self.cache.as_mut() {
            cache.put(n, block.clone());
        }
        Ok(block)
    }

    fn dirty_block(&mut self, n: BlockNo) -> Result<&mut Block> {
        self.dirty
            .get_mut(&n)
            .ok_or_else(|| Error::corrupt(format!("Block {} should have been copied for writing", n)))
    }

    /// Root-to-leaf path for `(key, component)`, indexed by level. The leaf
    /// slot is the exact match or the insertion point.
    pub(crate) fn descend(&mut self, key: &[u8], component: u16) -> Result<(Vec<PathLevel>, bool)> {
        let mut path = Vec::with_capacity(self.level as usize + 1);
        let mut n = self.root;
        for j in (0..=self.level).rev() {
            let block = self.read_block(n, j)?;
            if j > 0 {
                if block.count() == 0 {
                    return Err(Error::corrupt(format!("Branch block {} is empty", n)));
                }
                let c = block.find_in_branch(key, component);
                let child = block.item(c).child();
                path.push(PathLevel { n, block, c });
                n = child;
            } else {
                let c = block.find_in_leaf(key, component).unwrap_or_else(|c| c);
                path.push(PathLevel { n, block, c });
            }
        }
        path.reverse();
        let found = found_at_leaf(&path, key, component);
        Ok((path, found))
    }

    /// Step the leaf slot forward, crossing into the next leaf if needed.
    /// Leaves `path` untouched and returns false at the end of the table.
    pub(crate) fn next_leaf_item(&mut self, path: &mut [PathLevel]) -> Result<bool> {
        if path[0].c + 1 < path[0].block.count() {
            path[0].c += 1;
            return Ok(true);
        }
        let Some(mut j) = (1..path.len()).find(|&j| path[j].c + 1 < path[j].block.count()) else {
            return Ok(false);
        };
        path[j].c += 1;
        while j > 0 {
            let child = path[j].block.item(path[j].c).child();
            j -= 1;
            let block = self.read_block(child, j as u8)?;
            path[j] = PathLevel { n: child, block, c: 0 };
        }
        if path[0].block.count() == 0 {
            return self.next_leaf_item(path);
        }
        Ok(true)
    }

    /// Mirror of `next_leaf_item`
    pub(crate) fn prev_leaf_item(&mut self, path: &mut [PathLevel]) -> Result<bool> {
        if path[0].c > 0 && path[0].block.count() > 0 {
            path[0].c = path[0].c.min(path[0].block.count()) - 1;
            return Ok(true);
        }
        let Some(mut j) = (1..path.len()).find(|&j| path[j].c > 0) else {
            return Ok(false);
        };
        path[j].c -= 1;
        while j > 0 {
            let child = path[j].block.item(path[j].c).child();
            j -= 1;
            let block = self.read_block(child, j as u8)?;
            let c = block.count().saturating_sub(1);
            path[j] = PathLevel { n: child, block, c };
        }
        if path[0].block.count() == 0 {
            return self.prev_leaf_item(path);
        }
        Ok(true)
    }

    fn key_exists(&mut self, key: &[u8]) -> Result<bool> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Ok(false);
        }
        Ok(self.descend(key, 1)?.1)
    }

    /// Reassemble every component of `key`
    pub(crate) fn read_tag_at(&mut self, key: &[u8], keep_compressed: bool) -> Result<Option<Tag>> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Ok(None);
        }
        let (mut path, found) = self.descend(key, 1)?;
        if !found {
            return Ok(None);
        }
        let first = path[0].block.item(path[0].c);
        let components = first.components_of();
        let compressed = first.compressed();
        let mut data = first.tag().to_vec();
        for i in 2..=components {
            if !self.next_leaf_item(&mut path)? {
                return Err(Error::corrupt(format!("Tag for key is missing component {} of {}", i, components)));
            }
            let item = path[0].block.item(path[0].c);
            if item.key() != key || item.component() != i {
                return Err(Error::corrupt(format!("Tag component {} of {} out of place", i, components)));
            }
            data.extend_from_slice(item.tag());
        }
        if compressed && !keep_compressed {
            data = self.compressor.decompress(&data)?;
        }
        Ok(Some(Tag { data, compressed: compressed && keep_compressed }))
    }

    fn check_key(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_argument("Keys must not be empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(Error::invalid_argument(format!(
                "Key of {} bytes exceeds the limit of {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        Ok(())
    }

    fn prepare_tag(&self, tag: &[u8], already_compressed: bool) -> Result<(Vec<u8>, bool)> {
        if already_compressed {
            return Ok((tag.to_vec(), true));
        }
        if self.config.compress_min > 0 && tag.len() > self.config.compress_min {
            let packed = self.compressor.compress(tag)?;
            if packed.len() < tag.len() {
                return Ok((packed, true));
            }
        }
        Ok((tag.to_vec(), false))
    }

    fn add(&mut self, key: &[u8], tag: &[u8], already_compressed: bool) -> Result<()> {
        self.check_writable()?;
        Self::check_key(key)?;
        let (payload, compressed) = self.prepare_tag(tag, already_compressed)?;

        let piece = max_component_size(self.block_size, key.len());
        let components = payload.len().div_ceil(piece).max(1);
        let components = u16::try_from(components)
            .map_err(|_| Error::range(format!("Tag of {} bytes needs too many components", payload.len())))?;

        let (path, found) = self.descend(key, 1)?;
        let old_components = if found { path[0].block.item(path[0].c).components_of() } else { 0 };

        for i in 1..=components {
            let start = (i as usize - 1) * piece;
            let end = (start + piece).min(payload.len());
            let item = Item::leaf(key, i, components, &payload[start..end], compressed);
            self.add_item(key, i, item)?;
        }
        for i in components + 1..=old_components {
            self.delete_component(key, i)?;
        }
        if !found {
            self.item_count += 1;
        }
        self.version += 1;
        Ok(())
    }

    fn add_item(&mut self, key: &[u8], component: u16, item: Vec<u8>) -> Result<()> {
        let (mut path, found) = self.descend(key, component)?;
        let append = !found && path[0].c == path[0].block.count();
        self.seq_count = if append { self.seq_count + 1 } else { 0 };
        self.alter(&mut path)?;
        let c = path[0].c;
        self.insert_into_level(&mut path, 0, c, item, found)
    }

    /// Make every block on `path` writable in this transaction, moving
    /// committed blocks to fresh block numbers and repointing parents.
    fn alter(&mut self, path: &mut [PathLevel]) -> Result<()> {
        let mut moved_child: Option<BlockNo> = None;
        for j in 0..path.len() {
            let n = path[j].n;
            if self.bitmap.block_free_at_start(n) {
                // Already copied this transaction, and so are its ancestors
                if let Some(child) = moved_child {
                    let c = path[j].c;
                    self.dirty_block(n)?.set_child(c, child);
                }
                return Ok(());
            }
            let mut block = self.read_block(n, j as u8)?;
            if let Some(child) = moved_child {
                block.set_child(path[j].c, child);
            }
            block.set_revision(self.revision + 1);
            self.bitmap.free_block(n)?;
            let m = self.bitmap.next_free_block();
            self.dirty.insert(m, block);
            path[j].n = m;
            moved_child = Some(m);
        }
        if let Some(root) = moved_child {
            self.root = root;
        }
        Ok(())
    }

    /// Put `item` at slot `pos` of the (already altered) block at level `j`,
    /// splitting upwards as far as needed.
    fn insert_into_level(
        &mut self,
        path: &mut [PathLevel],
        j: usize,
        pos: usize,
        item: Vec<u8>,
        replace: bool,
    ) -> Result<()> {
        let n = path[j].n;
        let block = self.dirty_block(n)?;
        if replace {
            let old = block.item(pos).size();
            if block.total_free() + old >= item.len() {
                block.delete_item(pos);
                block.insert_item(pos, &item);
                return Ok(());
            }
            block.delete_item(pos);
        } else if block.has_room(item.len()) {
            block.insert_item(pos, &item);
            return Ok(());
        }

        let mut left_items = block.items();
        left_items.insert(pos, item);
        let split = self.split_point(&left_items, pos, replace);
        let right_items = left_items.split_off(split);

        let separator = if j == 0 {
            leaf_separator(
                ItemRef::new(&left_items[left_items.len() - 1]),
                ItemRef::new(&right_items[0]),
            )
        } else {
            let first = ItemRef::new(&right_items[0]);
            (first.key().to_vec(), first.component())
        };

        self.dirty_block(n)?.rebuild(&left_items);
        let m = self.bitmap.next_free_block();
        let mut right = Block::new(self.block_size, j as u8, self.revision + 1);
        right.rebuild(&right_items);
        self.dirty.insert(m, right);
        debug!(table = %self.layout.name, level = j, left = n, right = m, split, "split block");

        let sep_item = Item::branch(&separator.0, separator.1, m);
        if j == self.level as usize {
            let r = self.bitmap.next_free_block();
            let mut root = Block::new(self.block_size, j as u8 + 1, self.revision + 1);
            root.insert_item(0, &Item::branch(b"", 0, n));
            root.insert_item(1, &sep_item);
            self.dirty.insert(r, root);
            self.root = r;
            self.level += 1;
            debug!(table = %self.layout.name, level = self.level, root = r, "tree grew");
            Ok(())
        } else {
            let parent_pos = path[j + 1].c + 1;
            self.insert_into_level(path, j + 1, parent_pos, sep_item, false)
        }
    }

    /// Index of the first item to move right. Runs of appends leave the old
    /// block full and start the new one with just the new item.
    fn split_point(&self, items: &[Vec<u8>], pos: usize, replace: bool) -> usize {
        let last = items.len() - 1;
        if !replace && pos == last && self.seq_count >= SEQ_THRESHOLD {
            return last;
        }
        let total: usize = items.iter().map(|i| i.len() + D2).sum();
        let mut acc = 0;
        for (i, item) in items.iter().enumerate() {
            acc += item.len() + D2;
            if acc >= total / 2 {
                return (i + 1).clamp(1, last);
            }
        }
        last
    }

    pub(crate) fn del(&mut self, key: &[u8]) -> Result<bool> {
        self.check_writable()?;
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Ok(false);
        }
        let (path, found) = self.descend(key, 1)?;
        if !found {
            return Ok(false);
        }
        let components = path[0].block.item(path[0].c).components_of();
        for i in 1..=components {
            self.delete_component(key, i)?;
        }
        self.item_count = self.item_count.saturating_sub(1);
        self.seq_count = 0;
        self.version += 1;
        Ok(true)
    }

    fn delete_component(&mut self, key: &[u8], component: u16) -> Result<()> {
        let (mut path, found) = self.descend(key, component)?;
        if !found {
            return Err(Error::corrupt(format!("Component {} of a tag is missing", component)));
        }
        self.alter(&mut path)?;
        let (n, c) = (path[0].n, path[0].c);
        self.dirty_block(n)?.delete_item(c);
        self.rebalance(&mut path, 0)
    }

    /// Merge an underfull block at level `j` with a neighbour when both fit
    /// in one block, then look at the parent.
    fn rebalance(&mut self, path: &mut [PathLevel], j: usize) -> Result<()> {
        if j == self.level as usize {
            return self.shrink_root();
        }
        let capacity = self.block_size - DIR_START;
        let block = self.dirty_block(path[j].n)?;
        if block.count() > 0 && block.used() >= capacity / 4 {
            return Ok(());
        }

        let parent_n = path[j + 1].n;
        let c = path[j + 1].c;
        let parent = self.dirty_block(parent_n)?.clone();
        let (li, ri) = if c + 1 < parent.count() {
            (c, c + 1)
        } else if c > 0 {
            (c - 1, c)
        } else {
            return Ok(());
        };

        let left_n = parent.item(li).child();
        let right_n = parent.item(ri).child();
        let left = self.read_block(left_n, j as u8)?;
        let right = self.read_block(right_n, j as u8)?;
        let mut right_items = right.items();
        if j > 0 {
            // Right's first entry was minus infinity; it needs a real key now
            let sep = parent.item(ri);
            if let Some(first) = right_items.first_mut() {
                let child = ItemRef::new(first).child();
                *first = Item::branch(sep.key(), sep.component(), child);
            }
        }
        let combined = left.used() + right_items.iter().map(|i| i.len() + D2).sum::<usize>();
        if combined > capacity {
            return Ok(());
        }

        let left_n = if self.bitmap.block_free_at_start(left_n) {
            left_n
        } else {
            let mut copy = left;
            copy.set_revision(self.revision + 1);
            self.bitmap.free_block(left_n)?;
            let m = self.bitmap.next_free_block();
            self.dirty.insert(m, copy);
            self.dirty_block(parent_n)?.set_child(li, m);
            m
        };
        let target = self.dirty_block(left_n)?;
        for item in &right_items {
            let at = target.count();
            target.insert_item(at, item);
        }
        self.release_block(right_n)?;
        self.dirty_block(parent_n)?.delete_item(ri);
        debug!(table = %self.layout.name, level = j, left = left_n, right = right_n, "merged blocks");

        self.rebalance(path, j + 1)
    }

    /// Drop root levels that have a single child
    fn shrink_root(&mut self) -> Result<()> {
        while self.level > 0 {
            let root = self.read_block(self.root, self.level)?;
            if root.count() != 1 {
                break;
            }
            let child = root.item(0).child();
            self.release_block(self.root)?;
            self.root = child;
            self.level -= 1;
            debug!(table = %self.layout.name, level = self.level, root = child, "tree shrank");
        }
        Ok(())
    }

    fn release_block(&mut self, n: BlockNo) -> Result<()> {
        self.bitmap.free_block(n)?;
        self.dirty.remove(&n);
        Ok(())
    }

    fn commit(&mut self, revision: Revision) -> Result<()> {
        self.check_writable()?;
        if revision <= self.revision {
            return Err(Error::invalid_operation(format!(
                "New revision {} must be greater than {}",
                revision, self.revision
            )));
        }

        let dirty = std::mem::take(&mut self.dirty);
        if let Err(e) = self.write_revision(revision, &dirty) {
            // The bitmap baseline and the committed root stay on the old revision
            warn!(table = %self.layout.name, revision, error = %e, "commit failed");
            self.dirty = dirty;
            return Err(e);
        }
        self.bitmap.commit();

        if let Some(cache) = self.cache.as_mut() {
            for (n, mut block) in dirty {
                block.set_revision(revision);
                cache.put(n, block);
            }
        }
        info!(table = %self.layout.name, revision, root = self.root, level = self.level, entries = self.item_count, "committed");
        self.revision = revision;
        self.committed = Committed { root: self.root, level: self.level, item_count: self.item_count };
        self.seq_count = 0;
        self.version += 1;
        Ok(())
    }

    /// Write `dirty` blocks stamped with `revision`, then publish a base naming them
    fn write_revision(&mut self, revision: Revision, dirty: &BTreeMap<BlockNo, Block>) -> Result<()> {
        let block_size = self.block_size as u64;
        {
            let mut file = self
                .file
                .as_ref()
                .ok_or_else(|| Error::invalid_operation("Table is not open"))?;
            for (n, block) in dirty {
                let mut block = block.clone();
                block.set_revision(revision);
                file.seek(SeekFrom::Start(*n as u64 * block_size))?;
                file.write_all(&block.data)?;
            }
            // Every block must be durable before the base points at it
            file.sync_all()?;
        }
        let base = BaseFile::new(revision, self.block_size, self.root, self.level, self.item_count, &self.bitmap)?;
        self.revisions.publish(&base)
    }

    fn cancel(&mut self) -> Result<()> {
        self.check_writable()?;
        self.discard_changes();
        Ok(())
    }

    fn discard_changes(&mut self) {
        self.dirty.clear();
        self.bitmap.cancel();
        self.root = self.committed.root;
        self.level = self.committed.level;
        self.item_count = self.committed.item_count;
        self.seq_count = 0;
        self.version += 1;
        debug!(table = %self.layout.name, revision = self.revision, "cancelled changes");
    }

    /// Path to the last entry in the table
    pub(crate) fn descend_last(&mut self) -> Result<Vec<PathLevel>> {
        let max_key = [0xffu8; MAX_KEY_LEN];
        let (mut path, _) = self.descend(&max_key, u16::MAX)?;
        if path[0].c >= path[0].block.count() && !self.prev_leaf_item(&mut path)? {
            return Err(Error::corrupt("Table has no null entry"));
        }
        Ok(path)
    }
}

fn found_at_leaf(path: &[PathLevel], key: &[u8], component: u16) -> bool {
    let leaf = &path[0];
    leaf.c < leaf.block.count() && leaf.block.item(leaf.c).cmp_key(key, component).is_eq()
}

/// Shortest key that sorts after `left` and no later than `right`
fn leaf_separator(left: ItemRef<'_>, right: ItemRef<'_>) -> (Vec<u8>, u16) {
    let (lk, rk) = (left.key(), right.key());
    if lk != rk {
        for i in 1..rk.len() {
            if &rk[..i] > lk {
                return (rk[..i].to_vec(), 1);
            }
        }
    }
    (rk.to_vec(), right.component())
}
