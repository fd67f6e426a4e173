use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::error::{Error, Result};
use crate::storage::block::MAX_KEY_LEN;
use crate::storage::table::{PathLevel, TableCore, Tag};

/// Ordered walk over a table's entries.
///
/// The cursor keeps its own root-to-leaf path. When the table changes under
/// it, the path is rebuilt by seeking the last key it was on, so iteration
/// carries on from the same place in key order.
pub struct Cursor {
    core: Arc<RwLock<TableCore>>,
    path: Vec<PathLevel>,
    version: u64,
    current_key: Vec<u8>,
    positioned: bool,
    after_end: bool,
}

impl Cursor {
    pub(crate) fn new(core: Arc<RwLock<TableCore>>) -> Self {
        Cursor {
            core,
            path: Vec::new(),
            version: 0,
            current_key: Vec::new(),
            positioned: false,
            after_end: false,
        }
    }

    /// Key of the current entry; empty before the first entry or after the last
    pub fn current_key(&self) -> &[u8] {
        &self.current_key
    }

    pub fn after_end(&self) -> bool {
        self.after_end
    }

    /// Is the cursor sitting on a real entry?
    pub fn is_on_entry(&self) -> bool {
        self.positioned && !self.after_end && !self.current_key.is_empty()
    }

    /// Move to `key` if present (returning true), else to the entry before
    /// it. Keys too long to be stored are truncated and never match exactly.
    pub fn find_entry(&mut self, key: &[u8]) -> Result<bool> {
        let mut core = self.core.write();
        let (search, truncated) = if key.len() > MAX_KEY_LEN {
            (&key[..MAX_KEY_LEN], true)
        } else {
            (key, false)
        };

        let (mut path, found) = core.descend(search, 1)?;
        if !found && !core.prev_leaf_item(&mut path)? {
            return Err(Error::corrupt("Table has no null entry"));
        }
        back_to_first_component(&mut core, &mut path)?;

        self.current_key = path[0].block.item(path[0].c).key().to_vec();
        self.path = path;
        self.version = core.version;
        self.positioned = true;
        self.after_end = false;
        Ok(found && !truncated && !search.is_empty())
    }

    /// Move to `key` if present, else to the first entry after it
    pub fn find_entry_ge(&mut self, key: &[u8]) -> Result<bool> {
        if self.find_entry(key)? {
            return Ok(true);
        }
        self.next()?;
        Ok(false)
    }

    /// Advance to the next entry; false once past the last one
    pub fn next(&mut self) -> Result<bool> {
        if !self.positioned {
            self.find_entry(b"")?;
        }
        let core = Arc::clone(&self.core);
        let mut core = core.write();
        self.refresh(&mut core)?;
        if self.after_end {
            return Ok(false);
        }
        loop {
            if !core.next_leaf_item(&mut self.path)? {
                self.after_end = true;
                self.current_key.clear();
                return Ok(false);
            }
            let item = self.path[0].block.item(self.path[0].c);
            if item.component() == 1 {
                self.current_key = item.key().to_vec();
                return Ok(true);
            }
        }
    }

    /// Step back to the previous entry; false once before the first one
    pub fn prev(&mut self) -> Result<bool> {
        if !self.positioned {
            return Ok(false);
        }
        let core = Arc::clone(&self.core);
        let mut core = core.write();
        self.refresh(&mut core)?;
        if self.after_end {
            // The path still points at the last item in the table
            self.after_end = false;
        } else {
            if self.current_key.is_empty() {
                return Ok(false);
            }
            if !core.prev_leaf_item(&mut self.path)? {
                return Err(Error::corrupt("Table has no null entry"));
            }
        }
        back_to_first_component(&mut core, &mut self.path)?;
        self.current_key = self.path[0].block.item(self.path[0].c).key().to_vec();
        Ok(!self.current_key.is_empty())
    }

    /// The full tag of the current entry
    pub fn read_tag(&mut self, keep_compressed: bool) -> Result<Tag> {
        if !self.is_on_entry() {
            return Err(Error::invalid_operation("Cursor is not on an entry"));
        }
        let mut core = self.core.write();
        core.read_tag_at(&self.current_key, keep_compressed)?
            .ok_or_else(|| Error::corrupt("Entry under cursor has vanished"))
    }

    /// Rebuild the path if the table changed since it was taken
    fn refresh(&mut self, core: &mut TableCore) -> Result<()> {
        if self.version == core.version {
            return Ok(());
        }
        let path = if self.after_end {
            core.descend_last()?
        } else {
            let (mut path, found) = core.descend(&self.current_key, 1)?;
            if !found && !core.prev_leaf_item(&mut path)? {
                return Err(Error::corrupt("Table has no null entry"));
            }
            back_to_first_component(core, &mut path)?;
            // The old key may have been deleted; we now sit on its predecessor
            self.current_key = path[0].block.item(path[0].c).key().to_vec();
            path
        };
        self.path = path;
        self.version = core.version;
        Ok(())
    }
}

fn back_to_first_component(core: &mut TableCore, path: &mut [PathLevel]) -> Result<()> {
    while path[0].block.item(path[0].c).component() > 1 {
        if !core.prev_leaf_item(path)? {
            return Err(Error::corrupt("Tag component found without its first component"));
        }
    }
    Ok(())
}

/// A cursor that can delete the entry it is on
pub struct MutCursor {
    cursor: Cursor,
}

impl MutCursor {
    pub(crate) fn new(cursor: Cursor) -> Self {
        MutCursor { cursor }
    }

    /// Delete the current entry and move to the one after it. Returns
    /// whether the cursor landed on an entry.
    pub fn del(&mut self) -> Result<bool> {
        if !self.cursor.is_on_entry() {
            return Err(Error::invalid_operation("Cursor is not on an entry"));
        }
        let key = self.cursor.current_key.clone();
        self.cursor.core.write().del(&key)?;
        self.cursor.find_entry_ge(&key)?;
        Ok(self.cursor.is_on_entry())
    }
}

impl Deref for MutCursor {
    type Target = Cursor;

    fn deref(&self) -> &Cursor {
        &self.cursor
    }
}

impl DerefMut for MutCursor {
    fn deref_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }
}
