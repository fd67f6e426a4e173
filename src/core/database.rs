use std::collections::BTreeMap;
use tracing::{info, warn};
use crate::core::config::{Config, TableConfig};
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, Revision};
use crate::index::positionlist::{PositionReader, PositionTable};
use crate::index::postlist::{PostingIterator, PostlistTable};
use crate::index::record::RecordTable;
use crate::index::termlist::{TermEntry, TermListTable};
use crate::storage::file_lock::FileLock;
use crate::storage::layout::TableLayout;
use crate::storage::table::Table;
use crate::writer::batch::{ChangeBatch, DocOp, Document, StagedChanges};

const LOCK_NAME: &str = "quarry";

/// Posting, position, record and termlist tables sharing one directory and
/// one revision number.
pub struct Database {
    config: Config,
    postlist: PostlistTable,
    positions: PositionTable,
    records: RecordTable,
    termlists: TermListTable,
    revision: Revision,
    readonly: bool,
    _lock: Option<FileLock>,
}

impl Database {
    /// Create a fresh database, replacing any tables already there
    pub fn create(config: Config) -> Result<Self> {
        let lock = Self::lock(&config)?;
        let mut tables = Self::tables(&config, false);
        for table in tables.iter_mut() {
            table.create_and_open(config.block_size)?;
        }
        info!(path = %config.storage_path.display(), block_size = config.block_size, "created database");
        Ok(Self::assemble(config, tables, 0, false, lock))
    }

    pub fn open(config: Config) -> Result<Self> {
        let lock = Self::lock(&config)?;
        Self::open_tables(config, false, lock)
    }

    pub fn open_readonly(config: Config) -> Result<Self> {
        Self::open_tables(config, true, None)
    }

    fn lock(config: &Config) -> Result<Option<FileLock>> {
        if !config.lock {
            return Ok(None);
        }
        let layout = TableLayout::new(config.storage_path.clone(), LOCK_NAME);
        layout.ensure_dir()?;
        Ok(Some(FileLock::acquire(layout.lock_path())?))
    }

    fn tables(config: &Config, readonly: bool) -> [Table; 4] {
        // The database-wide lock covers every table
        let table_config = TableConfig { lock: false, ..config.table_config() };
        ["postlist", "position", "record", "termlist"]
            .map(|name| Table::new(config.storage_path.join(name), readonly, table_config.clone()))
    }

    fn assemble(config: Config, tables: [Table; 4], revision: Revision, readonly: bool, lock: Option<FileLock>) -> Self {
        let [postlist, positions, records, termlists] = tables;
        Database {
            config,
            postlist: PostlistTable::new(postlist),
            positions: PositionTable::new(positions),
            records: RecordTable::new(records),
            termlists: TermListTable::new(termlists),
            revision,
            readonly,
            _lock: lock,
        }
    }

    /// Open every table at the newest revision they all still have. A
    /// crash part way through `commit` leaves some tables one revision
    /// ahead; their other base still holds the common one.
    fn open_tables(config: Config, readonly: bool, lock: Option<FileLock>) -> Result<Self> {
        let mut tables = Self::tables(&config, readonly);
        let mut latest = Vec::with_capacity(tables.len());
        for table in tables.iter_mut() {
            table.open()?;
            latest.push(table.get_open_revision());
        }
        let revision = latest.iter().copied().min().unwrap_or(0);
        for table in tables.iter_mut() {
            if table.get_open_revision() != revision {
                warn!(table = %table.layout().name, from = table.get_open_revision(), to = revision, "rolling table back to common revision");
                if !table.open_at(revision)? {
                    return Err(Error::corrupt(format!(
                        "Table {} has no revision {} to match the others",
                        table.layout().name,
                        revision
                    )));
                }
            }
        }
        info!(path = %config.storage_path.display(), revision, readonly, "opened database");
        Ok(Self::assemble(config, tables, revision, readonly, lock))
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::invalid_operation("Database is open read-only"));
        }
        Ok(())
    }

    /// Resolve `batch` against the stored documents and write the result
    /// into the tables. Nothing is written if any operation is invalid.
    pub fn apply(&mut self, batch: ChangeBatch) -> Result<()> {
        self.check_writable()?;
        let ops = batch.len();
        let mut stored: BTreeMap<DocId, Option<Vec<TermEntry>>> = BTreeMap::new();
        let mut current: BTreeMap<DocId, Option<Document>> = BTreeMap::new();

        for op in batch.into_ops() {
            let did = match &op {
                DocOp::Add(did, _) | DocOp::Delete(did) | DocOp::Replace(did, _) => *did,
            };
            if !stored.contains_key(&did) {
                stored.insert(did, self.termlists.get_termlist(did)?);
            }
            let exists = match current.get(&did) {
                Some(doc) => doc.is_some(),
                None => stored.get(&did).is_some_and(Option::is_some),
            };
            match op {
                DocOp::Add(did, doc) => {
                    if exists {
                        return Err(Error::invalid_argument(format!("Document {} already exists", did.value())));
                    }
                    current.insert(did, Some(doc));
                }
                DocOp::Delete(did) => {
                    if !exists {
                        return Err(Error::invalid_argument(format!("Document {} not found", did.value())));
                    }
                    current.insert(did, None);
                }
                DocOp::Replace(did, doc) => {
                    current.insert(did, Some(doc));
                }
            }
        }

        let mut staged = StagedChanges::default();
        for (did, doc) in &current {
            let old = stored.get(did).and_then(|t| t.as_deref());
            staged.stage(*did, old, doc.as_ref());
        }
        self.write_staged(&staged)?;
        info!(ops, terms = staged.mod_postings.len(), "applied batch");
        Ok(())
    }

    fn write_staged(&mut self, staged: &StagedChanges) -> Result<()> {
        self.postlist.merge_changes(&staged.mod_postings, &staged.doclens, &staged.freq_deltas)?;
        for ((did, term), positions) in &staged.positions {
            match positions {
                Some(positions) => self.positions.set_positionlist(*did, term, positions)?,
                None => {
                    self.positions.delete_positionlist(*did, term)?;
                }
            }
        }
        for (did, data) in &staged.records {
            match data {
                Some(data) => self.records.replace_record(*did, data)?,
                None => {
                    self.records.delete_record(*did)?;
                }
            }
        }
        for (did, entries) in &staged.termlists {
            match entries {
                Some(entries) => self.termlists.set_termlist(*did, entries)?,
                None => {
                    self.termlists.delete_termlist(*did)?;
                }
            }
        }
        Ok(())
    }

    /// Tables in the order `commit` writes them. The postlist goes last so a
    /// partial commit never exposes postings without their documents.
    fn tables_in_commit_order(&mut self) -> [&mut Table; 4] {
        [
            self.positions.table_mut(),
            self.records.table_mut(),
            self.termlists.table_mut(),
            self.postlist.table_mut(),
        ]
    }

    /// Commit every table at the next revision. After a failed commit some
    /// tables may already be a revision ahead, so a retry moves all of them
    /// past the furthest one.
    pub fn commit(&mut self) -> Result<Revision> {
        self.check_writable()?;
        let base = self.revision;
        let revision = self
            .tables_in_commit_order()
            .iter()
            .map(|t| t.get_open_revision())
            .fold(base, Revision::max)
            + 1;
        for table in self.tables_in_commit_order() {
            table.commit(revision)?;
        }
        self.revision = revision;
        info!(revision, "committed database");
        Ok(revision)
    }

    /// Drop everything applied since the last commit. Tables a failed
    /// commit moved ahead go back to the database revision.
    pub fn cancel(&mut self) -> Result<()> {
        self.check_writable()?;
        let revision = self.revision;
        for table in self.tables_in_commit_order() {
            if table.get_open_revision() > revision {
                warn!(table = %table.layout().name, from = table.get_open_revision(), to = revision, "rolling back partial commit");
                if !table.open_at(revision)? {
                    return Err(Error::corrupt(format!(
                        "Table {} has no revision {} to roll back to",
                        table.layout().name,
                        revision
                    )));
                }
            } else {
                table.cancel()?;
            }
        }
        Ok(())
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn doc_count(&self) -> u64 {
        self.records.get_doccount()
    }

    pub fn get_document(&self, did: DocId) -> Result<Option<Vec<u8>>> {
        self.records.get_record(did)
    }

    pub fn get_doclength(&self, did: DocId) -> Result<Option<u32>> {
        self.postlist.get_doclength(did)
    }

    /// `(termfreq, collfreq)`
    pub fn term_freqs(&self, term: &[u8]) -> Result<(u32, u64)> {
        self.postlist.get_freqs(term)
    }

    pub fn postlist(&self, term: &[u8]) -> Result<PostingIterator> {
        self.postlist.postlist(term)
    }

    pub fn positionlist(&self, did: DocId, term: &[u8]) -> Result<PositionReader> {
        self.positions.positionlist(did, term)
    }

    pub fn termlist(&self, did: DocId) -> Result<Option<Vec<TermEntry>>> {
        self.termlists.get_termlist(did)
    }

    pub fn postlist_table(&self) -> &PostlistTable {
        &self.postlist
    }
}
