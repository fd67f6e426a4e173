use std::fs;
use tracing::{debug, info};
use crate::core::error::{Error, Result};
use crate::core::types::Revision;
use crate::storage::base::BaseFile;
use crate::storage::layout::{BaseLetter, TableLayout};

/// Double-buffered base files. Each commit is published to the letter not
/// holding the open revision, so a crash mid-write leaves the previous base
/// intact and the highest valid revision is always recoverable.
#[derive(Debug)]
pub struct RevisionManager {
    pub layout: TableLayout,
    current: Option<BaseLetter>,
}

impl RevisionManager {
    pub fn new(layout: TableLayout) -> Self {
        RevisionManager { layout, current: None }
    }

    fn read_both(&self) -> Result<[(BaseLetter, Option<BaseFile>); 2]> {
        Ok([
            (BaseLetter::A, BaseFile::read(&self.layout, BaseLetter::A)?),
            (BaseLetter::B, BaseFile::read(&self.layout, BaseLetter::B)?),
        ])
    }

    fn any_base_exists(&self) -> bool {
        [BaseLetter::A, BaseLetter::B]
            .iter()
            .any(|&l| self.layout.base_path(l).exists())
    }

    /// Valid base with the highest revision, if any
    pub fn latest(&self) -> Result<Option<(BaseLetter, BaseFile)>> {
        let best = self
            .read_both()?
            .into_iter()
            .filter_map(|(letter, base)| base.map(|b| (letter, b)))
            .max_by_key(|(_, base)| base.revision);
        Ok(best)
    }

    pub fn latest_revision(&self) -> Result<Option<Revision>> {
        Ok(self.latest()?.map(|(_, base)| base.revision))
    }

    /// Pick the newest valid base and remember its letter
    pub fn open_latest(&mut self) -> Result<BaseFile> {
        match self.latest()? {
            Some((letter, base)) => {
                info!(table = %self.layout.name, revision = base.revision, letter = %letter.as_char(), "opening base");
                self.current = Some(letter);
                Ok(base)
            }
            None if self.any_base_exists() => Err(Error::corrupt(format!(
                "Neither base file of table {} is valid",
                self.layout.name
            ))),
            None => Err(Error::opening(format!(
                "No base file for table {} in {}",
                self.layout.name,
                self.layout.dir.display()
            ))),
        }
    }

    /// Open a specific revision if either base still records it
    pub fn open_revision(&mut self, revision: Revision) -> Result<Option<BaseFile>> {
        for (letter, base) in self.read_both()? {
            if let Some(base) = base.filter(|b| b.revision == revision) {
                self.current = Some(letter);
                return Ok(Some(base));
            }
        }
        Ok(None)
    }

    /// Start from nothing: any old bases go, the first one lands in A
    pub fn create(&mut self, base: &BaseFile) -> Result<()> {
        for letter in [BaseLetter::A, BaseLetter::B] {
            let path = self.layout.base_path(letter);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        base.write_to_file(&self.layout, BaseLetter::A)?;
        self.current = Some(BaseLetter::A);
        Ok(())
    }

    /// Write `base` over the stale letter and make it current
    pub fn publish(&mut self, base: &BaseFile) -> Result<()> {
        let target = self.current.map(BaseLetter::other).unwrap_or(BaseLetter::A);
        base.write_to_file(&self.layout, target)?;
        debug!(table = %self.layout.name, revision = base.revision, letter = %target.as_char(), "published base");
        self.current = Some(target);
        Ok(())
    }

    pub fn current_letter(&self) -> Option<BaseLetter> {
        self.current
    }
}
