use std::path::{Path, PathBuf};
use std::fs;
use crate::core::error::Result;

/// Which of the two alternating base files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseLetter {
    A,
    B,
}

impl BaseLetter {
    pub fn other(self) -> Self {
        match self {
            BaseLetter::A => BaseLetter::B,
            BaseLetter::B => BaseLetter::A,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            BaseLetter::A => 'A',
            BaseLetter::B => 'B',
        }
    }
}

/// Files making up one table: `<name>.DB`, `<name>.baseA`, `<name>.baseB`
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub dir: PathBuf,
    pub name: String,
}

impl TableLayout {
    pub fn new(dir: impl Into<PathBuf>, name: &str) -> Self {
        TableLayout {
            dir: dir.into(),
            name: name.to_string(),
        }
    }

    /// Split a path such as `/data/postlist` into directory and table name
    pub fn from_path(path: &Path) -> Self {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        TableLayout { dir, name }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        if !self.dir.as_os_str().is_empty() {
            fs::create_dir_all(&self.dir)?;
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.join(format!("{}.DB", self.name))
    }

    pub fn base_path(&self, letter: BaseLetter) -> PathBuf {
        self.dir.join(format!("{}.base{}", self.name, letter.as_char()))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.name))
    }
}
