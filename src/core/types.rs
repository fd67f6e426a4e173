use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u32);

impl DocId {
    pub fn new(id: u32) -> Self {
        DocId(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for DocId {
    fn from(id: u32) -> Self {
        DocId(id)
    }
}

/// Table-wide version number, stored in every block header
pub type Revision = u32;

/// Index of a block within the `.DB` file
pub type BlockNo = u32;

/// Position of a term within a document
pub type TermPos = u32;

/// Within-document frequency
pub type Wdf = u32;
