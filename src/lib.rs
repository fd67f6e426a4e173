pub mod core;
pub mod storage;
pub mod compression;
pub mod index;
pub mod writer;

pub use crate::core::config::{Config, TableConfig};
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind, LockFailure, Result};
pub use crate::core::types::DocId;
pub use crate::storage::cursor::{Cursor, MutCursor};
pub use crate::storage::table::{Table, Tag};
pub use crate::writer::batch::{ChangeBatch, Document};

/*
┌──────────────────────────────── QUARRYDB LAYOUT ─────────────────────────────────┐
│                                                                                   │
│  core::Database ── apply(ChangeBatch) ── commit() ── cancel()                     │
│     │                                                                             │
│     ├── index::PostlistTable    term → chunked (docid, wdf) lists + doclens       │
│     ├── index::PositionTable    (docid, term) → interpolative position list       │
│     ├── index::RecordTable      docid → document data                             │
│     └── index::TermListTable    docid → (term, wdf) list                          │
│                │                                                                  │
│                ▼                                                                  │
│  storage::Table   copy-on-write B-tree over <name>.DB                             │
│     ├── block       11-byte header, u16 directory, items packed from the end      │
│     ├── bitmap      blocks in use now / at transaction start                      │
│     ├── revision    <name>.baseA / <name>.baseB, newest valid wins                │
│     └── cursor      root-to-leaf path, rebuilt when the table changes             │
│                                                                                   │
│  compression::{varint, bitstream, compress}                                       │
│                                                                                   │
└───────────────────────────────────────────────────────────────────────────────────┘
*/
