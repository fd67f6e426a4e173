use crate::compression::varint::{pack_uint, pack_uint_preserving_sort, unpack_u32, unpack_uint, UnpackExt};
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, Wdf};
use crate::storage::table::Table;

/// One term of a document and its wdf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermEntry {
    pub term: Vec<u8>,
    pub wdf: Wdf,
}

fn termlist_key(did: DocId) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    pack_uint_preserving_sort(&mut key, did.value() as u64);
    key
}

/// `uint(count)` then `uint(len) term uint(wdf)` per entry, terms ascending
pub fn encode_termlist(entries: &[TermEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    pack_uint(&mut out, entries.len() as u64);
    for entry in entries {
        pack_uint(&mut out, entry.term.len() as u64);
        out.extend_from_slice(&entry.term);
        pack_uint(&mut out, entry.wdf as u64);
    }
    out
}

pub fn decode_termlist(data: &[u8]) -> Result<Vec<TermEntry>> {
    let mut input = data;
    let count = unpack_uint(&mut input).or_corrupt("termlist length")?;
    let mut entries = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        let len = unpack_uint(&mut input).or_corrupt("term length in termlist")? as usize;
        if input.len() < len {
            return Err(Error::corrupt("Short read of term in termlist"));
        }
        let (term, rest) = input.split_at(len);
        input = rest;
        let wdf = unpack_u32(&mut input).or_corrupt("wdf in termlist")?;
        entries.push(TermEntry { term: term.to_vec(), wdf });
    }
    if !input.is_empty() {
        return Err(Error::corrupt("Junk at end of termlist"));
    }
    Ok(entries)
}

/// Which terms each document was indexed with, so a document can be
/// removed from the posting lists without scanning them.
pub struct TermListTable {
    table: Table,
}

impl TermListTable {
    pub fn new(table: Table) -> Self {
        TermListTable { table }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    pub fn get_termlist(&self, did: DocId) -> Result<Option<Vec<TermEntry>>> {
        self.table
            .get_exact_entry(&termlist_key(did))?
            .map(|data| decode_termlist(&data))
            .transpose()
    }

    pub fn set_termlist(&mut self, did: DocId, entries: &[TermEntry]) -> Result<()> {
        self.table.add(&termlist_key(did), &encode_termlist(entries), false)
    }

    pub fn delete_termlist(&mut self, did: DocId) -> Result<bool> {
        self.table.del(&termlist_key(did))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termlist_encoding() {
        let entries = vec![
            TermEntry { term: b"brown".to_vec(), wdf: 2 },
            TermEntry { term: b"fox".to_vec(), wdf: 1 },
        ];
        let data = encode_termlist(&entries);
        assert_eq!(data[0], 2);
        assert_eq!(decode_termlist(&data).unwrap(), entries);

        assert!(decode_termlist(&data[..data.len() - 1]).unwrap_err().is_corrupt());
        let mut junk = data.clone();
        junk.push(7);
        assert!(decode_termlist(&junk).unwrap_err().is_corrupt());
    }
}
