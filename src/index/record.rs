use crate::compression::varint::pack_uint_preserving_sort;
use crate::core::error::Result;
use crate::core::types::DocId;
use crate::storage::table::Table;

fn record_key(did: DocId) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    pack_uint_preserving_sort(&mut key, did.value() as u64);
    key
}

/// Document data by docid. Large records are split and compressed by the
/// table underneath; callers only ever see whole values.
pub struct RecordTable {
    table: Table,
}

impl RecordTable {
    pub fn new(table: Table) -> Self {
        RecordTable { table }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    pub fn get_record(&self, did: DocId) -> Result<Option<Vec<u8>>> {
        self.table.get_exact_entry(&record_key(did))
    }

    pub fn record_exists(&self, did: DocId) -> Result<bool> {
        self.table.key_exists(&record_key(did))
    }

    pub fn replace_record(&mut self, did: DocId, data: &[u8]) -> Result<()> {
        self.table.add(&record_key(did), data, false)
    }

    pub fn delete_record(&mut self, did: DocId) -> Result<bool> {
        self.table.del(&record_key(did))
    }

    pub fn get_doccount(&self) -> u64 {
        self.table.get_entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TableConfig;

    #[test]
    fn test_large_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = TableConfig { compress_min: 0, ..TableConfig::default() };
        let mut table = Table::new(dir.path().join("record"), false, config);
        table.create_and_open(2048).unwrap();
        let mut records = RecordTable::new(table);

        let big: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        records.replace_record(DocId(9), &big).unwrap();
        records.replace_record(DocId(10), b"small").unwrap();
        assert_eq!(records.get_record(DocId(9)).unwrap(), Some(big));
        assert_eq!(records.get_doccount(), 2);

        records.replace_record(DocId(9), b"shrunk").unwrap();
        assert_eq!(records.get_record(DocId(9)).unwrap().as_deref(), Some(&b"shrunk"[..]));
        assert_eq!(records.get_doccount(), 2);

        assert!(records.delete_record(DocId(9)).unwrap());
        assert!(!records.delete_record(DocId(9)).unwrap());
        assert!(!records.record_exists(DocId(9)).unwrap());
        assert_eq!(records.get_record(DocId(10)).unwrap().as_deref(), Some(&b"small"[..]));
    }
}
