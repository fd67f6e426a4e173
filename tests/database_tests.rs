use std::path::Path;
use quarrydb::index::posting::Posting;
use quarrydb::{ChangeBatch, Config, Database, DocId, Document, ErrorKind, LockFailure, Result};

fn config(dir: &Path) -> Config {
    Config { block_size: 2048, ..Config::with_path(dir) }
}

fn doc(data: &str, terms: &[(&str, u32)]) -> Document {
    let mut doc = Document::with_data(data);
    for &(term, wdf) in terms {
        doc.add_term(term, wdf);
    }
    doc
}

fn postings(db: &Database, term: &str) -> Vec<(u32, u32)> {
    db.postlist(term.as_bytes())
        .unwrap()
        .map(|p| p.map(|p: Posting| (p.doc_id.value(), p.wdf)))
        .collect::<Result<_>>()
        .unwrap()
}

#[test]
fn test_cat_postings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = Database::create(config(dir.path())).unwrap();
        let mut batch = ChangeBatch::new();
        batch
            .add_document(DocId(1), doc("one", &[("cat", 3)]))
            .add_document(DocId(5), doc("five", &[("cat", 1)]))
            .add_document(DocId(100000), doc("big", &[("cat", 7)]));
        db.apply(batch).unwrap();
        assert_eq!(db.commit().unwrap(), 1);
    }

    let db = Database::open_readonly(config(dir.path())).unwrap();
    assert_eq!(db.revision(), 1);
    assert_eq!(db.term_freqs(b"cat").unwrap(), (3, 11));

    let mut list = db.postlist(b"cat").unwrap();
    assert_eq!((list.termfreq(), list.collfreq()), (3, 11));
    let mut seen = Vec::new();
    while let Some(posting) = list.next() {
        let posting = posting.unwrap();
        seen.push((posting.doc_id.value(), posting.wdf));
    }
    assert_eq!(seen, vec![(1, 3), (5, 1), (100000, 7)]);
    assert!(list.at_last_chunk());

    assert_eq!(db.doc_count(), 3);
    assert_eq!(db.get_document(DocId(5)).unwrap(), Some(b"five".to_vec()));
    assert_eq!(db.get_doclength(DocId(100000)).unwrap(), Some(7));
    assert_eq!(db.get_doclength(DocId(2)).unwrap(), None);
}

#[test]
fn test_positions_follow_documents() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::create(config(dir.path())).unwrap();

    let mut fox = Document::with_data("the fox and the dog");
    for (pos, word) in ["the", "fox", "and", "the", "dog"].iter().enumerate() {
        fox.add_posting(*word, pos as u32 + 1);
    }
    let mut batch = ChangeBatch::new();
    batch.add_document(DocId(3), fox);
    db.apply(batch).unwrap();
    db.commit().unwrap();

    let the: Vec<u32> = db.positionlist(DocId(3), b"the").unwrap().collect::<Result<_>>().unwrap();
    assert_eq!(the, vec![1, 4]);
    assert_eq!(db.get_doclength(DocId(3)).unwrap(), Some(5));
    let terms: Vec<(Vec<u8>, u32)> = db
        .termlist(DocId(3))
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|e| (e.term, e.wdf))
        .collect();
    assert_eq!(terms[0], (b"and".to_vec(), 1));
    assert_eq!(terms.len(), 4);

    // Replacing drops the positions of terms no longer present
    let mut batch = ChangeBatch::new();
    batch.replace_document(DocId(3), doc("just a fox", &[("fox", 1)]));
    db.apply(batch).unwrap();
    db.commit().unwrap();

    assert!(db.positionlist(DocId(3), b"the").unwrap().is_empty());
    assert!(db.positionlist(DocId(3), b"fox").unwrap().is_empty());
    assert_eq!(db.term_freqs(b"the").unwrap(), (0, 0));
    assert_eq!(postings(&db, "fox"), vec![(3, 1)]);
}

#[test]
fn test_replace_and_delete_keep_frequencies_exact() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::create(config(dir.path())).unwrap();
    let mut batch = ChangeBatch::new();
    for did in 1..=4 {
        batch.add_document(DocId(did), doc("", &[("common", did), ("rare", 1)]));
    }
    db.apply(batch).unwrap();
    db.commit().unwrap();
    assert_eq!(db.term_freqs(b"common").unwrap(), (4, 10));

    let mut batch = ChangeBatch::new();
    batch
        .delete_document(DocId(2))
        .replace_document(DocId(3), doc("", &[("common", 10)]))
        .replace_document(DocId(9), doc("", &[("rare", 2)]));
    db.apply(batch).unwrap();
    db.commit().unwrap();

    assert_eq!(db.term_freqs(b"common").unwrap(), (3, 15));
    assert_eq!(postings(&db, "common"), vec![(1, 1), (3, 10), (4, 4)]);
    assert_eq!(db.term_freqs(b"rare").unwrap(), (3, 4));
    assert_eq!(postings(&db, "rare"), vec![(1, 1), (4, 1), (9, 2)]);
    assert_eq!(db.doc_count(), 4);
    assert_eq!(db.get_document(DocId(2)).unwrap(), None);
    assert_eq!(db.get_doclength(DocId(2)).unwrap(), None);
}

#[test]
fn test_invalid_batch_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::create(config(dir.path())).unwrap();
    let mut batch = ChangeBatch::new();
    batch.add_document(DocId(1), doc("a", &[("t", 1)]));
    db.apply(batch).unwrap();
    db.commit().unwrap();

    let mut batch = ChangeBatch::new();
    batch.add_document(DocId(2), doc("b", &[("t", 1)])).add_document(DocId(1), doc("dup", &[]));
    assert_eq!(db.apply(batch).unwrap_err().kind, ErrorKind::InvalidArgument);

    let mut batch = ChangeBatch::new();
    batch.delete_document(DocId(7));
    assert_eq!(db.apply(batch).unwrap_err().kind, ErrorKind::InvalidArgument);

    assert_eq!(db.term_freqs(b"t").unwrap(), (1, 1));
    assert_eq!(db.get_document(DocId(2)).unwrap(), None);

    // Adding and deleting in one batch nets out
    let mut batch = ChangeBatch::new();
    batch.add_document(DocId(8), doc("tmp", &[("t", 1)])).delete_document(DocId(8));
    db.apply(batch).unwrap();
    assert_eq!(db.term_freqs(b"t").unwrap(), (1, 1));
}

#[test]
fn test_cancel_discards_applied_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::create(config(dir.path())).unwrap();
    let mut batch = ChangeBatch::new();
    batch.add_document(DocId(1), doc("kept", &[("x", 1)]));
    db.apply(batch).unwrap();
    db.commit().unwrap();

    let mut batch = ChangeBatch::new();
    batch.add_document(DocId(2), doc("dropped", &[("x", 1)]));
    db.apply(batch).unwrap();
    assert_eq!(db.term_freqs(b"x").unwrap(), (2, 2));
    db.cancel().unwrap();

    assert_eq!(db.term_freqs(b"x").unwrap(), (1, 1));
    assert_eq!(db.get_document(DocId(2)).unwrap(), None);
    assert_eq!(db.commit().unwrap(), 2);
}

#[test]
fn test_long_list_spans_chunks() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = Database::create(config(dir.path())).unwrap();
        let mut batch = ChangeBatch::new();
        for did in 1..=5000u32 {
            batch.add_document(DocId(did * 3), doc("", &[("every", did % 7 + 1)]));
        }
        db.apply(batch).unwrap();
        db.commit().unwrap();
    }

    let db = Database::open(config(dir.path())).unwrap();
    let all = postings(&db, "every");
    assert_eq!(all.len(), 5000);
    assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
    let expected_cf: u64 = (1..=5000u64).map(|d| d % 7 + 1).sum();
    assert_eq!(db.term_freqs(b"every").unwrap(), (5000, expected_cf));

    let mut list = db.postlist(b"every").unwrap();
    let hit = list.skip_to(DocId(12_001)).unwrap().unwrap();
    assert_eq!(hit.doc_id, DocId(12_003));
    assert!(list.skip_to(DocId(15_001)).unwrap().is_none());
}

#[test]
fn test_readonly_database_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = Database::create(config(dir.path())).unwrap();
        db.commit().unwrap();
    }
    let mut db = Database::open_readonly(config(dir.path())).unwrap();
    assert_eq!(db.apply(ChangeBatch::new()).unwrap_err().kind, ErrorKind::InvalidOperation);
    assert_eq!(db.commit().unwrap_err().kind, ErrorKind::InvalidOperation);
}

#[test]
fn test_one_writer_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::create(config(dir.path())).unwrap();
    let err = Database::open(config(dir.path())).err().unwrap();
    assert_eq!(err.kind, ErrorKind::DatabaseLock(LockFailure::InUse));
    drop(db);
    Database::open(config(dir.path())).unwrap();
}

#[test]
fn test_tables_roll_back_to_shared_revision() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = Database::create(config(dir.path())).unwrap();
        let mut batch = ChangeBatch::new();
        batch.add_document(DocId(1), doc("v1", &[("a", 1)]));
        db.apply(batch).unwrap();
        db.commit().unwrap();
    }
    {
        // A commit that only reached the record table before stopping
        let table_config = quarrydb::TableConfig { lock: false, ..config(dir.path()).table_config() };
        let mut records = quarrydb::Table::new(dir.path().join("record"), false, table_config);
        records.open().unwrap();
        records.add(b"\x01\x02", b"partial", false).unwrap();
        records.commit(2).unwrap();
    }

    let db = Database::open(config(dir.path())).unwrap();
    assert_eq!(db.revision(), 1);
    assert_eq!(db.doc_count(), 1);
    assert_eq!(db.get_document(DocId(2)).unwrap(), None);
}

#[test]
fn test_commit_retries_after_table_fails() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = Database::create(config(dir.path())).unwrap();
        let mut batch = ChangeBatch::new();
        batch.add_document(DocId(1), doc("retried", &[("r", 2)]));
        db.apply(batch).unwrap();

        // The position table commits, then the record table can't write its base
        let blocker = dir.path().join("record.baseB");
        std::fs::create_dir(&blocker).unwrap();
        assert!(db.commit().is_err());
        assert_eq!(db.revision(), 0);
        std::fs::remove_dir(&blocker).unwrap();

        let revision = db.commit().unwrap();
        assert!(revision > 0);
        assert_eq!(db.revision(), revision);
    }

    let db = Database::open_readonly(config(dir.path())).unwrap();
    assert!(db.revision() > 0);
    assert_eq!(db.get_document(DocId(1)).unwrap(), Some(b"retried".to_vec()));
    assert_eq!(postings(&db, "r"), vec![(1, 2)]);
}

#[test]
fn test_cancel_after_failed_commit_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::create(config(dir.path())).unwrap();
    let mut fox = Document::with_data("fox");
    fox.add_posting("fox", 1);
    let mut batch = ChangeBatch::new();
    batch.add_document(DocId(1), fox);
    db.apply(batch).unwrap();

    let blocker = dir.path().join("record.baseB");
    std::fs::create_dir(&blocker).unwrap();
    assert!(db.commit().is_err());
    std::fs::remove_dir(&blocker).unwrap();

    db.cancel().unwrap();
    assert!(db.positionlist(DocId(1), b"fox").unwrap().is_empty());
    assert_eq!(db.get_document(DocId(1)).unwrap(), None);
    assert_eq!(db.commit().unwrap(), 1);
    drop(db);

    let db = Database::open(config(dir.path())).unwrap();
    assert_eq!(db.revision(), 1);
    assert_eq!(db.doc_count(), 0);
    assert!(db.positionlist(DocId(1), b"fox").unwrap().is_empty());
}

#[test]
fn test_overlong_term_rejects_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Database::create(config(dir.path())).unwrap();
    let long = "y".repeat(300);
    let mut batch = ChangeBatch::new();
    batch
        .add_document(DocId(1), doc("fine", &[("short", 1)]))
        .add_document(DocId(2), doc("too long", &[(long.as_str(), 1)]));
    assert_eq!(db.apply(batch).unwrap_err().kind, ErrorKind::InvalidArgument);

    assert_eq!(db.term_freqs(b"short").unwrap(), (0, 0));
    assert_eq!(db.get_document(DocId(1)).unwrap(), None);
    assert_eq!(db.get_doclength(DocId(1)).unwrap(), None);
    assert_eq!(db.commit().unwrap(), 1);
}
