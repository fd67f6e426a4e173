use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use crate::compression::varint::{
    pack_string_preserving_sort, pack_uint_preserving_sort, unpack_uint_preserving_sort, UnpackExt,
};
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, Wdf};
use crate::index::posting::{
    decode_chunk_start, decode_first_chunk_header, encode_chunk, encode_first_chunk_header,
    split_postings, ChunkReader, ListHeader, Posting,
};
use crate::storage::cursor::Cursor;
use crate::storage::block::MAX_KEY_LEN;
use crate::storage::table::Table;

/// First-chunk key of the document length list. Term keys never start
/// with `\0\xe0` since a zero byte in a term is always followed by 0 or 0xff.
pub const DOCLEN_KEY: &[u8] = b"\0\xe0";

/// Per-docid changes to one list; `None` removes the posting
pub type PostingChanges = BTreeMap<DocId, Option<Wdf>>;

/// First-chunk key for `term`
pub fn term_key(term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 2);
    pack_string_preserving_sort(&mut key, term, false);
    key
}

/// Longest packed docid suffix on a chunk key
const MAX_DID_KEY_LEN: usize = 5;

/// Can `term` index a list whose chunk keys all fit in the table?
pub fn check_term(term: &[u8]) -> Result<()> {
    if term.is_empty() {
        return Err(Error::invalid_argument("Terms must not be empty"));
    }
    let key_len = term_key(term).len();
    if key_len + MAX_DID_KEY_LEN > MAX_KEY_LEN {
        return Err(Error::invalid_argument(format!(
            "Term of {} bytes is too long to index (key would be {} bytes)",
            term.len(),
            key_len
        )));
    }
    Ok(())
}

fn chunk_key(prefix: &[u8], did: DocId) -> Vec<u8> {
    let mut key = prefix.to_vec();
    pack_uint_preserving_sort(&mut key, did.value() as u64);
    key
}

fn did_from_key(prefix: &[u8], key: &[u8]) -> Result<DocId> {
    let mut rest = &key[prefix.len()..];
    let did = unpack_uint_preserving_sort(&mut rest).or_corrupt("docid in posting chunk key")?;
    if !rest.is_empty() {
        return Err(Error::corrupt("Junk after docid in posting chunk key"));
    }
    u32::try_from(did)
        .map(DocId)
        .map_err(|_| Error::corrupt("Docid in posting chunk key is too large"))
}

/// Position of the last-chunk flag within a chunk's tag
fn last_flag_offset(tag: &[u8], is_first: bool) -> Result<usize> {
    if !is_first {
        return Ok(0);
    }
    let mut input = tag;
    decode_first_chunk_header(&mut input)?;
    Ok(tag.len() - input.len())
}

/// Set the is-last flag of a stored chunk
fn mark_last_chunk(tag: &mut [u8], is_first: bool) -> Result<()> {
    let offset = last_flag_offset(tag, is_first)?;
    let flag = tag
        .get_mut(offset)
        .ok_or_else(|| Error::corrupt("Posting chunk ends before its last-chunk flag"))?;
    *flag = b'1';
    Ok(())
}

/// Rewrites one chunk during a merge
#[derive(Debug)]
pub struct ChunkWriter {
    prefix: Vec<u8>,
    orig_key: Vec<u8>,
    is_first_chunk: bool,
    is_last_chunk: bool,
    header: ListHeader,
    /// First docid of the following chunk; changes at or past it belong there
    next_first: Option<DocId>,
    postings: Vec<Posting>,
}

impl ChunkWriter {
    fn new(
        prefix: &[u8],
        orig_key: Vec<u8>,
        is_first_chunk: bool,
        is_last_chunk: bool,
        header: ListHeader,
        next_first: Option<DocId>,
    ) -> Self {
        ChunkWriter {
            prefix: prefix.to_vec(),
            orig_key,
            is_first_chunk,
            is_last_chunk,
            header,
            next_first,
            postings: Vec::new(),
        }
    }

    pub fn append(&mut self, posting: Posting) {
        self.postings.push(posting);
    }

    pub fn next_first(&self) -> Option<DocId> {
        self.next_first
    }

    /// Write the accumulated postings back over the original chunk
    pub fn flush(self, table: &mut Table) -> Result<()> {
        if self.postings.is_empty() {
            return self.flush_empty(table);
        }

        let pieces = split_postings(&self.postings);
        let count = pieces.len();
        for (i, piece) in pieces.into_iter().enumerate() {
            let is_last = i + 1 == count && self.is_last_chunk;
            let first_did = piece[0].doc_id;
            let mut tag = Vec::new();
            let key = if i == 0 && self.is_first_chunk {
                encode_first_chunk_header(&mut tag, self.header, first_did);
                self.prefix.clone()
            } else {
                chunk_key(&self.prefix, first_did)
            };
            encode_chunk(&mut tag, is_last, piece);

            if i == 0 && key != self.orig_key {
                // Leading docid changed, so the chunk moves to a new key
                table.del(&self.orig_key)?;
                debug!(from = ?self.orig_key, to = ?key, "renamed posting chunk");
            }
            table.add(&key, &tag, false)?;
        }
        if count > 1 {
            debug!(prefix = ?self.prefix, pieces = count, "split posting chunk");
        }
        Ok(())
    }

    fn flush_empty(self, table: &mut Table) -> Result<()> {
        if self.is_first_chunk && !self.is_last_chunk {
            // The next chunk takes over the first key and the header
            let mut cursor = table.cursor_get();
            cursor.find_entry(&self.orig_key)?;
            if !cursor.next()? || !cursor.current_key().starts_with(&self.prefix) {
                return Err(Error::corrupt("Posting list has no chunk after a non-final first chunk"));
            }
            let next_key = cursor.current_key().to_vec();
            let first_did = did_from_key(&self.prefix, &next_key)?;
            let body = cursor.read_tag(false)?.data;

            let mut tag = Vec::with_capacity(body.len() + 12);
            encode_first_chunk_header(&mut tag, self.header, first_did);
            tag.extend_from_slice(&body);
            table.del(&next_key)?;
            table.add(&self.orig_key, &tag, false)?;
            debug!(prefix = ?self.prefix, "moved second chunk into first");
            return Ok(());
        }

        table.del(&self.orig_key)?;
        if self.is_last_chunk && !self.is_first_chunk {
            // The chunk before is now the last one
            let mut cursor = table.cursor_get();
            cursor.find_entry(&self.orig_key)?;
            let prev_key = cursor.current_key().to_vec();
            if !prev_key.starts_with(&self.prefix) {
                return Err(Error::corrupt("Posting list lost the chunk before its last"));
            }
            let mut tag = cursor.read_tag(false)?.data;
            mark_last_chunk(&mut tag, prev_key.len() == self.prefix.len())?;
            table.add(&prev_key, &tag, false)?;
        }
        Ok(())
    }
}

/// Posting lists and document lengths, chunked over one table
pub struct PostlistTable {
    table: Table,
}

impl PostlistTable {
    pub fn new(table: Table) -> Self {
        PostlistTable { table }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    /// `(termfreq, collfreq)` for `term`; zeros if it has no postings
    pub fn get_freqs(&self, term: &[u8]) -> Result<(u32, u64)> {
        if term.is_empty() {
            return Ok((0, 0));
        }
        match self.table.get_exact_entry(&term_key(term))? {
            Some(tag) => {
                let (header, _) = decode_first_chunk_header(&mut tag.as_slice())?;
                Ok((header.termfreq, header.collfreq))
            }
            None => Ok((0, 0)),
        }
    }

    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        Ok(!term.is_empty() && self.table.key_exists(&term_key(term))?)
    }

    pub fn postlist(&self, term: &[u8]) -> Result<PostingIterator> {
        if term.is_empty() {
            return Err(Error::invalid_argument("Terms must not be empty"));
        }
        PostingIterator::new(&self.table, term_key(term))
    }

    /// Iterate `(docid, length)` for every document with a length
    pub fn doclens(&self) -> Result<PostingIterator> {
        PostingIterator::new(&self.table, DOCLEN_KEY.to_vec())
    }

    pub fn get_doclength(&self, did: DocId) -> Result<Option<u32>> {
        let mut lengths = self.doclens()?;
        Ok(lengths
            .skip_to(did)?
            .filter(|p| p.doc_id == did)
            .map(|p| p.wdf))
    }

    /// Locate the chunk of the list at `prefix` that `did` belongs in.
    /// Without `adding`, a missing list is corruption: the caller believes
    /// there is a posting to change or delete.
    pub fn get_chunk(&mut self, prefix: &[u8], did: DocId, adding: bool) -> Result<(Option<ChunkReader>, ChunkWriter)> {
        let mut cursor = self.table.cursor_get();
        cursor.find_entry(&chunk_key(prefix, did))?;
        let key = cursor.current_key().to_vec();
        if !key.starts_with(prefix) {
            if !adding {
                return Err(Error::corrupt(
                    "Attempted to delete or modify an entry in a non-existent posting list",
                ));
            }
            let writer = ChunkWriter::new(prefix, prefix.to_vec(), true, true, ListHeader::default(), None);
            return Ok((None, writer));
        }

        let tag = cursor.read_tag(false)?.data;
        let is_first = key.len() == prefix.len();
        let mut input = tag.as_slice();
        let (header, first_did) = if is_first {
            decode_first_chunk_header(&mut input)?
        } else {
            (ListHeader::default(), did_from_key(prefix, &key)?)
        };
        let (is_last, last_did) = decode_chunk_start(&mut input, first_did)?;
        let offset = tag.len() - input.len();
        let reader = ChunkReader::new(tag, offset, first_did, last_did)?;

        let next_first = if is_last {
            None
        } else {
            if !cursor.next()? || !cursor.current_key().starts_with(prefix) {
                return Err(Error::corrupt("Posting chunk not marked last has no successor"));
            }
            Some(did_from_key(prefix, cursor.current_key())?)
        };
        Ok((Some(reader), ChunkWriter::new(prefix, key, is_first, is_last, header, next_first)))
    }

    /// Fold a batch of changes into the stored lists.
    ///
    /// Term headers use `freq_deltas` when given, otherwise the deltas
    /// observed while merging. The document length list's header is always
    /// computed from the merge.
    pub fn merge_changes(
        &mut self,
        mod_postings: &BTreeMap<Vec<u8>, PostingChanges>,
        doclens: &PostingChanges,
        freq_deltas: &BTreeMap<Vec<u8>, (i64, i64)>,
    ) -> Result<()> {
        let terms: BTreeSet<&Vec<u8>> = mod_postings.keys().chain(freq_deltas.keys()).collect();
        // Nothing is written unless every term fits
        for term in &terms {
            check_term(term)?;
        }

        if !doclens.is_empty() {
            let deltas = self.merge_list(DOCLEN_KEY, doclens)?;
            self.update_header(DOCLEN_KEY, deltas)?;
        }

        for term in terms {
            let prefix = term_key(term);
            let observed = match mod_postings.get(term) {
                Some(changes) => self.merge_list(&prefix, changes)?,
                None => (0, 0),
            };
            let deltas = freq_deltas.get(term).copied().unwrap_or(observed);
            self.update_header(&prefix, deltas)?;
        }
        Ok(())
    }

    /// Merge sorted `changes` into the list at `prefix`, chunk by chunk.
    /// Returns the observed `(termfreq, collfreq)` deltas.
    fn merge_list(&mut self, prefix: &[u8], changes: &PostingChanges) -> Result<(i64, i64)> {
        let mut tf_delta = 0i64;
        let mut cf_delta = 0i64;
        let mut pending = changes.iter().peekable();

        while let Some(&(&did, change)) = pending.peek() {
            let (reader, mut writer) = self.get_chunk(prefix, did, change.is_some())?;
            let old = match reader {
                Some(reader) => reader.into_postings()?,
                None => Vec::new(),
            };
            let mut old = old.into_iter().peekable();

            while let Some(&(&did, &change)) = pending.peek() {
                if writer.next_first().is_some_and(|next| did >= next) {
                    break;
                }
                while let Some(posting) = old.next_if(|p| p.doc_id < did) {
                    writer.append(posting);
                }
                let existing = old.next_if(|p| p.doc_id == did);
                if let Some(posting) = existing {
                    tf_delta -= 1;
                    cf_delta -= posting.wdf as i64;
                }
                match change {
                    Some(wdf) => {
                        writer.append(Posting::new(did, wdf));
                        tf_delta += 1;
                        cf_delta += wdf as i64;
                    }
                    None if existing.is_none() => {
                        debug!(docid = did.value(), "no posting to delete");
                    }
                    None => {}
                }
                pending.next();
            }
            for posting in old {
                writer.append(posting);
            }
            writer.flush(&mut self.table)?;
        }
        Ok((tf_delta, cf_delta))
    }

    /// Apply frequency deltas to a list's header, dropping the list when
    /// its termfreq reaches zero.
    fn update_header(&mut self, prefix: &[u8], (tf_delta, cf_delta): (i64, i64)) -> Result<()> {
        let Some(tag) = self.table.get_exact_entry(prefix)? else {
            return Ok(());
        };
        let mut input = tag.as_slice();
        let (header, first_did) = decode_first_chunk_header(&mut input)?;
        let termfreq = header.termfreq as i64 + tf_delta;
        let collfreq = header.collfreq as i64 + cf_delta;
        if termfreq < 0 || collfreq < 0 {
            return Err(Error::corrupt(format!(
                "Posting list frequencies went negative ({}, {})",
                termfreq, collfreq
            )));
        }

        if termfreq == 0 {
            let keys = self.chunk_keys(prefix)?;
            for key in &keys {
                self.table.del(key)?;
            }
            debug!(prefix = ?prefix, chunks = keys.len(), "deleted posting list");
            return Ok(());
        }

        let header = ListHeader {
            termfreq: u32::try_from(termfreq).map_err(|_| Error::range("Termfreq exceeds 32 bits"))?,
            collfreq: collfreq as u64,
        };
        let mut rewritten = Vec::with_capacity(tag.len() + 8);
        encode_first_chunk_header(&mut rewritten, header, first_did);
        rewritten.extend_from_slice(input);
        self.table.add(prefix, &rewritten, false)
    }

    fn chunk_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut cursor = self.table.cursor_get();
        let mut keys = Vec::new();
        cursor.find_entry_ge(prefix)?;
        while cursor.is_on_entry() && cursor.current_key().starts_with(prefix) {
            keys.push(cursor.current_key().to_vec());
            cursor.next()?;
        }
        Ok(keys)
    }
}

/// Iterates `(docid, wdf)` through every chunk of one list
pub struct PostingIterator {
    cursor: Cursor,
    prefix: Vec<u8>,
    reader: Option<ChunkReader>,
    header: ListHeader,
    is_last_chunk: bool,
    started: bool,
}

impl PostingIterator {
    fn new(table: &Table, prefix: Vec<u8>) -> Result<Self> {
        let mut iter = PostingIterator {
            cursor: table.cursor_get(),
            prefix,
            reader: None,
            header: ListHeader::default(),
            is_last_chunk: true,
            started: false,
        };
        if iter.cursor.find_entry(&iter.prefix)? {
            iter.load_chunk()?;
        }
        Ok(iter)
    }

    /// Decode the chunk under the cursor
    fn load_chunk(&mut self) -> Result<()> {
        let key = self.cursor.current_key().to_vec();
        let tag = self.cursor.read_tag(false)?.data;
        let mut input = tag.as_slice();
        let first_did = if key.len() == self.prefix.len() {
            let (header, first) = decode_first_chunk_header(&mut input)?;
            self.header = header;
            first
        } else {
            did_from_key(&self.prefix, &key)?
        };
        let (is_last, last_did) = decode_chunk_start(&mut input, first_did)?;
        let offset = tag.len() - input.len();
        self.reader = Some(ChunkReader::new(tag, offset, first_did, last_did)?);
        self.is_last_chunk = is_last;
        Ok(())
    }

    pub fn termfreq(&self) -> u32 {
        self.header.termfreq
    }

    pub fn collfreq(&self) -> u64 {
        self.header.collfreq
    }

    /// Is the current posting in the list's final chunk?
    pub fn at_last_chunk(&self) -> bool {
        self.is_last_chunk
    }

    fn current(&self) -> Option<Posting> {
        self.reader.as_ref().map(ChunkReader::posting)
    }

    fn advance(&mut self) -> Result<Option<Posting>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        if !self.started {
            self.started = true;
            return Ok(Some(reader.posting()));
        }
        reader.next()?;
        if !reader.at_end() {
            return Ok(Some(reader.posting()));
        }
        if self.is_last_chunk {
            self.reader = None;
            return Ok(None);
        }
        if !self.cursor.next()? || !self.cursor.current_key().starts_with(&self.prefix) {
            return Err(Error::corrupt("Posting list ends without a last chunk"));
        }
        self.load_chunk()?;
        Ok(self.current())
    }

    /// Move to the first posting with docid >= `did`. Whole chunks that
    /// end before `did` are skipped without decoding.
    pub fn skip_to(&mut self, did: DocId) -> Result<Option<Posting>> {
        let Some(reader) = self.reader.as_ref() else {
            return Ok(None);
        };
        if self.started && reader.docid() >= did {
            return Ok(Some(reader.posting()));
        }
        if !self.is_last_chunk && reader.last_docid() < did {
            self.cursor.find_entry(&chunk_key(&self.prefix, did))?;
            self.load_chunk()?;
        }
        self.started = true;
        let mut current = self.current();
        while let Some(posting) = current {
            if posting.doc_id >= did {
                return Ok(Some(posting));
            }
            current = self.advance()?;
        }
        Ok(None)
    }
}

impl Iterator for PostingIterator {
    type Item = Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TableConfig;

    fn open_table(dir: &std::path::Path) -> PostlistTable {
        let config = TableConfig { block_size: 2048, ..TableConfig::default() };
        let mut table = Table::new(dir.join("postlist"), false, config);
        table.create_and_open(2048).unwrap();
        PostlistTable::new(table)
    }

    fn changes(pairs: &[(u32, Option<u32>)]) -> PostingChanges {
        pairs.iter().map(|&(d, w)| (DocId(d), w)).collect()
    }

    fn collect(postlist: &PostlistTable, term: &[u8]) -> Vec<(u32, u32)> {
        postlist
            .postlist(term)
            .unwrap()
            .map(|p| p.map(|p| (p.doc_id.value(), p.wdf)))
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_overlong_term_rejected_before_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut postlist = open_table(dir.path());
        let long = vec![b'x'; 250];
        let mut mods = BTreeMap::new();
        mods.insert(b"aaa".to_vec(), changes(&[(1, Some(1))]));
        mods.insert(long.clone(), changes(&[(1, Some(1))]));
        let doclens = changes(&[(1, Some(2))]);

        let err = postlist.merge_changes(&mods, &doclens, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::InvalidArgument);
        assert!(collect(&postlist, b"aaa").is_empty());
        assert!(!postlist.table().is_modified());

        assert!(check_term(&long[..MAX_KEY_LEN - MAX_DID_KEY_LEN - 2]).is_ok());
        assert!(check_term(&long[..MAX_KEY_LEN - MAX_DID_KEY_LEN - 1]).is_err());
        assert!(check_term(b"").is_err());
        // Zero bytes are escaped and count double
        assert!(check_term(&[0u8; 123]).is_err());
    }

    #[test]
    fn test_mark_last_chunk() {
        let postings = [Posting::new(DocId(4), 1), Posting::new(DocId(9), 2)];
        let mut tag = Vec::new();
        encode_first_chunk_header(&mut tag, ListHeader { termfreq: 2, collfreq: 3 }, DocId(4));
        let header_len = tag.len();
        encode_chunk(&mut tag, false, &postings);
        mark_last_chunk(&mut tag, true).unwrap();
        assert_eq!(tag[header_len], b'1');

        let mut body = Vec::new();
        encode_chunk(&mut body, false, &postings);
        mark_last_chunk(&mut body, false).unwrap();
        assert_eq!(body[0], b'1');

        // A first chunk cut off right after its header
        let mut truncated = tag[..header_len].to_vec();
        assert!(mark_last_chunk(&mut truncated, true).unwrap_err().is_corrupt());
        assert!(mark_last_chunk(&mut [], false).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_term_key_sorts_before_chunk_keys() {
        let first = term_key(b"cat");
        assert_eq!(first, b"cat\0\0");
        let later = chunk_key(&first, DocId(7));
        assert!(first < later);
        assert!(later < term_key(b"cats"));
        assert_eq!(did_from_key(&first, &later).unwrap(), DocId(7));
    }

    #[test]
    fn test_merge_new_term_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut postlist = open_table(dir.path());
        let mut mods = BTreeMap::new();
        mods.insert(b"cat".to_vec(), changes(&[(1, Some(3)), (5, Some(1)), (100000, Some(7))]));
        postlist.merge_changes(&mods, &BTreeMap::new(), &BTreeMap::new()).unwrap();

        assert_eq!(postlist.get_freqs(b"cat").unwrap(), (3, 11));
        assert_eq!(collect(&postlist, b"cat"), vec![(1, 3), (5, 1), (100000, 7)]);
        assert!(postlist.postlist(b"dog").unwrap().next().is_none());
    }

    #[test]
    fn test_delete_from_missing_list_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut postlist = open_table(dir.path());
        let mut mods = BTreeMap::new();
        mods.insert(b"ghost".to_vec(), changes(&[(4, None)]));
        let err = postlist.merge_changes(&mods, &BTreeMap::new(), &BTreeMap::new()).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_update_and_remove_postings() {
        let dir = tempfile::tempdir().unwrap();
        let mut postlist = open_table(dir.path());
        let mut mods = BTreeMap::new();
        mods.insert(b"t".to_vec(), changes(&[(2, Some(1)), (4, Some(1)), (6, Some(1))]));
        postlist.merge_changes(&mods, &BTreeMap::new(), &BTreeMap::new()).unwrap();

        let mut mods = BTreeMap::new();
        mods.insert(b"t".to_vec(), changes(&[(2, None), (4, Some(5)), (9, Some(2))]));
        postlist.merge_changes(&mods, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        assert_eq!(collect(&postlist, b"t"), vec![(4, 5), (6, 1), (9, 2)]);
        assert_eq!(postlist.get_freqs(b"t").unwrap(), (3, 8));

        let mut mods = BTreeMap::new();
        mods.insert(b"t".to_vec(), changes(&[(4, None), (6, None), (9, None)]));
        postlist.merge_changes(&mods, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        assert!(!postlist.term_exists(b"t").unwrap());
        assert_eq!(postlist.table().get_entry_count(), 0);
    }

    #[test]
    fn test_long_list_spans_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut postlist = open_table(dir.path());
        let all: Vec<(u32, Option<u32>)> = (1..=2000u32).map(|d| (d * 300, Some(d % 7 + 1))).collect();
        let mut mods = BTreeMap::new();
        mods.insert(b"big".to_vec(), changes(&all));
        postlist.merge_changes(&mods, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        assert!(postlist.table().get_entry_count() > 1);

        let expected: Vec<(u32, u32)> = all.iter().map(|&(d, w)| (d, w.unwrap_or(0))).collect();
        assert_eq!(collect(&postlist, b"big"), expected);

        let mut iter = postlist.postlist(b"big").unwrap();
        assert!(!iter.at_last_chunk());
        let hit = iter.skip_to(DocId(450_001)).unwrap().unwrap();
        assert_eq!(hit.doc_id, DocId(450_300));
        assert!(iter.skip_to(DocId(700_000)).unwrap().is_none());

        // Empty the first chunk; the second one must take over its key
        let chunks_before = postlist.table().get_entry_count();
        let first_chunk: Vec<(u32, Option<u32>)> = (1..=668u32).map(|d| (d * 300, None)).collect();
        let mut mods = BTreeMap::new();
        mods.insert(b"big".to_vec(), changes(&first_chunk));
        postlist.merge_changes(&mods, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        let remaining = collect(&postlist, b"big");
        assert_eq!(remaining.first(), Some(&(669 * 300, 669 % 7 + 1)));
        assert_eq!(remaining.len(), 1332);
        assert_eq!(postlist.get_freqs(b"big").unwrap().0, 1332);
        assert_eq!(postlist.table().get_entry_count(), chunks_before - 1);
    }

    #[test]
    fn test_doclens() {
        let dir = tempfile::tempdir().unwrap();
        let mut postlist = open_table(dir.path());
        let lens = changes(&[(1, Some(10)), (2, Some(4))]);
        postlist.merge_changes(&BTreeMap::new(), &lens, &BTreeMap::new()).unwrap();
        assert_eq!(postlist.get_doclength(DocId(1)).unwrap(), Some(10));
        assert_eq!(postlist.get_doclength(DocId(3)).unwrap(), None);

        let iter = postlist.doclens().unwrap();
        assert_eq!((iter.termfreq(), iter.collfreq()), (2, 14));
    }
}
