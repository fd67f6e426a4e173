//! Posting-list chunk encoding.
//!
//! A term's postings are split into chunks, each stored under its own key.
//! The first chunk carries the list header:
//!
//! ```text
//! first chunk: uint(termfreq) uint(collfreq) uint(first_did - 1) <body>
//! body:        bool(is_last) uint(last_did - first_did) uint(first_wdf)
//!              { uint(did - prev_did - 1) uint(wdf) }*
//! ```
//!
//! Later chunks hold only the body; their first docid is in the key.

use crate::compression::varint::{
    pack_bool, pack_uint, unpack_bool, unpack_u32, unpack_uint, UnpackExt,
};
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, Wdf};

/// Chunks are closed once their body passes this many bytes
pub const CHUNK_SIZE: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: DocId,
    pub wdf: Wdf,
}

impl Posting {
    pub fn new(doc_id: DocId, wdf: Wdf) -> Self {
        Posting { doc_id, wdf }
    }
}

/// Frequencies stored at the front of a list's first chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListHeader {
    pub termfreq: u32,  // Number of postings
    pub collfreq: u64,  // Sum of wdfs
}

pub fn encode_first_chunk_header(out: &mut Vec<u8>, header: ListHeader, first_did: DocId) {
    pack_uint(out, header.termfreq as u64);
    pack_uint(out, header.collfreq);
    pack_uint(out, first_did.value().saturating_sub(1) as u64);
}

pub fn decode_first_chunk_header(input: &mut &[u8]) -> Result<(ListHeader, DocId)> {
    let termfreq = unpack_u32(input).or_corrupt("termfreq in posting list header")?;
    let collfreq = unpack_uint(input).or_corrupt("collfreq in posting list header")?;
    let first = unpack_u32(input).or_corrupt("first docid in posting list header")?;
    let first = first
        .checked_add(1)
        .ok_or_else(|| Error::corrupt("First docid in posting list header overflows"))?;
    Ok((ListHeader { termfreq, collfreq }, DocId(first)))
}

/// Append a chunk body for `postings` (non-empty, ascending)
pub fn encode_chunk(out: &mut Vec<u8>, is_last: bool, postings: &[Posting]) {
    let (Some(first), Some(last)) = (postings.first(), postings.last()) else {
        return;
    };
    pack_bool(out, is_last);
    pack_uint(out, (last.doc_id.value() - first.doc_id.value()) as u64);
    pack_uint(out, first.wdf as u64);
    let mut prev = first.doc_id.value();
    for posting in &postings[1..] {
        pack_uint(out, (posting.doc_id.value() - prev - 1) as u64);
        pack_uint(out, posting.wdf as u64);
        prev = posting.doc_id.value();
    }
}

/// Read `is_last` and the chunk's last docid
pub fn decode_chunk_start(input: &mut &[u8], first_did: DocId) -> Result<(bool, DocId)> {
    let is_last = unpack_bool(input).or_corrupt("last chunk flag")?;
    let increase = unpack_u32(input).or_corrupt("docid increase to last in chunk")?;
    let last = first_did
        .value()
        .checked_add(increase)
        .ok_or_else(|| Error::corrupt("Last docid in chunk overflows"))?;
    Ok((is_last, DocId(last)))
}

fn uint_len(value: u64) -> usize {
    let mut len = 1;
    let mut v = value >> 7;
    while v != 0 {
        len += 1;
        v >>= 7;
    }
    len
}

/// Cut `postings` into runs whose encoded bodies each stay around `CHUNK_SIZE`
pub fn split_postings(postings: &[Posting]) -> Vec<&[Posting]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut size = 0;
    for i in 1..postings.len() {
        let gap = (postings[i].doc_id.value() - postings[i - 1].doc_id.value() - 1) as u64;
        size += uint_len(gap) + uint_len(postings[i].wdf as u64);
        if size >= CHUNK_SIZE {
            pieces.push(&postings[start..=i]);
            start = i + 1;
            size = 0;
        }
    }
    if start < postings.len() {
        pieces.push(&postings[start..]);
    }
    pieces
}

/// Walks the postings of one chunk body
#[derive(Debug, Clone)]
pub struct ChunkReader {
    data: Vec<u8>,
    pos: usize,
    did: u32,
    wdf: Wdf,
    last_did: u32,
    at_end: bool,
}

impl ChunkReader {
    /// `data[pos..]` must start at the first wdf, just after the chunk start
    pub fn new(data: Vec<u8>, pos: usize, first_did: DocId, last_did: DocId) -> Result<Self> {
        let mut input = &data[pos..];
        let wdf = unpack_u32(&mut input).or_corrupt("wdf in chunk")?;
        let pos = data.len() - input.len();
        Ok(ChunkReader {
            data,
            pos,
            did: first_did.value(),
            wdf,
            last_did: last_did.value(),
            at_end: false,
        })
    }

    pub fn docid(&self) -> DocId {
        DocId(self.did)
    }

    pub fn wdf(&self) -> Wdf {
        self.wdf
    }

    pub fn posting(&self) -> Posting {
        Posting::new(self.docid(), self.wdf)
    }

    pub fn last_docid(&self) -> DocId {
        DocId(self.last_did)
    }

    pub fn at_end(&self) -> bool {
        self.at_end
    }

    pub fn next(&mut self) -> Result<()> {
        if self.did == self.last_did {
            self.at_end = true;
            return Ok(());
        }
        let mut input = &self.data[self.pos..];
        let gap = unpack_u32(&mut input).or_corrupt("docid increase in chunk")?;
        let wdf = unpack_u32(&mut input).or_corrupt("wdf in chunk")?;
        self.pos = self.data.len() - input.len();

        let did = self
            .did
            .checked_add(gap)
            .and_then(|d| d.checked_add(1))
            .filter(|&d| d <= self.last_did)
            .ok_or_else(|| Error::corrupt("Docid in chunk runs past the chunk's last docid"))?;
        self.did = did;
        self.wdf = wdf;
        Ok(())
    }

    /// Drain the remaining postings, including the current one
    pub fn into_postings(mut self) -> Result<Vec<Posting>> {
        let mut postings = Vec::new();
        while !self.at_end {
            postings.push(self.posting());
            self.next()?;
        }
        Ok(postings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postings(pairs: &[(u32, u32)]) -> Vec<Posting> {
        pairs.iter().map(|&(d, w)| Posting::new(DocId(d), w)).collect()
    }

    fn read_back(tag: Vec<u8>, first_chunk: bool, key_did: u32) -> (Option<ListHeader>, bool, Vec<Posting>) {
        let mut input = tag.as_slice();
        let (header, first) = if first_chunk {
            let (h, f) = decode_first_chunk_header(&mut input).unwrap();
            (Some(h), f)
        } else {
            (None, DocId(key_did))
        };
        let (is_last, last) = decode_chunk_start(&mut input, first).unwrap();
        let offset = tag.len() - input.len();
        let reader = ChunkReader::new(tag, offset, first, last).unwrap();
        (header, is_last, reader.into_postings().unwrap())
    }

    #[test]
    fn test_first_chunk_layout() {
        let list = postings(&[(1, 3), (5, 1), (100000, 7)]);
        let header = ListHeader { termfreq: 3, collfreq: 11 };
        let mut tag = Vec::new();
        encode_first_chunk_header(&mut tag, header, list[0].doc_id);
        encode_chunk(&mut tag, true, &list);

        // tf, cf, first-1, last flag, then the increase to the last docid
        assert_eq!(&tag[..5], &[3, 11, 0, b'1', 0x9f]);

        let (decoded_header, is_last, decoded) = read_back(tag, true, 0);
        assert_eq!(decoded_header, Some(header));
        assert!(is_last);
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_later_chunk_uses_key_docid() {
        let list = postings(&[(40, 2), (41, 9), (60, 1)]);
        let mut tag = Vec::new();
        encode_chunk(&mut tag, false, &list);
        let (header, is_last, decoded) = read_back(tag, false, 40);
        assert!(header.is_none());
        assert!(!is_last);
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_truncated_chunk_is_corrupt() {
        let list = postings(&[(1, 1), (2, 1), (3, 1)]);
        let mut tag = Vec::new();
        encode_chunk(&mut tag, true, &list);
        tag.truncate(tag.len() - 1);
        let mut input = tag.as_slice();
        let (_, last) = decode_chunk_start(&mut input, DocId(1)).unwrap();
        let offset = tag.len() - input.len();
        let reader = ChunkReader::new(tag, offset, DocId(1), last).unwrap();
        let err = reader.into_postings().unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.context.contains("wdf in chunk"));
    }

    #[test]
    fn test_docid_past_last_is_corrupt() {
        let mut tag = Vec::new();
        pack_bool(&mut tag, true);
        pack_uint(&mut tag, 2);  // last = first + 2
        pack_uint(&mut tag, 1);
        pack_uint(&mut tag, 5);  // jumps to first + 6
        pack_uint(&mut tag, 1);
        let mut input = tag.as_slice();
        let (_, last) = decode_chunk_start(&mut input, DocId(10)).unwrap();
        let offset = tag.len() - input.len();
        let mut reader = ChunkReader::new(tag, offset, DocId(10), last).unwrap();
        assert!(reader.next().unwrap_err().is_corrupt());
    }

    #[test]
    fn test_split_postings_bounds_pieces() {
        let list: Vec<Posting> = (1..=3000u32).map(|d| Posting::new(DocId(d * 1000), d)).collect();
        let pieces = split_postings(&list);
        assert!(pieces.len() > 1);
        assert_eq!(pieces.iter().map(|p| p.len()).sum::<usize>(), list.len());
        for piece in &pieces {
            let mut body = Vec::new();
            encode_chunk(&mut body, false, piece);
            assert!(body.len() < CHUNK_SIZE + 32);
        }
    }
}
