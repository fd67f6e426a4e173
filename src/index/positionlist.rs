use tracing::debug;
use crate::compression::bitstream::{BitReader, BitWriter};
use crate::compression::varint::{pack_uint, pack_uint_preserving_sort, unpack_u32, UnpackExt};
use crate::core::error::{Error, Result};
use crate::core::types::{DocId, TermPos};
use crate::storage::table::Table;

fn position_key(did: DocId, term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 5);
    pack_uint_preserving_sort(&mut key, did.value() as u64);
    key.extend_from_slice(term);
    key
}

/// Encode strictly increasing `positions` (at least one).
///
/// One position is a lone varint. Otherwise the varint last position is
/// followed by a bitstream: the first position, the count less two, then
/// the interior positions interpolatively.
pub fn encode_positions(positions: &[TermPos]) -> Result<Vec<u8>> {
    let (Some(&first), Some(&last)) = (positions.first(), positions.last()) else {
        return Err(Error::invalid_argument("Position list is empty"));
    };
    let mut out = Vec::new();
    pack_uint(&mut out, last as u64);
    if positions.len() == 1 {
        return Ok(out);
    }
    if first >= last {
        return Err(Error::invalid_argument("Positions must be strictly increasing"));
    }

    let prefix_len = out.len();
    let mut writer = BitWriter::with_prefix(out);
    writer.encode(first, last)?;
    let count = u32::try_from(positions.len() - 2)
        .map_err(|_| Error::range("Too many positions"))?;
    writer.encode(count, last - first)?;
    writer.encode_interpolative(positions, 0, positions.len() - 1)?;
    let mut out = writer.freeze();
    if out.len() == prefix_len {
        // [0, 1] takes no bits; keep it distinct from a single position
        out.push(0);
    }
    Ok(out)
}

/// Lazily decodes one stored position list
pub struct PositionReader {
    bits: Option<BitReader>,
    first: TermPos,
    last: TermPos,
    size: u32,
    /// Positions handed out so far
    index: u32,
    current: Option<TermPos>,
}

impl PositionReader {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let mut input = data.as_slice();
        let last = unpack_u32(&mut input).or_corrupt("last position")?;
        if input.is_empty() {
            return Ok(PositionReader { bits: None, first: last, last, size: 1, index: 0, current: None });
        }

        let start = data.len() - input.len();
        let mut bits = BitReader::new(data, start);
        let first = bits.decode(last)?;
        let size = bits
            .decode(last - first)?
            .checked_add(2)
            .ok_or_else(|| Error::corrupt("Position list count overflows"))?;
        bits.decode_interpolative(0, size - 1, first, last);
        Ok(PositionReader { bits: Some(bits), first, last, size, index: 0, current: None })
    }

    /// An empty reader, for absent lists
    pub fn empty() -> Self {
        PositionReader { bits: None, first: 0, last: 0, size: 0, index: 0, current: None }
    }

    pub fn len(&self) -> u32 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn current(&self) -> Option<TermPos> {
        self.current
    }

    fn advance(&mut self) -> Result<Option<TermPos>> {
        if self.index >= self.size {
            self.current = None;
            return Ok(None);
        }
        let pos = if self.index == 0 {
            self.first
        } else if self.index + 1 == self.size {
            self.last
        } else {
            match self.bits.as_mut() {
                Some(bits) => bits.decode_interpolative_next()?,
                None => return Err(Error::corrupt("Position list lost its bitstream")),
            }
        };
        self.index += 1;
        self.current = Some(pos);
        Ok(Some(pos))
    }

    /// First position >= `target`, stopping early without decoding the rest
    pub fn skip_to(&mut self, target: TermPos) -> Result<Option<TermPos>> {
        if let Some(pos) = self.current.filter(|&p| p >= target) {
            return Ok(Some(pos));
        }
        if target > self.last {
            self.index = self.size;
            self.current = None;
            return Ok(None);
        }
        while let Some(pos) = self.advance()? {
            if pos >= target {
                return Ok(Some(pos));
            }
        }
        Ok(None)
    }
}

impl Iterator for PositionReader {
    type Item = Result<TermPos>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

/// Term positions keyed by (document, term)
pub struct PositionTable {
    table: Table,
}

impl PositionTable {
    pub fn new(table: Table) -> Self {
        PositionTable { table }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    /// Store `positions` for `term` in `did`; an empty list deletes it
    pub fn set_positionlist(&mut self, did: DocId, term: &[u8], positions: &[TermPos]) -> Result<()> {
        if positions.is_empty() {
            self.delete_positionlist(did, term)?;
            return Ok(());
        }
        let key = position_key(did, term);
        let tag = encode_positions(positions)?;
        debug!(docid = did.value(), count = positions.len(), bytes = tag.len(), "set positions");
        self.table.add(&key, &tag, false)
    }

    pub fn delete_positionlist(&mut self, did: DocId, term: &[u8]) -> Result<bool> {
        self.table.del(&position_key(did, term))
    }

    /// Number of positions stored, 0 if none
    pub fn positionlist_count(&self, did: DocId, term: &[u8]) -> Result<u32> {
        match self.table.get_exact_entry(&position_key(did, term))? {
            Some(data) => Ok(PositionReader::new(data)?.len()),
            None => Ok(0),
        }
    }

    pub fn positionlist(&self, did: DocId, term: &[u8]) -> Result<PositionReader> {
        match self.table.get_exact_entry(&position_key(did, term))? {
            Some(data) => PositionReader::new(data),
            None => Ok(PositionReader::empty()),
        }
    }
}
