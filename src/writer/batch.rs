use std::collections::BTreeMap;
use crate::core::types::{DocId, TermPos, Wdf};
use crate::index::postlist::PostingChanges;
use crate::index::termlist::TermEntry;

/// A document as handed to the writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub data: Vec<u8>,
    pub terms: BTreeMap<Vec<u8>, DocTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocTerm {
    pub wdf: Wdf,
    pub positions: Vec<TermPos>,  // Ascending, no duplicates
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: impl Into<Vec<u8>>) -> Self {
        Document { data: data.into(), terms: BTreeMap::new() }
    }

    /// Bump `term`'s wdf without recording a position
    pub fn add_term(&mut self, term: impl Into<Vec<u8>>, wdf_inc: Wdf) {
        self.terms.entry(term.into()).or_default().wdf += wdf_inc;
    }

    /// Record `term` at `pos`, counting one occurrence
    pub fn add_posting(&mut self, term: impl Into<Vec<u8>>, pos: TermPos) {
        let entry = self.terms.entry(term.into()).or_default();
        if let Err(at) = entry.positions.binary_search(&pos) {
            entry.positions.insert(at, pos);
        }
        entry.wdf += 1;
    }

    /// Document length: the sum of wdfs
    pub fn length(&self) -> u32 {
        self.terms.values().map(|t| t.wdf).sum()
    }

    pub fn termlist(&self) -> Vec<TermEntry> {
        self.terms
            .iter()
            .map(|(term, t)| TermEntry { term: term.clone(), wdf: t.wdf })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum DocOp {
    Add(DocId, Document),
    Delete(DocId),
    Replace(DocId, Document),
}

/// Document operations queued for one `Database::apply`
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    ops: Vec<DocOp>,
}

impl ChangeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, did: DocId, doc: Document) -> &mut Self {
        self.ops.push(DocOp::Add(did, doc));
        self
    }

    pub fn delete_document(&mut self, did: DocId) -> &mut Self {
        self.ops.push(DocOp::Delete(did));
        self
    }

    /// Add or overwrite `did`
    pub fn replace_document(&mut self, did: DocId, doc: Document) -> &mut Self {
        self.ops.push(DocOp::Replace(did, doc));
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<DocOp> {
        self.ops
    }
}

/// Table-level edits a batch resolves to, each map sorted for merging
#[derive(Debug, Default)]
pub struct StagedChanges {
    pub mod_postings: BTreeMap<Vec<u8>, PostingChanges>,
    pub doclens: PostingChanges,
    pub freq_deltas: BTreeMap<Vec<u8>, (i64, i64)>,
    /// `None` deletes the stored list
    pub positions: BTreeMap<(DocId, Vec<u8>), Option<Vec<TermPos>>>,
    pub records: BTreeMap<DocId, Option<Vec<u8>>>,
    pub termlists: BTreeMap<DocId, Option<Vec<TermEntry>>>,
}

impl StagedChanges {
    /// Stage the net change for `did` going from `old` (its stored
    /// termlist, if any) to `new` (`None` once deleted).
    pub fn stage(&mut self, did: DocId, old: Option<&[TermEntry]>, new: Option<&Document>) {
        let old_terms: BTreeMap<&[u8], Wdf> = old
            .unwrap_or_default()
            .iter()
            .map(|e| (e.term.as_slice(), e.wdf))
            .collect();
        let empty = BTreeMap::new();
        let new_terms = new.map(|d| &d.terms).unwrap_or(&empty);

        for (&term, &wdf) in &old_terms {
            if new_terms.contains_key(term) {
                continue;
            }
            self.mod_postings.entry(term.to_vec()).or_default().insert(did, None);
            let deltas = self.freq_deltas.entry(term.to_vec()).or_default();
            deltas.0 -= 1;
            deltas.1 -= wdf as i64;
            self.positions.insert((did, term.to_vec()), None);
        }

        for (term, entry) in new_terms {
            self.mod_postings.entry(term.clone()).or_default().insert(did, Some(entry.wdf));
            let deltas = self.freq_deltas.entry(term.clone()).or_default();
            match old_terms.get(term.as_slice()) {
                Some(&old_wdf) => deltas.1 += entry.wdf as i64 - old_wdf as i64,
                None => {
                    deltas.0 += 1;
                    deltas.1 += entry.wdf as i64;
                }
            }
            if !entry.positions.is_empty() {
                self.positions.insert((did, term.clone()), Some(entry.positions.clone()));
            } else if old_terms.contains_key(term.as_slice()) {
                self.positions.insert((did, term.clone()), None);
            }
        }

        match new {
            Some(doc) => {
                self.doclens.insert(did, Some(doc.length()));
                self.records.insert(did, Some(doc.data.clone()));
                self.termlists.insert(did, Some(doc.termlist()));
            }
            None if old.is_some() => {
                self.doclens.insert(did, None);
                self.records.insert(did, None);
                self.termlists.insert(did, None);
            }
            None => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mod_postings.is_empty() && self.doclens.is_empty() && self.records.is_empty()
    }
}
