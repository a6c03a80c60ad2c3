use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::page::PageStore;
use crate::segment::docmap::{DocMap, RecordLocator};
use crate::segment::field_norm::fieldnorm_to_id;
use crate::segment::writer::{InvertedSerialize, SegmentFile, SegmentWriter};
use crate::utils::vint;

pub const MAX_TERM_FREQ: u32 = u16::MAX as u32;

/// In-memory postings for documents not yet written to a segment.
///
/// Documents get dense ids in insertion order, so every per-term list is
/// already sorted by doc id and the term map iterates in term order.
pub struct Memtable {
    term_index: BTreeMap<String, TFRecorder>,
    docmap: DocMap,
    lengths: Vec<u32>,
    doc_ids: HashMap<RecordLocator, u32>,
    total_tokens: u64,
    num_postings: u64,
    spill_threshold: u64,
}

impl Memtable {
    pub fn new(spill_threshold: u64) -> Self {
        Self {
            term_index: BTreeMap::new(),
            docmap: DocMap::default(),
            lengths: Vec::new(),
            doc_ids: HashMap::new(),
            total_tokens: 0,
            num_postings: 0,
            spill_threshold,
        }
    }

    /// Adds one posting. Consecutive calls with the same locator extend the
    /// same document; a locator seen earlier in the memtable is rejected.
    pub fn insert(&mut self, locator: RecordLocator, term: &str, term_freq: u32) -> Result<u32> {
        if term.is_empty() {
            return Err(Error::InvalidInput("empty term".into()));
        }
        if term_freq == 0 || term_freq > MAX_TERM_FREQ {
            return Err(Error::InvalidInput(format!(
                "term frequency {term_freq} outside 1..={MAX_TERM_FREQ}"
            )));
        }
        let doc_id = match self.doc_ids.get(&locator) {
            Some(&doc_id) if doc_id as usize + 1 == self.docmap.len() => doc_id,
            Some(_) => {
                return Err(Error::InvalidInput(format!(
                    "document {locator:?} is already in the memtable"
                )))
            }
            None => {
                let doc_id = u32::try_from(self.docmap.len())
                    .map_err(|_| Error::InvalidInput("memtable is full".into()))?;
                self.docmap.append(locator);
                self.lengths.push(0);
                self.doc_ids.insert(locator, doc_id);
                doc_id
            }
        };

        let recorder = self
            .term_index
            .entry(term.to_owned())
            .or_insert_with(TFRecorder::new);
        if recorder.current_doc() == doc_id && recorder.current_tf + term_freq > MAX_TERM_FREQ {
            return Err(Error::InvalidInput(format!(
                "term frequency of {term:?} exceeds {MAX_TERM_FREQ}"
            )));
        }
        if recorder.current_doc() != doc_id {
            recorder.try_close_doc();
            recorder.new_doc(doc_id);
            self.num_postings += 1;
        }
        recorder.record(term_freq);
        let len = &mut self.lengths[doc_id as usize];
        *len = len.saturating_add(term_freq);
        self.total_tokens += term_freq as u64;
        Ok(doc_id)
    }

    /// Adds a whole document. Nothing is inserted if any entry is invalid.
    pub fn insert_document<S: AsRef<str>>(
        &mut self,
        locator: RecordLocator,
        term_frequencies: &[(S, u32)],
    ) -> Result<u32> {
        if self.contains(locator) {
            return Err(Error::InvalidInput(format!(
                "document {locator:?} is already in the memtable"
            )));
        }
        let mut merged: BTreeMap<&str, u32> = BTreeMap::new();
        for (term, tf) in term_frequencies {
            let term = term.as_ref();
            if term.is_empty() {
                return Err(Error::InvalidInput("empty term".into()));
            }
            let entry = merged.entry(term).or_insert(0);
            *entry = entry.saturating_add(*tf);
        }
        if let Some((term, tf)) = merged
            .iter()
            .find(|(_, tf)| **tf == 0 || **tf > MAX_TERM_FREQ)
        {
            return Err(Error::InvalidInput(format!(
                "term frequency {tf} of {term:?} outside 1..={MAX_TERM_FREQ}"
            )));
        }
        if merged.is_empty() {
            return Err(Error::InvalidInput(format!(
                "document {locator:?} has no terms"
            )));
        }
        let mut doc_id = 0;
        for (term, tf) in merged {
            doc_id = self.insert(locator, term, tf)?;
        }
        Ok(doc_id)
    }

    pub fn should_spill(&self) -> bool {
        self.num_postings >= self.spill_threshold
    }

    pub fn is_empty(&self) -> bool {
        self.docmap.is_empty()
    }

    pub fn num_docs(&self) -> u32 {
        self.docmap.len() as u32
    }

    pub fn num_postings(&self) -> u64 {
        self.num_postings
    }

    pub fn num_terms(&self) -> usize {
        self.term_index.len()
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn contains(&self, locator: RecordLocator) -> bool {
        self.doc_ids.contains_key(&locator)
    }

    pub fn doc_freq(&self, term: &str) -> u32 {
        self.term_index.get(term).map_or(0, |r| r.total_docs)
    }

    pub fn fieldnorm(&self, doc_id: u32) -> u8 {
        fieldnorm_to_id(self.lengths[doc_id as usize])
    }

    pub fn locator(&self, doc_id: u32) -> RecordLocator {
        self.docmap.locator_of(doc_id)
    }

    /// (doc id, term frequency) pairs of `term` in doc id order.
    pub fn postings(&self, term: &str) -> Option<impl Iterator<Item = (u32, u32)> + '_> {
        self.term_index.get(term).map(TFRecorder::iter)
    }

    /// Terms in sorted order with their postings.
    pub fn iter_terms(
        &self,
    ) -> impl Iterator<Item = (&str, impl Iterator<Item = (u32, u32)> + '_)> + '_ {
        self.term_index
            .iter()
            .map(|(term, recorder)| (term.as_str(), recorder.iter()))
    }

    pub fn serialize<I: InvertedSerialize>(&self, s: &mut I) -> Result<()> {
        for (_, postings) in self.iter_terms() {
            s.new_term()?;
            for (doc_id, tf) in postings {
                s.write_doc(doc_id, tf, self.fieldnorm(doc_id))?;
            }
            s.close_term()?;
        }
        Ok(())
    }

    /// Writes the frozen contents as a level-0 segment.
    pub fn write_segment(&self, store: &dyn PageStore, version: u32) -> Result<SegmentFile> {
        let terms: Vec<&str> = self.term_index.keys().map(String::as_str).collect();
        let mut writer = SegmentWriter::new(store, version, 0, &terms)?;
        if let Err(e) = self.serialize(&mut writer) {
            writer.abandon();
            return Err(e);
        }
        let fieldnorms: Vec<u8> = self.lengths.iter().map(|&len| fieldnorm_to_id(len)).collect();
        writer.finish(&fieldnorms, &self.docmap, self.total_tokens)
    }
}

// (doc_id, tf) tuples, doc_id is delta encoded; the open document is kept
// unencoded until the next document starts
struct TFRecorder {
    buffer: Vec<u8>,
    current_doc: u32,
    current_tf: u32,
    total_docs: u32,
}

impl TFRecorder {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            current_doc: u32::MAX,
            current_tf: 0,
            total_docs: 0,
        }
    }

    fn current_doc(&self) -> u32 {
        self.current_doc
    }

    fn new_doc(&mut self, doc_id: u32) {
        let delta = doc_id.wrapping_sub(self.current_doc);
        self.total_docs += 1;
        self.current_doc = doc_id;
        vint::encode_vint32(delta, &mut self.buffer);
    }

    fn record(&mut self, count: u32) {
        self.current_tf += count;
    }

    fn try_close_doc(&mut self) {
        if self.current_tf == 0 {
            return;
        }
        vint::encode_vint32(self.current_tf, &mut self.buffer);
        self.current_tf = 0;
    }

    fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let mut doc_id = u32::MAX;
        let mut buffer = self.buffer.as_slice();
        let pending = self.current_tf;
        std::iter::from_fn(move || {
            if buffer.is_empty() {
                return None;
            }
            let delta_doc_id = vint::decode_vint32(&mut buffer);
            doc_id = doc_id.wrapping_add(delta_doc_id);
            let tf = if buffer.is_empty() {
                pending
            } else {
                vint::decode_vint32(&mut buffer)
            };
            Some((doc_id, tf))
        })
    }
}
