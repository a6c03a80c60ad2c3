use arrayvec::ArrayVec;

use super::docmap::DocMap;
use super::format::{
    dict_entry_size, skip_entry_size, BlockPosting, DictEntry, SegmentHeader, SkipEntry,
    SkipFlags, BLOCK_SIZE, SEGMENT_HEADER_SIZE, SEGMENT_VERSION_V1, SEGMENT_VERSION_V2,
};
use crate::error::{Error, Result};
use crate::page::{PageFlags, PageStore, VirtualFile, VirtualPageWriter};

/// Receives postings term by term, in term order and doc id order.
pub trait InvertedSerialize {
    fn new_term(&mut self) -> Result<()>;
    fn write_doc(&mut self, doc_id: u32, freq: u32, fieldnorm: u8) -> Result<()>;
    fn close_term(&mut self) -> Result<()>;
}

/// A segment that has been completely written but not yet published.
#[derive(Debug, Clone)]
pub struct SegmentFile {
    pub header: SegmentHeader,
    pub file: VirtualFile,
}

impl SegmentFile {
    pub fn root(&self) -> u32 {
        self.file.root()
    }
}

struct TermState {
    first_skip: usize,
    doc_freq: u32,
    last_doc: Option<u32>,
    block: ArrayVec<BlockPosting, BLOCK_SIZE>,
}

/// Single-pass segment writer.
///
/// The term list is known up front, so the dictionary and string pool are
/// written first, followed by placeholder dictionary entries. Postings are
/// streamed block by block while skip entries pile up in memory; the skip
/// table follows the postings and the dictionary entries are backpatched last.
pub struct SegmentWriter<'a> {
    store: &'a dyn PageStore,
    writer: VirtualPageWriter<'a>,
    header: SegmentHeader,
    num_terms: u32,
    entries: Vec<DictEntry>,
    skips: Vec<SkipEntry>,
    term: Option<TermState>,
}

impl<'a> SegmentWriter<'a> {
    pub fn new<S: AsRef<str>>(
        store: &'a dyn PageStore,
        version: u32,
        level: u32,
        terms: &[S],
    ) -> Result<Self> {
        if !matches!(version, SEGMENT_VERSION_V1 | SEGMENT_VERSION_V2) {
            return Err(Error::UnsupportedVersion {
                found: version,
                supported: SEGMENT_VERSION_V2,
            });
        }
        let num_terms = u32::try_from(terms.len())
            .map_err(|_| Error::InvalidInput("too many terms for one segment".into()))?;
        let mut writer = VirtualPageWriter::new(store, PageFlags::SEGMENT)?;
        let result = Self::write_dictionary(&mut writer, version, level, terms);
        let header = match result {
            Ok(header) => header,
            Err(e) => {
                writer.abandon();
                return Err(e);
            }
        };
        Ok(Self {
            store,
            writer,
            header,
            num_terms,
            entries: Vec::with_capacity(terms.len()),
            skips: Vec::new(),
            term: None,
        })
    }

    fn write_dictionary<S: AsRef<str>>(
        writer: &mut VirtualPageWriter<'_>,
        version: u32,
        level: u32,
        terms: &[S],
    ) -> Result<SegmentHeader> {
        let mut header = SegmentHeader::placeholder(version, level);
        writer.write(bytemuck::bytes_of(&header))?;

        header.dictionary_offset = writer.offset();
        header.num_terms = terms.len() as u32;
        let strings_offset = header.dictionary_offset + 4 + 4 * terms.len() as u64;
        let mut dictionary = Vec::with_capacity(4 + 4 * terms.len());
        dictionary.extend_from_slice(&header.num_terms.to_le_bytes());
        let mut pos = strings_offset;
        let mut prev: Option<&str> = None;
        for term in terms {
            let term = term.as_ref();
            if prev.is_some_and(|p| p >= term) {
                return Err(Error::InvalidInput(format!(
                    "terms not strictly sorted at {term:?}"
                )));
            }
            prev = Some(term);
            let offset = u32::try_from(pos)
                .map_err(|_| Error::InvalidInput("term dictionary exceeds 4 GiB".into()))?;
            dictionary.extend_from_slice(&offset.to_le_bytes());
            pos += 8 + term.len() as u64;
        }
        writer.write(&dictionary)?;

        header.strings_offset = writer.offset();
        debug_assert_eq!(header.strings_offset, strings_offset);
        for (idx, term) in terms.iter().enumerate() {
            let term = term.as_ref();
            writer.write(&(term.len() as u32).to_le_bytes())?;
            writer.write(term.as_bytes())?;
            writer.write(&(idx as u32).to_le_bytes())?;
        }

        header.entries_offset = writer.offset();
        let placeholders = vec![0u8; dict_entry_size(version) * terms.len()];
        writer.write(&placeholders)?;
        header.postings_offset = writer.offset();
        Ok(header)
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    fn flush_block(&mut self, last: bool) -> Result<()> {
        let Some(term) = self.term.as_mut() else {
            return Ok(());
        };
        if term.block.is_empty() {
            return Ok(());
        }
        let mut flags = SkipFlags::empty();
        if term.block.len() < BLOCK_SIZE {
            flags |= SkipFlags::PARTIAL;
        }
        if last {
            flags |= SkipFlags::LAST;
        }
        let skip = SkipEntry {
            last_doc_id: term.block[term.block.len() - 1].doc_id,
            doc_count: (term.block.len() - 1) as u8,
            block_max_tf: term.block.iter().map(|p| p.freq).max().unwrap_or(0),
            block_max_norm: term.block.iter().map(|p| p.fieldnorm).min().unwrap_or(0),
            posting_offset: self.writer.offset(),
            flags,
        };
        self.writer.write(bytemuck::cast_slice(term.block.as_slice()))?;
        term.block.clear();
        self.skips.push(skip);
        Ok(())
    }

    /// Writes the trailing sections and backpatches the dictionary and header.
    pub fn finish(
        mut self,
        fieldnorms: &[u8],
        docmap: &DocMap,
        total_tokens: u64,
    ) -> Result<SegmentFile> {
        match self.finish_inner(fieldnorms, docmap, total_tokens) {
            Ok(segment) => Ok(segment),
            Err(e) => {
                self.writer.abandon();
                Err(e)
            }
        }
    }

    fn finish_inner(
        &mut self,
        fieldnorms: &[u8],
        docmap: &DocMap,
        total_tokens: u64,
    ) -> Result<SegmentFile> {
        if self.term.is_some() {
            return Err(Error::InvalidInput("segment finished inside a term".into()));
        }
        if self.entries.len() != self.num_terms as usize {
            return Err(Error::InvalidInput(format!(
                "{} of {} terms written",
                self.entries.len(),
                self.num_terms
            )));
        }
        if fieldnorms.len() != docmap.len() {
            return Err(Error::InvalidInput(format!(
                "{} fieldnorms for {} documents",
                fieldnorms.len(),
                docmap.len()
            )));
        }
        let num_docs = u32::try_from(docmap.len())
            .map_err(|_| Error::InvalidInput("too many documents for one segment".into()))?;
        let version = self.header.version;

        self.header.skip_index_offset = self.writer.offset();
        let mut buf = Vec::with_capacity(self.skips.len() * skip_entry_size(version));
        for skip in &self.skips {
            skip.encode(version, &mut buf)?;
        }
        self.writer.write(&buf)?;

        buf.clear();
        for entry in &mut self.entries {
            if entry.block_count > 0 {
                entry.skip_index_offset = self.header.skip_index_offset
                    + entry.skip_index_offset * skip_entry_size(version) as u64;
            } else {
                entry.skip_index_offset = self.header.skip_index_offset;
            }
            entry.encode(version, &mut buf)?;
        }
        self.writer.write_at(self.header.entries_offset, &buf)?;

        self.header.fieldnorm_offset = self.writer.offset();
        self.writer.write(fieldnorms)?;
        self.header.docmap_offset = self.writer.offset();
        self.writer.write(docmap.as_bytes())?;
        self.header.data_size = self.writer.offset();
        self.header.num_docs = num_docs;
        self.header.total_tokens = total_tokens;

        let file = self.writer.finalize()?;
        self.header.num_pages = file.num_pages() as u32;
        self.header.page_index_root = file.root();
        debug_assert!(SEGMENT_HEADER_SIZE as u64 <= file.len);
        file.write_at(self.store, 0, bytemuck::bytes_of(&self.header))?;

        tracing::debug!(
            terms = self.num_terms,
            docs = num_docs,
            blocks = self.skips.len(),
            pages = file.num_pages(),
            "segment written"
        );
        Ok(SegmentFile {
            header: self.header,
            file,
        })
    }

    /// Frees everything written so far.
    pub fn abandon(self) {
        self.writer.abandon();
    }
}

impl InvertedSerialize for SegmentWriter<'_> {
    fn new_term(&mut self) -> Result<()> {
        if self.term.is_some() {
            return Err(Error::InvalidInput("previous term not closed".into()));
        }
        if self.entries.len() >= self.num_terms as usize {
            return Err(Error::InvalidInput("more terms than declared".into()));
        }
        self.term = Some(TermState {
            first_skip: self.skips.len(),
            doc_freq: 0,
            last_doc: None,
            block: ArrayVec::new(),
        });
        Ok(())
    }

    fn write_doc(&mut self, doc_id: u32, freq: u32, fieldnorm: u8) -> Result<()> {
        let Some(term) = self.term.as_mut() else {
            return Err(Error::InvalidInput("posting written outside a term".into()));
        };
        if term.last_doc.is_some_and(|last| last >= doc_id) {
            return Err(Error::InvalidInput(format!(
                "doc id {doc_id} written out of order"
            )));
        }
        let freq = u16::try_from(freq)
            .ok()
            .filter(|&f| f > 0)
            .ok_or_else(|| Error::InvalidInput(format!("term frequency {freq} out of range")))?;
        term.last_doc = Some(doc_id);
        term.doc_freq += 1;
        term.block.push(BlockPosting::new(doc_id, freq, fieldnorm));
        if term.block.is_full() {
            self.flush_block(false)?;
        }
        Ok(())
    }

    fn close_term(&mut self) -> Result<()> {
        self.flush_block(true)?;
        let Some(term) = self.term.take() else {
            return Err(Error::InvalidInput("no term to close".into()));
        };
        if let Some(last) = self.skips[term.first_skip..].last_mut() {
            last.flags |= SkipFlags::LAST;
        }
        self.entries.push(DictEntry {
            // relative to the start of the skip table until `finish`
            skip_index_offset: term.first_skip as u64,
            block_count: (self.skips.len() - term.first_skip) as u32,
            doc_freq: term.doc_freq,
        });
        Ok(())
    }
}
