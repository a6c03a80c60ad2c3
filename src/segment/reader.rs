use std::cmp::Ordering;
use std::sync::Arc;

use super::docmap::{DocMap, RecordLocator};
use super::format::{
    dict_entry_size, skip_entry_size, BlockPosting, DictEntry, SegmentHeader, SkipEntry,
    BLOCK_POSTING_SIZE, BLOCK_SIZE, SEGMENT_HEADER_SIZE,
};
use super::posting::PostingCursor;
use crate::error::{Error, Result};
use crate::page::{PageId, PageStore, VirtualPageReader};

/// Read side of one immutable segment. Opening reads only the header; the
/// fieldnorm table and document map are cached when the segment is small.
pub struct SegmentReader {
    reader: VirtualPageReader,
    header: SegmentHeader,
    root: PageId,
    fieldnorms: Option<Vec<u8>>,
    docmap: Option<DocMap>,
}

impl SegmentReader {
    pub fn open(store: Arc<dyn PageStore>, root: PageId, eager_cache_max_docs: u32) -> Result<Self> {
        let reader = VirtualPageReader::open(store, root)?;
        if reader.len() < SEGMENT_HEADER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "segment at page {root} is shorter than its header"
            )));
        }
        let header = SegmentHeader::parse(&reader.read_vec(0, SEGMENT_HEADER_SIZE)?)?;
        if header.page_index_root != root
            || header.data_size != reader.len()
            || header.num_pages as usize != reader.file().num_pages()
        {
            return Err(Error::corruption(format!(
                "segment header at page {root} disagrees with its page index"
            )));
        }
        let expected_tail = header.fieldnorm_offset
            + header.num_docs as u64
            + header.num_docs as u64 * std::mem::size_of::<RecordLocator>() as u64;
        if header.docmap_offset != header.fieldnorm_offset + header.num_docs as u64
            || expected_tail != header.data_size
            || header.entries_offset + header.num_terms as u64 * dict_entry_size(header.version) as u64
                != header.postings_offset
        {
            return Err(Error::corruption(format!(
                "segment at page {root} has inconsistent section sizes"
            )));
        }

        let mut segment = Self {
            reader,
            header,
            root,
            fieldnorms: None,
            docmap: None,
        };
        if header.num_docs <= eager_cache_max_docs {
            segment.fieldnorms = Some(segment.fieldnorm_table()?);
            segment.docmap = Some(segment.load_docmap()?);
        }
        Ok(segment)
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn level(&self) -> u32 {
        self.header.level
    }

    pub fn num_docs(&self) -> u32 {
        self.header.num_docs
    }

    pub fn num_terms(&self) -> u32 {
        self.header.num_terms
    }

    pub fn total_tokens(&self) -> u64 {
        self.header.total_tokens
    }

    pub fn is_cached(&self) -> bool {
        self.docmap.is_some()
    }

    /// Every page owned by the segment, page index pages included.
    pub fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.reader.file().all_pages()
    }

    pub fn num_pages(&self) -> usize {
        self.reader.file().num_pages()
    }

    fn read_u32(&self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.reader.read_at(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Term string and dictionary entry index for the `ord`-th term.
    fn term_record(&self, ord: u32) -> Result<(Vec<u8>, u32)> {
        let offset = self.read_u32(self.header.dictionary_offset + 4 + 4 * ord as u64)? as u64;
        if offset < self.header.strings_offset || offset + 8 > self.header.entries_offset {
            return Err(Error::corruption(format!("term {ord} string out of range")));
        }
        let len = self.read_u32(offset)? as u64;
        if offset + 8 + len > self.header.entries_offset {
            return Err(Error::corruption(format!("term {ord} string overruns pool")));
        }
        let bytes = self.reader.read_vec(offset + 4, len as usize)?;
        let entry_idx = self.read_u32(offset + 4 + len)?;
        if entry_idx >= self.header.num_terms {
            return Err(Error::corruption(format!(
                "term {ord} points at entry {entry_idx}"
            )));
        }
        Ok((bytes, entry_idx))
    }

    pub fn term_at(&self, ord: u32) -> Result<String> {
        let (bytes, _) = self.term_record(ord)?;
        String::from_utf8(bytes).map_err(|_| Error::corruption(format!("term {ord} is not utf-8")))
    }

    /// All terms in dictionary order.
    pub fn terms(&self) -> Result<Vec<String>> {
        (0..self.header.num_terms).map(|ord| self.term_at(ord)).collect()
    }

    fn entry(&self, entry_idx: u32) -> Result<DictEntry> {
        let size = dict_entry_size(self.header.version);
        let data = self
            .reader
            .read_vec(self.header.entries_offset + entry_idx as u64 * size as u64, size)?;
        let entry = DictEntry::decode(self.header.version, &data);
        let skip_end = entry.skip_index_offset
            + entry.block_count as u64 * skip_entry_size(self.header.version) as u64;
        if entry.skip_index_offset < self.header.skip_index_offset
            || skip_end > self.header.fieldnorm_offset
            || entry.doc_freq > self.header.num_docs
            || (entry.block_count as u64) < (entry.doc_freq as u64).div_ceil(BLOCK_SIZE as u64)
        {
            return Err(Error::corruption(format!(
                "dictionary entry {entry_idx} out of range"
            )));
        }
        Ok(entry)
    }

    /// Entry of the `ord`-th term in dictionary order.
    pub fn entry_at(&self, ord: u32) -> Result<DictEntry> {
        let (_, entry_idx) = self.term_record(ord)?;
        self.entry(entry_idx)
    }

    /// Binary search over the sorted dictionary.
    pub fn lookup_term(&self, term: &str) -> Result<Option<DictEntry>> {
        let target = term.as_bytes();
        let (mut lo, mut hi) = (0u32, self.header.num_terms);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (bytes, entry_idx) = self.term_record(mid)?;
            match bytes.as_slice().cmp(target) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return self.entry(entry_idx).map(Some),
            }
        }
        Ok(None)
    }

    pub fn skip_entries(&self, entry: &DictEntry) -> Result<Vec<SkipEntry>> {
        let size = skip_entry_size(self.header.version);
        let data = self
            .reader
            .read_vec(entry.skip_index_offset, entry.block_count as usize * size)?;
        let skips: Vec<SkipEntry> = data
            .chunks_exact(size)
            .map(|chunk| SkipEntry::decode(self.header.version, chunk))
            .collect();
        let mut prev: Option<u32> = None;
        for skip in &skips {
            let end = skip.posting_offset + (skip.block_len() * BLOCK_POSTING_SIZE) as u64;
            if skip.posting_offset < self.header.postings_offset
                || end > self.header.skip_index_offset
                || skip.last_doc_id >= self.header.num_docs
                || prev.is_some_and(|p| p >= skip.last_doc_id)
            {
                return Err(Error::corruption("skip entry out of range"));
            }
            prev = Some(skip.last_doc_id);
        }
        Ok(skips)
    }

    /// Decodes one posting block into `out`.
    pub fn read_block(&self, skip: &SkipEntry, out: &mut Vec<BlockPosting>) -> Result<()> {
        let data = self
            .reader
            .read_vec(skip.posting_offset, skip.block_len() * BLOCK_POSTING_SIZE)?;
        out.clear();
        out.extend(
            data.chunks_exact(BLOCK_POSTING_SIZE)
                .map(bytemuck::pod_read_unaligned::<BlockPosting>),
        );
        let ordered = out.windows(2).all(|w| w[0].doc_id < w[1].doc_id);
        if !ordered || out.last().map(|p| p.doc_id) != Some(skip.last_doc_id) {
            return Err(Error::corruption("posting block does not match its skip entry"));
        }
        Ok(())
    }

    pub fn posting_iterator(&self, entry: &DictEntry) -> Result<PostingCursor<'_>> {
        PostingCursor::new(self, entry)
    }

    pub fn fieldnorm(&self, doc_id: u32) -> Result<u8> {
        if doc_id >= self.header.num_docs {
            return Err(Error::corruption(format!("fieldnorm for doc {doc_id} out of range")));
        }
        if let Some(cached) = &self.fieldnorms {
            return Ok(cached[doc_id as usize]);
        }
        let mut buf = [0u8; 1];
        self.reader
            .read_at(self.header.fieldnorm_offset + doc_id as u64, &mut buf)?;
        Ok(buf[0])
    }

    pub fn fieldnorm_table(&self) -> Result<Vec<u8>> {
        if let Some(cached) = &self.fieldnorms {
            return Ok(cached.clone());
        }
        self.reader
            .read_vec(self.header.fieldnorm_offset, self.header.num_docs as usize)
    }

    /// A missing mapping means the segment is damaged.
    pub fn locator(&self, doc_id: u32) -> Result<RecordLocator> {
        if let Some(docmap) = &self.docmap {
            return docmap
                .get(doc_id)
                .ok_or_else(|| Error::corruption(format!("doc id {doc_id} missing from docmap")));
        }
        if doc_id >= self.header.num_docs {
            return Err(Error::corruption(format!(
                "doc id {doc_id} missing from docmap"
            )));
        }
        let mut buf = [0u8; 8];
        self.reader.read_at(
            self.header.docmap_offset + doc_id as u64 * buf.len() as u64,
            &mut buf,
        )?;
        Ok(RecordLocator(u64::from_le_bytes(buf)))
    }

    pub fn load_docmap(&self) -> Result<DocMap> {
        if let Some(docmap) = &self.docmap {
            return Ok(docmap.clone());
        }
        let data = self.reader.read_vec(
            self.header.docmap_offset,
            self.header.num_docs as usize * std::mem::size_of::<RecordLocator>(),
        )?;
        Ok(DocMap::from_locators(
            data.chunks_exact(8)
                .map(bytemuck::pod_read_unaligned::<RecordLocator>)
                .collect(),
        ))
    }
}
