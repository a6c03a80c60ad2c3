mod compact;
mod insert;
mod scan;
mod snapshot;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

pub use scan::{SearchRequest, SearchResult, SearchStats};
use snapshot::{Segment, Snapshot};

use crate::error::{Error, Result};
use crate::options::IndexOptions;
use crate::page::{PageId, PageStore};
use crate::segment::meta::{MetaPageData, META_PAGE};
use crate::segment::{SegmentFile, SegmentReader};

/// Summary of what an index currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub generation: u64,
    pub num_docs: u64,
    pub total_tokens: u64,
    /// Segment count per level, L0 first.
    pub segments_per_level: Vec<usize>,
    pub memtable_docs: u32,
    pub memtable_postings: u64,
}

/// An LSM-organised BM25 index over a page store.
///
/// Queries capture a snapshot and never block each other. Ingest, flush
/// and compaction are serialised by the writer lock, which also owns the last
/// published metadata. A new segment becomes visible only through a metadata
/// write; anything on storage that the metadata does not reach is garbage and
/// is reclaimed by [`Bm25Index::open`].
pub struct Bm25Index {
    store: Arc<dyn PageStore>,
    options: IndexOptions,
    state: RwLock<Arc<Snapshot>>,
    writer: Mutex<MetaPageData>,
}

impl Bm25Index {
    /// Initialises an empty index on a store with no pages.
    pub fn create(store: Arc<dyn PageStore>, options: IndexOptions) -> Result<Self> {
        options.validate_all()?;
        if store.num_pages() != 0 {
            return Err(Error::InvalidInput(format!(
                "page store already holds {} pages",
                store.num_pages()
            )));
        }
        let page = store.allocate_page()?;
        if page != META_PAGE {
            return Err(Error::PageStore(format!(
                "first allocation returned page {page}"
            )));
        }
        let meta = MetaPageData {
            generation: 0,
            memtable_spill_threshold: options.memtable_spill_threshold,
            segments_per_level: options.segments_per_level,
            max_levels: options.max_levels,
            segments: Vec::new(),
        };
        meta.write(store.as_ref())?;
        tracing::info!(
            spill_threshold = options.memtable_spill_threshold,
            segments_per_level = options.segments_per_level,
            "index created"
        );
        let snapshot = Snapshot::empty(options.memtable_spill_threshold);
        Ok(Self::from_parts(store, options, meta, snapshot))
    }

    /// Opens an existing index. The spill threshold and level policy come from
    /// the metadata root; the remaining options are taken from `options`.
    pub fn open(store: Arc<dyn PageStore>, options: IndexOptions) -> Result<Self> {
        Self::open_inner(store, options).map_err(|e| {
            if e.is_fatal() {
                tracing::error!(error = %e, "index cannot be opened");
            }
            e
        })
    }

    fn open_inner(store: Arc<dyn PageStore>, options: IndexOptions) -> Result<Self> {
        options.validate_all()?;
        let meta = MetaPageData::read(store.as_ref())?;
        let options = IndexOptions {
            memtable_spill_threshold: meta.memtable_spill_threshold,
            segments_per_level: meta.segments_per_level,
            max_levels: meta.max_levels,
            ..options
        };
        options
            .validate_all()
            .map_err(|e| Error::corruption(format!("metadata holds invalid options: {e}")))?;

        let mut segments = Vec::with_capacity(meta.segments.len());
        for entry in &meta.segments {
            let reader =
                SegmentReader::open(store.clone(), entry.root, options.eager_cache_max_docs)?;
            if reader.level() != entry.level || reader.num_docs() != entry.num_docs {
                return Err(Error::corruption(format!(
                    "segment at page {} does not match its metadata entry",
                    entry.root
                )));
            }
            segments.push(Arc::new(Segment::new(reader, store.clone())));
        }
        reclaim_orphans(store.as_ref(), &segments)?;

        tracing::info!(
            generation = meta.generation,
            segments = segments.len(),
            "index opened"
        );
        let snapshot = Snapshot {
            segments,
            ..Snapshot::empty(options.memtable_spill_threshold)
        };
        Ok(Self::from_parts(store, options, meta, snapshot))
    }

    fn from_parts(
        store: Arc<dyn PageStore>,
        options: IndexOptions,
        meta: MetaPageData,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            store,
            options,
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(meta),
        }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.state.read().clone()
    }

    pub fn stats(&self) -> IndexStats {
        let generation = self.writer.lock().generation;
        let snapshot = self.snapshot();
        let memtable = snapshot.memtable.read();
        let mut num_docs = memtable.num_docs() as u64;
        let mut total_tokens = memtable.total_tokens();
        for segment in &snapshot.segments {
            num_docs += segment.reader().num_docs() as u64;
            total_tokens += segment.reader().total_tokens();
        }
        IndexStats {
            generation,
            num_docs,
            total_tokens,
            segments_per_level: snapshot.level_counts(self.options.max_levels),
            memtable_docs: memtable.num_docs(),
            memtable_postings: memtable.num_postings(),
        }
    }

    /// Opens a freshly written segment, giving its pages back if that fails.
    fn open_written(&self, file: SegmentFile) -> Result<Arc<Segment>> {
        match SegmentReader::open(
            self.store.clone(),
            file.root(),
            self.options.eager_cache_max_docs,
        ) {
            Ok(reader) => Ok(Arc::new(Segment::new(reader, self.store.clone()))),
            Err(e) => {
                free_pages(self.store.as_ref(), file.file.all_pages());
                Err(e)
            }
        }
    }

    /// Writes the metadata for `next`, then makes it the visible snapshot.
    ///
    /// `added` is the segment `next` introduces. It is retired if the metadata
    /// page was never written. Once the page is written `next` stays published,
    /// and a failing trailing sync is returned without undoing it. The caller
    /// retires replaced segments only after an `Ok`.
    fn publish(&self, meta: &mut MetaPageData, next: Snapshot, added: &Segment) -> Result<()> {
        let next_meta = MetaPageData {
            generation: meta.generation + 1,
            segments: next.entries(),
            ..meta.clone()
        };
        if let Err(e) = next_meta.write_unsynced(self.store.as_ref()) {
            added.retire();
            return Err(e);
        }
        *meta = next_meta;
        *self.state.write() = Arc::new(next);
        if let Err(e) = self.store.sync() {
            tracing::error!(
                generation = meta.generation,
                error = %e,
                "metadata written but not synced"
            );
            return Err(e);
        }
        Ok(())
    }
}

fn free_pages(store: &dyn PageStore, pages: impl Iterator<Item = PageId>) {
    for page in pages {
        if let Err(e) = store.free_page(page) {
            tracing::warn!(page, error = %e, "failed to free page");
        }
    }
}

/// Frees every page that is neither free nor reachable from the metadata.
/// A reachable page found on the free list means the index is corrupt.
fn reclaim_orphans(store: &dyn PageStore, segments: &[Arc<Segment>]) -> Result<()> {
    let num_pages = store.num_pages();
    let mut reachable = vec![false; num_pages as usize];
    reachable[META_PAGE as usize] = true;
    for segment in segments {
        for page in segment.reader().pages() {
            let slot = reachable.get_mut(page as usize).ok_or_else(|| {
                Error::corruption(format!("segment page {page} beyond end of store"))
            })?;
            if *slot {
                return Err(Error::corruption(format!("page {page} owned twice")));
            }
            if store.is_free(page) {
                return Err(Error::corruption(format!(
                    "page {page} of segment {} is on the free list",
                    segment.reader().root()
                )));
            }
            *slot = true;
        }
    }
    let mut reclaimed = 0u32;
    for page in 0..num_pages {
        if !reachable[page as usize] && !store.is_free(page) {
            store.free_page(page)?;
            reclaimed += 1;
        }
    }
    if reclaimed > 0 {
        tracing::info!(pages = reclaimed, "reclaimed orphaned pages");
    }
    Ok(())
}
