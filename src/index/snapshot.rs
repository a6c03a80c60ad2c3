use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::memtable::Memtable;
use crate::page::{PageId, PageStore};
use crate::segment::meta::SegmentEntry;
use crate::segment::SegmentReader;

/// A visible segment. Once retired by a merge, its pages go back to the store
/// when the last snapshot holding it is dropped.
pub(crate) struct Segment {
    reader: SegmentReader,
    retired: AtomicBool,
    store: Arc<dyn PageStore>,
}

impl Segment {
    pub fn new(reader: SegmentReader, store: Arc<dyn PageStore>) -> Self {
        Self {
            reader,
            retired: AtomicBool::new(false),
            store,
        }
    }

    pub fn reader(&self) -> &SegmentReader {
        &self.reader
    }

    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::Acquire) {
            return;
        }
        let mut freed = 0;
        for page in self.reader.pages() {
            match self.store.free_page(page) {
                Ok(()) => freed += 1,
                Err(e) => {
                    tracing::warn!(page, error = %e, "failed to free page of retired segment")
                }
            }
        }
        tracing::debug!(root = self.reader.root(), pages = freed, "retired segment reclaimed");
    }
}

/// What one query sees: the segment set and the memtable, captured together.
pub(crate) struct Snapshot {
    /// Ordered by level, oldest first within a level.
    pub segments: Vec<Arc<Segment>>,
    pub memtable: Arc<RwLock<Memtable>>,
}

impl Snapshot {
    pub fn empty(spill_threshold: u64) -> Self {
        Self {
            segments: Vec::new(),
            memtable: Arc::new(RwLock::new(Memtable::new(spill_threshold))),
        }
    }

    pub fn level(&self, level: u32) -> impl Iterator<Item = &Arc<Segment>> + '_ {
        self.segments
            .iter()
            .filter(move |s| s.reader().level() == level)
    }

    pub fn level_counts(&self, max_levels: u32) -> Vec<usize> {
        let mut counts = vec![0; max_levels as usize];
        for segment in &self.segments {
            if let Some(count) = counts.get_mut(segment.reader().level() as usize) {
                *count += 1;
            }
        }
        counts
    }

    /// The next snapshot: `removed` roots dropped, `added` placed as the
    /// newest segment of its level.
    pub fn replace(
        &self,
        removed: &[PageId],
        added: Arc<Segment>,
        memtable: Arc<RwLock<Memtable>>,
    ) -> Self {
        let mut segments: Vec<Arc<Segment>> = self
            .segments
            .iter()
            .filter(|s| !removed.contains(&s.reader().root()))
            .cloned()
            .collect();
        segments.push(added);
        segments.sort_by_key(|s| s.reader().level());
        Self { segments, memtable }
    }

    pub fn entries(&self) -> Vec<SegmentEntry> {
        self.segments
            .iter()
            .map(|s| {
                let reader = s.reader();
                SegmentEntry::new(reader.level(), reader.root(), reader.num_docs())
            })
            .collect()
    }
}
