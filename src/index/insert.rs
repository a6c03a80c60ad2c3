use std::sync::Arc;

use parking_lot::RwLock;

use super::Bm25Index;
use crate::error::Result;
use crate::memtable::Memtable;
use crate::segment::meta::{MetaPageData, MAX_SEGMENTS};
use crate::segment::{RecordLocator, SEGMENT_VERSION_CURRENT};
use crate::token::term_frequencies;

impl Bm25Index {
    /// Buffers one document in the memtable and spills it once the posting
    /// threshold is crossed. An error from that flush leaves the document
    /// buffered and every published segment untouched.
    pub fn insert_document<S: AsRef<str>>(
        &self,
        locator: RecordLocator,
        term_frequencies: &[(S, u32)],
    ) -> Result<()> {
        let mut meta = self.writer.lock();
        let snapshot = self.snapshot();
        let should_spill = {
            let mut memtable = snapshot.memtable.write();
            memtable.insert_document(locator, term_frequencies)?;
            memtable.should_spill()
        };
        if should_spill {
            self.flush_locked(&mut meta)?;
        }
        Ok(())
    }

    /// Tokenizes `text` with the built-in analyzer and inserts the result.
    pub fn insert_text(&self, locator: RecordLocator, text: &str) -> Result<()> {
        let terms: Vec<(String, u32)> = term_frequencies(text).into_iter().collect();
        self.insert_document(locator, &terms)
    }

    /// Writes the memtable out as a new L0 segment.
    pub fn flush(&self) -> Result<()> {
        let mut meta = self.writer.lock();
        self.flush_locked(&mut meta)
    }

    pub(super) fn flush_locked(&self, meta: &mut MetaPageData) -> Result<()> {
        let meta_full = {
            let snapshot = self.snapshot();
            snapshot.segments.len() >= MAX_SEGMENTS && !snapshot.memtable.read().is_empty()
        };
        if meta_full {
            tracing::warn!(
                segments = MAX_SEGMENTS,
                "metadata page is full, compacting before flush"
            );
            self.compact_locked(meta)?;
        }
        let snapshot = self.snapshot();
        let (segment, docs) = {
            let memtable = snapshot.memtable.read();
            if memtable.is_empty() {
                return Ok(());
            }
            let file = memtable.write_segment(self.store.as_ref(), SEGMENT_VERSION_CURRENT)?;
            (self.open_written(file)?, memtable.num_docs())
        };

        let fresh = Arc::new(RwLock::new(Memtable::new(
            self.options.memtable_spill_threshold,
        )));
        let next = snapshot.replace(&[], segment.clone(), fresh);
        self.publish(meta, next, &segment)?;
        tracing::info!(
            docs,
            root = segment.reader().root(),
            generation = meta.generation,
            "memtable flushed"
        );

        if self.options.auto_compact {
            self.compact_locked(meta)?;
        }
        Ok(())
    }
}
