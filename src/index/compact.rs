use std::sync::Arc;

use super::snapshot::{Segment, Snapshot};
use super::Bm25Index;
use crate::error::Result;
use crate::page::PageId;
use crate::segment::meta::MetaPageData;
use crate::segment::{merge_segments, SegmentReader, SEGMENT_VERSION_CURRENT};

impl Bm25Index {
    /// Merges levels that reached `segments_per_level` segments until none
    /// does. Returns the number of merges performed.
    pub fn compact(&self) -> Result<usize> {
        let mut meta = self.writer.lock();
        self.compact_locked(&mut meta)
    }

    pub(super) fn compact_locked(&self, meta: &mut MetaPageData) -> Result<usize> {
        let per_level = self.options.segments_per_level as usize;
        let last_level = self.options.max_levels - 1;
        let mut merges = 0;
        loop {
            let snapshot = self.snapshot();
            let counts = snapshot.level_counts(self.options.max_levels);
            let Some(level) = counts.iter().position(|&count| count >= per_level) else {
                break;
            };
            let level = level as u32;
            // oldest first
            let sources: Vec<Arc<Segment>> =
                snapshot.level(level).take(per_level).cloned().collect();
            let target = (level + 1).min(last_level);
            self.merge_into(meta, &snapshot, &sources, target)?;
            merges += 1;
        }
        Ok(merges)
    }

    /// Merges every visible segment into one, placed at the highest level in use.
    pub fn force_merge(&self) -> Result<()> {
        let mut meta = self.writer.lock();
        let snapshot = self.snapshot();
        if snapshot.segments.len() < 2 {
            return Ok(());
        }
        let target = snapshot
            .segments
            .iter()
            .map(|s| s.reader().level())
            .max()
            .unwrap_or(0);
        let sources = snapshot.segments.clone();
        self.merge_into(&mut meta, &snapshot, &sources, target)
    }

    /// Writes the merged segment, publishes it in place of `sources` and
    /// retires the sources. A failure leaves the visible state unchanged.
    fn merge_into(
        &self,
        meta: &mut MetaPageData,
        snapshot: &Snapshot,
        sources: &[Arc<Segment>],
        target_level: u32,
    ) -> Result<()> {
        let readers: Vec<&SegmentReader> = sources.iter().map(|s| s.reader()).collect();
        let file = merge_segments(
            self.store.as_ref(),
            &readers,
            SEGMENT_VERSION_CURRENT,
            target_level,
        )?;
        let merged = self.open_written(file)?;

        let removed: Vec<PageId> = readers.iter().map(|r| r.root()).collect();
        let next = snapshot.replace(&removed, merged.clone(), snapshot.memtable.clone());
        // an unsynced publish keeps the sources; open reclaims whichever side lost
        self.publish(meta, next, &merged)?;
        for source in sources {
            source.retire();
        }
        tracing::info!(
            sources = sources.len(),
            from_level = readers.iter().map(|r| r.level()).min().unwrap_or(0),
            to_level = target_level,
            docs = merged.reader().num_docs(),
            pages_retired = readers.iter().map(|r| r.num_pages()).sum::<usize>(),
            generation = meta.generation,
            "segments compacted"
        );
        Ok(())
    }
}
