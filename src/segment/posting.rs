use super::field_norm::id_to_fieldnorm;
use super::format::{BlockPosting, DictEntry, SkipEntry};
use super::reader::SegmentReader;
use crate::error::Result;
use crate::weight::Bm25Weight;

pub const TERMINATED_DOC: u32 = u32::MAX;

/// Block-at-a-time cursor over one term's postings in a segment.
///
/// The skip entries of the term are loaded up front; posting blocks are
/// read only when `decode_block` is called, so blocks passed over by
/// `next_block` or `shallow_seek` never touch their pages.
pub struct PostingCursor<'a> {
    segment: &'a SegmentReader,
    skips: Vec<SkipEntry>,
    block_idx: usize,
    block: Vec<BlockPosting>,
    block_decoded: bool,
    offset: usize,
    blocks_decoded: u32,
    blocks_skipped: u32,
}

impl<'a> PostingCursor<'a> {
    pub fn new(segment: &'a SegmentReader, entry: &DictEntry) -> Result<Self> {
        let skips = segment.skip_entries(entry)?;
        Ok(Self {
            segment,
            skips,
            block_idx: 0,
            block: Vec::with_capacity(super::format::BLOCK_SIZE),
            block_decoded: false,
            offset: 0,
            blocks_decoded: 0,
            blocks_skipped: 0,
        })
    }

    pub fn doc_freq(&self) -> u32 {
        self.skips.iter().map(|s| s.block_len() as u32).sum()
    }

    fn leave_block(&mut self) {
        if !self.block_decoded {
            self.blocks_skipped += 1;
        }
        self.block_idx += 1;
        self.block_decoded = false;
        self.offset = 0;
    }

    /// Moves to the next block without decoding it.
    pub fn next_block(&mut self) -> bool {
        debug_assert!(!self.completed());
        self.leave_block();
        !self.completed()
    }

    /// Moves within the decoded block; false once the block is exhausted.
    pub fn next_doc(&mut self) -> bool {
        debug_assert!(self.block_decoded);
        self.offset += 1;
        self.offset < self.block.len()
    }

    pub fn next_with_auto_decode(&mut self) -> Result<bool> {
        if self.completed() {
            return Ok(false);
        }
        if self.next_doc() {
            return Ok(true);
        }
        if self.next_block() {
            self.decode_block()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Positions on the first block whose last doc is at least `docid`,
    /// using the skip entries only.
    pub fn shallow_seek(&mut self, docid: u32) -> bool {
        if self.completed() {
            return false;
        }
        if self.last_doc_in_block() >= docid {
            return true;
        }
        let rest = &self.skips[self.block_idx + 1..];
        let target = self.block_idx + 1 + rest.partition_point(|s| s.last_doc_id < docid);
        while self.block_idx < target {
            self.leave_block();
        }
        !self.completed()
    }

    /// Advances to the first posting with doc id at least `docid`, decoding
    /// only the block that can hold it.
    pub fn seek(&mut self, docid: u32) -> Result<u32> {
        if !self.shallow_seek(docid) {
            return Ok(TERMINATED_DOC);
        }
        self.decode_block()?;
        let start = self.offset;
        self.offset = start + self.block[start..].partition_point(|p| p.doc_id < docid);
        debug_assert!(self.offset < self.block.len());
        Ok(self.docid())
    }

    pub fn decode_block(&mut self) -> Result<()> {
        debug_assert!(!self.completed());
        if self.block_decoded {
            return Ok(());
        }
        let skip = self.skips[self.block_idx];
        self.segment.read_block(&skip, &mut self.block)?;
        self.block_decoded = true;
        self.offset = 0;
        self.blocks_decoded += 1;
        Ok(())
    }

    /// Current doc id. On a block not decoded yet this is only a lower bound:
    /// the first id the block could start with.
    pub fn docid(&self) -> u32 {
        if self.completed() {
            return TERMINATED_DOC;
        }
        if self.block_decoded {
            return self.block[self.offset].doc_id;
        }
        match self.block_idx {
            0 => 0,
            idx => self.skips[idx - 1].last_doc_id + 1,
        }
    }

    pub fn is_block_decoded(&self) -> bool {
        self.block_decoded
    }

    pub fn freq(&self) -> u32 {
        debug_assert!(self.block_decoded);
        self.block[self.offset].freq as u32
    }

    pub fn fieldnorm(&self) -> u8 {
        debug_assert!(self.block_decoded);
        self.block[self.offset].fieldnorm
    }

    pub fn posting(&self) -> BlockPosting {
        debug_assert!(self.block_decoded);
        self.block[self.offset]
    }

    pub fn block_max_score(&self, weight: &Bm25Weight) -> f32 {
        if self.completed() {
            return 0.0;
        }
        block_upper_bound(&self.skips[self.block_idx], weight)
    }

    /// Largest block upper bound over the whole posting list.
    pub fn max_score(&self, weight: &Bm25Weight) -> f32 {
        self.skips
            .iter()
            .map(|skip| block_upper_bound(skip, weight))
            .fold(0.0, f32::max)
    }

    pub fn last_doc_in_block(&self) -> u32 {
        match self.skips.get(self.block_idx) {
            Some(skip) => skip.last_doc_id,
            None => TERMINATED_DOC,
        }
    }

    pub fn completed(&self) -> bool {
        self.block_idx >= self.skips.len()
    }

    pub fn blocks_decoded(&self) -> u32 {
        self.blocks_decoded
    }

    pub fn blocks_skipped(&self) -> u32 {
        self.blocks_skipped
    }

    /// Blocks from the current one on that were never decoded.
    pub fn unvisited_blocks(&self) -> u32 {
        let remaining = self.skips.len().saturating_sub(self.block_idx);
        let current = usize::from(self.block_decoded && remaining > 0);
        (remaining - current) as u32
    }

    /// Drains the cursor as a plain posting stream.
    pub fn postings(mut self) -> impl Iterator<Item = Result<BlockPosting>> + 'a {
        let mut started = false;
        std::iter::from_fn(move || {
            if self.completed() {
                return None;
            }
            let advanced = if started {
                self.next_with_auto_decode()
            } else {
                started = true;
                self.decode_block().map(|_| true)
            };
            match advanced {
                Ok(true) => Some(Ok(self.posting())),
                Ok(false) => None,
                Err(e) => {
                    self.block_idx = self.skips.len();
                    Some(Err(e))
                }
            }
        })
    }
}

/// Highest score any posting of the block can reach: the largest term
/// frequency paired with the shortest document.
#[inline]
pub fn block_upper_bound(skip: &SkipEntry, weight: &Bm25Weight) -> f32 {
    weight.score(id_to_fieldnorm(skip.block_max_norm), skip.block_max_tf as u32)
}
