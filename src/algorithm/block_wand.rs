use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::segment::posting::{PostingCursor, TERMINATED_DOC};
use crate::segment::reader::SegmentReader;
use crate::utils::topk_computer::TopKComputer;
use crate::weight::Bm25Weight;

/// Relative margin applied to upper bounds before comparing them with the
/// threshold, so float rounding never prunes a document that could tie.
const PRUNE_SLACK: f32 = 1e-5;

#[inline]
fn below_threshold(upper_bound: f32, threshold: f32) -> bool {
    upper_bound + upper_bound.abs() * PRUNE_SLACK < threshold
}

pub struct SegmentScorer<'a> {
    pub posting: PostingCursor<'a>,
    pub weight: Bm25Weight,
    pub max_score: f32,
    /// Position of the term in the query; scores are summed in this order.
    pub term_ord: usize,
}

impl<'a> SegmentScorer<'a> {
    pub fn new(posting: PostingCursor<'a>, weight: Bm25Weight, term_ord: usize) -> Self {
        let max_score = posting.max_score(&weight);
        Self {
            posting,
            weight,
            max_score,
            term_ord,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub blocks_decoded: u64,
    pub blocks_skipped: u64,
    pub docs_scored: u64,
}

impl ScanStats {
    fn absorb(&mut self, posting: &PostingCursor<'_>) {
        self.blocks_decoded += posting.blocks_decoded() as u64;
        self.blocks_skipped += posting.blocks_skipped() as u64;
    }

    /// Counts blocks a pruned cursor never reached as skipped.
    fn absorb_abandoned(&mut self, posting: &PostingCursor<'_>) {
        self.absorb(posting);
        self.blocks_skipped += posting.unvisited_blocks() as u64;
    }
}

pub(crate) fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Cancelled);
    }
    Ok(())
}

pub fn block_wand_single(
    mut scorer: SegmentScorer<'_>,
    segment: &SegmentReader,
    computer: &mut TopKComputer,
    cancel: &AtomicBool,
    stats: &mut ScanStats,
) -> Result<()> {
    'outer: loop {
        check_cancelled(cancel)?;
        while below_threshold(scorer.posting.block_max_score(&scorer.weight), computer.threshold())
        {
            if !scorer.posting.next_block() {
                break 'outer;
            }
        }
        scorer.posting.decode_block()?;
        loop {
            let score = scorer
                .weight
                .score_fieldnorm(scorer.posting.fieldnorm(), scorer.posting.freq());
            stats.docs_scored += 1;
            if score >= computer.threshold() {
                computer.push(score, segment.locator(scorer.posting.docid())?);
            }
            if !scorer.posting.next_doc() {
                break;
            }
        }
        // leave the block before looking at the next block's bound
        if !scorer.posting.next_block() {
            break;
        }
    }
    stats.absorb(&scorer.posting);
    Ok(())
}

pub fn block_wand(
    mut scorers: Vec<SegmentScorer<'_>>,
    segment: &SegmentReader,
    computer: &mut TopKComputer,
    cancel: &AtomicBool,
    stats: &mut ScanStats,
) -> Result<()> {
    let num_terms = scorers.iter().map(|s| s.term_ord + 1).max().unwrap_or(0);
    let mut parts = vec![0.0f32; num_terms];

    for s in &mut scorers {
        if !s.posting.completed() {
            s.posting.decode_block()?;
        }
    }
    remove_completed(&mut scorers, stats);
    restore_ordering(&mut scorers);

    while let Some((_, pivot_len, pivot_doc)) =
        find_pivot_doc(&scorers, computer.threshold())
    {
        check_cancelled(cancel)?;
        let block_max_score_upperbound: f32 = scorers[..pivot_len]
            .iter_mut()
            .map(|scorer| {
                scorer.posting.shallow_seek(pivot_doc);
                scorer.posting.block_max_score(&scorer.weight)
            })
            .sum();

        if below_threshold(block_max_score_upperbound, computer.threshold()) {
            block_max_was_too_low_advance_one_scorer(&mut scorers, pivot_len, stats)?;
            continue;
        }

        if !align_scorers(&mut scorers, pivot_doc, pivot_len, stats)? {
            continue;
        }

        for scorer in &scorers[..pivot_len] {
            parts[scorer.term_ord] = scorer
                .weight
                .score_fieldnorm(scorer.posting.fieldnorm(), scorer.posting.freq());
        }
        let score = parts.iter().fold(0.0f32, |acc, part| acc + part);
        parts.fill(0.0);
        stats.docs_scored += 1;
        if score >= computer.threshold() {
            computer.push(score, segment.locator(pivot_doc)?);
        }

        advance_all_scorers_on_pivot(&mut scorers, pivot_len, stats)?;
    }

    for scorer in &scorers {
        stats.absorb_abandoned(&scorer.posting);
    }
    Ok(())
}

fn remove_completed(scorers: &mut Vec<SegmentScorer<'_>>, stats: &mut ScanStats) {
    scorers.retain(|scorer| {
        if scorer.posting.completed() {
            stats.absorb(&scorer.posting);
            false
        } else {
            true
        }
    });
}

fn find_pivot_doc(scorers: &[SegmentScorer<'_>], threshold: f32) -> Option<(usize, usize, u32)> {
    let mut max_score = 0.0;
    let mut before_pivot_len = 0;
    let mut pivot_doc = TERMINATED_DOC;
    while before_pivot_len < scorers.len() {
        let scorer = &scorers[before_pivot_len];
        max_score += scorer.max_score;
        if !below_threshold(max_score, threshold) {
            pivot_doc = scorer.posting.docid();
            break;
        }
        before_pivot_len += 1;
    }
    if pivot_doc == TERMINATED_DOC {
        return None;
    }

    let mut pivot_len = before_pivot_len + 1;
    pivot_len += scorers[pivot_len..]
        .iter()
        .take_while(|term_scorer| term_scorer.posting.docid() == pivot_doc)
        .count();
    Some((before_pivot_len, pivot_len, pivot_doc))
}

fn block_max_was_too_low_advance_one_scorer(
    scorers: &mut Vec<SegmentScorer<'_>>,
    pivot_len: usize,
    stats: &mut ScanStats,
) -> Result<()> {
    let mut scorer_to_seek = pivot_len - 1;
    let mut global_max_score = scorers[scorer_to_seek].max_score;
    let mut doc_to_seek_after = scorers[scorer_to_seek].posting.last_doc_in_block();

    for scorer_ord in (0..pivot_len - 1).rev() {
        let scorer = &scorers[scorer_ord];
        if scorer.posting.last_doc_in_block() <= doc_to_seek_after {
            doc_to_seek_after = scorer.posting.last_doc_in_block();
        }
        if scorer.max_score > global_max_score {
            global_max_score = scorer.max_score;
            scorer_to_seek = scorer_ord;
        }
    }
    doc_to_seek_after = doc_to_seek_after.saturating_add(1);

    for scorer in &scorers[pivot_len..] {
        if scorer.posting.docid() <= doc_to_seek_after {
            doc_to_seek_after = scorer.posting.docid();
        }
    }
    scorers[scorer_to_seek].posting.seek(doc_to_seek_after)?;

    if scorers[scorer_to_seek].posting.completed() {
        let scorer = scorers.remove(scorer_to_seek);
        stats.absorb(&scorer.posting);
    }
    restore_ordering(scorers);
    Ok(())
}

/// Shallow seeks move doc ids of several scorers at once, so the whole list
/// is re-sorted; it is nearly sorted and short.
fn restore_ordering(term_scorers: &mut [SegmentScorer<'_>]) {
    term_scorers.sort_by_key(|scorer| scorer.posting.docid());
}

/// Positions every scorer up to `pivot_len` exactly on `pivot_doc`. Scorers
/// whose doc id was only a block lower bound are decoded here.
fn align_scorers(
    term_scorers: &mut Vec<SegmentScorer<'_>>,
    pivot_doc: u32,
    pivot_len: usize,
    stats: &mut ScanStats,
) -> Result<bool> {
    for i in (0..pivot_len).rev() {
        let posting = &term_scorers[i].posting;
        if posting.is_block_decoded() && posting.docid() == pivot_doc {
            continue;
        }
        let new_doc = term_scorers[i].posting.seek(pivot_doc)?;
        if new_doc != pivot_doc {
            if new_doc == TERMINATED_DOC {
                let scorer = term_scorers.remove(i);
                stats.absorb(&scorer.posting);
            }
            restore_ordering(term_scorers);
            return Ok(false);
        }
    }
    Ok(true)
}

fn advance_all_scorers_on_pivot(
    term_scorers: &mut Vec<SegmentScorer<'_>>,
    pivot_len: usize,
    stats: &mut ScanStats,
) -> Result<()> {
    for scorer in &mut term_scorers[..pivot_len] {
        scorer.posting.next_with_auto_decode()?;
    }
    remove_completed(term_scorers, stats);
    restore_ordering(term_scorers);
    Ok(())
}
