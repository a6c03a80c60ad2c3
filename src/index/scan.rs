use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use super::Bm25Index;
use crate::algorithm::block_wand::{check_cancelled, ScanStats};
use crate::algorithm::{block_wand, block_wand_single, select_top_k, SegmentScorer};
use crate::error::{Error, Result};
use crate::memtable::Memtable;
use crate::segment::format::DictEntry;
use crate::segment::{RecordLocator, SegmentReader};
use crate::token::tokenize;
use crate::utils::topk_computer::TopKComputer;
use crate::weight::{idf, Bm25Weight};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub locator: RecordLocator,
    pub score: f32,
}

/// Work done by one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub segments: u32,
    pub blocks_decoded: u64,
    pub blocks_skipped: u64,
    pub docs_scored: u64,
    pub memtable_docs: u64,
}

impl SearchStats {
    fn absorb(&mut self, scan: &ScanStats) {
        self.blocks_decoded += scan.blocks_decoded;
        self.blocks_skipped += scan.blocks_skipped;
        self.docs_scored += scan.docs_scored;
    }
}

pub struct SearchRequest<'a> {
    pub terms: Vec<&'a str>,
    pub k: usize,
    /// Score every matching document instead of pruning blocks.
    pub exhaustive: bool,
    /// Checked between documents; once set the query returns `Error::Cancelled`.
    pub cancel: Option<&'a AtomicBool>,
}

impl<'a> SearchRequest<'a> {
    pub fn new<S: AsRef<str>>(terms: &'a [S], k: usize) -> Self {
        Self {
            terms: terms.iter().map(|t| t.as_ref()).collect(),
            k,
            exhaustive: false,
            cancel: None,
        }
    }

    pub fn exhaustive(mut self, exhaustive: bool) -> Self {
        self.exhaustive = exhaustive;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A distinct query term; repeats raise its weight instead of adding a scorer.
struct QueryTerm<'a> {
    term: &'a str,
    count: u32,
}

fn query_terms<'a>(terms: &[&'a str]) -> Vec<QueryTerm<'a>> {
    let mut query: Vec<QueryTerm<'a>> = Vec::with_capacity(terms.len());
    for &term in terms {
        match query.iter_mut().find(|q| q.term == term) {
            Some(q) => q.count += 1,
            None => query.push(QueryTerm { term, count: 1 }),
        }
    }
    query
}

impl Bm25Index {
    /// Top `k` documents for `terms`, best first, ties broken by locator.
    pub fn search<S: AsRef<str>>(&self, terms: &[S], k: usize) -> Result<Vec<SearchResult>> {
        self.search_with(&SearchRequest::new(terms, k))
            .map(|(results, _)| results)
    }

    /// Same results as [`Bm25Index::search`], computed without block skipping.
    pub fn search_exhaustive<S: AsRef<str>>(
        &self,
        terms: &[S],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.search_with(&SearchRequest::new(terms, k).exhaustive(true))
            .map(|(results, _)| results)
    }

    /// Analyzes `text` the way [`Bm25Index::insert_text`] does and searches for it.
    pub fn search_text(&self, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.search(&tokenize(text), k)
    }

    pub fn search_with(
        &self,
        request: &SearchRequest<'_>,
    ) -> Result<(Vec<SearchResult>, SearchStats)> {
        self.execute(request).map_err(|e| {
            if e.is_fatal() {
                tracing::error!(error = %e, "query hit a damaged segment");
            }
            e
        })
    }

    fn execute(&self, request: &SearchRequest<'_>) -> Result<(Vec<SearchResult>, SearchStats)> {
        if request.k == 0 {
            return Err(Error::InvalidInput("k must be at least 1".into()));
        }
        let never = AtomicBool::new(false);
        let cancel = request.cancel.unwrap_or(&never);
        let query = query_terms(&request.terms);
        let snapshot = self.snapshot();
        let mut stats = SearchStats {
            segments: snapshot.segments.len() as u32,
            ..Default::default()
        };

        let entries: Vec<Vec<Option<DictEntry>>> = snapshot
            .segments
            .iter()
            .map(|s| {
                query
                    .iter()
                    .map(|q| s.reader().lookup_term(q.term))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<_>>()?;

        let memtable = snapshot.memtable.read();
        let mut num_docs = memtable.num_docs() as u64;
        let mut total_tokens = memtable.total_tokens();
        for segment in &snapshot.segments {
            num_docs += segment.reader().num_docs() as u64;
            total_tokens += segment.reader().total_tokens();
        }
        if num_docs == 0 || query.is_empty() {
            return Ok((Vec::new(), stats));
        }
        let avgdl = (total_tokens as f64 / num_docs as f64) as f32;
        let weights: Vec<Option<Bm25Weight>> = query
            .iter()
            .enumerate()
            .map(|(ord, q)| {
                let doc_freq = memtable.doc_freq(q.term) as u64
                    + entries
                        .iter()
                        .filter_map(|e| e[ord].as_ref())
                        .map(|e| e.doc_freq as u64)
                        .sum::<u64>();
                (doc_freq > 0).then(|| {
                    Bm25Weight::with_params(
                        q.count,
                        idf(num_docs, doc_freq),
                        avgdl,
                        self.options.k1,
                        self.options.b,
                    )
                })
            })
            .collect();

        let from_memtable = score_memtable(&memtable, &query, &weights, cancel)?;
        drop(memtable);
        stats.memtable_docs = from_memtable.len() as u64;

        let results: Vec<(f32, RecordLocator)> = if request.exhaustive {
            let mut candidates = from_memtable;
            for (segment, entries) in snapshot.segments.iter().zip(&entries) {
                score_segment_exhaustive(
                    segment.reader(),
                    entries,
                    &weights,
                    &mut candidates,
                    &mut stats,
                    cancel,
                )?;
            }
            let kept = select_top_k(&mut candidates, request.k);
            candidates.truncate(kept);
            candidates
        } else {
            let mut computer = TopKComputer::new(request.k.min(num_docs as usize));
            for (score, locator) in from_memtable {
                computer.push(score, locator);
            }
            for (segment, entries) in snapshot.segments.iter().zip(&entries) {
                let mut scan = ScanStats::default();
                score_segment_bmw(
                    segment.reader(),
                    entries,
                    &weights,
                    &mut computer,
                    &mut scan,
                    cancel,
                )?;
                stats.absorb(&scan);
            }
            computer.to_sorted_slice().to_vec()
        };

        tracing::debug!(
            terms = query.len(),
            k = request.k,
            exhaustive = request.exhaustive,
            segments = stats.segments,
            blocks_decoded = stats.blocks_decoded,
            blocks_skipped = stats.blocks_skipped,
            docs_scored = stats.docs_scored,
            "search finished"
        );
        let results = results
            .into_iter()
            .map(|(score, locator)| SearchResult { locator, score })
            .collect();
        Ok((results, stats))
    }
}

/// Exact scores of every matching memtable document. Contributions are
/// added in query-term order, like the segment paths do.
fn score_memtable(
    memtable: &Memtable,
    query: &[QueryTerm<'_>],
    weights: &[Option<Bm25Weight>],
    cancel: &AtomicBool,
) -> Result<Vec<(f32, RecordLocator)>> {
    let mut scores: HashMap<u32, f32> = HashMap::new();
    for (q, weight) in query.iter().zip(weights) {
        check_cancelled(cancel)?;
        let (Some(weight), Some(postings)) = (weight, memtable.postings(q.term)) else {
            continue;
        };
        for (doc_id, tf) in postings {
            *scores.entry(doc_id).or_insert(0.0) +=
                weight.score_fieldnorm(memtable.fieldnorm(doc_id), tf);
        }
    }
    Ok(scores
        .into_iter()
        .map(|(doc_id, score)| (score, memtable.locator(doc_id)))
        .collect())
}

fn score_segment_bmw(
    segment: &SegmentReader,
    entries: &[Option<DictEntry>],
    weights: &[Option<Bm25Weight>],
    computer: &mut TopKComputer,
    stats: &mut ScanStats,
    cancel: &AtomicBool,
) -> Result<()> {
    let mut scorers = Vec::new();
    for (term_ord, (entry, weight)) in entries.iter().zip(weights).enumerate() {
        let (Some(entry), Some(weight)) = (entry, weight) else {
            continue;
        };
        let posting = segment.posting_iterator(entry)?;
        scorers.push(SegmentScorer::new(posting, *weight, term_ord));
    }
    if scorers.len() == 1 {
        if let Some(scorer) = scorers.pop() {
            block_wand_single(scorer, segment, computer, cancel, stats)?;
        }
    } else if !scorers.is_empty() {
        block_wand(scorers, segment, computer, cancel, stats)?;
    }
    Ok(())
}

fn score_segment_exhaustive(
    segment: &SegmentReader,
    entries: &[Option<DictEntry>],
    weights: &[Option<Bm25Weight>],
    candidates: &mut Vec<(f32, RecordLocator)>,
    stats: &mut SearchStats,
    cancel: &AtomicBool,
) -> Result<()> {
    let num_docs = segment.num_docs() as usize;
    let mut scores = vec![0.0f32; num_docs];
    let mut matched = vec![false; num_docs];
    for (entry, weight) in entries.iter().zip(weights) {
        let (Some(entry), Some(weight)) = (entry, weight) else {
            continue;
        };
        check_cancelled(cancel)?;
        stats.blocks_decoded += entry.block_count as u64;
        for posting in segment.posting_iterator(entry)?.postings() {
            let posting = posting?;
            let doc = posting.doc_id as usize;
            scores[doc] += weight.score_fieldnorm(posting.fieldnorm, posting.freq as u32);
            matched[doc] = true;
        }
    }
    for doc_id in 0..num_docs {
        if !matched[doc_id] {
            continue;
        }
        stats.docs_scored += 1;
        candidates.push((scores[doc_id], segment.locator(doc_id as u32)?));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_keep_first_occurrence_order() {
        let query = query_terms(&["b", "a", "b", "c", "b"]);
        let flat: Vec<_> = query.iter().map(|q| (q.term, q.count)).collect();
        assert_eq!(flat, vec![("b", 3), ("a", 1), ("c", 1)]);
    }
}
