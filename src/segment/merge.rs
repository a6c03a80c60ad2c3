use std::collections::BTreeSet;

use super::docmap::DocMap;
use super::reader::SegmentReader;
use super::writer::{InvertedSerialize, SegmentFile, SegmentWriter};
use crate::error::{Error, Result};
use crate::page::PageStore;

/// Merges `sources` into one segment at `target_level`.
///
/// Documents are appended source by source, so every source gets a dense
/// old id -> new id array and postings of one term are copied in order
/// without any lookup.
pub fn merge_segments(
    store: &dyn PageStore,
    sources: &[&SegmentReader],
    version: u32,
    target_level: u32,
) -> Result<SegmentFile> {
    if sources.is_empty() {
        return Err(Error::InvalidInput("nothing to merge".into()));
    }

    let total_docs: u64 = sources.iter().map(|s| s.num_docs() as u64).sum();
    if total_docs > u32::MAX as u64 {
        return Err(Error::InvalidInput(format!(
            "{total_docs} documents do not fit one segment"
        )));
    }
    let mut docmap = DocMap::with_capacity(total_docs as usize);
    let mut fieldnorms = Vec::with_capacity(total_docs as usize);
    let mut remaps: Vec<Vec<u32>> = Vec::with_capacity(sources.len());
    let mut total_tokens = 0u64;
    for source in sources {
        let source_map = source.load_docmap()?;
        remaps.push(DocMap::build_remap(&source_map, &mut docmap));
        fieldnorms.extend_from_slice(&source.fieldnorm_table()?);
        total_tokens += source.total_tokens();
    }

    let source_terms: Vec<Vec<String>> = sources
        .iter()
        .map(|s| s.terms())
        .collect::<Result<_>>()?;
    let terms: Vec<&str> = source_terms
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut writer = SegmentWriter::new(store, version, target_level, &terms)?;
    if let Err(e) = copy_postings(&mut writer, sources, &source_terms, &terms, &remaps) {
        writer.abandon();
        return Err(e);
    }
    let segment = writer.finish(&fieldnorms, &docmap, total_tokens)?;

    tracing::info!(
        sources = sources.len(),
        docs = total_docs,
        terms = terms.len(),
        level = target_level,
        pages = segment.file.num_pages(),
        "segments merged"
    );
    Ok(segment)
}

fn copy_postings(
    writer: &mut SegmentWriter<'_>,
    sources: &[&SegmentReader],
    source_terms: &[Vec<String>],
    terms: &[&str],
    remaps: &[Vec<u32>],
) -> Result<()> {
    // next dictionary position to compare against, per source
    let mut cursors = vec![0usize; sources.len()];
    for &term in terms {
        writer.new_term()?;
        for (s, source) in sources.iter().enumerate() {
            let ord = cursors[s];
            if source_terms[s].get(ord).map(String::as_str) != Some(term) {
                continue;
            }
            cursors[s] += 1;
            let entry = source.entry_at(ord as u32)?;
            let remap = &remaps[s];
            for posting in source.posting_iterator(&entry)?.postings() {
                let posting = posting?;
                let new_id = *remap.get(posting.doc_id as usize).ok_or_else(|| {
                    Error::corruption(format!("posting for unknown doc {}", posting.doc_id))
                })?;
                writer.write_doc(new_id, posting.freq as u32, posting.fieldnorm)?;
            }
        }
        writer.close_term()?;
    }
    Ok(())
}
