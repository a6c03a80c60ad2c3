#![allow(dead_code)]

use std::sync::Arc;

use bm25_lsm::{Bm25Index, IndexOptions, MemPageStore, RecordLocator, SearchResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub type Doc = (RecordLocator, Vec<(String, u32)>);

pub fn small_options() -> IndexOptions {
    IndexOptions {
        memtable_spill_threshold: 1 << 40,
        segments_per_level: 2,
        max_levels: 4,
        auto_compact: false,
        ..Default::default()
    }
}

pub fn mem_index(options: IndexOptions) -> (MemPageStore, Bm25Index) {
    let store = MemPageStore::new();
    let index = Bm25Index::create(Arc::new(store.clone()), options).unwrap();
    (store, index)
}

pub fn doc(locator: u64, terms: &[(&str, u32)]) -> Doc {
    (
        RecordLocator(locator),
        terms.iter().map(|&(t, tf)| (t.to_string(), tf)).collect(),
    )
}

/// Skewed vocabulary so a few terms are common and long posting lists form.
pub fn random_corpus(n: usize, vocab: usize, seed: u64) -> Vec<Doc> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut locators: Vec<u64> = (0..n as u64).map(|i| i * 7 + 3).collect();
    rand::seq::SliceRandom::shuffle(locators.as_mut_slice(), &mut rng);
    locators
        .into_iter()
        .map(|locator| {
            let len = rng.gen_range(1..20);
            let terms = (0..len)
                .map(|_| {
                    let term = (rng.gen::<f64>().powi(3) * vocab as f64) as usize;
                    let tf = if rng.gen_ratio(1, 10) {
                        rng.gen_range(2..30)
                    } else {
                        1
                    };
                    (format!("t{term}"), tf)
                })
                .collect();
            (RecordLocator(locator), terms)
        })
        .collect()
}

pub fn random_query(rng: &mut StdRng, vocab: usize) -> Vec<String> {
    let len = rng.gen_range(1..5);
    (0..len)
        .map(|_| format!("t{}", (rng.gen::<f64>().powi(2) * vocab as f64) as usize))
        .collect()
}

pub fn insert_all(index: &Bm25Index, docs: &[Doc]) {
    for (locator, terms) in docs {
        index.insert_document(*locator, terms).unwrap();
    }
}

pub fn locators(results: &[SearchResult]) -> Vec<u64> {
    results.iter().map(|r| r.locator.0).collect()
}

pub fn assert_ranked(results: &[SearchResult]) {
    for pair in results.windows(2) {
        assert!(
            pair[0].score > pair[1].score
                || (pair[0].score == pair[1].score && pair[0].locator < pair[1].locator),
            "{pair:?} out of order"
        );
    }
}

/// Pages in use: allocated and not on the free list.
pub fn used_pages(store: &MemPageStore) -> usize {
    use bm25_lsm::PageStore;
    store.num_pages() as usize - store.free_count()
}
