mod common;

use std::sync::atomic::AtomicBool;

use bm25_lsm::algorithm::select_top_k;
use bm25_lsm::{Error, IndexOptions, RecordLocator, SearchRequest};
use common::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn small_exact_index() {
    let (_, index) = mem_index(small_options());
    let docs = [
        doc(1, &[("alpha", 3)]),
        doc(2, &[("alpha", 1), ("beta", 1)]),
        doc(3, &[("beta", 2)]),
        doc(4, &[("alpha", 2), ("beta", 4)]),
        doc(5, &[("beta", 1)]),
    ];
    insert_all(&index, &docs);
    index.flush().unwrap();
    assert_eq!(index.stats().segments_per_level[0], 1);
    assert_eq!(index.stats().memtable_docs, 0);

    let results = index.search(&["alpha"], 5).unwrap();
    assert_eq!(locators(&results), vec![1, 2, 4]);
    assert!(results[0].score > results[1].score);
    assert!(results[1].score > results[2].score);
    assert_eq!(index.search_exhaustive(&["alpha"], 5).unwrap(), results);
}

#[test]
fn memtable_and_segment_scores_agree() {
    let (_, index) = mem_index(small_options());
    insert_all(&index, &random_corpus(500, 50, 11));
    let query = ["t0", "t3", "t9"];
    let before = index.search(&query, 20).unwrap();
    assert_eq!(index.search_exhaustive(&query, 20).unwrap(), before);
    index.flush().unwrap();
    assert_eq!(index.search(&query, 20).unwrap(), before);
}

#[test]
fn skip_defeat_regression() {
    let (_, index) = mem_index(small_options());
    // first block: short documents with a high term frequency
    for locator in 0..128u64 {
        index
            .insert_document(RecordLocator(locator), &[("x", 10)])
            .unwrap();
    }
    // two more blocks of long documents that mention x once
    for locator in 128..384u64 {
        index
            .insert_document(RecordLocator(locator), &[("x", 1), ("filler", 200)])
            .unwrap();
    }
    index.flush().unwrap();

    let terms = ["x"];
    let (results, stats) = index.search_with(&SearchRequest::new(&terms, 10)).unwrap();
    assert_eq!(locators(&results), (0..10).collect::<Vec<_>>());
    assert_eq!(stats.blocks_decoded, 1);
    assert_eq!(stats.blocks_skipped, 2);
    assert_eq!(stats.docs_scored, 128);

    let (exhaustive, stats) = index
        .search_with(&SearchRequest::new(&terms, 10).exhaustive(true))
        .unwrap();
    assert_eq!(exhaustive, results);
    assert_eq!(stats.blocks_decoded, 3);
}

#[test]
fn multi_term_skips_blocks() {
    let (_, index) = mem_index(small_options());
    for locator in 0..2000u64 {
        let tf = if locator < 20 { 40 } else { 1 };
        index
            .insert_document(
                RecordLocator(locator),
                &[("a", tf), ("b", tf), ("pad", 1 + (locator % 50) as u32)],
            )
            .unwrap();
    }
    index.flush().unwrap();

    let terms = ["a", "b"];
    let (results, stats) = index.search_with(&SearchRequest::new(&terms, 5)).unwrap();
    assert_eq!(locators(&results), vec![0, 1, 2, 3, 4]);
    assert!(stats.blocks_skipped > 0, "{stats:?}");
    assert!(stats.docs_scored < 2000, "{stats:?}");
    assert_eq!(index.search_exhaustive(&terms, 5).unwrap(), results);
}

#[test]
fn block_max_wand_matches_exhaustive() {
    let options = IndexOptions {
        memtable_spill_threshold: 3000,
        ..small_options()
    };
    let (_, index) = mem_index(options);
    let vocab = 120;
    insert_all(&index, &random_corpus(6000, vocab, 42));
    insert_all(&index, &[doc(1 << 40, &[("t0", 3), ("t1", 1)])]);
    let stats = index.stats();
    assert!(stats.segments_per_level[0] > 1, "{stats:?}");
    assert!(stats.memtable_docs > 0, "{stats:?}");

    let mut rng = StdRng::seed_from_u64(7);
    for phase in 0..2 {
        if phase == 1 {
            assert!(index.compact().unwrap() > 0);
        }
        for round in 0..100 {
            let query = random_query(&mut rng, vocab);
            for k in [1, 3, 10, 57] {
                let pruned = index.search(&query, k).unwrap();
                let exact = index.search_exhaustive(&query, k).unwrap();
                assert_eq!(pruned, exact, "phase {phase} round {round} query {query:?} k {k}");
                assert!(pruned.len() <= k);
                assert_ranked(&pruned);
            }
        }
    }
}

#[test]
fn ties_break_on_locator() {
    let (_, index) = mem_index(small_options());
    let mut locators_in: Vec<u64> = (0..300).map(|i| (i * 37) % 1000).collect();
    locators_in.reverse();
    for (i, &locator) in locators_in.iter().enumerate() {
        index
            .insert_document(RecordLocator(locator), &[("same", 2), ("other", 1)])
            .unwrap();
        if i == 150 {
            index.flush().unwrap();
        }
    }
    let mut expected = locators_in.clone();
    expected.sort_unstable();
    expected.truncate(25);

    let first = index.search(&["same"], 25).unwrap();
    assert_eq!(locators(&first), expected);
    assert!(first.iter().all(|r| r.score == first[0].score));
    for _ in 0..3 {
        assert_eq!(index.search(&["same"], 25).unwrap(), first);
        assert_eq!(index.search_exhaustive(&["same"], 25).unwrap(), first);
    }
}

#[test]
fn top_k_is_idempotent_on_results() {
    let (_, index) = mem_index(small_options());
    insert_all(&index, &random_corpus(800, 40, 3));
    index.flush().unwrap();
    let results = index.search(&["t0", "t1"], 30).unwrap();
    let mut candidates: Vec<_> = results.iter().map(|r| (r.score, r.locator)).collect();
    let before = candidates.clone();
    assert_eq!(select_top_k(&mut candidates, 30), before.len());
    assert_eq!(candidates, before);
}

#[test]
fn repeated_query_terms_weigh_more() {
    let (_, index) = mem_index(small_options());
    insert_all(
        &index,
        &[
            doc(1, &[("apple", 1), ("pear", 3)]),
            doc(2, &[("apple", 3), ("pear", 1)]),
            doc(3, &[("kiwi", 1)]),
        ],
    );
    let once = index.search(&["apple", "pear"], 2).unwrap();
    assert_eq!(once[0].score, once[1].score);
    assert_eq!(locators(&once), vec![1, 2]);
    let twice = index.search(&["apple", "pear", "apple"], 2).unwrap();
    assert_eq!(locators(&twice), vec![2, 1]);
}

#[test]
fn edge_cases() {
    let (_, index) = mem_index(small_options());
    assert!(index.search(&["nothing"], 10).unwrap().is_empty());
    insert_all(&index, &[doc(1, &[("a", 1)]), doc(2, &[("b", 1)])]);
    assert!(matches!(
        index.search(&["a"], 0),
        Err(Error::InvalidInput(_))
    ));
    assert!(index.search::<&str>(&[], 10).unwrap().is_empty());
    assert!(index.search(&["missing"], 10).unwrap().is_empty());
    assert_eq!(locators(&index.search(&["a", "b"], 100).unwrap()), vec![1, 2]);
    assert_eq!(index.search(&["a"], usize::MAX).unwrap().len(), 1);
}

#[test]
fn cancelled_query_returns_error() {
    let (_, index) = mem_index(small_options());
    insert_all(&index, &random_corpus(300, 20, 5));
    index.flush().unwrap();
    insert_all(&index, &[doc(100_000, &[("t0", 1)])]);

    let cancel = AtomicBool::new(true);
    let terms = ["t0", "t1"];
    for exhaustive in [false, true] {
        let request = SearchRequest::new(&terms, 10)
            .exhaustive(exhaustive)
            .with_cancel(&cancel);
        assert!(matches!(index.search_with(&request), Err(Error::Cancelled)));
    }
    // the index stays usable
    assert!(!index.search(&terms, 10).unwrap().is_empty());
}

#[test]
fn text_round_trip() {
    let (_, index) = mem_index(small_options());
    index
        .insert_text(RecordLocator(1), "The quick brown fox jumps over the lazy dog")
        .unwrap();
    index
        .insert_text(RecordLocator(2), "Foxes are quick; foxes are clever.")
        .unwrap();
    index
        .insert_text(RecordLocator(3), "A dog's life is a lazy life")
        .unwrap();
    index.flush().unwrap();

    assert_eq!(locators(&index.search_text("foxes", 10).unwrap()), vec![2, 1]);
    let dogs = index.search_text("lazy dogs", 10).unwrap();
    assert_eq!(dogs.len(), 2);
    assert!(index.search_text("the of and", 10).unwrap().is_empty());
}
