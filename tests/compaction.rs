mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use bm25_lsm::memtable::Memtable;
use bm25_lsm::segment::meta::{MetaPageData, SegmentEntry, MAX_SEGMENTS};
use bm25_lsm::segment::{SegmentReader, SEGMENT_VERSION_V1};
use bm25_lsm::{Bm25Index, Error, IndexOptions, MemPageStore, PageStore, RecordLocator};
use common::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn merge_reclaims_source_pages() {
    let (store, index) = mem_index(small_options());
    for batch in 0..2u64 {
        for i in 0..10u64 {
            let locator = batch * 100 + i;
            index
                .insert_document(
                    RecordLocator(locator),
                    &[("shared", 1 + (i % 3) as u32), (format!("b{batch}").as_str(), 1)],
                )
                .unwrap();
        }
        index.flush().unwrap();
    }
    assert_eq!(index.stats().segments_per_level[0], 2);
    let before = used_pages(&store);

    assert_eq!(index.compact().unwrap(), 1);
    let stats = index.stats();
    assert_eq!(stats.segments_per_level[0], 0);
    assert_eq!(stats.segments_per_level[1], 1);
    assert_eq!(stats.num_docs, 20);
    assert!(used_pages(&store) <= before);
    assert_eq!(index.search(&["shared"], 100).unwrap().len(), 20);
}

#[test]
fn failed_merge_keeps_last_good_state() {
    let base = MemPageStore::new();
    {
        let index = Bm25Index::create(Arc::new(base.clone()), small_options()).unwrap();
        for chunk in random_corpus(3000, 40, 21).chunks(1500) {
            insert_all(&index, chunk);
            index.flush().unwrap();
        }
    }
    assert_eq!(base.free_count(), 0);
    let published_pages = used_pages(&base);

    // one spare page, far less than the merged segment needs
    let limited = base.limited(Some(base.num_pages() + 1));
    let index = Bm25Index::open(Arc::new(limited), small_options()).unwrap();
    let before = index.stats();
    assert_eq!(before.segments_per_level[0], 2);
    let mut rng = StdRng::seed_from_u64(8);
    let queries: Vec<Vec<String>> = (0..15).map(|_| random_query(&mut rng, 40)).collect();
    let expected: Vec<_> = queries
        .iter()
        .map(|q| index.search(q, 10).unwrap())
        .collect();

    assert!(matches!(index.compact(), Err(Error::PageStore(_))));
    assert!(matches!(index.force_merge(), Err(Error::PageStore(_))));
    assert_eq!(index.stats(), before);
    assert_eq!(used_pages(&base), published_pages);
    for (query, expected) in queries.iter().zip(&expected) {
        assert_eq!(&index.search(query, 10).unwrap(), expected);
    }
    drop(index);

    // with room to grow the same merge goes through
    let index = Bm25Index::open(Arc::new(base.clone()), small_options()).unwrap();
    assert_eq!(index.compact().unwrap(), 1);
    assert_eq!(index.stats().num_docs, 3000);
}

#[test]
fn flush_compacts_when_metadata_is_full() {
    let (_, index) = mem_index(small_options());
    for i in 0..=MAX_SEGMENTS as u64 {
        let parity = if i % 2 == 0 { "even" } else { "odd" };
        index
            .insert_document(RecordLocator(i), &[("every", 1), (parity, 1)])
            .unwrap();
        index.flush().unwrap();
        if i + 1 == MAX_SEGMENTS as u64 {
            let stats = index.stats();
            assert_eq!(stats.segments_per_level[0], MAX_SEGMENTS);
        }
    }
    let stats = index.stats();
    assert_eq!(stats.num_docs, MAX_SEGMENTS as u64 + 1);
    assert!(stats.segments_per_level.iter().sum::<usize>() <= 5, "{stats:?}");
    assert_eq!(
        index.search(&["every"], 1000).unwrap().len(),
        MAX_SEGMENTS + 1
    );
    assert_eq!(
        index.search(&["odd"], 1000).unwrap().len(),
        (MAX_SEGMENTS + 1) / 2
    );
}

#[test]
fn freed_pages_are_reused() {
    let (store, index) = mem_index(small_options());
    let docs = random_corpus(400, 30, 9);
    for chunk in docs.chunks(100) {
        insert_all(&index, chunk);
        index.flush().unwrap();
    }
    index.force_merge().unwrap();
    assert!(store.free_count() > 0);
    let high_water = store.num_pages();

    insert_all(&index, &random_corpus(50, 30, 10)[..10]);
    index.flush().unwrap();
    assert_eq!(store.num_pages(), high_water);
}

#[test]
fn queries_run_during_compaction() {
    let (store, index) = mem_index(small_options());
    insert_all(&index, &[doc(1, &[("a", 1)])]);
    index.flush().unwrap();
    insert_all(&index, &[doc(2, &[("a", 2)])]);
    index.flush().unwrap();

    let free_before = store.free_count();
    let results: Vec<_> = std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            (0..50)
                .map(|_| index.search(&["a"], 10).unwrap().len())
                .collect::<Vec<_>>()
        });
        index.compact().unwrap();
        reader.join().unwrap()
    });
    assert!(results.iter().all(|&n| n == 2));
    assert!(store.free_count() > free_before);
}

#[test]
fn merge_preserves_results_and_scores() {
    let (_, index) = mem_index(small_options());
    let vocab = 60;
    let docs = random_corpus(1500, vocab, 21);
    for chunk in docs.chunks(300) {
        insert_all(&index, chunk);
        index.flush().unwrap();
    }
    let mut rng = StdRng::seed_from_u64(99);
    let queries: Vec<Vec<String>> = (0..40).map(|_| random_query(&mut rng, vocab)).collect();
    let before: Vec<_> = queries
        .iter()
        .map(|q| index.search_exhaustive(q, 1500).unwrap())
        .collect();

    assert!(index.compact().unwrap() > 0);
    for (query, expected) in queries.iter().zip(&before) {
        assert_eq!(&index.search_exhaustive(query, 1500).unwrap(), expected);
        assert_eq!(&index.search(query, 15).unwrap()[..], &expected[..expected.len().min(15)]);
    }

    index.force_merge().unwrap();
    let stats = index.stats();
    assert_eq!(stats.segments_per_level.iter().sum::<usize>(), 1);
    for (query, expected) in queries.iter().zip(&before) {
        assert_eq!(&index.search_exhaustive(query, 1500).unwrap(), expected);
    }
}

#[test]
fn score_of_a_document_is_stable_across_levels() {
    let (_, index) = mem_index(small_options());
    insert_all(&index, &random_corpus(200, 20, 4));
    index
        .insert_document(RecordLocator(u64::MAX), &[("needle", 2), ("t1", 1)])
        .unwrap();
    let score_of = |index: &Bm25Index| {
        let results = index.search(&["needle", "t1"], 500).unwrap();
        results
            .iter()
            .find(|r| r.locator == RecordLocator(u64::MAX))
            .map(|r| r.score)
            .unwrap()
    };

    let in_memtable = score_of(&index);
    index.flush().unwrap();
    let in_l0 = score_of(&index);
    index
        .insert_document(RecordLocator(u64::MAX - 1), &[("unrelated", 1)])
        .unwrap();
    index.flush().unwrap();
    let before_merge = score_of(&index);
    index.compact().unwrap();
    let after_merge = score_of(&index);

    assert_eq!(in_memtable, in_l0);
    assert_eq!(before_merge, after_merge);
}

#[test]
fn auto_compaction_bounds_every_level() {
    let options = IndexOptions {
        memtable_spill_threshold: 500,
        segments_per_level: 3,
        max_levels: 3,
        auto_compact: true,
        ..Default::default()
    };
    let (_, index) = mem_index(options);
    let docs = random_corpus(4000, 80, 77);
    insert_all(&index, &docs);
    let stats = index.stats();
    assert!(stats.generation > 0);
    assert!(stats.segments_per_level.iter().all(|&n| n < 3), "{stats:?}");
    assert_eq!(stats.num_docs, 4000);
    let total: usize = stats.segments_per_level.iter().sum();
    assert!(total >= 1);
}

/// A segment written in the previous format is still served and is
/// rewritten in the current format by the next merge.
#[test]
fn legacy_segments_are_readable_and_upgraded() {
    let store = MemPageStore::new();
    let shared: Arc<dyn PageStore> = Arc::new(store.clone());
    let index = Bm25Index::create(shared.clone(), small_options()).unwrap();
    drop(index);

    let mut memtable = Memtable::new(u64::MAX);
    let mut expected = BTreeMap::new();
    for locator in 0..300u64 {
        let tf = (locator % 5 + 1) as u32;
        memtable
            .insert_document(RecordLocator(locator), &[("old", tf), ("pad", 3)])
            .unwrap();
        expected.insert(locator, tf);
    }
    let file = memtable
        .write_segment(shared.as_ref(), SEGMENT_VERSION_V1)
        .unwrap();
    let mut meta = MetaPageData::read(shared.as_ref()).unwrap();
    meta.segments
        .push(SegmentEntry::new(0, file.root(), memtable.num_docs()));
    meta.generation += 1;
    meta.write(shared.as_ref()).unwrap();

    let index = Bm25Index::open(shared.clone(), small_options()).unwrap();
    let legacy = index.search(&["old"], 10).unwrap();
    assert_eq!(legacy.len(), 10);
    assert!(legacy.iter().all(|r| expected[&r.locator.0] == 5));

    insert_all(&index, &[doc(10_000, &[("old", 1)])]);
    index.flush().unwrap();
    index.compact().unwrap();
    let meta = MetaPageData::read(shared.as_ref()).unwrap();
    assert_eq!(meta.segments.len(), 1);
    let merged = SegmentReader::open(shared.clone(), meta.segments[0].root, 100_000).unwrap();
    assert_eq!(merged.version(), bm25_lsm::segment::SEGMENT_VERSION_CURRENT);
    assert_eq!(merged.num_docs(), 301);
    assert_eq!(locators(&index.search(&["old"], 10).unwrap()), locators(&legacy));
}
