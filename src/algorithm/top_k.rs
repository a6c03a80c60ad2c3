use std::cmp::Ordering;

use crate::segment::docmap::RecordLocator;
use crate::utils::topk_computer::rank_order;

const INSERTION_SORT_THRESHOLD: usize = 16;

/// Reorders `items` so its first `min(k, len)` entries are the best ones in
/// result order (score descending, locator ascending) and returns that count.
///
/// Quick-select only descends into the side holding the k-th boundary, then
/// the retained prefix is sorted: O(n + k log k).
pub fn select_top_k(items: &mut [(f32, RecordLocator)], k: usize) -> usize {
    let k = k.min(items.len());
    if k == 0 {
        return 0;
    }
    if k < items.len() {
        select(items, k);
    }
    sort(&mut items[..k]);
    k
}

/// Moves the `k` best items in front of the rest, in no particular order.
fn select(items: &mut [(f32, RecordLocator)], k: usize) {
    let (mut lo, mut hi) = (0, items.len());
    while hi - lo > INSERTION_SORT_THRESHOLD {
        let pivot = lo + partition(&mut items[lo..hi]);
        match pivot.cmp(&k) {
            Ordering::Equal => return,
            Ordering::Less if pivot + 1 == k => return,
            Ordering::Less => lo = pivot + 1,
            Ordering::Greater => hi = pivot,
        }
    }
    insertion_sort(&mut items[lo..hi]);
}

fn sort(items: &mut [(f32, RecordLocator)]) {
    if items.len() <= INSERTION_SORT_THRESHOLD {
        insertion_sort(items);
    } else {
        items.sort_unstable_by(rank_order);
    }
}

fn insertion_sort(items: &mut [(f32, RecordLocator)]) {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && rank_order(&items[j], &items[j - 1]) == Ordering::Less {
            items.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Median-of-three pivot, Lomuto partition. Returns the pivot's final index.
fn partition(items: &mut [(f32, RecordLocator)]) -> usize {
    let last = items.len() - 1;
    let mid = last / 2;
    if rank_order(&items[mid], &items[0]) == Ordering::Less {
        items.swap(mid, 0);
    }
    if rank_order(&items[last], &items[0]) == Ordering::Less {
        items.swap(last, 0);
    }
    if rank_order(&items[last], &items[mid]) == Ordering::Less {
        items.swap(last, mid);
    }
    // median now sits at `mid`
    items.swap(mid, last);

    let pivot = items[last];
    let mut store = 0;
    for i in 0..last {
        if rank_order(&items[i], &pivot) == Ordering::Less {
            items.swap(i, store);
            store += 1;
        }
    }
    items.swap(store, last);
    store
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    fn random_candidates(n: usize) -> Vec<(f32, RecordLocator)> {
        let mut rng = rand::thread_rng();
        let mut locators: Vec<u64> = (0..n as u64).collect();
        rand::seq::SliceRandom::shuffle(locators.as_mut_slice(), &mut rng);
        locators
            .into_iter()
            .map(|l| ((rng.gen_range(0..50) as f32) * 0.5, RecordLocator(l)))
            .collect()
    }

    #[test]
    fn test_matches_full_sort() {
        for n in [0usize, 1, 5, 16, 17, 100, 1000, 5000] {
            for k in [1usize, 3, 10, 16, 50, 2000, 10000] {
                let mut items = random_candidates(n);
                let mut reference = items.clone();
                reference.sort_by(rank_order);
                reference.truncate(k);

                let kept = select_top_k(&mut items, k);
                assert_eq!(kept, k.min(n));
                assert_eq!(&items[..kept], reference.as_slice(), "n={n} k={k}");
            }
        }
    }

    #[test]
    fn test_zero_k() {
        let mut items = random_candidates(10);
        assert_eq!(select_top_k(&mut items, 0), 0);
    }

    #[test]
    fn test_ties_break_on_locator() {
        let mut items: Vec<_> = [9u64, 3, 7, 1, 5]
            .into_iter()
            .map(|l| (1.0, RecordLocator(l)))
            .collect();
        let kept = select_top_k(&mut items, 3);
        let locators: Vec<_> = items[..kept].iter().map(|r| r.1 .0).collect();
        assert_eq!(locators, vec![1, 3, 5]);
    }

    #[test]
    fn test_idempotent_on_sorted_prefix() {
        let mut items = random_candidates(3000);
        let kept = select_top_k(&mut items, 100);
        let first: Vec<_> = items[..kept].to_vec();
        let mut again = first.clone();
        assert_eq!(select_top_k(&mut again, 100), 100);
        assert_eq!(again, first);
    }
}
