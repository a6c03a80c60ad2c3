use std::cmp::Ordering;

use crate::segment::docmap::RecordLocator;

/// Result order: higher score first, then smaller locator.
#[inline]
pub fn rank_order(a: &(f32, RecordLocator), b: &(f32, RecordLocator)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

// Store 2*k elements in a buffer, and truncate to k elements when the buffer is full.
// Using variant of median selection from quicksort.
pub struct TopKComputer {
    buffer: Box<[(f32, RecordLocator)]>,
    len: usize,
    k: usize,
    threshold: f32,
}

impl TopKComputer {
    pub fn new(k: usize) -> Self {
        assert!(k > 0);
        Self {
            buffer: vec![(0.0, RecordLocator::default()); k * 2].into_boxed_slice(),
            len: 0,
            k,
            threshold: f32::MIN,
        }
    }

    /// Scores equal to the threshold are kept: they may still win on locator.
    pub fn push(&mut self, score: f32, locator: RecordLocator) {
        if score < self.threshold {
            return;
        }
        if self.buffer.len() == self.len {
            let boundary = self.truncate_top_k();
            self.threshold = boundary;
            if score < self.threshold {
                return;
            }
        }
        self.buffer[self.len] = (score, locator);
        self.len += 1;
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.len.min(self.k)
    }

    // Return top-k elements, best first.
    pub fn to_sorted_slice(&mut self) -> &[(f32, RecordLocator)] {
        if self.len > self.k {
            self.truncate_top_k();
        }
        self.buffer[..self.len].sort_by(rank_order);
        &self.buffer[..self.len]
    }

    fn truncate_top_k(&mut self) -> f32 {
        let (_, boundary, _) = self.buffer[..self.len].select_nth_unstable_by(self.k, rank_order);
        let score = boundary.0;
        self.len = self.k;
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topk_computer() {
        let mut topk = TopKComputer::new(20);
        let mut reference = Vec::new();

        for _ in 0..100000 {
            // coarse scores so that ties are common
            let score = (rand::random::<u8>() % 32) as f32;
            let locator = RecordLocator(rand::random::<u64>());
            topk.push(score, locator);
            reference.push((score, locator));
        }

        reference.sort_by(rank_order);
        reference.truncate(20);
        assert_eq!(topk.to_sorted_slice(), reference.as_slice());
    }

    #[test]
    fn test_threshold_tracks_kth_best() {
        let mut topk = TopKComputer::new(2);
        assert_eq!(topk.threshold(), f32::MIN);
        for (score, locator) in [(1.0, 5), (3.0, 1), (2.0, 2), (2.0, 9)] {
            topk.push(score, RecordLocator(locator));
        }
        topk.push(2.0, RecordLocator(1));
        assert_eq!(topk.threshold(), 2.0);
        topk.push(1.5, RecordLocator(0));
        let result: Vec<_> = topk.to_sorted_slice().iter().map(|r| r.1 .0).collect();
        assert_eq!(result, vec![1, 1]);
    }
}
