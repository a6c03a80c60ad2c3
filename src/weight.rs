use crate::segment::field_norm::id_to_fieldnorm;

#[derive(Clone, Copy, Debug)]
pub struct Bm25Weight {
    weight: f32, // idf * (1 + k1) * query term count
    k1: f32,
    b: f32,
    avgdl: f32,
}

impl Bm25Weight {
    pub fn with_params(count: u32, idf: f32, avgdl: f32, k1: f32, b: f32) -> Self {
        let weight = count as f32 * idf * (1.0 + k1);
        Self {
            weight,
            k1,
            b,
            avgdl,
        }
    }

    #[inline]
    pub fn score(&self, len: u32, tf: u32) -> f32 {
        let len = len as f32;
        let tf = tf as f32;
        self.weight * tf / (tf + self.k1 * (1.0 - self.b + self.b * len / self.avgdl))
    }

    /// Score with the document length taken from an encoded fieldnorm byte.
    #[inline]
    pub fn score_fieldnorm(&self, fieldnorm_id: u8, tf: u32) -> f32 {
        self.score(id_to_fieldnorm(fieldnorm_id), tf)
    }
}

// ln { 1 + (N - n(q) + 0.5) / (n(q) + 0.5) }
#[inline]
pub fn idf(doc_cnt: u64, doc_freq: u64) -> f32 {
    debug_assert!(doc_cnt >= doc_freq);
    let doc_freq = doc_freq as f64;
    let ratio = (doc_cnt as f64 - doc_freq + 0.5) / (doc_freq + 0.5);
    (1.0 + ratio).ln() as f32
}
