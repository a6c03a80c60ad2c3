pub mod block_wand;
pub mod top_k;

pub use block_wand::{block_wand, block_wand_single, ScanStats, SegmentScorer};
pub use top_k::select_top_k;
