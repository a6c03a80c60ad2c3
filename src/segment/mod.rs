pub mod docmap;
pub mod field_norm;
pub mod format;
pub mod merge;
pub mod meta;
pub mod posting;
pub mod reader;
pub mod writer;

pub use docmap::{DocMap, RecordLocator};
pub use format::{SEGMENT_VERSION_CURRENT, SEGMENT_VERSION_V1, SEGMENT_VERSION_V2};
pub use merge::merge_segments;
pub use reader::SegmentReader;
pub use writer::{InvertedSerialize, SegmentFile, SegmentWriter};
