//! Embedded BM25 inverted index organised as a log-structured merge tree.
//!
//! Documents are buffered in a [`memtable::Memtable`], spilled into immutable
//! segments on a [`page::PageStore`], merged level by level, and searched with
//! Block-Max WAND through [`Bm25Index`].

#![allow(clippy::len_without_is_empty)]

pub mod algorithm;
pub mod error;
pub mod index;
pub mod memtable;
pub mod options;
pub mod page;
pub mod segment;
pub mod token;
pub mod utils;
pub mod weight;

#[cfg(not(target_endian = "little"))]
compile_error!("Target is not supported.");

pub use error::{Error, Result};
pub use index::{Bm25Index, IndexStats, SearchRequest, SearchResult, SearchStats};
pub use options::IndexOptions;
pub use page::{FilePageStore, MemPageStore, PageStore};
pub use segment::RecordLocator;
