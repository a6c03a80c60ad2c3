use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};
use crate::page::{
    bm25_page_size, page_data, page_opaque, page_read, page_write, PageData, PageFlags, PageId,
    PageStore,
};

pub const META_PAGE: PageId = 0;
pub const META_MAGIC: u32 = 0x4154_4D42; // "BMTA"
pub const META_VERSION: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
struct MetaHeader {
    magic: u32,
    version: u32,
    generation: u64,
    memtable_spill_threshold: u64,
    segments_per_level: u32,
    max_levels: u32,
    segment_count: u32,
    reserved: u32,
}

unsafe impl Zeroable for MetaHeader {}
unsafe impl Pod for MetaHeader {}

/// One visible segment as recorded in the metadata root.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentEntry {
    pub level: u32,
    pub root: PageId,
    pub num_docs: u32,
    reserved: u32,
}

unsafe impl Zeroable for SegmentEntry {}
unsafe impl Pod for SegmentEntry {}

impl SegmentEntry {
    pub fn new(level: u32, root: PageId, num_docs: u32) -> Self {
        Self {
            level,
            root,
            num_docs,
            reserved: 0,
        }
    }
}

pub const MAX_SEGMENTS: usize = (bm25_page_size() - std::mem::size_of::<MetaHeader>())
    / std::mem::size_of::<SegmentEntry>();

/// The metadata root: the only record deciding which segments are visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaPageData {
    pub generation: u64,
    pub memtable_spill_threshold: u64,
    pub segments_per_level: u32,
    pub max_levels: u32,
    /// Ordered by level, then oldest first within a level.
    pub segments: Vec<SegmentEntry>,
}

impl MetaPageData {
    pub fn encode(&self) -> Result<PageData> {
        if self.segments.len() > MAX_SEGMENTS {
            return Err(Error::PageStore(format!(
                "{} segments exceed the metadata page capacity of {MAX_SEGMENTS}",
                self.segments.len()
            )));
        }
        let header = MetaHeader {
            magic: META_MAGIC,
            version: META_VERSION,
            generation: self.generation,
            memtable_spill_threshold: self.memtable_spill_threshold,
            segments_per_level: self.segments_per_level,
            max_levels: self.max_levels,
            segment_count: self.segments.len() as u32,
            reserved: 0,
        };
        let mut page = PageData::init(PageFlags::META);
        page.append(bytemuck::bytes_of(&header));
        page.append(bytemuck::cast_slice(&self.segments));
        Ok(page)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let opaque = page_opaque(bytes)?;
        if !opaque.flags().contains(PageFlags::META) {
            return Err(Error::corruption("page 0 is not a metadata page"));
        }
        let data = page_data(bytes)?;
        let header_size = std::mem::size_of::<MetaHeader>();
        if data.len() < header_size {
            return Err(Error::corruption("metadata page is truncated"));
        }
        let header: MetaHeader = bytemuck::pod_read_unaligned(&data[..header_size]);
        if header.magic != META_MAGIC {
            return Err(Error::corruption(format!(
                "bad metadata magic {:#010x}",
                header.magic
            )));
        }
        if header.version != META_VERSION {
            return Err(Error::UnsupportedVersion {
                found: header.version,
                supported: META_VERSION,
            });
        }
        let entry_size = std::mem::size_of::<SegmentEntry>();
        let count = header.segment_count as usize;
        if data.len() != header_size + count * entry_size {
            return Err(Error::corruption("metadata segment list is truncated"));
        }
        let segments = data[header_size..]
            .chunks_exact(entry_size)
            .map(bytemuck::pod_read_unaligned::<SegmentEntry>)
            .collect();
        Ok(Self {
            generation: header.generation,
            memtable_spill_threshold: header.memtable_spill_threshold,
            segments_per_level: header.segments_per_level,
            max_levels: header.max_levels,
            segments,
        })
    }

    pub fn read(store: &dyn PageStore) -> Result<Self> {
        Self::decode(&page_read(store, META_PAGE)?)
    }

    /// Publishes the metadata and syncs it.
    pub fn write(&self, store: &dyn PageStore) -> Result<()> {
        self.write_unsynced(store)?;
        store.sync()
    }

    /// Syncs everything the metadata references, then overwrites the metadata
    /// page. Once this returns `Ok` storage may hold the new root even if a
    /// later sync fails.
    pub fn write_unsynced(&self, store: &dyn PageStore) -> Result<()> {
        let page = self.encode()?;
        store.sync()?;
        page_write(store, META_PAGE, &page)
    }
}
