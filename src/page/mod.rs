mod file;
mod memory;
mod r#virtual;

use std::sync::Arc;

pub use file::FilePageStore;
pub use memory::MemPageStore;
pub use r#virtual::{VirtualFile, VirtualPageReader, VirtualPageWriter};

use crate::error::{Error, Result};

pub type PageId = u32;

pub const INVALID_PAGE: PageId = u32::MAX;
pub const PAGE_SIZE: usize = 8192;
pub const PAGE_HEADER_SIZE: usize = std::mem::size_of::<PageOpaqueData>();
pub const BM25_PAGE_ID: u16 = 0xBF25;

const _: () = {
    assert!(PAGE_HEADER_SIZE == 16);
    assert!(PAGE_SIZE % 8 == 0);
};

pub const fn bm25_page_size() -> usize {
    PAGE_SIZE - PAGE_HEADER_SIZE
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u16 {
        const META = 1 << 0;
        const SEGMENT = 1 << 1;
        const PAGE_INDEX = 1 << 2;
        const FREE = 1 << 3;
    }
}

/// Fixed-size storage with random access. The engine never reads a page while
/// it is being written: segment pages are immutable once published, and the
/// metadata page is only read at open.
pub trait PageStore: Send + Sync {
    fn allocate_page(&self) -> Result<PageId>;
    fn read_page(&self, id: PageId) -> Result<Arc<[u8]>>;
    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()>;
    /// Returns the page to the store; later allocations reuse it before growing.
    fn free_page(&self, id: PageId) -> Result<()>;
    fn is_free(&self, id: PageId) -> bool;
    fn num_pages(&self) -> u32;
    /// Makes every completed write durable.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Control header at the start of every engine page.
#[repr(C, align(4))]
#[derive(Debug, Clone, Copy)]
pub struct PageOpaqueData {
    pub magic: u16,
    flags: u16,
    pub next: PageId,
    pub lower: u16,
    reserved: [u8; 6],
}

unsafe impl bytemuck::Zeroable for PageOpaqueData {}
unsafe impl bytemuck::Pod for PageOpaqueData {}

impl PageOpaqueData {
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_retain(self.flags)
    }
}

/// Reads and validates the control header of a raw page.
pub fn page_opaque(bytes: &[u8]) -> Result<PageOpaqueData> {
    if bytes.len() != PAGE_SIZE {
        return Err(Error::corruption(format!(
            "page has {} bytes, expected {PAGE_SIZE}",
            bytes.len()
        )));
    }
    let opaque: PageOpaqueData = bytemuck::pod_read_unaligned(&bytes[..PAGE_HEADER_SIZE]);
    if opaque.magic != BM25_PAGE_ID {
        return Err(Error::corruption(format!(
            "bad page magic {:#06x}",
            opaque.magic
        )));
    }
    if opaque.lower as usize > bm25_page_size() {
        return Err(Error::corruption(format!(
            "page fill {} exceeds data area",
            opaque.lower
        )));
    }
    Ok(opaque)
}

/// A page being built in memory before it is handed to the store.
pub struct PageData {
    bytes: Box<[u8]>,
}

impl PageData {
    pub fn init(flags: PageFlags) -> Self {
        let mut bytes = vec![0u8; PAGE_SIZE].into_boxed_slice();
        let opaque = PageOpaqueData {
            magic: BM25_PAGE_ID,
            flags: flags.bits(),
            next: INVALID_PAGE,
            lower: 0,
            reserved: [0; 6],
        };
        bytes[..PAGE_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&opaque));
        Self { bytes }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        page_opaque(bytes)?;
        Ok(Self {
            bytes: bytes.to_vec().into_boxed_slice(),
        })
    }

    pub fn opaque(&self) -> PageOpaqueData {
        bytemuck::pod_read_unaligned(&self.bytes[..PAGE_HEADER_SIZE])
    }

    fn update_opaque(&mut self, f: impl FnOnce(&mut PageOpaqueData)) {
        let mut opaque = self.opaque();
        f(&mut opaque);
        self.bytes[..PAGE_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&opaque));
    }

    pub fn set_next(&mut self, next: PageId) {
        self.update_opaque(|o| o.next = next);
    }

    pub fn set_lower(&mut self, lower: usize) {
        debug_assert!(lower <= bm25_page_size());
        self.update_opaque(|o| o.lower = lower as u16);
    }

    pub fn lower(&self) -> usize {
        self.opaque().lower as usize
    }

    /// Bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.bytes[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + self.lower()]
    }

    /// The whole data area, excluding the control header.
    pub fn content_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[PAGE_HEADER_SIZE..]
    }

    pub fn freespace_mut(&mut self) -> &mut [u8] {
        let lower = self.lower();
        &mut self.bytes[PAGE_HEADER_SIZE + lower..]
    }

    /// Appends as much of `data` as fits and returns the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let space = self.freespace_mut();
        let len = space.len().min(data.len());
        space[..len].copy_from_slice(&data[..len]);
        let lower = self.lower() + len;
        self.set_lower(lower);
        len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// The used data area of a raw page.
pub fn page_data(bytes: &[u8]) -> Result<&[u8]> {
    let opaque = page_opaque(bytes)?;
    Ok(&bytes[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + opaque.lower as usize])
}

pub fn page_read(store: &dyn PageStore, id: PageId) -> Result<Arc<[u8]>> {
    if id == INVALID_PAGE {
        return Err(Error::corruption("read of invalid page id"));
    }
    let bytes = store.read_page(id)?;
    page_opaque(&bytes)?;
    Ok(bytes)
}

pub fn page_write(store: &dyn PageStore, id: PageId, page: &PageData) -> Result<()> {
    store.write_page(id, page.as_bytes())
}
