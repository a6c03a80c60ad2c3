use std::ops::Range;
use std::sync::Arc;

use super::{
    bm25_page_size, page_data, page_read, page_write, PageData, PageFlags, PageId, PageStore,
    INVALID_PAGE, PAGE_HEADER_SIZE,
};
use crate::error::{Error, Result};

const INDEX_ENTRIES_PER_PAGE: usize = bm25_page_size() / 4;

/// Splits the logical byte range `[offset, offset + len)` into page-relative
/// pieces: (data page number, offset within its data area, range of the source).
fn split_range(offset: u64, len: usize) -> impl Iterator<Item = (usize, usize, Range<usize>)> {
    let page_size = bm25_page_size() as u64;
    let mut done = 0usize;
    std::iter::from_fn(move || {
        if done >= len {
            return None;
        }
        let pos = offset + done as u64;
        let page = (pos / page_size) as usize;
        let in_page = (pos % page_size) as usize;
        let take = (bm25_page_size() - in_page).min(len - done);
        let piece = (page, in_page, done..done + take);
        done += take;
        Some(piece)
    })
}

/// A logical file laid out over data pages, located through a page index chain.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    pub data_pages: Vec<PageId>,
    pub index_pages: Vec<PageId>,
    pub len: u64,
}

impl VirtualFile {
    pub fn root(&self) -> PageId {
        self.index_pages.first().copied().unwrap_or(INVALID_PAGE)
    }

    pub fn num_pages(&self) -> usize {
        self.data_pages.len() + self.index_pages.len()
    }

    pub fn all_pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.index_pages.iter().chain(self.data_pages.iter()).copied()
    }

    /// Walks the page index chain starting at `root`.
    pub fn load(store: &dyn PageStore, root: PageId) -> Result<Self> {
        let mut index_pages = Vec::new();
        let mut data_pages = Vec::new();
        let mut next = root;
        while next != INVALID_PAGE {
            if index_pages.len() > store.num_pages() as usize {
                return Err(Error::corruption("page index chain has a cycle"));
            }
            let bytes = page_read(store, next)?;
            let opaque = super::page_opaque(&bytes)?;
            if !opaque.flags().contains(PageFlags::PAGE_INDEX) {
                return Err(Error::corruption(format!(
                    "page {next} is not a page index page"
                )));
            }
            let data = page_data(&bytes)?;
            data_pages.extend(
                data.chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            );
            index_pages.push(next);
            next = opaque.next;
        }
        let Some(&last) = data_pages.last() else {
            return Err(Error::corruption(format!(
                "page index at {root} lists no data pages"
            )));
        };
        let last_fill = page_data(&page_read(store, last)?)?.len();
        let len = (data_pages.len() - 1) as u64 * bm25_page_size() as u64 + last_fill as u64;
        Ok(Self {
            data_pages,
            index_pages,
            len,
        })
    }

    /// Overwrites already written bytes. The write is split at data-area
    /// boundaries so it never touches a page's control header.
    pub fn write_at(&self, store: &dyn PageStore, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.len {
            return Err(Error::corruption(format!(
                "write_at {offset}+{} past end {}",
                data.len(),
                self.len
            )));
        }
        for (page, in_page, src) in split_range(offset, data.len()) {
            let id = self.data_pages[page];
            let mut buf = PageData::from_bytes(&page_read(store, id)?)?;
            buf.content_mut()[in_page..in_page + src.len()].copy_from_slice(&data[src]);
            page_write(store, id, &buf)?;
        }
        Ok(())
    }
}

/// Streams bytes into freshly allocated pages.
pub struct VirtualPageWriter<'a> {
    store: &'a dyn PageStore,
    flag: PageFlags,
    data_pages: Vec<PageId>,
    index_pages: Vec<PageId>,
    current: PageData,
    len: u64,
}

impl<'a> VirtualPageWriter<'a> {
    pub fn new(store: &'a dyn PageStore, flag: PageFlags) -> Result<Self> {
        let first = store.allocate_page()?;
        Ok(Self {
            store,
            flag,
            data_pages: vec![first],
            index_pages: Vec::new(),
            current: PageData::init(flag),
            len: 0,
        })
    }

    /// Logical offset of the next byte to be written.
    pub fn offset(&self) -> u64 {
        self.len
    }

    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if self.current.freespace_mut().is_empty() {
                self.new_page()?;
            }
            let taken = self.current.append(data);
            self.len += taken as u64;
            data = &data[taken..];
        }
        Ok(())
    }

    fn new_page(&mut self) -> Result<()> {
        let id = self.store.allocate_page()?;
        self.data_pages.push(id);
        self.current.set_next(id);
        let old = std::mem::replace(&mut self.current, PageData::init(self.flag));
        let old_id = self.data_pages[self.data_pages.len() - 2];
        page_write(self.store, old_id, &old)
    }

    /// Overwrites bytes already written, possibly spanning two or more pages.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.len {
            return Err(Error::corruption(format!(
                "write_at {offset}+{} past end {}",
                data.len(),
                self.len
            )));
        }
        let current_page = self.data_pages.len() - 1;
        for (page, in_page, src) in split_range(offset, data.len()) {
            if page == current_page {
                self.current.content_mut()[in_page..in_page + src.len()]
                    .copy_from_slice(&data[src]);
                continue;
            }
            let id = self.data_pages[page];
            let mut buf = PageData::from_bytes(&page_read(self.store, id)?)?;
            buf.content_mut()[in_page..in_page + src.len()].copy_from_slice(&data[src]);
            page_write(self.store, id, &buf)?;
        }
        Ok(())
    }

    /// Writes the last data page and the page index chain.
    pub fn finalize(&mut self) -> Result<VirtualFile> {
        let last = self.data_pages[self.data_pages.len() - 1];
        page_write(self.store, last, &self.current)?;

        let count = self.data_pages.len().div_ceil(INDEX_ENTRIES_PER_PAGE);
        while self.index_pages.len() < count {
            self.index_pages.push(self.store.allocate_page()?);
        }
        for (i, chunk) in self.data_pages.chunks(INDEX_ENTRIES_PER_PAGE).enumerate() {
            let mut page = PageData::init(PageFlags::PAGE_INDEX);
            for id in chunk {
                page.append(&id.to_le_bytes());
            }
            page.set_next(self.index_pages.get(i + 1).copied().unwrap_or(INVALID_PAGE));
            page_write(self.store, self.index_pages[i], &page)?;
        }
        Ok(VirtualFile {
            data_pages: self.data_pages.clone(),
            index_pages: self.index_pages.clone(),
            len: self.len,
        })
    }

    /// Gives every page allocated so far back to the store.
    pub fn abandon(self) {
        for id in self.index_pages.iter().chain(self.data_pages.iter()) {
            if let Err(e) = self.store.free_page(*id) {
                tracing::warn!(page = id, error = %e, "failed to free page of abandoned file");
            }
        }
    }
}

/// Random-access reads over a finished logical file.
pub struct VirtualPageReader {
    store: Arc<dyn PageStore>,
    file: VirtualFile,
}

impl VirtualPageReader {
    pub fn open(store: Arc<dyn PageStore>, root: PageId) -> Result<Self> {
        let file = VirtualFile::load(store.as_ref(), root)?;
        Ok(Self { store, file })
    }

    pub fn file(&self) -> &VirtualFile {
        &self.file
    }

    pub fn len(&self) -> u64 {
        self.file.len
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() as u64 > self.file.len {
            return Err(Error::corruption(format!(
                "read {offset}+{} past end {}",
                buf.len(),
                self.file.len
            )));
        }
        for (page, in_page, dst) in split_range(offset, buf.len()) {
            let bytes = page_read(self.store.as_ref(), self.file.data_pages[page])?;
            let start = PAGE_HEADER_SIZE + in_page;
            buf[dst.clone()].copy_from_slice(&bytes[start..start + dst.len()]);
        }
        Ok(())
    }

    pub fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemPageStore;

    #[test]
    fn test_split_range() {
        let size = bm25_page_size();
        let pieces: Vec<_> = split_range(size as u64 - 3, 8).collect();
        assert_eq!(pieces, vec![(0, size - 3, 0..3), (1, 0, 3..8)]);
        assert_eq!(split_range(5, 0).count(), 0);
    }

    #[test]
    fn test_write_read_across_pages() {
        let store = Arc::new(MemPageStore::new());
        let payload: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
        let mut writer = VirtualPageWriter::new(store.as_ref(), PageFlags::SEGMENT).unwrap();
        writer.write(&payload).unwrap();
        let file = writer.finalize().unwrap();
        assert_eq!(file.len, payload.len() as u64);
        assert_eq!(file.data_pages.len(), 4);
        assert_eq!(file.index_pages.len(), 1);

        let reader = VirtualPageReader::open(store.clone(), file.root()).unwrap();
        assert_eq!(reader.len(), payload.len() as u64);
        assert_eq!(reader.read_vec(0, payload.len()).unwrap(), payload);
        let mid = bm25_page_size() as u64 - 10;
        assert_eq!(
            reader.read_vec(mid, 20).unwrap(),
            &payload[mid as usize..mid as usize + 20]
        );
        assert!(reader.read_vec(payload.len() as u64 - 1, 2).is_err());
    }

    #[test]
    fn test_write_at_straddles_page_boundary() {
        let store = Arc::new(MemPageStore::new());
        let mut writer = VirtualPageWriter::new(store.as_ref(), PageFlags::SEGMENT).unwrap();
        let boundary = bm25_page_size() as u64;
        writer.write(&vec![0u8; boundary as usize * 2 + 100]).unwrap();
        let record = [0xAAu8; 16];
        // one piece lands in a flushed page, the other in the page being filled
        writer.write_at(boundary * 2 - 7, &record).unwrap();
        writer.write_at(boundary - 9, &record).unwrap();
        let file = writer.finalize().unwrap();
        file.write_at(store.as_ref(), 0, &[1, 2, 3]).unwrap();

        let reader = VirtualPageReader::open(store.clone(), file.root()).unwrap();
        assert_eq!(reader.read_vec(boundary * 2 - 7, 16).unwrap(), record);
        assert_eq!(reader.read_vec(boundary - 9, 16).unwrap(), record);
        assert_eq!(reader.read_vec(0, 4).unwrap(), [1, 2, 3, 0]);
        assert_eq!(reader.read_vec(boundary - 10, 1).unwrap(), [0]);
        assert_eq!(reader.read_vec(boundary + 7, 1).unwrap(), [0]);
        for id in file.data_pages {
            let opaque = super::super::page_opaque(&store.read_page(id).unwrap()).unwrap();
            assert_eq!(opaque.flags(), PageFlags::SEGMENT);
        }
    }

    #[test]
    fn test_index_chain_spans_pages() {
        let store = Arc::new(MemPageStore::new());
        let mut writer = VirtualPageWriter::new(store.as_ref(), PageFlags::SEGMENT).unwrap();
        let pages = INDEX_ENTRIES_PER_PAGE + 3;
        writer.write(&vec![7u8; bm25_page_size() * pages]).unwrap();
        let file = writer.finalize().unwrap();
        assert_eq!(file.index_pages.len(), 2);
        let loaded = VirtualFile::load(store.as_ref(), file.root()).unwrap();
        assert_eq!(loaded.data_pages, file.data_pages);
        assert_eq!(loaded.len, file.len);
    }

    #[test]
    fn test_abandon_frees_pages() {
        let store = MemPageStore::new();
        let mut writer = VirtualPageWriter::new(&store, PageFlags::SEGMENT).unwrap();
        writer.write(&vec![1u8; 20_000]).unwrap();
        writer.abandon();
        assert_eq!(store.free_count(), store.num_pages() as usize);
    }
}
