use std::sync::Arc;

use parking_lot::Mutex;

use super::{PageId, PageStore, PAGE_SIZE};
use crate::error::{Error, Result};

struct MemPages {
    pages: Vec<Arc<[u8]>>,
    free: Vec<PageId>,
    is_free: Vec<bool>,
}

/// Page store kept entirely in memory. Cloning shares the underlying pages, so a
/// clone can stand in for the same storage after an index is dropped.
#[derive(Clone)]
pub struct MemPageStore {
    inner: Arc<Mutex<MemPages>>,
    max_pages: Option<u32>,
}

impl MemPageStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemPages {
                pages: Vec::new(),
                free: Vec::new(),
                is_free: Vec::new(),
            })),
            max_pages: None,
        }
    }

    /// Allocation fails once the store would grow past `max_pages`.
    pub fn with_capacity_limit(max_pages: u32) -> Self {
        Self {
            max_pages: Some(max_pages),
            ..Self::new()
        }
    }

    /// A handle onto the same pages with a different growth limit.
    pub fn limited(&self, max_pages: Option<u32>) -> Self {
        Self {
            inner: self.inner.clone(),
            max_pages,
        }
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().free.len()
    }
}

impl Default for MemPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemPageStore {
    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.free.pop() {
            inner.is_free[id as usize] = false;
            return Ok(id);
        }
        let id = inner.pages.len() as PageId;
        if self.max_pages.is_some_and(|max| id >= max) {
            return Err(Error::PageStore(format!(
                "page store is full at {id} pages"
            )));
        }
        inner.pages.push(Arc::from(vec![0u8; PAGE_SIZE]));
        inner.is_free.push(false);
        Ok(id)
    }

    fn read_page(&self, id: PageId) -> Result<Arc<[u8]>> {
        let inner = self.inner.lock();
        inner
            .pages
            .get(id as usize)
            .cloned()
            .ok_or_else(|| Error::PageStore(format!("page {id} out of range")))
    }

    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(Error::PageStore(format!(
                "write of {} bytes to page {id}",
                data.len()
            )));
        }
        let mut inner = self.inner.lock();
        let slot = inner
            .pages
            .get_mut(id as usize)
            .ok_or_else(|| Error::PageStore(format!("page {id} out of range")))?;
        *slot = Arc::from(data);
        Ok(())
    }

    fn free_page(&self, id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.is_free.get(id as usize) {
            None => return Err(Error::PageStore(format!("page {id} out of range"))),
            Some(true) => return Err(Error::PageStore(format!("page {id} freed twice"))),
            Some(false) => {}
        }
        inner.is_free[id as usize] = true;
        inner.free.push(id);
        Ok(())
    }

    fn is_free(&self, id: PageId) -> bool {
        let inner = self.inner.lock();
        inner.is_free.get(id as usize).copied().unwrap_or(false)
    }

    fn num_pages(&self) -> u32 {
        self.inner.lock().pages.len() as u32
    }
}
