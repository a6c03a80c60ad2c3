use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{page_opaque, PageData, PageFlags, PageId, PageStore, PAGE_SIZE};
use crate::error::{Error, Result};

struct FreeList {
    free: Vec<PageId>,
    is_free: Vec<bool>,
}

/// Page store backed by a single file. Freed pages are stamped with the `FREE`
/// flag so the free list can be rebuilt when the file is reopened.
///
/// Page I/O is positional and takes no lock; the mutex only guards the free list
/// and file growth.
pub struct FilePageStore {
    file: File,
    num_pages: AtomicU32,
    state: Mutex<FreeList>,
}

fn offset(id: PageId) -> u64 {
    id as u64 * PAGE_SIZE as u64
}

#[cfg(unix)]
fn read_page_at(file: &File, id: PageId, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;

    file.read_exact_at(buf, offset(id))
}

#[cfg(unix)]
fn write_page_at(file: &File, id: PageId, data: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;

    file.write_all_at(data, offset(id))
}

#[cfg(windows)]
fn read_page_at(file: &File, id: PageId, mut buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    let mut pos = offset(id);
    while !buf.is_empty() {
        match file.seek_read(buf, pos)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => {
                buf = &mut buf[n..];
                pos += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_page_at(file: &File, id: PageId, mut data: &[u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    let mut pos = offset(id);
    while !data.is_empty() {
        match file.seek_write(data, pos)? {
            0 => return Err(std::io::ErrorKind::WriteZero.into()),
            n => {
                data = &data[n..];
                pos += n as u64;
            }
        }
    }
    Ok(())
}

impl FilePageStore {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            num_pages: AtomicU32::new(0),
            state: Mutex::new(FreeList {
                free: Vec::new(),
                is_free: Vec::new(),
            }),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            tracing::warn!(len, "page file has a torn tail, ignoring it");
        }
        let num_pages = (len / PAGE_SIZE as u64) as u32;

        let mut free = Vec::new();
        let mut is_free = vec![false; num_pages as usize];
        let mut buf = vec![0u8; PAGE_SIZE];
        for id in 0..num_pages {
            read_page_at(&file, id, &mut buf)?;
            if let Ok(opaque) = page_opaque(&buf) {
                if opaque.flags().contains(PageFlags::FREE) {
                    free.push(id);
                    is_free[id as usize] = true;
                }
            }
        }
        // lowest ids are handed out first
        free.reverse();

        Ok(Self {
            file,
            num_pages: AtomicU32::new(num_pages),
            state: Mutex::new(FreeList {
                free,
                is_free,
            }),
        })
    }

    fn check_range(&self, id: PageId) -> Result<()> {
        if id >= self.num_pages.load(Ordering::Acquire) {
            return Err(Error::PageStore(format!("page {id} out of range")));
        }
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn allocate_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();
        if let Some(id) = state.free.pop() {
            state.is_free[id as usize] = false;
            return Ok(id);
        }
        let id = self.num_pages.load(Ordering::Acquire);
        if id == super::INVALID_PAGE {
            return Err(Error::PageStore("page file is full".into()));
        }
        // growth only happens under the lock
        write_page_at(&self.file, id, &[0u8; PAGE_SIZE])?;
        state.is_free.push(false);
        self.num_pages.store(id + 1, Ordering::Release);
        Ok(id)
    }

    fn read_page(&self, id: PageId) -> Result<Arc<[u8]>> {
        self.check_range(id)?;
        let mut buf = vec![0u8; PAGE_SIZE];
        read_page_at(&self.file, id, &mut buf)?;
        Ok(Arc::from(buf))
    }

    fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(Error::PageStore(format!(
                "write of {} bytes to page {id}",
                data.len()
            )));
        }
        self.check_range(id)?;
        write_page_at(&self.file, id, data)?;
        Ok(())
    }

    fn free_page(&self, id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        match state.is_free.get(id as usize) {
            None => return Err(Error::PageStore(format!("page {id} out of range"))),
            Some(true) => return Err(Error::PageStore(format!("page {id} freed twice"))),
            Some(false) => {}
        }
        let marker = PageData::init(PageFlags::FREE);
        write_page_at(&self.file, id, marker.as_bytes())?;
        state.is_free[id as usize] = true;
        state.free.push(id);
        Ok(())
    }

    fn is_free(&self, id: PageId) -> bool {
        let state = self.state.lock();
        state.is_free.get(id as usize).copied().unwrap_or(false)
    }

    fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
