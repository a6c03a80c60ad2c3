//! On-page record layouts of a segment.
//!
//! Version 2 is written by default. Version 1 used 32-bit offsets, 12-byte
//! dictionary entries and 16-byte skip entries; it is still read and can be
//! written for compatibility checks.

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

pub const SEGMENT_MAGIC: u32 = 0x3532_4D42; // "BM25"
pub const SEGMENT_VERSION_V1: u32 = 1;
pub const SEGMENT_VERSION_V2: u32 = 2;
pub const SEGMENT_VERSION_CURRENT: u32 = SEGMENT_VERSION_V2;

pub const BLOCK_SIZE: usize = 128;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u32,
    pub level: u32,
    pub num_docs: u32,
    pub num_terms: u32,
    reserved: u32,
    pub total_tokens: u64,
    pub data_size: u64,
    pub num_pages: u32,
    pub page_index_root: u32,
    pub dictionary_offset: u64,
    pub strings_offset: u64,
    pub entries_offset: u64,
    pub postings_offset: u64,
    pub skip_index_offset: u64,
    pub fieldnorm_offset: u64,
    pub docmap_offset: u64,
}

unsafe impl Zeroable for SegmentHeader {}
unsafe impl Pod for SegmentHeader {}

pub const SEGMENT_HEADER_SIZE: usize = std::mem::size_of::<SegmentHeader>();

impl SegmentHeader {
    pub fn placeholder(version: u32, level: u32) -> Self {
        Self {
            magic: SEGMENT_MAGIC,
            version,
            level,
            ..Default::default()
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < SEGMENT_HEADER_SIZE {
            return Err(Error::corruption("segment shorter than its header"));
        }
        let header: SegmentHeader = bytemuck::pod_read_unaligned(&data[..SEGMENT_HEADER_SIZE]);
        if header.magic != SEGMENT_MAGIC {
            return Err(Error::corruption(format!(
                "bad segment magic {:#010x}",
                header.magic
            )));
        }
        if !matches!(header.version, SEGMENT_VERSION_V1 | SEGMENT_VERSION_V2) {
            return Err(Error::UnsupportedVersion {
                found: header.version,
                supported: SEGMENT_VERSION_CURRENT,
            });
        }
        let sections = [
            header.dictionary_offset,
            header.strings_offset,
            header.entries_offset,
            header.postings_offset,
            header.skip_index_offset,
            header.fieldnorm_offset,
            header.docmap_offset,
            header.data_size,
        ];
        if header.dictionary_offset < SEGMENT_HEADER_SIZE as u64
            || sections.windows(2).any(|w| w[0] > w[1])
        {
            return Err(Error::corruption("segment sections out of order"));
        }
        Ok(header)
    }
}

/// Term dictionary entry, independent of the on-page version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DictEntry {
    pub skip_index_offset: u64,
    pub block_count: u32,
    pub doc_freq: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct DictEntryV1 {
    skip_index_offset: u32,
    block_count: u32,
    doc_freq: u32,
}

unsafe impl Zeroable for DictEntryV1 {}
unsafe impl Pod for DictEntryV1 {}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct DictEntryV2 {
    skip_index_offset: u64,
    block_count: u16,
    reserved: u16,
    doc_freq: u32,
}

unsafe impl Zeroable for DictEntryV2 {}
unsafe impl Pod for DictEntryV2 {}

const _: () = {
    assert!(std::mem::size_of::<DictEntryV1>() == 12);
    assert!(std::mem::size_of::<DictEntryV2>() == 16);
    assert!(std::mem::size_of::<SkipEntryV1>() == 16);
    assert!(std::mem::size_of::<SkipEntryV2>() == 20);
    assert!(std::mem::size_of::<BlockPosting>() == 8);
};

pub fn dict_entry_size(version: u32) -> usize {
    match version {
        SEGMENT_VERSION_V1 => std::mem::size_of::<DictEntryV1>(),
        _ => std::mem::size_of::<DictEntryV2>(),
    }
}

fn offset_u32(offset: u64) -> Result<u32> {
    u32::try_from(offset)
        .map_err(|_| Error::InvalidInput(format!("offset {offset} does not fit a v1 segment")))
}

impl DictEntry {
    pub fn encode(&self, version: u32, out: &mut Vec<u8>) -> Result<()> {
        match version {
            SEGMENT_VERSION_V1 => {
                let entry = DictEntryV1 {
                    skip_index_offset: offset_u32(self.skip_index_offset)?,
                    block_count: self.block_count,
                    doc_freq: self.doc_freq,
                };
                out.extend_from_slice(bytemuck::bytes_of(&entry));
            }
            _ => {
                let block_count = u16::try_from(self.block_count).map_err(|_| {
                    Error::InvalidInput(format!("{} blocks for one term", self.block_count))
                })?;
                let entry = DictEntryV2 {
                    skip_index_offset: self.skip_index_offset,
                    block_count,
                    reserved: 0,
                    doc_freq: self.doc_freq,
                };
                out.extend_from_slice(bytemuck::bytes_of(&entry));
            }
        }
        Ok(())
    }

    pub fn decode(version: u32, data: &[u8]) -> Self {
        match version {
            SEGMENT_VERSION_V1 => {
                let entry: DictEntryV1 = bytemuck::pod_read_unaligned(data);
                Self {
                    skip_index_offset: entry.skip_index_offset as u64,
                    block_count: entry.block_count,
                    doc_freq: entry.doc_freq,
                }
            }
            _ => {
                let entry: DictEntryV2 = bytemuck::pod_read_unaligned(data);
                Self {
                    skip_index_offset: entry.skip_index_offset,
                    block_count: entry.block_count as u32,
                    doc_freq: entry.doc_freq,
                }
            }
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct SkipFlags: u8 {
        const PARTIAL = 1 << 0;
        const LAST = 1 << 1;
    }
}

/// Per-block summary used to skip blocks without decoding them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkipEntry {
    pub last_doc_id: u32,
    pub doc_count: u8,
    pub block_max_tf: u16,
    /// Smallest fieldnorm id in the block, i.e. the shortest document.
    pub block_max_norm: u8,
    pub posting_offset: u64,
    pub flags: SkipFlags,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct SkipEntryV1 {
    last_doc_id: u32,
    posting_offset: u32,
    block_max_tf: u16,
    block_max_norm: u8,
    doc_count: u8,
    flags: u8,
    reserved: [u8; 3],
}

unsafe impl Zeroable for SkipEntryV1 {}
unsafe impl Pod for SkipEntryV1 {}

#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
struct SkipEntryV2 {
    last_doc_id: u32,
    doc_count: u8,
    block_max_tf: u16,
    block_max_norm: u8,
    posting_offset: u64,
    flags: u8,
    reserved: [u8; 3],
}

unsafe impl Zeroable for SkipEntryV2 {}
unsafe impl Pod for SkipEntryV2 {}

pub fn skip_entry_size(version: u32) -> usize {
    match version {
        SEGMENT_VERSION_V1 => std::mem::size_of::<SkipEntryV1>(),
        _ => std::mem::size_of::<SkipEntryV2>(),
    }
}

impl SkipEntry {
    /// `doc_count` is stored as count - 1 so a full block of 128 fits a byte.
    pub fn block_len(&self) -> usize {
        self.doc_count as usize + 1
    }

    pub fn encode(&self, version: u32, out: &mut Vec<u8>) -> Result<()> {
        match version {
            SEGMENT_VERSION_V1 => {
                let entry = SkipEntryV1 {
                    last_doc_id: self.last_doc_id,
                    posting_offset: offset_u32(self.posting_offset)?,
                    block_max_tf: self.block_max_tf,
                    block_max_norm: self.block_max_norm,
                    doc_count: self.doc_count,
                    flags: self.flags.bits(),
                    reserved: [0; 3],
                };
                out.extend_from_slice(bytemuck::bytes_of(&entry));
            }
            _ => {
                let entry = SkipEntryV2 {
                    last_doc_id: self.last_doc_id,
                    doc_count: self.doc_count,
                    block_max_tf: self.block_max_tf,
                    block_max_norm: self.block_max_norm,
                    posting_offset: self.posting_offset,
                    flags: self.flags.bits(),
                    reserved: [0; 3],
                };
                out.extend_from_slice(bytemuck::bytes_of(&entry));
            }
        }
        Ok(())
    }

    pub fn decode(version: u32, data: &[u8]) -> Self {
        match version {
            SEGMENT_VERSION_V1 => {
                let entry: SkipEntryV1 = bytemuck::pod_read_unaligned(data);
                Self {
                    last_doc_id: entry.last_doc_id,
                    doc_count: entry.doc_count,
                    block_max_tf: entry.block_max_tf,
                    block_max_norm: entry.block_max_norm,
                    posting_offset: entry.posting_offset as u64,
                    flags: SkipFlags::from_bits_retain(entry.flags),
                }
            }
            _ => {
                let entry: SkipEntryV2 = bytemuck::pod_read_unaligned(data);
                Self {
                    last_doc_id: entry.last_doc_id,
                    doc_count: entry.doc_count,
                    block_max_tf: entry.block_max_tf,
                    block_max_norm: entry.block_max_norm,
                    posting_offset: entry.posting_offset,
                    flags: SkipFlags::from_bits_retain(entry.flags),
                }
            }
        }
    }
}

/// Fixed-size posting record; the same in every version.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockPosting {
    pub doc_id: u32,
    pub freq: u16,
    pub fieldnorm: u8,
    reserved: u8,
}

unsafe impl Zeroable for BlockPosting {}
unsafe impl Pod for BlockPosting {}

pub const BLOCK_POSTING_SIZE: usize = std::mem::size_of::<BlockPosting>();

impl BlockPosting {
    pub fn new(doc_id: u32, freq: u16, fieldnorm: u8) -> Self {
        Self {
            doc_id,
            freq,
            fieldnorm,
            reserved: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_validation() {
        let mut header = SegmentHeader::placeholder(SEGMENT_VERSION_V2, 0);
        header.dictionary_offset = SEGMENT_HEADER_SIZE as u64;
        header.strings_offset = header.dictionary_offset + 4;
        header.entries_offset = header.strings_offset;
        header.postings_offset = header.entries_offset;
        header.skip_index_offset = header.postings_offset;
        header.fieldnorm_offset = header.skip_index_offset;
        header.docmap_offset = header.fieldnorm_offset;
        header.data_size = header.docmap_offset;
        let parsed = SegmentHeader::parse(bytemuck::bytes_of(&header)).unwrap();
        assert_eq!(parsed, header);

        let mut future = header;
        future.version = 9;
        assert!(matches!(
            SegmentHeader::parse(bytemuck::bytes_of(&future)),
            Err(Error::UnsupportedVersion { found: 9, .. })
        ));

        let mut shuffled = header;
        shuffled.skip_index_offset = header.data_size + 1;
        assert!(matches!(
            SegmentHeader::parse(bytemuck::bytes_of(&shuffled)),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_entries_in_both_versions() {
        let dict = DictEntry {
            skip_index_offset: 77_000,
            block_count: 3,
            doc_freq: 300,
        };
        let skip = SkipEntry {
            last_doc_id: 1234,
            doc_count: 127,
            block_max_tf: 9,
            block_max_norm: 40,
            posting_offset: 8190,
            flags: SkipFlags::LAST,
        };
        for version in [SEGMENT_VERSION_V1, SEGMENT_VERSION_V2] {
            let mut buf = Vec::new();
            dict.encode(version, &mut buf).unwrap();
            assert_eq!(buf.len(), dict_entry_size(version));
            assert_eq!(DictEntry::decode(version, &buf), dict);

            buf.clear();
            skip.encode(version, &mut buf).unwrap();
            assert_eq!(buf.len(), skip_entry_size(version));
            assert_eq!(SkipEntry::decode(version, &buf), skip);
            assert_eq!(skip.block_len(), BLOCK_SIZE);
        }
    }

    #[test]
    fn test_v1_rejects_large_offsets() {
        let dict = DictEntry {
            skip_index_offset: u32::MAX as u64 + 1,
            block_count: 1,
            doc_freq: 1,
        };
        let mut buf = Vec::new();
        assert!(dict.encode(SEGMENT_VERSION_V1, &mut buf).is_err());
        assert!(dict.encode(SEGMENT_VERSION_V2, &mut buf).is_ok());
    }
}
