//! On-disk layout of a chainfs image
//!
//! ```text
//! block 0                      superblock
//! link_start .. +link_blocks   link table: one u32 per chunk, next chunk or END_OF_CHAIN
//! data_start ..                chunk n (n >= 1) at data_start + (n - 1) * blocks_per_chunk
//! ```
//!
//! Directories are ordinary chains holding 32-byte entries. An entry whose
//! first name byte is zero ends the directory.

use crate::driver::{FsNode, END_OF_CHAIN, NULL_NODE};

// "CHF1" as little endian bytes
pub const MAGIC: u32 = 0x3146_4843;
pub const SUPERBLOCK_BLOCK: u64 = 0;
pub const SUPERBLOCK_SIZE: usize = 40;
pub const LINK_SIZE: usize = 4;

pub const DIR_ENTRY_SIZE: usize = 32;
pub const NAME_LEN: usize = 23;
pub const ATTR_DIRECTORY: u8 = 1 << 0;

/// Directory size recorded when the length of a chain is unknown
pub const UNKNOWN_SIZE: u32 = u32::MAX;

/// Smallest block size that fits a superblock
pub const MIN_BLOCK_SIZE: u32 = 64;

pub fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub fn write_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub block_size: u32,
    pub blocks_per_chunk: u32,
    pub chunk_count: u32,
    pub link_start: u32,
    pub link_blocks: u32,
    pub data_start: u32,
    pub root_node: FsNode,
    pub root_size: u32,
}

impl Superblock {
    /// Lay out an image of `total_blocks` blocks
    pub fn plan(block_size: u32, blocks_per_chunk: u32, total_blocks: u64) -> Result<Self, &'static str> {
        if block_size < MIN_BLOCK_SIZE || block_size % LINK_SIZE as u32 != 0 {
            return Err("Unsupported block size");
        }
        if blocks_per_chunk == 0 {
            return Err("Chunks must span at least one block");
        }

        let links_per_block = (block_size as usize / LINK_SIZE) as u64;
        let mut chunks = total_blocks.saturating_sub(1) / blocks_per_chunk as u64;
        chunks = chunks.min(END_OF_CHAIN as u64 - 1);
        // Shrinking the chunk count never grows the link table, so this settles
        loop {
            let link_blocks = (chunks + 1).div_ceil(links_per_block);
            let data_start = 1 + link_blocks;
            let fit = total_blocks.saturating_sub(data_start) / blocks_per_chunk as u64;
            if fit >= chunks {
                break;
            }
            chunks = fit;
        }
        if chunks == 0 {
            return Err("Image too small");
        }

        let link_blocks = (chunks + 1).div_ceil(links_per_block) as u32;
        Ok(Self {
            block_size,
            blocks_per_chunk,
            chunk_count: chunks as u32,
            link_start: 1,
            link_blocks,
            data_start: 1 + link_blocks,
            root_node: NULL_NODE,
            root_size: 0,
        })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..SUPERBLOCK_SIZE].fill(0);
        write_u32(buf, 0, MAGIC);
        write_u32(buf, 4, self.block_size);
        write_u32(buf, 8, self.blocks_per_chunk);
        write_u32(buf, 12, self.chunk_count);
        write_u32(buf, 16, self.link_start);
        write_u32(buf, 20, self.link_blocks);
        write_u32(buf, 24, self.data_start);
        write_u32(buf, 28, self.root_node);
        write_u32(buf, 32, self.root_size);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, &'static str> {
        if buf.len() < SUPERBLOCK_SIZE {
            return Err("Superblock truncated");
        }
        if read_u32(buf, 0) != MAGIC {
            return Err("Bad magic");
        }

        let sb = Self {
            block_size: read_u32(buf, 4),
            blocks_per_chunk: read_u32(buf, 8),
            chunk_count: read_u32(buf, 12),
            link_start: read_u32(buf, 16),
            link_blocks: read_u32(buf, 20),
            data_start: read_u32(buf, 24),
            root_node: read_u32(buf, 28),
            root_size: read_u32(buf, 32),
        };

        if sb.block_size < MIN_BLOCK_SIZE || sb.blocks_per_chunk == 0 {
            return Err("Corrupt superblock");
        }
        let links = sb.link_blocks as u64 * (sb.block_size as usize / LINK_SIZE) as u64;
        if links < sb.chunk_count as u64 + 1 || sb.data_start < sb.link_start + sb.link_blocks {
            return Err("Link table too small");
        }
        Ok(sb)
    }

    /// Device block holding block `block` of chunk `node`
    pub fn chunk_block(&self, node: FsNode, block: u32) -> u64 {
        self.data_start as u64
            + (node as u64 - 1) * self.blocks_per_chunk as u64
            + block as u64
    }

    pub fn chunk_bytes(&self) -> usize {
        self.block_size as usize * self.blocks_per_chunk as usize
    }

    /// Blocks the image occupies on its device
    pub fn total_blocks(&self) -> u64 {
        self.data_start as u64 + self.chunk_count as u64 * self.blocks_per_chunk as u64
    }
}

/// Directory entry as stored on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; NAME_LEN],
    pub attributes: u8,
    pub size: u32,
    pub head: FsNode,
}

impl DirEntry {
    pub fn new(name: &str, attributes: u8, size: u32, head: FsNode) -> Result<Self, &'static str> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.contains(&b'/') || bytes.contains(&0) {
            return Err("Invalid name");
        }
        if bytes.len() > NAME_LEN {
            return Err("Name too long");
        }
        let mut stored = [0u8; NAME_LEN];
        stored[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            name: stored,
            attributes,
            size,
            head,
        })
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("???")
    }

    pub fn is_dir(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw[..NAME_LEN].copy_from_slice(&self.name);
        raw[NAME_LEN] = self.attributes;
        write_u32(&mut raw, 24, self.size);
        write_u32(&mut raw, 28, self.head);
        raw
    }

    /// `None` for the terminating entry
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < DIR_ENTRY_SIZE || raw[0] == 0 {
            return None;
        }
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&raw[..NAME_LEN]);
        Some(Self {
            name,
            attributes: raw[NAME_LEN],
            size: read_u32(raw, 24),
            head: read_u32(raw, 28),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_fits_device() {
        let sb = Superblock::plan(512, 4, 2048).unwrap();
        // 510 chunks plus the unused slot 0 need 4 link blocks
        assert_eq!(sb.chunk_count, 510);
        assert_eq!(sb.link_blocks, 4);
        assert_eq!(sb.data_start, 5);
        assert!(sb.total_blocks() <= 2048);
        assert_eq!(sb.chunk_block(1, 0), 5);
        assert_eq!(sb.chunk_block(2, 3), 12);
    }

    #[test]
    fn test_plan_rejects_bad_geometry() {
        assert!(Superblock::plan(510, 4, 2048).is_err());
        assert!(Superblock::plan(32, 4, 2048).is_err());
        assert!(Superblock::plan(512, 0, 2048).is_err());
        assert!(Superblock::plan(512, 4, 3).is_err());
    }

    #[test]
    fn test_superblock_decode_checks() {
        let sb = Superblock::plan(512, 2, 100).unwrap();
        let mut buf = [0u8; 512];
        sb.encode(&mut buf);
        assert_eq!(Superblock::decode(&buf), Ok(sb));

        buf[0] ^= 0xFF;
        assert_eq!(Superblock::decode(&buf), Err("Bad magic"));
        assert_eq!(Superblock::decode(&buf[..16]), Err("Superblock truncated"));
    }

    #[test]
    fn test_dir_entry_names() {
        let entry = DirEntry::new("kernel.log", 0, 1234, 7).unwrap();
        assert_eq!(entry.name(), "kernel.log");
        assert!(!entry.is_dir());
        assert_eq!(DirEntry::decode(&entry.encode()), Some(entry));

        let longest = "abcdefghijklmnopqrstuvw";
        assert_eq!(DirEntry::new(longest, 0, 0, 1).unwrap().name(), longest);
        assert_eq!(DirEntry::new("abcdefghijklmnopqrstuvwx", 0, 0, 1), Err("Name too long"));
        assert_eq!(DirEntry::new("a/b", 0, 0, 1), Err("Invalid name"));
        assert_eq!(DirEntry::new("", 0, 0, 1), Err("Invalid name"));
        assert_eq!(DirEntry::decode(&[0u8; DIR_ENTRY_SIZE]), None);
    }
}
