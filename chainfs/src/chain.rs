//! Chunk-chain driver over a block device
//!
//! Serves the layout in [`crate::layout`]: the link table is read once at
//! mount and kept in memory, block transfers go straight to the device.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info};

use crate::device::BlockDevice;
use crate::driver::{FsDriver, FsNode, Parameter, END_OF_CHAIN, NULL_NODE};
use crate::layout::{read_u32, Superblock, LINK_SIZE, SUPERBLOCK_BLOCK};

pub struct ChainDriver<B: BlockDevice> {
    dev: B,
    sb: Superblock,
    /// Next chunk per chunk; slot 0 is unused
    links: Vec<FsNode>,
}

impl<B: BlockDevice> ChainDriver<B> {
    /// Validate the superblock of `dev` and load its link table
    pub fn mount(dev: B) -> Result<Self, &'static str> {
        let sector_size = dev.sector_size();
        let mut buf = vec![0u8; sector_size];
        dev.read_sector(SUPERBLOCK_BLOCK, &mut buf)?;
        let sb = Superblock::decode(&buf)?;

        if sb.block_size as usize != sector_size {
            return Err("Block size does not match device");
        }
        if sb.total_blocks() > dev.sector_count() {
            return Err("Image larger than device");
        }

        let links_per_block = sector_size / LINK_SIZE;
        let wanted = sb.chunk_count as usize + 1;
        let mut links = Vec::with_capacity(wanted);
        for i in 0..sb.link_blocks {
            dev.read_sector(sb.link_start as u64 + i as u64, &mut buf)?;
            for j in 0..links_per_block {
                if links.len() == wanted {
                    break;
                }
                links.push(read_u32(&buf, j * LINK_SIZE));
            }
        }

        info!(
            "chainfs: mounted {} chunks of {} x {} bytes",
            sb.chunk_count, sb.blocks_per_chunk, sb.block_size
        );
        Ok(Self { dev, sb, links })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    pub fn into_device(self) -> B {
        self.dev
    }

    /// Number of chunks in the chain starting at `head`.
    ///
    /// Stops after `chunk_count` steps so a corrupt cyclic chain terminates.
    pub fn chain_len(&self, head: FsNode) -> usize {
        let mut node = head;
        let mut len = 0;
        while !self.is_end_of_chain(node) && len <= self.sb.chunk_count as usize {
            len += 1;
            node = self.next_chunk(node);
        }
        len
    }

    fn check(&self, node: FsNode, block: u32, len: usize) -> Result<u64, &'static str> {
        if self.is_end_of_chain(node) || block >= self.sb.blocks_per_chunk {
            return Err("Block out of range");
        }
        if len != self.sb.block_size as usize {
            return Err("Buffer is not one block");
        }
        Ok(self.sb.chunk_block(node, block))
    }
}

impl<B: BlockDevice> FsDriver for ChainDriver<B> {
    fn parameter(&self, param: Parameter) -> u32 {
        match param {
            Parameter::BlockSize => self.sb.block_size,
            Parameter::RootNode => self.sb.root_node,
            Parameter::RootSize => self.sb.root_size,
            Parameter::ChunkCount => self.sb.chunk_count,
        }
    }

    fn is_end_of_chain(&self, node: FsNode) -> bool {
        node == NULL_NODE || node == END_OF_CHAIN || node > self.sb.chunk_count
    }

    fn blocks_per_node(&self, node: FsNode) -> u32 {
        if self.is_end_of_chain(node) {
            return 0;
        }
        self.sb.blocks_per_chunk
    }

    fn next_chunk(&self, node: FsNode) -> FsNode {
        if self.is_end_of_chain(node) {
            return END_OF_CHAIN;
        }
        self.links.get(node as usize).copied().unwrap_or(END_OF_CHAIN)
    }

    fn read_block(&self, node: FsNode, block: u32, buf: &mut [u8]) -> Result<(), &'static str> {
        let sector = self.check(node, block, buf.len())?;
        self.dev.read_sector(sector, buf)
    }

    fn write_block(&self, node: FsNode, block: u32, buf: &[u8]) -> Result<(), &'static str> {
        let sector = self.check(node, block, buf.len())?;
        debug!("chainfs: write node {} block {} (sector {})", node, block, sector);
        self.dev.write_sector(sector, buf)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::config::FileConfig;
    use crate::device::RamDisk;
    use crate::file::File;
    use crate::layout::write_u32;

    const BLOCK: usize = 128;

    /// Image whose single file runs through chunks 3 -> 1 -> 2
    fn scrambled_image() -> RamDisk {
        let disk = RamDisk::new(BLOCK, 16);
        let sb = Superblock::plan(BLOCK as u32, 2, 16).unwrap();
        let mut buf = vec![0u8; BLOCK];
        sb.encode(&mut buf);
        disk.write_sector(SUPERBLOCK_BLOCK, &buf).unwrap();

        let mut links = vec![0u8; BLOCK];
        write_u32(&mut links, 3 * LINK_SIZE, 1);
        write_u32(&mut links, LINK_SIZE, 2);
        write_u32(&mut links, 2 * LINK_SIZE, END_OF_CHAIN);
        disk.write_sector(sb.link_start as u64, &links).unwrap();

        for (order, node) in [3u32, 1, 2].into_iter().enumerate() {
            for block in 0..2 {
                let fill = (order * 2 + block as usize) as u8 + 1;
                disk.write_sector(sb.chunk_block(node, block), &[fill; BLOCK]).unwrap();
            }
        }
        disk
    }

    #[test]
    fn test_mount_reads_links() {
        let driver = ChainDriver::mount(scrambled_image()).unwrap();
        assert_eq!(driver.next_chunk(3), 1);
        assert_eq!(driver.next_chunk(1), 2);
        assert!(driver.is_end_of_chain(driver.next_chunk(2)));
        assert_eq!(driver.chain_len(3), 3);
        assert_eq!(driver.parameter(Parameter::BlockSize), BLOCK as u32);
        assert_eq!(driver.blocks_per_node(1), 2);
        assert_eq!(driver.blocks_per_node(END_OF_CHAIN), 0);
    }

    #[test]
    fn test_file_follows_links_not_numbering() {
        let driver = ChainDriver::mount(scrambled_image()).unwrap();
        let size = (6 * BLOCK) as u64;
        let mut file = File::with_node(&driver, 3, size, FileConfig::default());

        let mut data = vec![0u8; 6 * BLOCK];
        assert_eq!(file.read(&mut data), 6 * BLOCK);
        for (i, chunk) in data.chunks(BLOCK).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8 + 1));
        }

        assert!(file.seek(BLOCK as u64 * 3 + 5));
        assert_eq!(file.current_node(), Some(1));
        assert_eq!(file.read_byte(), Some(4));
    }

    #[test]
    fn test_out_of_range_blocks_rejected() {
        let driver = ChainDriver::mount(scrambled_image()).unwrap();
        let mut buf = vec![0u8; BLOCK];
        assert!(driver.read_block(1, 2, &mut buf).is_err());
        assert!(driver.read_block(END_OF_CHAIN, 0, &mut buf).is_err());
        assert!(driver.read_block(NULL_NODE, 0, &mut buf).is_err());
        let mut short = vec![0u8; 16];
        assert!(driver.read_block(1, 0, &mut short).is_err());
    }

    #[test]
    fn test_mount_rejects_mismatched_device() {
        let bytes = scrambled_image().into_bytes();
        let wrong = RamDisk::from_bytes(BLOCK * 2, bytes);
        assert!(ChainDriver::mount(wrong).is_err());

        let blank = RamDisk::new(BLOCK, 16);
        assert_eq!(ChainDriver::mount(blank).err(), Some("Bad magic"));
    }
}
