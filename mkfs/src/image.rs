//! Disk image file exposed as a block device

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chainfs::layout::{Superblock, MIN_BLOCK_SIZE, SUPERBLOCK_SIZE};
use chainfs::BlockDevice;
use log::warn;

pub struct ImageFile {
    file: RefCell<File>,
    sector_size: usize,
    sectors: u64,
}

impl ImageFile {
    /// Create (or truncate) an image of `bytes` bytes
    pub fn create(path: &Path, sector_size: usize, bytes: u64) -> io::Result<Self> {
        if sector_size < MIN_BLOCK_SIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block size {} is below {}", sector_size, MIN_BLOCK_SIZE),
            ));
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(bytes)?;
        Ok(Self {
            file: RefCell::new(file),
            sector_size,
            sectors: bytes / sector_size as u64,
        })
    }

    /// Open an existing image, taking the sector size from its superblock
    pub fn open(path: &Path, writable: bool) -> io::Result<Self> {
        let mut file = File::options().read(true).write(writable).open(path)?;
        let mut head = [0u8; SUPERBLOCK_SIZE];
        file.read_exact(&mut head)?;
        let sb = Superblock::decode(&head).map_err(io::Error::other)?;

        let sector_size = sb.block_size as usize;
        let sectors = file.metadata()?.len() / sector_size as u64;
        Ok(Self {
            file: RefCell::new(file),
            sector_size,
            sectors,
        })
    }

    fn locate(&self, sector: u64, len: usize) -> Result<u64, &'static str> {
        if len != self.sector_size {
            return Err("Buffer is not one sector");
        }
        if sector >= self.sectors {
            return Err("Sector out of range");
        }
        Ok(sector * self.sector_size as u64)
    }
}

impl BlockDevice for ImageFile {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sectors
    }

    fn read_sector(&self, sector: u64, buf: &mut [u8]) -> Result<(), &'static str> {
        let offset = self.locate(sector, buf.len())?;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| {
                warn!("mkfs: read of sector {} failed: {}", sector, e);
                "Image read failed"
            })
    }

    fn write_sector(&self, sector: u64, buf: &[u8]) -> Result<(), &'static str> {
        let offset = self.locate(sector, buf.len())?;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(buf))
            .map_err(|e| {
                warn!("mkfs: write of sector {} failed: {}", sector, e);
                "Image write failed"
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mkfs-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_create_rejects_tiny_blocks() {
        let path = scratch("tiny.img");
        for size in [0, 32] {
            let err = ImageFile::create(&path, size, 1024).err().unwrap();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_sectors_round_trip_through_file() {
        let path = scratch("sectors.img");
        let image = ImageFile::create(&path, 512, 4 * 512 + 100).unwrap();
        assert_eq!(image.sector_count(), 4);

        image.write_sector(3, &[0x42; 512]).unwrap();
        let mut out = [0u8; 512];
        image.read_sector(3, &mut out).unwrap();
        assert_eq!(out, [0x42; 512]);
        assert_eq!(image.read_sector(4, &mut out), Err("Sector out of range"));

        drop(image);
        std::fs::remove_file(&path).unwrap();
    }
}
