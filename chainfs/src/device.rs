//! Raw block device interface and a memory-backed device

use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

/// Sector-addressed storage underneath a [`crate::ChainDriver`]
pub trait BlockDevice {
    fn sector_size(&self) -> usize;

    fn sector_count(&self) -> u64;

    fn read_sector(&self, sector: u64, buf: &mut [u8]) -> Result<(), &'static str>;

    fn write_sector(&self, sector: u64, buf: &[u8]) -> Result<(), &'static str>;
}

/// Block device kept entirely in memory
pub struct RamDisk {
    sector_size: usize,
    data: RefCell<Vec<u8>>,
}

impl RamDisk {
    /// Zero-filled disk of `sectors` sectors
    pub fn new(sector_size: usize, sectors: u64) -> Self {
        Self {
            sector_size,
            data: RefCell::new(vec![0u8; sector_size * sectors as usize]),
        }
    }

    /// Wrap an existing image. Trailing bytes short of a sector are ignored.
    pub fn from_bytes(sector_size: usize, data: Vec<u8>) -> Self {
        Self {
            sector_size,
            data: RefCell::new(data),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_inner()
    }

    fn range(&self, sector: u64, len: usize) -> Result<core::ops::Range<usize>, &'static str> {
        if len != self.sector_size {
            return Err("Buffer is not one sector");
        }
        if sector >= self.sector_count() {
            return Err("Sector out of range");
        }
        let start = sector as usize * self.sector_size;
        Ok(start..start + len)
    }
}

impl BlockDevice for RamDisk {
    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        if self.sector_size == 0 {
            return 0;
        }
        (self.data.borrow().len() / self.sector_size) as u64
    }

    fn read_sector(&self, sector: u64, buf: &mut [u8]) -> Result<(), &'static str> {
        let range = self.range(sector, buf.len())?;
        buf.copy_from_slice(&self.data.borrow()[range]);
        Ok(())
    }

    fn write_sector(&self, sector: u64, buf: &[u8]) -> Result<(), &'static str> {
        let range = self.range(sector, buf.len())?;
        self.data.borrow_mut()[range].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_disk_sectors() {
        let disk = RamDisk::new(64, 4);
        assert_eq!(disk.sector_count(), 4);

        let data = [7u8; 64];
        disk.write_sector(2, &data).unwrap();
        let mut out = [0u8; 64];
        disk.read_sector(2, &mut out).unwrap();
        assert_eq!(out, data);
        disk.read_sector(1, &mut out).unwrap();
        assert_eq!(out, [0u8; 64]);
    }

    #[test]
    fn test_ram_disk_bounds() {
        let disk = RamDisk::from_bytes(64, vec![0u8; 200]);
        assert_eq!(disk.sector_count(), 3);

        let mut out = [0u8; 64];
        assert_eq!(disk.read_sector(3, &mut out), Err("Sector out of range"));
        let mut short = [0u8; 32];
        assert_eq!(disk.read_sector(0, &mut short), Err("Buffer is not one sector"));
    }
}
