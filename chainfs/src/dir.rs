//! Path resolution and directory listing
//!
//! Directories are read through ordinary [`File`] handles bound straight to
//! the directory's chain, so listing exercises the same buffered read path
//! as file access.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::FileConfig;
use crate::driver::{FsDriver, FsNode, Parameter};
use crate::file::File;
use crate::layout::{DirEntry, ATTR_DIRECTORY, DIR_ENTRY_SIZE, UNKNOWN_SIZE};

/// What path resolution knows about a file or directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSystemEntry {
    pub name: String,
    pub node: FsNode,
    pub size: u64,
    pub attributes: u8,
}

impl FileSystemEntry {
    pub fn file(name: &str, node: FsNode, size: u64) -> Self {
        Self {
            name: String::from(name),
            node,
            size,
            attributes: 0,
        }
    }

    pub fn directory(name: &str, node: FsNode, size: u64) -> Self {
        Self {
            name: String::from(name),
            node,
            size,
            attributes: ATTR_DIRECTORY,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    fn from_disk(entry: &DirEntry) -> Self {
        Self {
            name: String::from(entry.name()),
            node: entry.head,
            size: stored_size(entry.size),
            attributes: entry.attributes,
        }
    }
}

/// Resolves a path to the start of its chain
pub trait NodeFinder {
    /// `None`, or an entry with a null node, when nothing is at `path`
    fn find(&self, path: &str) -> Option<FileSystemEntry>;
}

/// Walks the directory tree of a mounted driver
pub struct DirectoryLister<'d, D: FsDriver + ?Sized> {
    driver: &'d D,
}

impl<'d, D: FsDriver + ?Sized> DirectoryLister<'d, D> {
    pub fn new(driver: &'d D) -> Self {
        Self { driver }
    }

    pub fn root(&self) -> FileSystemEntry {
        FileSystemEntry::directory(
            "/",
            self.driver.parameter(Parameter::RootNode),
            stored_size(self.driver.parameter(Parameter::RootSize)),
        )
    }

    /// Entries of directory `dir`, in on-disk order
    pub fn entries(&self, dir: &FileSystemEntry) -> Vec<FileSystemEntry> {
        let mut entries = Vec::new();
        self.scan(dir, |entry| {
            entries.push(FileSystemEntry::from_disk(entry));
            false
        });
        entries
    }

    /// Entries of the directory at `path`; `None` if it is not a directory
    pub fn list(&self, path: &str) -> Option<Vec<FileSystemEntry>> {
        let dir = self.find(path)?;
        if !dir.is_dir() {
            return None;
        }
        Some(self.entries(&dir))
    }

    fn lookup(&self, dir: &FileSystemEntry, name: &str) -> Option<FileSystemEntry> {
        let mut found = None;
        self.scan(dir, |entry| {
            if entry.name() == name {
                found = Some(FileSystemEntry::from_disk(entry));
                return true;
            }
            false
        });
        found
    }

    /// Feed each entry of `dir` to `visit` until it returns `true`
    fn scan<F: FnMut(&DirEntry) -> bool>(&self, dir: &FileSystemEntry, mut visit: F) {
        let size = dir.size.min(self.volume_bytes(dir.node));
        let mut file = File::with_node(self.driver, dir.node, size, FileConfig::default());
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        while file.read(&mut raw) == DIR_ENTRY_SIZE {
            let Some(entry) = DirEntry::decode(&raw) else {
                break;
            };
            if visit(&entry) {
                break;
            }
        }
    }

    /// Upper bound on any chain's length in bytes, so a cyclic chain
    /// still ends
    fn volume_bytes(&self, node: FsNode) -> u64 {
        let chunks = self.driver.parameter(Parameter::ChunkCount) as u64;
        if chunks == 0 {
            return u64::MAX;
        }
        let block_size = self.driver.parameter(Parameter::BlockSize) as u64;
        chunks * self.driver.blocks_per_node(node) as u64 * block_size
    }
}

impl<'d, D: FsDriver + ?Sized> NodeFinder for DirectoryLister<'d, D> {
    fn find(&self, path: &str) -> Option<FileSystemEntry> {
        let mut entry = self.root();
        for name in path.split('/').filter(|c| !c.is_empty()) {
            if !entry.is_dir() {
                return None;
            }
            entry = self.lookup(&entry, name)?;
        }
        Some(entry)
    }
}

/// Unknown directory sizes defer to the end of the chain
fn stored_size(size: u32) -> u64 {
    if size == UNKNOWN_SIZE {
        u64::MAX
    } else {
        size as u64
    }
}
