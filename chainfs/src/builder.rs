//! Image formatting
//!
//! Used by host tooling and tests to produce images the [`crate::ChainDriver`]
//! can mount. Chunks are handed out in order; nothing is ever freed.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use log::debug;

use crate::device::BlockDevice;
use crate::driver::{FsNode, END_OF_CHAIN};
use crate::layout::{
    write_u32, DirEntry, Superblock, ATTR_DIRECTORY, DIR_ENTRY_SIZE, LINK_SIZE, SUPERBLOCK_BLOCK,
};

/// Directory tree entry waiting to be written by `finish`
enum Pending {
    File { name: String, head: FsNode, size: u32 },
    Dir { name: String, children: Vec<Pending> },
}

impl Pending {
    fn name(&self) -> &str {
        match self {
            Pending::File { name, .. } | Pending::Dir { name, .. } => name,
        }
    }
}

pub struct ImageBuilder<B: BlockDevice> {
    dev: B,
    sb: Superblock,
    links: Vec<FsNode>,
    next_free: FsNode,
    root: Vec<Pending>,
}

impl<B: BlockDevice> ImageBuilder<B> {
    /// Lay out an empty image over the whole of `dev`
    pub fn format(dev: B, blocks_per_chunk: u32) -> Result<Self, &'static str> {
        let sb = Superblock::plan(dev.sector_size() as u32, blocks_per_chunk, dev.sector_count())?;
        let links = vec![END_OF_CHAIN; sb.chunk_count as usize + 1];
        Ok(Self {
            dev,
            sb,
            links,
            next_free: 1,
            root: Vec::new(),
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Chunks not yet handed out
    pub fn free_chunks(&self) -> u32 {
        self.sb.chunk_count + 1 - self.next_free
    }

    /// Store `data` under `path`, creating parent directories as needed.
    /// Returns the head chunk of the new file.
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<FsNode, &'static str> {
        let size = u32::try_from(data.len()).map_err(|_| "File too large")?;
        let (parents, name) = split_path(path)?;
        DirEntry::new(name, 0, size, 0)?;

        if self.directory(&parents)?.iter().any(|p| p.name() == name) {
            return Err("File exists");
        }

        let head = self.write_chain(data)?;
        self.directory(&parents)?.push(Pending::File {
            name: String::from(name),
            head,
            size,
        });
        debug!("chainfs: stored {} ({} bytes, head {})", path, size, head);
        Ok(head)
    }

    /// Create the directory `path` and any missing parents
    pub fn mkdir(&mut self, path: &str) -> Result<(), &'static str> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        for name in &components {
            DirEntry::new(name, ATTR_DIRECTORY, 0, 0)?;
        }
        self.directory(&components).map(|_| ())
    }

    /// Write directories, link table and superblock; hand back the device
    pub fn finish(mut self) -> Result<B, &'static str> {
        let root = core::mem::take(&mut self.root);
        let (root_node, root_size) = self.write_directory(root)?;
        self.sb.root_node = root_node;
        self.sb.root_size = root_size;

        let block_size = self.sb.block_size as usize;
        let links_per_block = block_size / LINK_SIZE;
        let mut buf = vec![0u8; block_size];
        for i in 0..self.sb.link_blocks as usize {
            buf.fill(0);
            for j in 0..links_per_block {
                if let Some(&link) = self.links.get(i * links_per_block + j) {
                    write_u32(&mut buf, j * LINK_SIZE, link);
                }
            }
            self.dev.write_sector(self.sb.link_start as u64 + i as u64, &buf)?;
        }

        buf.fill(0);
        self.sb.encode(&mut buf);
        self.dev.write_sector(SUPERBLOCK_BLOCK, &buf)?;
        debug!(
            "chainfs: image finished, {} of {} chunks used",
            self.next_free - 1,
            self.sb.chunk_count
        );
        Ok(self.dev)
    }

    fn directory(&mut self, components: &[&str]) -> Result<&mut Vec<Pending>, &'static str> {
        let mut dir = &mut self.root;
        for name in components {
            dir = subdirectory(dir, name)?;
        }
        Ok(dir)
    }

    fn write_directory(&mut self, children: Vec<Pending>) -> Result<(FsNode, u32), &'static str> {
        let mut raw = Vec::with_capacity(children.len() * DIR_ENTRY_SIZE);
        for child in children {
            let entry = match child {
                Pending::File { name, head, size } => DirEntry::new(&name, 0, size, head)?,
                Pending::Dir { name, children } => {
                    let (head, size) = self.write_directory(children)?;
                    DirEntry::new(&name, ATTR_DIRECTORY, size, head)?
                }
            };
            raw.extend_from_slice(&entry.encode());
        }
        let head = self.write_chain(&raw)?;
        Ok((head, raw.len() as u32))
    }

    /// Allocate a chain big enough for `data` (at least one chunk) and fill it
    fn write_chain(&mut self, data: &[u8]) -> Result<FsNode, &'static str> {
        let chunk_bytes = self.sb.chunk_bytes();
        let chunks = data.len().div_ceil(chunk_bytes).max(1);
        if chunks as u64 > self.free_chunks() as u64 {
            return Err("Disk full");
        }

        let head = self.next_free;
        let block_size = self.sb.block_size as usize;
        let mut buf = vec![0u8; block_size];
        let mut prev: Option<FsNode> = None;

        for (index, piece) in pieces(data, chunk_bytes, chunks).enumerate() {
            let node = head + index as FsNode;
            if let Some(prev) = prev {
                self.links[prev as usize] = node;
            }
            self.links[node as usize] = END_OF_CHAIN;

            for block in 0..self.sb.blocks_per_chunk {
                let start = block as usize * block_size;
                buf.fill(0);
                if start < piece.len() {
                    let end = piece.len().min(start + block_size);
                    buf[..end - start].copy_from_slice(&piece[start..end]);
                }
                self.dev.write_sector(self.sb.chunk_block(node, block), &buf)?;
            }
            prev = Some(node);
        }

        self.next_free += chunks as FsNode;
        Ok(head)
    }
}

/// `data` cut into `count` chunk-sized pieces, the tail ones possibly empty
fn pieces(data: &[u8], chunk_bytes: usize, count: usize) -> impl Iterator<Item = &[u8]> {
    (0..count).map(move |i| {
        let start = (i * chunk_bytes).min(data.len());
        let end = (start + chunk_bytes).min(data.len());
        &data[start..end]
    })
}

fn split_path(path: &str) -> Result<(Vec<&str>, &str), &'static str> {
    let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let name = components.pop().ok_or("Empty path")?;
    Ok((components, name))
}

fn subdirectory<'a>(children: &'a mut Vec<Pending>, name: &str) -> Result<&'a mut Vec<Pending>, &'static str> {
    let index = match children.iter().position(|p| p.name() == name) {
        Some(index) => index,
        None => {
            children.push(Pending::Dir {
                name: String::from(name),
                children: Vec::new(),
            });
            children.len() - 1
        }
    };
    match &mut children[index] {
        Pending::Dir { children, .. } => Ok(children),
        Pending::File { .. } => Err("Not a directory"),
    }
}
