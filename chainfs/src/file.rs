//! Buffered file handle over a chunk chain
//!
//! A [`File`] keeps exactly one block of the file in memory and tracks where
//! that block sits in the chain:
//!
//! - `current`: chunk holding the buffered block (`None` until first access)
//! - `block_in_chunk`: index of the buffered block inside `current`
//! - `position_in_file`: file offset of the first byte of the buffered block
//! - `position_in_buffer`: next byte to hand out; `block_size` means exhausted
//!
//! The chain only links forward, so moving backwards means walking again
//! from the first chunk. The declared file size, not the chain length,
//! decides where the file ends.

use alloc::vec::Vec;
use core::fmt;

use log::{debug, trace, warn};

use crate::config::{FileConfig, WriteBack};
use crate::dir::NodeFinder;
use crate::driver::{FsDriver, FsNode, Parameter, NULL_NODE};
use crate::flags::FileFlags;

/// Errors reported by the fallible lifecycle calls of [`File`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileError {
    /// The block buffer could not be allocated
    OutOfMemory,
    /// Path resolution found no file
    NotFound,
    /// Handle was not opened writable
    ReadOnly,
    /// The driver failed a block transfer
    Io(&'static str),
}

impl FileError {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileError::OutOfMemory => "Out of memory",
            FileError::NotFound => "File not found",
            FileError::ReadOnly => "File is read-only",
            FileError::Io(msg) => msg,
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of moving one block forward
enum Step {
    Loaded,
    EndOfChain,
    Failed,
}

/// Open file handle
pub struct File<'d, D: FsDriver + ?Sized> {
    driver: &'d D,
    first_node: FsNode,
    current: Option<FsNode>,
    block_in_chunk: u32,
    size: u64,
    position_in_file: u64,
    position_in_buffer: usize,
    buffer: Option<Vec<u8>>,
    /// Buffer holds the block at (`current`, `block_in_chunk`)
    loaded: bool,
    block_size: usize,
    flags: FileFlags,
    write_back: WriteBack,
    max_block_buffer: usize,
}

impl<'d, D: FsDriver + ?Sized> File<'d, D> {
    /// Handle bound to nothing. Reads as an exhausted, missing file.
    pub fn new(driver: &'d D) -> Self {
        Self::unbound(driver, FileConfig::default())
    }

    /// Handle bound to a known chain, bypassing path resolution.
    ///
    /// Used for directory listing and by callers that already hold an entry.
    pub fn with_node(driver: &'d D, node: FsNode, size: u64, config: FileConfig) -> Self {
        let mut file = Self::unbound(driver, config);
        file.flags.remove(FileFlags::MISSING);
        file.first_node = node;
        file.size = size;
        if !file.allocate_buffer() {
            file.flags |= FileFlags::INERT;
        }
        if node == NULL_NODE {
            file.flags |= FileFlags::MISSING;
        }
        file
    }

    /// Resolve `path` through `finder` and bind the handle to it.
    ///
    /// Failures are recorded in the flags; use [`File::open_path`] to get
    /// them as a `Result`.
    pub fn open<F: NodeFinder + ?Sized>(
        driver: &'d D,
        finder: &F,
        path: &str,
        config: FileConfig,
    ) -> Self {
        let mut file = Self::unbound(driver, config);
        if let Err(e) = file.open_path(finder, path) {
            debug!("chainfs: open {} failed: {}", path, e);
        }
        file
    }

    fn unbound(driver: &'d D, config: FileConfig) -> Self {
        let block_size = driver.parameter(Parameter::BlockSize) as usize;
        let mut flags = FileFlags::MISSING;
        if config.writable {
            flags |= FileFlags::WRITABLE;
        }
        Self {
            driver,
            first_node: NULL_NODE,
            current: None,
            block_in_chunk: 0,
            size: 0,
            position_in_file: 0,
            position_in_buffer: block_size,
            buffer: None,
            loaded: false,
            block_size,
            flags,
            write_back: config.write_back,
            max_block_buffer: config.max_block_buffer,
        }
    }

    /// (Re)bind this handle to the file at `path`.
    ///
    /// The previous binding gets a last flush. The block buffer is reused
    /// when the driver's block size has not changed.
    pub fn open_path<F: NodeFinder + ?Sized>(
        &mut self,
        finder: &F,
        path: &str,
    ) -> Result<(), FileError> {
        self.flush();
        self.block_size = self.driver.parameter(Parameter::BlockSize) as usize;
        self.reset_position();
        self.flags
            .remove(FileFlags::MISSING | FileFlags::BUFFER_DIRTY | FileFlags::OUT_OF_MEMORY);

        if !self.allocate_buffer() {
            self.first_node = NULL_NODE;
            self.size = 0;
            self.flags |= FileFlags::INERT | FileFlags::MISSING;
            return Err(FileError::OutOfMemory);
        }

        match finder.find(path) {
            Some(entry) if entry.node != NULL_NODE => {
                self.first_node = entry.node;
                self.size = entry.size;
                debug!(
                    "chainfs: opened {} (node {}, {} bytes)",
                    path, entry.node, entry.size
                );
                Ok(())
            }
            _ => {
                self.first_node = NULL_NODE;
                self.size = 0;
                self.flags |= FileFlags::MISSING;
                Err(FileError::NotFound)
            }
        }
    }

    fn reset_position(&mut self) {
        self.current = None;
        self.block_in_chunk = 0;
        self.position_in_file = 0;
        self.position_in_buffer = self.block_size;
        self.loaded = false;
    }

    fn allocate_buffer(&mut self) -> bool {
        if let Some(buffer) = &self.buffer {
            if buffer.len() == self.block_size {
                return true;
            }
        }
        self.buffer = None;

        if self.block_size == 0 || self.block_size > self.max_block_buffer {
            warn!(
                "chainfs: block size {} outside buffer budget {}",
                self.block_size, self.max_block_buffer
            );
            return false;
        }

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(self.block_size).is_err() {
            warn!("chainfs: cannot allocate {} byte block buffer", self.block_size);
            return false;
        }
        buffer.resize(self.block_size, 0);
        self.buffer = Some(buffer);
        true
    }

    // ═══════════════════════════════════════════════════════════════════════
    // State queries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn eof(&self) -> bool {
        self.flags.contains(FileFlags::EOF)
    }

    pub fn exists(&self) -> bool {
        !self.flags.contains(FileFlags::NOT_EXISTS)
    }

    pub fn flags(&self) -> FileFlags {
        self.flags
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn first_node(&self) -> FsNode {
        self.first_node
    }

    /// Chunk of the buffered block, if any block was loaded yet
    pub fn current_node(&self) -> Option<FsNode> {
        self.current
    }

    /// Absolute byte offset of the cursor
    pub fn position(&self) -> u64 {
        match self.current {
            Some(_) => self.position_in_file + self.position_in_buffer as u64,
            None => 0,
        }
    }

    fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Chain traversal
    // ═══════════════════════════════════════════════════════════════════════

    /// Read block `block` of `node` into the buffer and make it current.
    ///
    /// `position_in_buffer` is left to the caller. On failure the position
    /// bookkeeping is untouched and the buffer is marked unloaded.
    fn load_block(&mut self, node: FsNode, block: u32, position: u64) -> Step {
        let Some(buffer) = self.buffer.as_mut() else {
            return Step::Failed;
        };
        if self.loaded && self.flags.contains(FileFlags::BUFFER_DIRTY) {
            if let Some(current) = self.current {
                warn!(
                    "chainfs: discarding unsaved block {} of node {}",
                    self.block_in_chunk, current
                );
            }
        }
        self.flags.remove(FileFlags::BUFFER_DIRTY);

        trace!("chainfs: load node {} block {} at {}", node, block, position);
        match self.driver.read_block(node, block, buffer.as_mut_slice()) {
            Ok(()) => {
                self.current = Some(node);
                self.block_in_chunk = block;
                self.position_in_file = position;
                self.loaded = true;
                Step::Loaded
            }
            Err(e) => {
                warn!("chainfs: read of node {} block {} failed: {}", node, block, e);
                self.loaded = false;
                Step::Failed
            }
        }
    }

    /// Reload the current block after an earlier failed load
    fn ensure_loaded(&mut self) -> bool {
        match self.current {
            Some(node) if !self.loaded => matches!(
                self.load_block(node, self.block_in_chunk, self.position_in_file),
                Step::Loaded
            ),
            _ => true,
        }
    }

    /// Move one block forward along the chain and load it
    fn advance_block(&mut self) -> Step {
        let Some(current) = self.current else {
            if self.first_node == NULL_NODE || self.driver.is_end_of_chain(self.first_node) {
                self.flags |= FileFlags::EOF;
                return Step::EndOfChain;
            }
            return self.load_block(self.first_node, 0, 0);
        };

        if self.driver.is_end_of_chain(current) {
            self.flags |= FileFlags::EOF;
            return Step::EndOfChain;
        }

        if !self.try_write_back() {
            return Step::Failed;
        }

        let mut node = current;
        let mut block = self.block_in_chunk + 1;
        if block >= self.driver.blocks_per_node(current) {
            let next = self.driver.next_chunk(current);
            block = 0;
            if self.driver.is_end_of_chain(next) {
                self.flags |= FileFlags::EOF;
                return Step::EndOfChain;
            }
            self.flags.remove(FileFlags::EOF);
            node = next;
        }

        let position = self.position_in_file + self.block_size as u64;
        self.load_block(node, block, position)
    }

    /// Make the byte under the cursor available in the buffer
    fn fill(&mut self) -> bool {
        if self.buffer.is_none() || !self.ensure_loaded() {
            return false;
        }
        if self.position() >= self.size {
            self.flags |= FileFlags::EOF;
            return false;
        }
        if self.current.is_none() || self.position_in_buffer >= self.block_size {
            if !matches!(self.advance_block(), Step::Loaded) {
                return false;
            }
            self.position_in_buffer = 0;
        }
        true
    }

    fn update_eof(&mut self) {
        if self.position() >= self.size {
            self.flags |= FileFlags::EOF;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reading
    // ═══════════════════════════════════════════════════════════════════════

    /// Read the byte under the cursor.
    ///
    /// `None` means no progress: no buffer, no file, or the end of the file
    /// (or of the chain) was reached.
    pub fn read_byte(&mut self) -> Option<u8> {
        if !self.fill() {
            return None;
        }
        let value = self.buffer.as_ref()?[self.position_in_buffer];
        self.position_in_buffer += 1;
        self.update_eof();
        Some(value)
    }

    /// Read up to `dest.len()` bytes, returning how many were copied.
    ///
    /// A short count is the normal end-of-file signal; check [`File::eof`].
    pub fn read(&mut self, dest: &mut [u8]) -> usize {
        if self.buffer.is_none() || !self.ensure_loaded() {
            return 0;
        }

        let mut copied = 0;
        if self.current.is_some() {
            let in_buffer = self.block_size.saturating_sub(self.position_in_buffer);
            let count = clamp(dest.len().min(in_buffer), self.remaining());
            if let Some(buffer) = &self.buffer {
                let start = self.position_in_buffer;
                dest[..count].copy_from_slice(&buffer[start..start + count]);
            }
            self.position_in_buffer += count;
            copied = count;
        }

        while copied < dest.len() && self.position() < self.size {
            if !matches!(self.advance_block(), Step::Loaded) {
                break;
            }

            let available = self.size.saturating_sub(self.position_in_file);
            let mut count = (dest.len() - copied).min(self.block_size);
            if count as u64 > available {
                count = available as usize;
                self.flags |= FileFlags::EOF;
            }
            self.position_in_buffer = count;

            let Some(buffer) = &self.buffer else {
                break;
            };
            dest[copied..copied + count].copy_from_slice(&buffer[..count]);
            copied += count;
        }

        self.update_eof();
        copied
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Writing (in place, never past the declared size)
    // ═══════════════════════════════════════════════════════════════════════

    /// Overwrite the byte under the cursor
    pub fn write_byte(&mut self, value: u8) -> bool {
        if !self.flags.contains(FileFlags::WRITABLE) || !self.fill() {
            return false;
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return false;
        };
        buffer[self.position_in_buffer] = value;
        self.position_in_buffer += 1;
        self.flags |= FileFlags::BUFFER_DIRTY;
        self.update_eof();
        true
    }

    /// Overwrite up to `src.len()` bytes, returning how many were written
    pub fn write(&mut self, src: &[u8]) -> usize {
        if !self.flags.contains(FileFlags::WRITABLE) {
            return 0;
        }

        let mut written = 0;
        while written < src.len() && self.fill() {
            let in_buffer = self.block_size - self.position_in_buffer;
            let count = clamp((src.len() - written).min(in_buffer), self.remaining());
            let Some(buffer) = self.buffer.as_mut() else {
                break;
            };
            let start = self.position_in_buffer;
            buffer[start..start + count].copy_from_slice(&src[written..written + count]);
            self.position_in_buffer += count;
            self.flags |= FileFlags::BUFFER_DIRTY;
            written += count;
        }

        self.update_eof();
        written
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Seeking
    // ═══════════════════════════════════════════════════════════════════════

    /// Move the cursor to absolute offset `pos`.
    ///
    /// Returns `false` without moving when there is no buffer or file,
    /// `pos` is at or past the end, or the chain ends before `pos`.
    pub fn seek(&mut self, pos: u64) -> bool {
        if self.buffer.is_none() || self.first_node == NULL_NODE || pos >= self.size {
            return false;
        }
        let block_size = self.block_size as u64;

        if self.current.is_some()
            && self.loaded
            && pos >= self.position_in_file
            && pos < self.position_in_file + block_size
        {
            self.position_in_buffer = (pos - self.position_in_file) as usize;
            self.flags.remove(FileFlags::EOF);
            return true;
        }

        // No backward links: start over from the head when moving back
        let (mut node, mut block, mut offset) = match self.current {
            Some(node) if pos >= self.position_in_file => {
                (node, self.block_in_chunk, self.position_in_file)
            }
            _ => (self.first_node, 0, 0),
        };
        if self.driver.is_end_of_chain(node) {
            return false;
        }

        while pos >= offset + block_size {
            block += 1;
            if block >= self.driver.blocks_per_node(node) {
                let next = self.driver.next_chunk(node);
                if self.driver.is_end_of_chain(next) {
                    debug!("chainfs: seek to {} ran off the chain at {}", pos, offset);
                    return false;
                }
                node = next;
                block = 0;
            }
            offset += block_size;
        }

        if !self.try_write_back() {
            return false;
        }
        if !matches!(self.load_block(node, block, offset), Step::Loaded) {
            return false;
        }
        self.position_in_buffer = (pos - offset) as usize;
        self.flags.remove(FileFlags::EOF);
        debug!("chainfs: seek to {} (node {} block {})", pos, node, block);
        true
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Write-back
    // ═══════════════════════════════════════════════════════════════════════

    /// Opportunistic write-back of the buffered block.
    ///
    /// Writes only for a writable handle holding a dirty block, and under
    /// [`WriteBack::ChainEnd`] only while the driver reports the current
    /// chunk at the end of its chain.
    pub fn flush(&mut self) {
        self.try_write_back();
    }

    /// `false` only when a triggered write-back failed; the buffer then
    /// stays dirty and must not be replaced.
    fn try_write_back(&mut self) -> bool {
        let Some(buffer) = &self.buffer else {
            return true;
        };
        let Some(node) = self.current else {
            return true;
        };
        if !self.loaded || !self.flags.contains(FileFlags::BUFFER_DIRTY | FileFlags::WRITABLE) {
            return true;
        }
        let triggered = match self.write_back {
            WriteBack::ChainEnd => self.driver.is_end_of_chain(node),
            WriteBack::EveryBlock => true,
        };
        if !triggered {
            return true;
        }

        match self.driver.write_block(node, self.block_in_chunk, buffer) {
            Ok(()) => {
                trace!("chainfs: wrote back node {} block {}", node, self.block_in_chunk);
                self.flags.remove(FileFlags::BUFFER_DIRTY);
                true
            }
            Err(e) => {
                warn!(
                    "chainfs: write-back of node {} block {} failed: {}",
                    node, self.block_in_chunk, e
                );
                false
            }
        }
    }

    /// Write a dirty buffer back regardless of the write-back policy
    pub fn sync(&mut self) -> Result<(), FileError> {
        if !self.flags.contains(FileFlags::WRITABLE) {
            return Err(FileError::ReadOnly);
        }
        let Some(buffer) = &self.buffer else {
            return Err(FileError::OutOfMemory);
        };
        let Some(node) = self.current else {
            return Ok(());
        };
        if !self.loaded || !self.flags.contains(FileFlags::BUFFER_DIRTY) {
            return Ok(());
        }

        self.driver
            .write_block(node, self.block_in_chunk, buffer)
            .map_err(FileError::Io)?;
        self.flags.remove(FileFlags::BUFFER_DIRTY);
        Ok(())
    }
}

impl<'d, D: FsDriver + ?Sized> Drop for File<'d, D> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// `count` bounded by a byte budget that may exceed `usize`
fn clamp(count: usize, budget: u64) -> usize {
    if count as u64 > budget {
        budget as usize
    } else {
        count
    }
}
