//! Constants and per-handle configuration

/// Block size used by freshly formatted images
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Blocks per chunk used by freshly formatted images
pub const DEFAULT_BLOCKS_PER_CHUNK: u32 = 4;

/// Largest block buffer a handle will allocate unless told otherwise
pub const MAX_BLOCK_BUFFER: usize = 64 * 1024;

/// When a dirty block buffer is written back by `File::flush`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WriteBack {
    /// Only while the driver reports the current chunk at the end of its chain
    #[default]
    ChainEnd,
    /// Whenever a dirty block is about to be abandoned
    EveryBlock,
}

/// Options fixed when a handle is constructed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileConfig {
    /// Allow `write`/`write_byte` and write-back
    pub writable: bool,
    /// Write-back trigger for `flush`
    pub write_back: WriteBack,
    /// Memory budget for the block buffer, in bytes
    pub max_block_buffer: usize,
}

impl FileConfig {
    /// Read-only handle with the chain-end write-back trigger
    pub const fn read_only() -> Self {
        Self {
            writable: false,
            write_back: WriteBack::ChainEnd,
            max_block_buffer: MAX_BLOCK_BUFFER,
        }
    }

    /// Writable handle that writes back every dirty block it leaves
    pub const fn writable() -> Self {
        Self {
            writable: true,
            write_back: WriteBack::EveryBlock,
            max_block_buffer: MAX_BLOCK_BUFFER,
        }
    }

    pub const fn with_write_back(mut self, write_back: WriteBack) -> Self {
        self.write_back = write_back;
        self
    }

    pub const fn with_max_block_buffer(mut self, bytes: usize) -> Self {
        self.max_block_buffer = bytes;
        self
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self::read_only()
    }
}
