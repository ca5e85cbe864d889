//! Storage driver interface
//!
//! The file handle never touches a device directly. Block size, chunk
//! capacity, links and block contents all come through [`FsDriver`].
//!
//! ## Sharing
//!
//! Handles hold a plain `&D`, so one driver can back any number of open
//! files. All methods take `&self`; drivers that need mutable state keep it
//! behind interior mutability. Nothing here coordinates two handles that
//! touch the same chunks; that is up to the driver.

/// Identifier of a chunk in a chain. Opaque to the file handle.
pub type FsNode = u32;

/// "No file" / "nothing bound"
pub const NULL_NODE: FsNode = 0;

/// Link value marking the end of a chain
pub const END_OF_CHAIN: FsNode = 0xFFFF_FFFF;

/// Driver configuration values queried by the core
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parameter {
    /// Size of one block in bytes
    BlockSize,
    /// First chunk of the root directory
    RootNode,
    /// Byte size of the root directory (`u32::MAX` when unknown)
    RootSize,
    /// Chunks on the volume; 0 when the driver does not know
    ChunkCount,
}

/// Block/chunk storage driver
pub trait FsDriver {
    /// Query a fixed configuration parameter
    fn parameter(&self, param: Parameter) -> u32;

    /// Whether `node` is the terminal marker of a chain
    fn is_end_of_chain(&self, node: FsNode) -> bool;

    /// Number of fixed-size blocks spanned by `node`
    fn blocks_per_node(&self, node: FsNode) -> u32;

    /// Chunk following `node`, or a terminal marker
    fn next_chunk(&self, node: FsNode) -> FsNode;

    /// Read block `block` of chunk `node` into `buf` (one block long)
    fn read_block(&self, node: FsNode, block: u32, buf: &mut [u8]) -> Result<(), &'static str>;

    /// Write `buf` (one block long) to block `block` of chunk `node`
    fn write_block(&self, node: FsNode, block: u32, buf: &[u8]) -> Result<(), &'static str>;
}
