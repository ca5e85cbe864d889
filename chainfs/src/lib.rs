//! chainfs - buffered file access over chained storage chunks
//!
//! A file is stored as a forward-linked chain of chunks, each chunk spanning
//! one or more fixed-size blocks. [`File`] turns that chain into byte-level
//! read, seek and write-back with a single block-sized buffer.
//!
//! Layers:
//! - [`driver`]: the storage driver seam ([`FsDriver`]) the file handle talks to
//! - [`file`]: the file handle itself
//! - [`dir`]: path resolution ([`NodeFinder`]) and directory listing
//! - [`chain`], [`device`], [`layout`], [`builder`]: a reference on-disk format
//!   and the driver that serves it

#![no_std]

extern crate alloc;

pub mod builder;
pub mod chain;
pub mod config;
pub mod device;
pub mod dir;
pub mod driver;
pub mod file;
pub mod flags;
pub mod layout;

pub use builder::ImageBuilder;
pub use chain::ChainDriver;
pub use config::{FileConfig, WriteBack};
pub use device::{BlockDevice, RamDisk};
pub use dir::{DirectoryLister, FileSystemEntry, NodeFinder};
pub use driver::{FsDriver, FsNode, Parameter, END_OF_CHAIN, NULL_NODE};
pub use file::{File, FileError};
pub use flags::FileFlags;
