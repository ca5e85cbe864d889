//! File handle status flags

bitflags::bitflags! {
    /// Independent status facts about an open file
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FileFlags: u8 {
        /// Cursor reached the logical end of the file
        const EOF = 1 << 0;
        /// No file is bound to the handle
        const NOT_EXISTS = 1 << 1;
        /// The block buffer could not be allocated
        const OUT_OF_MEMORY = 1 << 2;
        /// Handle was opened for writing
        const WRITABLE = 1 << 3;
        /// Buffer contents changed since the block was loaded
        const BUFFER_DIRTY = 1 << 4;

        /// A missing file always reads as exhausted
        const MISSING = Self::EOF.bits() | Self::NOT_EXISTS.bits();
        /// So does a handle without a buffer
        const INERT = Self::EOF.bits() | Self::OUT_OF_MEMORY.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_implies_eof() {
        let flags = FileFlags::MISSING;
        assert!(flags.contains(FileFlags::EOF));
        assert!(flags.contains(FileFlags::NOT_EXISTS));
        assert!(!flags.contains(FileFlags::OUT_OF_MEMORY));
    }

    #[test]
    fn test_inert_implies_eof() {
        let mut flags = FileFlags::WRITABLE;
        flags |= FileFlags::INERT;
        assert!(flags.contains(FileFlags::EOF | FileFlags::OUT_OF_MEMORY));
        flags.remove(FileFlags::EOF);
        assert!(flags.contains(FileFlags::OUT_OF_MEMORY));
        assert!(flags.contains(FileFlags::WRITABLE));
    }
}
