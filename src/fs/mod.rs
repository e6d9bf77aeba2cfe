// Read-only filesystem interface consumed by the process core
use crate::error::KernelError;

pub mod image;

pub use image::{BootImage, ImageBuilder, BLOCK_SIZE};

/// Longest file name, in bytes
pub const NAME_LEN: usize = 32;

/// File type tags stored in directory entries
pub const TYPE_RTC: u32 = 0;
pub const TYPE_DIRECTORY: u32 = 1;
pub const TYPE_REGULAR: u32 = 2;

/// A directory entry as the filesystem reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dentry {
    name: [u8; NAME_LEN],
    pub file_type: u32,
    pub inode: u32,
    /// Length in bytes; zero for anything but regular files
    pub size: u32,
}

impl Dentry {
    pub fn new(name: &[u8], file_type: u32, inode: u32, size: u32) -> Self {
        let mut padded = [0u8; NAME_LEN];
        let len = name.len().min(NAME_LEN);
        padded[..len].copy_from_slice(&name[..len]);
        Dentry {
            name: padded,
            file_type,
            inode,
            size,
        }
    }

    /// Name without its NUL padding. A full-length name has no terminator.
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..len]
    }
}

pub trait FileSystem {
    /// Find the entry called `name`.
    fn lookup(&self, name: &[u8]) -> Option<Dentry>;

    /// Entry `index` in directory order, or `None` past the last one.
    fn dentry_at(&self, index: usize) -> Option<Dentry>;

    /// Copy bytes of `inode` starting at `offset`; returns how many were copied.
    fn read(&self, inode: u32, offset: usize, buf: &mut [u8]) -> Result<usize, KernelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_at_the_first_nul() {
        let dentry = Dentry::new(b"ls", TYPE_REGULAR, 3, 10);
        assert_eq!(dentry.name(), b"ls");

        let long = [b'x'; NAME_LEN];
        assert_eq!(Dentry::new(&long, TYPE_REGULAR, 0, 0).name().len(), NAME_LEN);
    }
}
