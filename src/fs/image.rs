// Block-structured boot filesystem image and a builder for it.
//
// Block 0: dir_count, inode_count, data_block_count (u32 each), 52 reserved
// bytes, then 64-byte directory entries. Blocks 1..=inode_count are inodes
// (length u32, then data block numbers). Data blocks follow.
use super::{Dentry, FileSystem, NAME_LEN, TYPE_DIRECTORY, TYPE_REGULAR, TYPE_RTC};
use crate::error::KernelError;

pub const BLOCK_SIZE: usize = 4096;
const STATS_SIZE: usize = 64;
const DENTRY_SIZE: usize = 64;
pub const MAX_DENTRIES: usize = (BLOCK_SIZE - STATS_SIZE) / DENTRY_SIZE;
const BLOCKS_PER_INODE: usize = BLOCK_SIZE / 4 - 1;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// A mounted image living in kernel memory.
#[derive(Clone, Copy)]
pub struct BootImage<'a> {
    bytes: &'a [u8],
    dir_count: usize,
    inode_count: usize,
    data_blocks: usize,
}

impl<'a> BootImage<'a> {
    pub fn mount(bytes: &'a [u8]) -> Result<Self, KernelError> {
        if bytes.len() < BLOCK_SIZE {
            return Err(KernelError::CorruptImage);
        }
        let image = BootImage {
            bytes,
            dir_count: read_u32(bytes, 0) as usize,
            inode_count: read_u32(bytes, 4) as usize,
            data_blocks: read_u32(bytes, 8) as usize,
        };
        let blocks = 1 + image.inode_count + image.data_blocks;
        if image.dir_count > MAX_DENTRIES || blocks * BLOCK_SIZE > bytes.len() {
            return Err(KernelError::CorruptImage);
        }
        for index in 0..image.dir_count {
            let dentry = image.raw_dentry(index);
            if dentry.file_type == TYPE_REGULAR && dentry.inode as usize >= image.inode_count {
                return Err(KernelError::CorruptImage);
            }
        }
        log::debug!(
            "mounted boot image: {} entries, {} inodes, {} data blocks",
            image.dir_count,
            image.inode_count,
            image.data_blocks
        );
        Ok(image)
    }

    fn raw_dentry(&self, index: usize) -> Dentry {
        let base = STATS_SIZE + index * DENTRY_SIZE;
        let file_type = read_u32(self.bytes, base + NAME_LEN);
        let inode = read_u32(self.bytes, base + NAME_LEN + 4);
        Dentry::new(&self.bytes[base..base + NAME_LEN], file_type, inode, 0)
    }

    fn inode_block(&self, inode: u32) -> &'a [u8] {
        let start = (1 + inode as usize) * BLOCK_SIZE;
        &self.bytes[start..start + BLOCK_SIZE]
    }

    fn data_block(&self, block: usize) -> &'a [u8] {
        let start = (1 + self.inode_count + block) * BLOCK_SIZE;
        &self.bytes[start..start + BLOCK_SIZE]
    }

    fn length(&self, inode: u32) -> usize {
        read_u32(self.inode_block(inode), 0) as usize
    }
}

impl FileSystem for BootImage<'_> {
    fn lookup(&self, name: &[u8]) -> Option<Dentry> {
        if name.is_empty() || name.len() > NAME_LEN {
            return None;
        }
        (0..self.dir_count)
            .map(|index| self.dentry_at(index))
            .find_map(|dentry| dentry.filter(|d| d.name() == name))
    }

    fn dentry_at(&self, index: usize) -> Option<Dentry> {
        if index >= self.dir_count {
            return None;
        }
        let mut dentry = self.raw_dentry(index);
        if dentry.file_type == TYPE_REGULAR {
            dentry.size = self.length(dentry.inode) as u32;
        }
        Some(dentry)
    }

    fn read(&self, inode: u32, offset: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        if inode as usize >= self.inode_count {
            return Err(KernelError::NotFound);
        }
        let length = self.length(inode);
        if offset >= length {
            return Ok(0);
        }
        let end = length.min(offset + buf.len());
        let table = self.inode_block(inode);
        let mut position = offset;
        while position < end {
            let index = position / BLOCK_SIZE;
            if index >= BLOCKS_PER_INODE {
                return Err(KernelError::CorruptImage);
            }
            let block = read_u32(table, 4 + index * 4) as usize;
            if block >= self.data_blocks {
                return Err(KernelError::CorruptImage);
            }
            let within = position % BLOCK_SIZE;
            let count = (BLOCK_SIZE - within).min(end - position);
            let copied = position - offset;
            buf[copied..copied + count]
                .copy_from_slice(&self.data_block(block)[within..within + count]);
            position += count;
        }
        Ok(end - offset)
    }
}

/// Lays out an image in a caller-provided buffer.
pub struct ImageBuilder<'a> {
    buf: &'a mut [u8],
    inode_capacity: usize,
    dentries: usize,
    inodes: usize,
    data_blocks: usize,
}

impl<'a> ImageBuilder<'a> {
    /// Reserve `inode_capacity` inode blocks; data blocks go after them.
    pub fn new(buf: &'a mut [u8], inode_capacity: usize) -> Self {
        buf.fill(0);
        ImageBuilder {
            buf,
            inode_capacity,
            dentries: 0,
            inodes: 0,
            data_blocks: 0,
        }
    }

    pub fn directory(&mut self, name: &[u8]) -> Result<&mut Self, KernelError> {
        self.add_dentry(name, TYPE_DIRECTORY, 0)?;
        Ok(self)
    }

    pub fn device(&mut self, name: &[u8]) -> Result<&mut Self, KernelError> {
        self.add_dentry(name, TYPE_RTC, 0)?;
        Ok(self)
    }

    pub fn file(&mut self, name: &[u8], contents: &[u8]) -> Result<&mut Self, KernelError> {
        let needed = contents.len().div_ceil(BLOCK_SIZE);
        let first_free = 1 + self.inode_capacity + self.data_blocks;
        if self.inodes >= self.inode_capacity
            || needed > BLOCKS_PER_INODE
            || (first_free + needed) * BLOCK_SIZE > self.buf.len()
        {
            return Err(KernelError::InvalidArgument);
        }
        let inode = self.inodes as u32;
        self.add_dentry(name, TYPE_REGULAR, inode)?;
        self.inodes += 1;

        let table = (1 + inode as usize) * BLOCK_SIZE;
        write_u32(self.buf, table, contents.len() as u32);
        for (index, chunk) in contents.chunks(BLOCK_SIZE).enumerate() {
            let block = self.data_blocks;
            write_u32(self.buf, table + 4 + index * 4, block as u32);
            let start = (first_free + index) * BLOCK_SIZE;
            self.buf[start..start + chunk.len()].copy_from_slice(chunk);
            self.data_blocks += 1;
        }
        Ok(self)
    }

    fn add_dentry(&mut self, name: &[u8], file_type: u32, inode: u32) -> Result<(), KernelError> {
        if name.is_empty() || name.len() > NAME_LEN || self.dentries >= MAX_DENTRIES {
            return Err(KernelError::InvalidArgument);
        }
        let base = STATS_SIZE + self.dentries * DENTRY_SIZE;
        self.buf[base..base + name.len()].copy_from_slice(name);
        write_u32(self.buf, base + NAME_LEN, file_type);
        write_u32(self.buf, base + NAME_LEN + 4, inode);
        self.dentries += 1;
        Ok(())
    }

    /// Write the boot block counts; returns how many bytes the image spans.
    pub fn finish(self) -> usize {
        write_u32(self.buf, 0, self.dentries as u32);
        write_u32(self.buf, 4, self.inode_capacity as u32);
        write_u32(self.buf, 8, self.data_blocks as u32);
        (1 + self.inode_capacity + self.data_blocks) * BLOCK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(buf: &mut [u8]) -> usize {
        let big: Vec<u8> = (0..BLOCK_SIZE + 100).map(|i| (i % 251) as u8).collect();
        let mut builder = ImageBuilder::new(buf, 4);
        builder
            .directory(b".")
            .and_then(|b| b.device(b"rtc"))
            .and_then(|b| b.file(b"frame0.txt", b"fish"))
            .and_then(|b| b.file(b"big", &big))
            .unwrap();
        builder.finish()
    }

    #[test]
    fn lookup_reports_type_inode_and_size() {
        let mut buf = vec![0u8; 16 * BLOCK_SIZE];
        let len = sample(&mut buf);
        let image = BootImage::mount(&buf[..len]).unwrap();

        let dot = image.lookup(b".").unwrap();
        assert_eq!(dot.file_type, TYPE_DIRECTORY);
        let rtc = image.lookup(b"rtc").unwrap();
        assert_eq!(rtc.file_type, TYPE_RTC);
        let fish = image.lookup(b"frame0.txt").unwrap();
        assert_eq!((fish.file_type, fish.inode, fish.size), (TYPE_REGULAR, 0, 4));

        assert!(image.lookup(b"frame0").is_none());
        assert!(image.lookup(&[b'a'; 33]).is_none());
        assert!(image.lookup(b"").is_none());
    }

    #[test]
    fn reads_span_block_boundaries_and_stop_at_the_end() {
        let mut buf = vec![0u8; 16 * BLOCK_SIZE];
        let len = sample(&mut buf);
        let image = BootImage::mount(&buf[..len]).unwrap();
        let big = image.lookup(b"big").unwrap();

        let mut out = [0u8; 200];
        let offset = BLOCK_SIZE - 50;
        assert_eq!(image.read(big.inode, offset, &mut out), Ok(150));
        for (i, &b) in out[..150].iter().enumerate() {
            assert_eq!(b, ((offset + i) % 251) as u8);
        }
        assert_eq!(image.read(big.inode, BLOCK_SIZE + 100, &mut out), Ok(0));
        assert_eq!(image.read(9, 0, &mut out), Err(KernelError::NotFound));
    }

    #[test]
    fn directory_order_is_insertion_order() {
        let mut buf = vec![0u8; 16 * BLOCK_SIZE];
        let len = sample(&mut buf);
        let image = BootImage::mount(&buf[..len]).unwrap();
        let names: Vec<Vec<u8>> = (0..)
            .map_while(|i| image.dentry_at(i))
            .map(|d| d.name().to_vec())
            .collect();
        assert_eq!(names, vec![b".".to_vec(), b"rtc".to_vec(), b"frame0.txt".to_vec(), b"big".to_vec()]);
    }

    #[test]
    fn truncated_or_inconsistent_images_are_rejected() {
        let mut buf = vec![0u8; 16 * BLOCK_SIZE];
        let len = sample(&mut buf);
        assert_eq!(
            BootImage::mount(&buf[..len - BLOCK_SIZE]).err(),
            Some(KernelError::CorruptImage)
        );
        assert_eq!(BootImage::mount(&buf[..100]).err(), Some(KernelError::CorruptImage));

        write_u32(&mut buf, 0, 200);
        assert_eq!(BootImage::mount(&buf[..len]).err(), Some(KernelError::CorruptImage));
    }

    #[test]
    fn builder_refuses_what_does_not_fit() {
        let mut buf = vec![0u8; 3 * BLOCK_SIZE];
        let mut builder = ImageBuilder::new(&mut buf, 1);
        assert!(builder.file(&[b'n'; 33], b"x").is_err());
        assert!(builder.file(b"a", &[0u8; BLOCK_SIZE + 1]).is_err());
        assert!(builder.file(b"a", b"ok").is_ok());
        assert!(builder.file(b"b", b"no inode left").is_err());
    }
}
