// Per-process file descriptor table and the closed set of file capabilities
use crate::config::RTC_DEFAULT_HZ;
use crate::error::KernelError;
use crate::fs::{Dentry, FileSystem, NAME_LEN, TYPE_DIRECTORY, TYPE_REGULAR, TYPE_RTC};
use crate::rtc::{self, Rtc};
use crate::terminal::Terminals;

/// Descriptor slots per process
pub const MAX_FILES: usize = 8;
pub const STDIN: usize = 0;
pub const STDOUT: usize = 1;
/// First slot `open` may hand out
const FIRST_USER_FD: usize = 2;

/// Which implementation a descriptor is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Stdin,
    Stdout,
    Rtc,
    Directory,
    Regular,
}

/// What a capability may touch while serving a call.
pub struct IoContext<'a, F> {
    pub fs: &'a F,
    pub terminals: &'a mut Terminals,
    pub rtc: &'a Rtc,
    /// Terminal of the calling process
    pub terminal: usize,
}

/// One descriptor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub kind: FileKind,
    /// Inode for regular files, rate in Hz for the RTC, unused otherwise
    pub inode: u32,
    /// Byte offset, directory index, or pending RTC deadline
    pub position: u64,
    pub in_use: bool,
}

impl FileDescriptor {
    const UNUSED: FileDescriptor = FileDescriptor {
        kind: FileKind::Regular,
        inode: 0,
        position: 0,
        in_use: false,
    };

    fn bound(kind: FileKind, inode: u32) -> Self {
        FileDescriptor {
            kind,
            inode,
            position: 0,
            in_use: true,
        }
    }
}

impl FileKind {
    /// Pick the implementation for a directory entry's type tag.
    pub fn from_type(file_type: u32) -> Result<Self, KernelError> {
        match file_type {
            TYPE_RTC => Ok(FileKind::Rtc),
            TYPE_DIRECTORY => Ok(FileKind::Directory),
            TYPE_REGULAR => Ok(FileKind::Regular),
            _ => Err(KernelError::UnknownFileType),
        }
    }

    /// A freshly opened descriptor for `dentry`.
    pub fn open(self, dentry: &Dentry) -> FileDescriptor {
        match self {
            FileKind::Rtc => FileDescriptor::bound(self, RTC_DEFAULT_HZ),
            FileKind::Regular => FileDescriptor::bound(self, dentry.inode),
            FileKind::Stdin | FileKind::Stdout | FileKind::Directory => {
                FileDescriptor::bound(self, 0)
            }
        }
    }

    pub fn read<F: FileSystem>(
        self,
        file: &mut FileDescriptor,
        io: &mut IoContext<'_, F>,
        buf: &mut [u8],
    ) -> Result<usize, KernelError> {
        match self {
            FileKind::Stdin => io
                .terminals
                .read_line(io.terminal, buf)
                .ok_or(KernelError::WouldBlock),
            FileKind::Stdout => Err(KernelError::InvalidArgument),
            FileKind::Rtc => {
                let now = io.rtc.now();
                if file.position == 0 {
                    file.position = rtc::next_deadline(now, file.inode);
                    return Err(KernelError::WouldBlock);
                }
                if now < file.position {
                    return Err(KernelError::WouldBlock);
                }
                file.position = 0;
                Ok(0)
            }
            FileKind::Directory => {
                if buf.is_empty() {
                    return Ok(0);
                }
                let Some(dentry) = io.fs.dentry_at(file.position as usize) else {
                    return Ok(0);
                };
                let name = dentry.name();
                let count = name.len().min(buf.len()).min(NAME_LEN);
                buf[..count].copy_from_slice(&name[..count]);
                file.position += 1;
                Ok(count)
            }
            FileKind::Regular => {
                let count = io.fs.read(file.inode, file.position as usize, buf)?;
                file.position += count as u64;
                Ok(count)
            }
        }
    }

    pub fn write<F: FileSystem>(
        self,
        file: &mut FileDescriptor,
        io: &mut IoContext<'_, F>,
        buf: &[u8],
    ) -> Result<usize, KernelError> {
        match self {
            FileKind::Stdout => {
                io.terminals.write(io.terminal, buf);
                Ok(buf.len())
            }
            FileKind::Rtc => {
                file.inode = rtc::parse_frequency(buf)?;
                file.position = 0;
                Ok(0)
            }
            FileKind::Stdin | FileKind::Directory | FileKind::Regular => {
                Err(KernelError::InvalidArgument)
            }
        }
    }

    pub fn close(self, file: &mut FileDescriptor) -> Result<(), KernelError> {
        match self {
            FileKind::Stdin | FileKind::Stdout => Err(KernelError::DescriptorNotCloseable),
            FileKind::Rtc | FileKind::Directory | FileKind::Regular => {
                *file = FileDescriptor::UNUSED;
                Ok(())
            }
        }
    }
}

/// Fixed-size descriptor table; slots 0 and 1 stay bound for the process lifetime.
#[derive(Debug, Clone, Copy)]
pub struct FdTable {
    slots: [FileDescriptor; MAX_FILES],
}

impl FdTable {
    pub const fn empty() -> Self {
        FdTable {
            slots: [FileDescriptor::UNUSED; MAX_FILES],
        }
    }

    /// All slots cleared except standard input and output.
    pub fn with_stdio() -> Self {
        let mut table = Self::empty();
        table.slots[STDIN] = FileDescriptor::bound(FileKind::Stdin, 0);
        table.slots[STDOUT] = FileDescriptor::bound(FileKind::Stdout, 0);
        table
    }

    /// Bind `file` to the lowest free slot at or above 2.
    pub fn install(&mut self, file: FileDescriptor) -> Result<usize, KernelError> {
        let fd = (FIRST_USER_FD..MAX_FILES)
            .find(|&fd| !self.slots[fd].in_use)
            .ok_or(KernelError::DescriptorTableFull)?;
        self.slots[fd] = file;
        Ok(fd)
    }

    /// The bound descriptor at `fd`.
    pub fn get_mut(&mut self, fd: usize) -> Result<&mut FileDescriptor, KernelError> {
        self.slots
            .get_mut(fd)
            .filter(|slot| slot.in_use)
            .ok_or(KernelError::InvalidDescriptor)
    }

    pub fn close(&mut self, fd: usize) -> Result<(), KernelError> {
        if fd == STDIN || fd == STDOUT {
            return Err(KernelError::DescriptorNotCloseable);
        }
        let file = self.get_mut(fd)?;
        file.kind.close(file)
    }

    /// Close every user-opened descriptor, as on process exit.
    pub fn close_all(&mut self) {
        for fd in FIRST_USER_FD..MAX_FILES {
            if self.slots[fd].in_use {
                // Only stdio refuses to close and it never sits in these slots.
                let _ = self.close(fd);
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }
}
