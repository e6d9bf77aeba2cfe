// Kernel error taxonomy shared by the process core and its collaborators
use core::fmt;

/// Every way a kernel operation can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    NoFreeProcessSlot,
    NotExecutable,
    ImageTooSmall,
    ImageTooLarge,
    BadMagic,
    NotFound,
    InvalidDescriptor,
    DescriptorNotCloseable,
    DescriptorTableFull,
    UnknownFileType,
    NoArguments,
    ArgumentBufferTooSmall,
    InvalidArgument,
    InvalidSyscall,
    CorruptImage,
    /// The operation cannot complete yet and must be retried later.
    WouldBlock,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::NoFreeProcessSlot => write!(f, "No free process slot"),
            KernelError::NotExecutable => write!(f, "File is not executable"),
            KernelError::ImageTooSmall => write!(f, "Program image too small"),
            KernelError::ImageTooLarge => write!(f, "Program image too large"),
            KernelError::BadMagic => write!(f, "Bad executable magic"),
            KernelError::NotFound => write!(f, "File not found"),
            KernelError::InvalidDescriptor => write!(f, "Invalid file descriptor"),
            KernelError::DescriptorNotCloseable => write!(f, "Descriptor cannot be closed"),
            KernelError::DescriptorTableFull => write!(f, "Descriptor table full"),
            KernelError::UnknownFileType => write!(f, "Unknown file type"),
            KernelError::NoArguments => write!(f, "No arguments"),
            KernelError::ArgumentBufferTooSmall => write!(f, "Argument buffer too small"),
            KernelError::InvalidArgument => write!(f, "Invalid argument"),
            KernelError::InvalidSyscall => write!(f, "Invalid syscall number"),
            KernelError::CorruptImage => write!(f, "Corrupt filesystem image"),
            KernelError::WouldBlock => write!(f, "Operation would block"),
        }
    }
}
