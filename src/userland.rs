// User programs shipped inside the kernel and the boot image built from them
use crate::error::KernelError;
use crate::fs::ImageBuilder;

/// Flat images produced by `user/build.sh`, linked at 0x08048000.
pub const SHELL_BIN: &[u8] = include_bytes!("../user/bin/shell.bin");
pub const HELLO_BIN: &[u8] = include_bytes!("../user/bin/hello.bin");
pub const LS_BIN: &[u8] = include_bytes!("../user/bin/ls.bin");

/// Programs in directory order
pub const PROGRAMS: [(&[u8], &[u8]); 3] = [
    (b"shell", SHELL_BIN),
    (b"hello", HELLO_BIN),
    (b"ls", LS_BIN),
];

/// Inode blocks reserved in the boot image
const INODES: usize = 8;

/// Lay out the boot filesystem in `buf`; returns the image length.
pub fn build_boot_image(buf: &mut [u8]) -> Result<usize, KernelError> {
    let mut builder = ImageBuilder::new(buf, INODES);
    builder.directory(b".")?.device(b"rtc")?;
    for (name, image) in PROGRAMS {
        builder.file(name, image)?;
    }
    Ok(builder.finish())
}
