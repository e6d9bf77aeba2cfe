// The kernel instance: machine, filesystem, process table and terminals
use crate::error::KernelError;
use crate::fs::FileSystem;
use crate::keyboard::Key;
use crate::memory::{self, Hardware};
use crate::process::fd::IoContext;
use crate::process::{FileKind, ProcessTable, SENTINEL};
use crate::rtc::Rtc;
use crate::terminal::Terminals;

/// The kernel as booted on real hardware.
#[cfg(target_os = "none")]
pub type BootKernel = Kernel<memory::paging::BareMetal, crate::fs::BootImage<'static>>;

/// Owns everything the system calls and interrupt handlers operate on.
///
/// Exactly one instance exists at run time. Every method runs with
/// interrupts off, so no internal locking is needed.
pub struct Kernel<H, F> {
    pub(crate) hw: H,
    pub(crate) fs: F,
    pub(crate) processes: ProcessTable,
    pub(crate) terminals: Terminals,
    pub(crate) rtc: &'static Rtc,
}

impl<H: Hardware, F: FileSystem> Kernel<H, F> {
    pub fn new(hw: H, fs: F, terminals: Terminals, rtc: &'static Rtc) -> Self {
        Kernel {
            hw,
            fs,
            processes: ProcessTable::new(),
            terminals,
            rtc,
        }
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn terminals(&self) -> &Terminals {
        &self.terminals
    }

    pub fn terminals_mut(&mut self) -> &mut Terminals {
        &mut self.terminals
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    /// Bind `name` to the lowest free descriptor of the current process.
    pub fn open(&mut self, name: &[u8]) -> Result<usize, KernelError> {
        let dentry = self.fs.lookup(name).ok_or(KernelError::NotFound)?;
        let kind = FileKind::from_type(dentry.file_type)?;
        let pid = self.processes.current();
        let fd = self
            .processes
            .current_pcb_mut()
            .files
            .install(kind.open(&dentry))?;
        log::debug!("pid {} opened {:?} as fd {}", pid, kind, fd);
        Ok(fd)
    }

    /// Read into the user buffer at `addr`.
    pub fn read(&mut self, fd: usize, addr: u64, len: usize) -> Result<usize, KernelError> {
        let Kernel {
            hw,
            fs,
            processes,
            terminals,
            rtc,
        } = self;
        let pcb = processes.current_pcb_mut();
        let terminal = pcb.terminal;
        let file = pcb.files.get_mut(fd)?;
        let range = memory::user_range(addr, len)?;
        let mut io = IoContext {
            fs: &*fs,
            terminals,
            rtc: *rtc,
            terminal,
        };
        let buf = &mut hw.user_window()[range];
        file.kind.read(file, &mut io, buf)
    }

    /// Write the user buffer at `addr`.
    pub fn write(&mut self, fd: usize, addr: u64, len: usize) -> Result<usize, KernelError> {
        let Kernel {
            hw,
            fs,
            processes,
            terminals,
            rtc,
        } = self;
        let pcb = processes.current_pcb_mut();
        let terminal = pcb.terminal;
        let file = pcb.files.get_mut(fd)?;
        let range = memory::user_range(addr, len)?;
        let mut io = IoContext {
            fs: &*fs,
            terminals,
            rtc: *rtc,
            terminal,
        };
        let buf = &hw.user_window()[range];
        file.kind.write(file, &mut io, buf)
    }

    pub fn close(&mut self, fd: usize) -> Result<(), KernelError> {
        self.processes.current_pcb_mut().files.close(fd)?;
        log::debug!("pid {} closed fd {}", self.processes.current(), fd);
        Ok(())
    }

    /// Copy the current process's arguments, NUL-terminated, to `addr`.
    pub fn getargs(&mut self, addr: u64, len: usize) -> Result<(), KernelError> {
        let args = self.processes.current_pcb().arguments()?;
        if args.len() + 1 > len {
            return Err(KernelError::ArgumentBufferTooSmall);
        }
        let range = memory::user_range(addr, len)?;
        let buf = &mut self.hw.user_window()[range];
        buf.fill(0);
        buf[..args.len()].copy_from_slice(args);
        Ok(())
    }

    /// Act on a decoded key press.
    pub fn handle_key(&mut self, key: Key) {
        match key {
            Key::SwitchTerminal(terminal) => self.switch_terminal(terminal),
            key => self.terminals.input(key),
        }
    }

    /// Bring `terminal` to the screen and fix up the running process's
    /// video window to match.
    pub fn switch_terminal(&mut self, terminal: usize) {
        if !self.terminals.set_foreground(terminal) {
            return;
        }
        log::debug!("terminal {} is now in the foreground", terminal);
        let current = self.processes.current();
        if current != SENTINEL {
            self.map_video(current);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A kernel over the fake machine with a small program set.
    use super::*;
    use crate::fs::{BootImage, ImageBuilder};
    use crate::memory::fake::FakeMachine;
    use crate::memory::{PROGRAM_OFFSET, USER_WINDOW};
    use crate::process::lifecycle::{ENTRY_OFFSET, EXEC_MAGIC};
    use crate::terminal::test_terminals;

    pub type TestKernel = Kernel<FakeMachine, BootImage<'static>>;

    pub const SHELL_ENTRY: u64 = USER_WINDOW + PROGRAM_OFFSET as u64 + 0x40;
    pub const HELLO_ENTRY: u64 = USER_WINDOW + PROGRAM_OFFSET as u64 + 0x80;

    fn program(entry: u64) -> Vec<u8> {
        let mut image = vec![0x90u8; 256];
        image[..4].copy_from_slice(&EXEC_MAGIC.to_le_bytes());
        image[ENTRY_OFFSET..ENTRY_OFFSET + 4].copy_from_slice(&(entry as u32).to_le_bytes());
        image
    }

    pub fn test_kernel() -> TestKernel {
        let buf: &'static mut [u8] = Box::leak(vec![0u8; 32 * 4096].into_boxed_slice());
        let shell = program(SHELL_ENTRY);
        let hello = program(HELLO_ENTRY);
        let mut builder = ImageBuilder::new(&mut *buf, 8);
        builder
            .directory(b".")
            .and_then(|b| b.device(b"rtc"))
            .and_then(|b| b.file(b"shell", &shell))
            .and_then(|b| b.file(b"hello", &hello))
            .and_then(|b| b.file(b"data", &[0x42; 64]))
            .and_then(|b| b.file(b"tiny", b"\x7fELF"))
            .unwrap();
        let len = builder.finish();
        let image: &'static [u8] = buf;
        let fs = BootImage::mount(&image[..len]).unwrap();
        let rtc: &'static Rtc = Box::leak(Box::new(Rtc::new()));
        Kernel::new(FakeMachine::new(), fs, test_terminals(), rtc)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::test_kernel;
    use super::*;
    use crate::memory::{AddressSpace, USER_WINDOW, VGA_PHYS};
    use crate::process::TrapFrame;
    use crate::terminal::row_text;

    const BUF: u64 = USER_WINDOW + 0x1000;

    fn booted_on(terminal: usize) -> (super::testing::TestKernel, TrapFrame) {
        let mut kernel = test_kernel();
        kernel.spawn_root(terminal).unwrap();
        let frame = kernel.start().unwrap();
        (kernel, frame)
    }

    fn user_bytes(kernel: &mut super::testing::TestKernel, addr: u64, len: usize) -> Vec<u8> {
        let range = memory::user_range(addr, len).unwrap();
        kernel.hardware_mut().user_window()[range].to_vec()
    }

    fn put_user_bytes(kernel: &mut super::testing::TestKernel, addr: u64, bytes: &[u8]) {
        let range = memory::user_range(addr, bytes.len()).unwrap();
        kernel.hardware_mut().user_window()[range].copy_from_slice(bytes);
    }

    #[test]
    fn open_hands_out_the_lowest_free_descriptor() {
        let (mut kernel, _) = booted_on(0);
        assert_eq!(kernel.open(b"."), Ok(2));
        assert_eq!(kernel.open(b"shell"), Ok(3));
        assert_eq!(kernel.close(2), Ok(()));
        assert_eq!(kernel.open(b"rtc"), Ok(2));
        assert_eq!(kernel.open(b"missing"), Err(KernelError::NotFound));
    }

    #[test]
    fn a_full_descriptor_table_refuses_to_open() {
        let (mut kernel, _) = booted_on(0);
        for fd in 2..8 {
            assert_eq!(kernel.open(b"hello"), Ok(fd));
        }
        assert_eq!(kernel.open(b"hello"), Err(KernelError::DescriptorTableFull));
    }

    #[test]
    fn descriptor_rules_hold_for_every_call() {
        let (mut kernel, _) = booted_on(0);
        for fd in [2, 7, 8, 1000] {
            assert_eq!(kernel.read(fd, BUF, 4), Err(KernelError::InvalidDescriptor));
            assert_eq!(kernel.write(fd, BUF, 4), Err(KernelError::InvalidDescriptor));
            assert_eq!(kernel.close(fd), Err(KernelError::InvalidDescriptor));
        }
        assert_eq!(kernel.close(0), Err(KernelError::DescriptorNotCloseable));
        assert_eq!(kernel.close(1), Err(KernelError::DescriptorNotCloseable));
    }

    #[test]
    fn reads_land_in_the_user_window() {
        let (mut kernel, _) = booted_on(0);
        let fd = kernel.open(b"data").unwrap();
        assert_eq!(kernel.read(fd, BUF, 16), Ok(16));
        assert_eq!(user_bytes(&mut kernel, BUF, 16), vec![0x42; 16]);
        assert_eq!(kernel.read(fd, BUF, 100), Ok(48));
        assert_eq!(kernel.read(fd, BUF, 100), Ok(0));
        assert_eq!(
            kernel.read(fd, USER_WINDOW - 4, 4),
            Err(KernelError::InvalidArgument)
        );
    }

    #[test]
    fn stdout_writes_reach_the_process_terminal() {
        let (mut kernel, _) = booted_on(1);
        put_user_bytes(&mut kernel, BUF, b"background");
        assert_eq!(kernel.write(1, BUF, 10), Ok(10));
        assert_eq!(row_text(kernel.terminals().screen(1), 0), "background");
        assert_eq!(row_text(kernel.terminals().screen(0), 0), "");
    }

    #[test]
    fn stdin_blocks_until_a_line_arrives() {
        let (mut kernel, _) = booted_on(0);
        assert_eq!(kernel.read(0, BUF, 8), Err(KernelError::WouldBlock));
        for &b in b"ls" {
            kernel.handle_key(Key::Char(b));
        }
        kernel.handle_key(Key::Enter);
        assert_eq!(kernel.read(0, BUF, 8), Ok(3));
        assert_eq!(user_bytes(&mut kernel, BUF, 3), b"ls\n".to_vec());
    }

    #[test]
    fn getargs_copies_the_callers_own_arguments() {
        let (mut kernel, mut frame) = booted_on(0);
        kernel.execute(b"hello  big world ", &mut frame).unwrap();
        put_user_bytes(&mut kernel, BUF, &[0xff; 16]);

        assert_eq!(kernel.getargs(BUF, 16), Ok(()));
        let mut expected = b"big world".to_vec();
        expected.resize(16, 0);
        assert_eq!(user_bytes(&mut kernel, BUF, 16), expected);

        kernel.halt(0, &mut frame);
        assert_eq!(kernel.getargs(BUF, 16), Err(KernelError::NoArguments));
    }

    #[test]
    fn getargs_never_writes_a_partial_result() {
        let (mut kernel, mut frame) = booted_on(0);
        kernel.execute(b"hello abcdef", &mut frame).unwrap();
        put_user_bytes(&mut kernel, BUF, &[0xff; 8]);

        assert_eq!(kernel.getargs(BUF, 6), Err(KernelError::ArgumentBufferTooSmall));
        assert_eq!(user_bytes(&mut kernel, BUF, 8), vec![0xff; 8]);
        assert_eq!(kernel.getargs(BUF, 7), Ok(()));
        assert_eq!(user_bytes(&mut kernel, BUF, 7), b"abcdef\0".to_vec());
    }

    #[test]
    fn switching_terminals_remaps_the_running_process() {
        let (mut kernel, _) = booted_on(1);
        assert_eq!(kernel.hardware().mapped_video.map(|p| p.as_u64()), Some(0x20_1000));

        kernel.handle_key(Key::SwitchTerminal(1));
        assert_eq!(kernel.terminals().foreground(), 1);
        assert_eq!(kernel.hardware().mapped_video.map(|p| p.as_u64()), Some(VGA_PHYS));

        kernel.handle_key(Key::SwitchTerminal(2));
        assert_eq!(kernel.hardware().mapped_video.map(|p| p.as_u64()), Some(0x20_1000));
    }
}
