// Process lifecycle: execute, halt, and boot-time launching
use super::{get_next_schedule, Pid, ProcessControlBlock, ProcessState, TrapFrame, SENTINEL};
use crate::config::ROOT_PROGRAM;
use crate::error::KernelError;
use crate::fs::{FileSystem, TYPE_REGULAR};
use crate::kernel::Kernel;
use crate::memory::{self, Hardware, Privilege, PROGRAM_OFFSET, SLAB_SIZE, USER_STACK, USER_WINDOW};
use x86_64::VirtAddr;

/// First four bytes of every executable image
pub const EXEC_MAGIC: u32 = 0x464C_457F;
/// Image offset of the little-endian entry address
pub const ENTRY_OFFSET: usize = 24;
pub const MIN_IMAGE_SIZE: usize = ENTRY_OFFSET + 4;
/// Largest image that fits between the load offset and the end of a slab
pub const MAX_IMAGE_SIZE: usize = SLAB_SIZE as usize - PROGRAM_OFFSET;
/// Exit status reported for a process killed by a CPU exception
pub const EXCEPTION_STATUS: u64 = 256;

/// Program name of a command line: leading spaces skipped, ends at a space or NUL.
pub fn program_name(command: &[u8]) -> &[u8] {
    let start = command
        .iter()
        .position(|&b| b != b' ')
        .unwrap_or(command.len());
    let rest = &command[start..];
    let end = rest
        .iter()
        .position(|&b| b == b' ' || b == 0)
        .unwrap_or(rest.len());
    &rest[..end]
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

impl<H: Hardware, F: FileSystem> Kernel<H, F> {
    /// Run `command` as a child of the current process.
    ///
    /// On success the caller is suspended until the child halts and `frame`
    /// now holds the child's entry context. On failure nothing changed:
    /// the caller's slab is mapped again and no pid was consumed.
    pub fn execute(&mut self, command: &[u8], frame: &mut TrapFrame) -> Result<Pid, KernelError> {
        let parent = self.processes.current();
        let terminal = self.processes.pcb(parent).terminal;
        let child = self.launch(command, parent, terminal)?;

        self.processes.pcb_mut(parent).context = *frame;
        self.processes.set_state(parent, ProcessState::Waiting);
        log::info!(
            "pid {} execute {:?} as pid {}",
            parent,
            core::str::from_utf8(command).unwrap_or("?"),
            child
        );
        self.enter(child, frame);
        Ok(child)
    }

    /// End the current process and resume its parent with `status` as the
    /// result of the parent's `execute`. A root process is started afresh
    /// on its terminal instead.
    pub fn halt(&mut self, status: u64, frame: &mut TrapFrame) {
        let pid = self.processes.current();
        if pid == SENTINEL {
            panic!("the sentinel process cannot halt");
        }
        let pcb = self.processes.pcb(pid);
        let (parent, terminal) = (pcb.parent, pcb.terminal);
        self.processes.release(pid);
        log::info!("pid {} halted with status {}", pid, status);

        if parent == SENTINEL {
            self.respawn(terminal, frame);
            return;
        }
        self.processes.pcb_mut(parent).context.rax = status;
        self.enter(parent, frame);
    }

    /// Kill the current process after a CPU exception it raised.
    pub fn fault(&mut self, frame: &mut TrapFrame) {
        log::error!(
            "pid {} faulted at {:#x}",
            self.processes.current(),
            frame.rip
        );
        self.halt(EXCEPTION_STATUS, frame);
    }

    /// Create the root program for `terminal`, ready to be scheduled.
    pub fn spawn_root(&mut self, terminal: usize) -> Result<Pid, KernelError> {
        let pid = self.launch(ROOT_PROGRAM, SENTINEL, terminal)?;
        log::info!("pid {} is the root of terminal {}", pid, terminal);
        Ok(pid)
    }

    /// Leave the boot context: pick the first runnable process and hand
    /// back the frame to enter it with.
    pub fn start(&mut self) -> Option<TrapFrame> {
        let pid = get_next_schedule(&self.processes)?;
        let mut frame = TrapFrame::default();
        self.enter(pid, &mut frame);
        Some(frame)
    }

    fn respawn(&mut self, terminal: usize, frame: &mut TrapFrame) {
        match self.launch(ROOT_PROGRAM, SENTINEL, terminal) {
            Ok(pid) => {
                log::info!("restarting root of terminal {} as pid {}", terminal, pid);
                self.enter(pid, frame);
            }
            Err(err) => panic!("cannot restart root of terminal {}: {}", terminal, err),
        }
    }

    /// Validate and load `command`'s program into a fresh pid. The new
    /// process is Runnable; its slab is left mapped.
    fn launch(&mut self, command: &[u8], parent: Pid, terminal: usize) -> Result<Pid, KernelError> {
        let name = program_name(command);
        if name.is_empty() {
            return Err(KernelError::NotFound);
        }
        let pid = self.processes.find_free()?;
        let dentry = self.fs.lookup(name).ok_or(KernelError::NotFound)?;
        if dentry.file_type != TYPE_REGULAR {
            return Err(KernelError::NotExecutable);
        }
        let size = dentry.size as usize;
        if size < MIN_IMAGE_SIZE {
            return Err(KernelError::ImageTooSmall);
        }
        if size > MAX_IMAGE_SIZE {
            return Err(KernelError::ImageTooLarge);
        }

        let entry = match self.load_image(pid, dentry.inode, size) {
            Ok(entry) => entry,
            Err(err) => {
                self.hw.map_user_slab(
                    memory::slab_base(parent),
                    VirtAddr::new(USER_WINDOW),
                    Privilege::User,
                );
                return Err(err);
            }
        };

        let context = TrapFrame::user_entry(u64::from(entry), USER_STACK);
        self.processes
            .install(ProcessControlBlock::launch(pid, parent, terminal, command, context));
        log::debug!("pid {} loaded, entry {:#x}", pid, entry);
        Ok(pid)
    }

    /// Copy the image into `pid`'s slab and return its entry address.
    fn load_image(&mut self, pid: Pid, inode: u32, size: usize) -> Result<u32, KernelError> {
        self.hw.map_user_slab(
            memory::slab_base(pid),
            VirtAddr::new(USER_WINDOW),
            Privilege::User,
        );
        let image = &mut self.hw.user_window()[PROGRAM_OFFSET..PROGRAM_OFFSET + size];
        let copied = self.fs.read(inode, 0, image)?;
        if copied < MIN_IMAGE_SIZE {
            return Err(KernelError::ImageTooSmall);
        }
        if read_u32(image, 0) != EXEC_MAGIC {
            return Err(KernelError::BadMagic);
        }
        Ok(read_u32(image, ENTRY_OFFSET))
    }
}
