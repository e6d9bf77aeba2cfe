// Saved hardware execution context and the ring-3 entry path
use core::mem::size_of;

/// User code selector (GDT index 4, RPL 3)
pub const USER_CODE_SELECTOR: u64 = 0x23;
/// User data selector (GDT index 3, RPL 3)
pub const USER_DATA_SELECTOR: u64 = 0x1B;
/// IF set, reserved bit 1 set
const USER_RFLAGS: u64 = 0x202;
/// Length of the `int 0x80` instruction
pub const SYSCALL_INSTRUCTION_LEN: u64 = 2;

/// Registers as the trap stubs push them, followed by the frame the CPU
/// pushed on the way in. Restoring a context means popping this and `iretq`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

static_assertions::const_assert_eq!(size_of::<TrapFrame>(), 20 * 8);

impl TrapFrame {
    /// Fresh ring-3 context starting at `entry` with stack pointer `stack`.
    pub fn user_entry(entry: u64, stack: u64) -> Self {
        TrapFrame {
            rip: entry,
            cs: USER_CODE_SELECTOR,
            rflags: USER_RFLAGS,
            rsp: stack,
            ss: USER_DATA_SELECTOR,
            ..TrapFrame::default()
        }
    }

    pub fn from_user_mode(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Point `rip` back at the `int 0x80` that trapped, so the call is
    /// reissued when this context next runs.
    pub fn rewind_syscall(&mut self) {
        self.rip -= SYSCALL_INSTRUCTION_LEN;
    }
}

/// Load `frame` and drop to its privilege level. Used once, to leave the
/// boot context for the first user process.
///
/// # Safety
/// `frame` must describe a valid ring-3 context whose address space is
/// mapped, and the TSS must point at the process's kernel stack.
#[cfg(target_os = "none")]
pub unsafe fn enter_user(frame: &TrapFrame) -> ! {
    core::arch::asm!(
        "mov rsp, {frame}",
        "pop rax",
        "pop rbx",
        "pop rcx",
        "pop rdx",
        "pop rsi",
        "pop rdi",
        "pop rbp",
        "pop r8",
        "pop r9",
        "pop r10",
        "pop r11",
        "pop r12",
        "pop r13",
        "pop r14",
        "pop r15",
        "iretq",
        frame = in(reg) frame as *const TrapFrame,
        options(noreturn)
    );
}
