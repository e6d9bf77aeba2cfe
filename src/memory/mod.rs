// Address-space layout and the mapping interface the process core drives
use crate::error::KernelError;
use crate::process::Pid;
use core::ops::Range;
use x86_64::{PhysAddr, VirtAddr};

#[cfg(target_os = "none")]
pub mod paging;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// Per-process kernel stack block
pub const KERNEL_STACK_SIZE: u64 = 8 * KIB;
/// Physical memory behind each process's user window
pub const SLAB_SIZE: u64 = 4 * MIB;
/// Physical address of pid 0's slab; pid n sits `n` slabs above it
pub const SLAB_BASE: u64 = 8 * MIB;
/// Virtual address every process sees its slab at
pub const USER_WINDOW: u64 = 128 * MIB;
/// Virtual address of the per-process video page
pub const VIDEO_WINDOW: u64 = USER_WINDOW + SLAB_SIZE;
/// Where program images are copied inside the user window
pub const PROGRAM_OFFSET: usize = 0x48000;
/// Initial user stack pointer, just below the end of the window
pub const USER_STACK: u64 = USER_WINDOW + SLAB_SIZE - 8;
/// Physical address of the VGA text buffer
pub const VGA_PHYS: u64 = 0xb8000;

/// Physical range handed out as process slabs; nothing else may allocate from it.
pub const fn reserved_slab_range() -> Range<u64> {
    SLAB_BASE..SLAB_BASE + SLAB_SIZE * crate::process::MAX_PROCESSES as u64
}

/// Who may touch a mapping. Only ring-3 windows go through the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    User,
}

/// Installs the two per-process windows.
///
/// Both calls replace whatever was mapped at `virt` before and flush the
/// stale translations. Misaligned addresses are a programming error.
pub trait AddressSpace {
    /// Map a 4 MiB slab at `virt`.
    fn map_user_slab(&mut self, phys: PhysAddr, virt: VirtAddr, privilege: Privilege);

    /// Map one 4 KiB video page at `virt`.
    fn map_video(&mut self, phys: PhysAddr, virt: VirtAddr, privilege: Privilege);

    /// The currently mapped user window as kernel-accessible bytes.
    fn user_window(&mut self) -> &mut [u8];
}

/// Controls which kernel stack the CPU lands on when user code traps.
pub trait StackSwitch {
    fn set_privileged_stack(&mut self, top: VirtAddr);

    /// Highest address of the per-process kernel stack area.
    fn kernel_stack_area_top(&self) -> VirtAddr;
}

/// Everything the process core needs from the machine.
pub trait Hardware: AddressSpace + StackSwitch {}

impl<T: AddressSpace + StackSwitch> Hardware for T {}

pub fn slab_base(pid: Pid) -> PhysAddr {
    PhysAddr::new(SLAB_BASE + pid as u64 * SLAB_SIZE)
}

pub fn kernel_stack_top(area_top: VirtAddr, pid: Pid) -> VirtAddr {
    area_top - pid as u64 * KERNEL_STACK_SIZE
}

/// Translate a user pointer/length pair into a range of the user window.
pub fn user_range(addr: u64, len: usize) -> Result<Range<usize>, KernelError> {
    let end = addr
        .checked_add(len as u64)
        .ok_or(KernelError::InvalidArgument)?;
    if addr < USER_WINDOW || end > USER_WINDOW + SLAB_SIZE {
        return Err(KernelError::InvalidArgument);
    }
    let start = (addr - USER_WINDOW) as usize;
    Ok(start..start + len)
}

/// Copy a NUL-terminated user string of at most `N` bytes into `out`.
///
/// Returns the string length. A string that runs off the end of the window
/// or does not terminate within `N` bytes is rejected.
pub fn copy_user_str<const N: usize>(
    window: &[u8],
    addr: u64,
    out: &mut [u8; N],
) -> Result<usize, KernelError> {
    let start = user_range(addr, 0)?.start;
    let available = &window[start..];
    let len = available
        .iter()
        .take(N + 1)
        .position(|&b| b == 0)
        .ok_or(KernelError::InvalidArgument)?;
    if len > N {
        return Err(KernelError::InvalidArgument);
    }
    out[..len].copy_from_slice(&available[..len]);
    Ok(len)
}

#[cfg(test)]
pub mod fake {
    //! A machine that records what the core asked of it.
    use super::*;

    pub struct FakeMachine {
        slabs: Vec<Vec<u8>>,
        pub mapped_slab: Option<PhysAddr>,
        pub mapped_video: Option<PhysAddr>,
        pub privileged_stack: Option<VirtAddr>,
        pub slab_maps: usize,
    }

    pub const FAKE_STACK_AREA_TOP: u64 = 8 * MIB;

    impl FakeMachine {
        pub fn new() -> Self {
            FakeMachine {
                slabs: (0..crate::process::MAX_PROCESSES)
                    .map(|_| vec![0u8; SLAB_SIZE as usize])
                    .collect(),
                mapped_slab: None,
                mapped_video: None,
                privileged_stack: None,
                slab_maps: 0,
            }
        }

        pub fn slab(&self, pid: Pid) -> &[u8] {
            &self.slabs[pid]
        }

        pub fn slab_mut(&mut self, pid: Pid) -> &mut [u8] {
            &mut self.slabs[pid]
        }

        pub fn mapped_pid(&self) -> Option<Pid> {
            self.mapped_slab
                .map(|phys| ((phys.as_u64() - SLAB_BASE) / SLAB_SIZE) as Pid)
        }
    }

    impl AddressSpace for FakeMachine {
        fn map_user_slab(&mut self, phys: PhysAddr, virt: VirtAddr, _privilege: Privilege) {
            assert_eq!(virt.as_u64(), USER_WINDOW);
            assert_eq!((phys.as_u64() - SLAB_BASE) % SLAB_SIZE, 0);
            self.mapped_slab = Some(phys);
            self.slab_maps += 1;
        }

        fn map_video(&mut self, phys: PhysAddr, virt: VirtAddr, _privilege: Privilege) {
            assert_eq!(virt.as_u64(), VIDEO_WINDOW);
            self.mapped_video = Some(phys);
        }

        fn user_window(&mut self) -> &mut [u8] {
            let pid = self.mapped_pid().expect("no slab mapped");
            &mut self.slabs[pid]
        }
    }

    impl StackSwitch for FakeMachine {
        fn set_privileged_stack(&mut self, top: VirtAddr) {
            self.privileged_stack = Some(top);
        }

        fn kernel_stack_area_top(&self) -> VirtAddr {
            VirtAddr::new(FAKE_STACK_AREA_TOP)
        }
    }
}
