// src/syscalls.rs
use crate::error::KernelError;
use crate::fs::{FileSystem, NAME_LEN};
use crate::kernel::Kernel;
use crate::memory::{copy_user_str, Hardware};
use crate::process::pcb::COMMAND_LEN;
use crate::process::TrapFrame;

/// Value user code sees in `rax` when a call fails (-1)
pub const SYSCALL_FAILURE: u64 = u64::MAX;

/// System call numbers, passed in `rax`
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallNumber {
    Halt = 1,
    Execute = 2,
    Read = 3,
    Write = 4,
    Open = 5,
    Close = 6,
    GetArgs = 7,
}

impl TryFrom<u64> for SyscallNumber {
    type Error = KernelError;

    fn try_from(number: u64) -> Result<Self, Self::Error> {
        match number {
            1 => Ok(SyscallNumber::Halt),
            2 => Ok(SyscallNumber::Execute),
            3 => Ok(SyscallNumber::Read),
            4 => Ok(SyscallNumber::Write),
            5 => Ok(SyscallNumber::Open),
            6 => Ok(SyscallNumber::Close),
            7 => Ok(SyscallNumber::GetArgs),
            _ => Err(KernelError::InvalidSyscall),
        }
    }
}

/// System call arguments
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    pub arg0: u64, // rdi
    pub arg1: u64, // rsi
    pub arg2: u64, // rdx
}

impl SyscallArgs {
    pub fn from_frame(frame: &TrapFrame) -> Self {
        SyscallArgs {
            arg0: frame.rdi,
            arg1: frame.rsi,
            arg2: frame.rdx,
        }
    }
}

/// System call result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallResult {
    Success(u64),
    Error(KernelError),
}

impl From<Result<u64, KernelError>> for SyscallResult {
    fn from(result: Result<u64, KernelError>) -> Self {
        match result {
            Ok(value) => SyscallResult::Success(value),
            Err(err) => SyscallResult::Error(err),
        }
    }
}

/// Convert syscall result to u64 for return value
impl From<SyscallResult> for u64 {
    fn from(result: SyscallResult) -> u64 {
        match result {
            SyscallResult::Success(value) => value,
            SyscallResult::Error(_) => SYSCALL_FAILURE,
        }
    }
}

/// Handle the `int 0x80` that trapped with `frame`.
///
/// On return `frame` is what to resume: the caller with its result in
/// `rax`, or another process entirely after execute, halt, or a call that
/// had to wait.
pub fn handle_syscall<H: Hardware, F: FileSystem>(kernel: &mut Kernel<H, F>, frame: &mut TrapFrame) {
    let args = SyscallArgs::from_frame(frame);
    let number = frame.rax;
    log::trace!("syscall {} {:?}", number, args);

    let result = match SyscallNumber::try_from(number) {
        Ok(SyscallNumber::Halt) => {
            kernel.halt(args.arg0 & 0xff, frame);
            return;
        }
        Ok(SyscallNumber::Execute) => match syscall_execute(kernel, args, frame) {
            Ok(()) => return,
            Err(err) => SyscallResult::Error(err),
        },
        Ok(SyscallNumber::Read) => syscall_read(kernel, args),
        Ok(SyscallNumber::Write) => syscall_write(kernel, args),
        Ok(SyscallNumber::Open) => syscall_open(kernel, args),
        Ok(SyscallNumber::Close) => syscall_close(kernel, args),
        Ok(SyscallNumber::GetArgs) => syscall_getargs(kernel, args),
        Err(err) => SyscallResult::Error(err),
    };

    match result {
        SyscallResult::Error(KernelError::WouldBlock) => {
            // Reissue the call the next time this process runs.
            frame.rewind_syscall();
            kernel.schedule(frame);
        }
        SyscallResult::Error(err) => {
            log::debug!(
                "syscall {} from pid {} failed: {}",
                number,
                kernel.processes().current(),
                err
            );
            frame.rax = result.into();
        }
        SyscallResult::Success(_) => frame.rax = result.into(),
    }
}

// Individual syscall implementations
pub fn syscall_execute<H: Hardware, F: FileSystem>(
    kernel: &mut Kernel<H, F>,
    args: SyscallArgs,
    frame: &mut TrapFrame,
) -> Result<(), KernelError> {
    let mut command = [0u8; COMMAND_LEN];
    let len = copy_user_str(kernel.hardware_mut().user_window(), args.arg0, &mut command)?;
    kernel.execute(&command[..len], frame)?;
    Ok(())
}

pub fn syscall_read<H: Hardware, F: FileSystem>(
    kernel: &mut Kernel<H, F>,
    args: SyscallArgs,
) -> SyscallResult {
    kernel
        .read(args.arg0 as usize, args.arg1, args.arg2 as usize)
        .map(|count| count as u64)
        .into()
}

pub fn syscall_write<H: Hardware, F: FileSystem>(
    kernel: &mut Kernel<H, F>,
    args: SyscallArgs,
) -> SyscallResult {
    kernel
        .write(args.arg0 as usize, args.arg1, args.arg2 as usize)
        .map(|count| count as u64)
        .into()
}

pub fn syscall_open<H: Hardware, F: FileSystem>(
    kernel: &mut Kernel<H, F>,
    args: SyscallArgs,
) -> SyscallResult {
    let mut name = [0u8; NAME_LEN];
    copy_user_str(kernel.hardware_mut().user_window(), args.arg0, &mut name)
        .and_then(|len| kernel.open(&name[..len]))
        .map(|fd| fd as u64)
        .into()
}

pub fn syscall_close<H: Hardware, F: FileSystem>(
    kernel: &mut Kernel<H, F>,
    args: SyscallArgs,
) -> SyscallResult {
    kernel.close(args.arg0 as usize).map(|()| 0).into()
}

pub fn syscall_getargs<H: Hardware, F: FileSystem>(
    kernel: &mut Kernel<H, F>,
    args: SyscallArgs,
) -> SyscallResult {
    kernel
        .getargs(args.arg0, args.arg1 as usize)
        .map(|()| 0)
        .into()
}
