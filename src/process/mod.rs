// Process management: table, descriptors, scheduling and lifecycle
pub mod context;
pub mod fd;
pub mod lifecycle;
pub mod pcb;
pub mod scheduler;

pub use context::TrapFrame;
pub use fd::{FdTable, FileDescriptor, FileKind, MAX_FILES};
pub use pcb::{ProcessControlBlock, ProcessState, ProcessTable};
pub use scheduler::get_next_schedule;

/// Process identifier: an index into the process table
pub type Pid = usize;

/// Size of the process table, sentinel included
pub const MAX_PROCESSES: usize = 6;

/// The boot context. Never scheduled, never freed.
pub const SENTINEL: Pid = 0;
