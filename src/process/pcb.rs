// Process control blocks and the fixed process table
use super::{FdTable, Pid, TrapFrame, MAX_PROCESSES, SENTINEL};
use crate::error::KernelError;

/// Longest command line a process keeps for `getargs`
pub const COMMAND_LEN: usize = 128;

/// Process state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Free,     // Slot unused
    Running,  // Currently executing
    Runnable, // Ready to run, waiting for CPU
    Waiting,  // Suspended in execute until its child halts
    Sentinel, // Boot context, pid 0 only
}

/// Process Control Block: per-process kernel metadata
#[derive(Debug, Clone, Copy)]
pub struct ProcessControlBlock {
    pub pid: Pid,
    pub parent: Pid,
    /// Terminal this process reads from and writes to
    pub terminal: usize,
    pub files: FdTable,
    /// Registers to resume with the next time this process runs
    pub context: TrapFrame,
    command: [u8; COMMAND_LEN],
    command_len: usize,
}

impl ProcessControlBlock {
    pub fn empty(pid: Pid) -> Self {
        ProcessControlBlock {
            pid,
            parent: SENTINEL,
            terminal: 0,
            files: FdTable::empty(),
            context: TrapFrame::default(),
            command: [0; COMMAND_LEN],
            command_len: 0,
        }
    }

    /// A freshly launched process: stdio bound, everything else cleared.
    pub fn launch(
        pid: Pid,
        parent: Pid,
        terminal: usize,
        command: &[u8],
        context: TrapFrame,
    ) -> Self {
        let mut pcb = Self::empty(pid);
        pcb.parent = parent;
        pcb.terminal = terminal;
        pcb.files = FdTable::with_stdio();
        pcb.context = context;
        let len = command.len().min(COMMAND_LEN);
        pcb.command[..len].copy_from_slice(&command[..len]);
        pcb.command_len = len;
        pcb
    }

    /// The full command line this process was started with.
    pub fn command(&self) -> &[u8] {
        &self.command[..self.command_len]
    }

    /// Everything after the program name and the spaces following it,
    /// with trailing spaces removed.
    pub fn arguments(&self) -> Result<&[u8], KernelError> {
        let line = self.command();
        let name_start = line.iter().position(|&b| b != b' ').unwrap_or(line.len());
        let name_end = line[name_start..]
            .iter()
            .position(|&b| b == b' ')
            .map_or(line.len(), |i| name_start + i);
        let rest = &line[name_end..];
        let start = rest.iter().position(|&b| b != b' ').unwrap_or(rest.len());
        let end = rest.iter().rposition(|&b| b != b' ').map_or(start, |i| i + 1);
        match &rest[start..end] {
            [] => Err(KernelError::NoArguments),
            args => Ok(args),
        }
    }
}

/// State flags and PCBs for every pid, plus which one is on the CPU.
pub struct ProcessTable {
    states: [ProcessState; MAX_PROCESSES],
    pcbs: [ProcessControlBlock; MAX_PROCESSES],
    current: Pid,
}

impl ProcessTable {
    pub fn new() -> Self {
        let mut states = [ProcessState::Free; MAX_PROCESSES];
        states[SENTINEL] = ProcessState::Sentinel;
        ProcessTable {
            states,
            pcbs: core::array::from_fn(ProcessControlBlock::empty),
            current: SENTINEL,
        }
    }

    pub fn state(&self, pid: Pid) -> ProcessState {
        self.states[pid]
    }

    pub fn set_state(&mut self, pid: Pid, state: ProcessState) {
        debug_assert!(pid != SENTINEL || state == ProcessState::Sentinel);
        self.states[pid] = state;
    }

    pub fn current(&self) -> Pid {
        self.current
    }

    pub fn set_current(&mut self, pid: Pid) {
        self.current = pid;
    }

    pub fn pcb(&self, pid: Pid) -> &ProcessControlBlock {
        &self.pcbs[pid]
    }

    pub fn pcb_mut(&mut self, pid: Pid) -> &mut ProcessControlBlock {
        &mut self.pcbs[pid]
    }

    pub fn current_pcb(&self) -> &ProcessControlBlock {
        &self.pcbs[self.current]
    }

    pub fn current_pcb_mut(&mut self) -> &mut ProcessControlBlock {
        &mut self.pcbs[self.current]
    }

    /// Lowest free pid above the sentinel.
    pub fn find_free(&self) -> Result<Pid, KernelError> {
        (1..MAX_PROCESSES)
            .find(|&pid| self.states[pid] == ProcessState::Free)
            .ok_or(KernelError::NoFreeProcessSlot)
    }

    /// Store `pcb` in its slot and make it eligible to run.
    pub fn install(&mut self, pcb: ProcessControlBlock) {
        let pid = pcb.pid;
        self.pcbs[pid] = pcb;
        self.states[pid] = ProcessState::Runnable;
    }

    pub fn release(&mut self, pid: Pid) {
        self.pcbs[pid].files.close_all();
        self.states[pid] = ProcessState::Free;
    }

    /// Pids currently in `state`.
    pub fn pids_in(&self, state: ProcessState) -> impl Iterator<Item = Pid> + '_ {
        (0..MAX_PROCESSES).filter(move |&pid| self.states[pid] == state)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
