// Round-robin scheduler and the context switch
use super::{Pid, ProcessState, ProcessTable, TrapFrame, MAX_PROCESSES, SENTINEL};
use crate::fs::FileSystem;
use crate::kernel::Kernel;
use crate::memory::{self, Hardware, Privilege, USER_WINDOW, VIDEO_WINDOW};
use x86_64::VirtAddr;

/// Next runnable pid after the current one, in circular pid order.
///
/// The sentinel is never picked. `None` means nobody else can run and the
/// current process keeps the CPU.
pub fn get_next_schedule(table: &ProcessTable) -> Option<Pid> {
    let current = table.current();
    (1..MAX_PROCESSES)
        .map(|step| (current + step) % MAX_PROCESSES)
        .filter(|&pid| pid != SENTINEL)
        .find(|&pid| table.state(pid) == ProcessState::Runnable)
}

impl<H: Hardware, F: FileSystem> Kernel<H, F> {
    /// Preempt the current process in favour of the next runnable one.
    ///
    /// `frame` is the interrupted user context; on a switch it is replaced
    /// with the incoming process's saved context.
    pub fn schedule(&mut self, frame: &mut TrapFrame) {
        if let Some(next) = get_next_schedule(&self.processes) {
            self.switch_to(next, frame);
        }
    }

    pub(crate) fn switch_to(&mut self, next: Pid, frame: &mut TrapFrame) {
        let current = self.processes.current();
        if self.processes.state(current) == ProcessState::Running {
            self.processes.pcb_mut(current).context = *frame;
            self.processes.set_state(current, ProcessState::Runnable);
        }
        log::trace!("switch pid {} -> {}", current, next);
        self.enter(next, frame);
    }

    /// Put `pid` on the CPU: kernel stack, address space, registers.
    pub(crate) fn enter(&mut self, pid: Pid, frame: &mut TrapFrame) {
        self.processes.set_state(pid, ProcessState::Running);
        self.processes.set_current(pid);
        let top = memory::kernel_stack_top(self.hw.kernel_stack_area_top(), pid);
        self.hw.set_privileged_stack(top);
        self.map_process(pid);
        *frame = self.processes.pcb(pid).context;
    }

    /// Map `pid`'s slab and the video page of its terminal.
    pub(crate) fn map_process(&mut self, pid: Pid) {
        self.hw.map_user_slab(
            memory::slab_base(pid),
            VirtAddr::new(USER_WINDOW),
            Privilege::User,
        );
        self.map_video(pid);
    }

    pub(crate) fn map_video(&mut self, pid: Pid) {
        let source = self.terminals.video_source(self.processes.pcb(pid).terminal);
        self.hw
            .map_video(source, VirtAddr::new(VIDEO_WINDOW), Privilege::User);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::testing::{test_kernel, SHELL_ENTRY};
    use crate::memory::fake::FAKE_STACK_AREA_TOP;
    use crate::memory::{KERNEL_STACK_SIZE, VGA_PHYS};
    use crate::process::ProcessControlBlock;

    fn table_with(runnable: &[Pid], current: Pid) -> ProcessTable {
        let mut table = ProcessTable::new();
        for &pid in runnable {
            table.install(ProcessControlBlock::launch(pid, SENTINEL, 0, b"sh", TrapFrame::default()));
        }
        if current != SENTINEL {
            table.set_state(current, ProcessState::Running);
        }
        table.set_current(current);
        table
    }

    #[test]
    fn picks_the_next_runnable_pid_circularly() {
        let table = table_with(&[1, 3, 5], 3);
        assert_eq!(get_next_schedule(&table), Some(5));
        let table = table_with(&[1, 3, 5], 5);
        assert_eq!(get_next_schedule(&table), Some(1));
        let table = table_with(&[2, 4], SENTINEL);
        assert_eq!(get_next_schedule(&table), Some(2));
    }

    #[test]
    fn a_lone_process_keeps_the_cpu() {
        let table = table_with(&[], SENTINEL);
        assert_eq!(get_next_schedule(&table), None);
        let table = table_with(&[4], 4);
        assert_eq!(get_next_schedule(&table), None);
    }

    #[test]
    fn waiting_processes_are_skipped() {
        let mut table = table_with(&[1, 2, 3], 3);
        table.set_state(1, ProcessState::Waiting);
        assert_eq!(get_next_schedule(&table), Some(2));
    }

    #[test]
    fn every_runnable_process_gets_a_turn_before_any_repeats() {
        let mut kernel = test_kernel();
        for terminal in 0..3 {
            kernel.spawn_root(terminal).unwrap();
        }
        let mut frame = kernel.start().unwrap();
        assert_eq!(kernel.processes().current(), 1);

        let mut order = Vec::new();
        for _ in 0..6 {
            kernel.schedule(&mut frame);
            order.push(kernel.processes().current());
        }
        assert_eq!(order, vec![2, 3, 1, 2, 3, 1]);
        assert_eq!(kernel.processes().pids_in(ProcessState::Running).count(), 1);
    }

    #[test]
    fn switching_saves_and_restores_registers() {
        let mut kernel = test_kernel();
        kernel.spawn_root(0).unwrap();
        kernel.spawn_root(1).unwrap();
        let mut frame = kernel.start().unwrap();
        frame.rbx = 42;
        frame.rip += 10;

        kernel.schedule(&mut frame);
        assert_eq!(kernel.processes().current(), 2);
        assert_eq!(frame.rip, SHELL_ENTRY);
        assert_eq!(frame.rbx, 0);

        kernel.schedule(&mut frame);
        assert_eq!(kernel.processes().current(), 1);
        assert_eq!(frame.rbx, 42);
        assert_eq!(frame.rip, SHELL_ENTRY + 10);
    }

    #[test]
    fn switching_moves_stack_and_windows() {
        let mut kernel = test_kernel();
        kernel.spawn_root(0).unwrap();
        kernel.spawn_root(1).unwrap();
        let mut frame = kernel.start().unwrap();
        assert_eq!(kernel.hardware().mapped_video.map(|p| p.as_u64()), Some(VGA_PHYS));

        kernel.schedule(&mut frame);
        let hw = kernel.hardware();
        assert_eq!(hw.mapped_pid(), Some(2));
        assert_eq!(
            hw.privileged_stack.map(|top| top.as_u64()),
            Some(FAKE_STACK_AREA_TOP - 2 * KERNEL_STACK_SIZE)
        );
        // Terminal 1 is in the background, so it draws into its shadow page.
        assert_eq!(hw.mapped_video.map(|p| p.as_u64()), Some(0x20_1000));
    }

    #[test]
    fn no_switch_leaves_everything_alone() {
        let mut kernel = test_kernel();
        kernel.spawn_root(0).unwrap();
        let mut frame = kernel.start().unwrap();
        frame.rcx = 9;
        let maps = kernel.hardware().slab_maps;

        kernel.schedule(&mut frame);
        assert_eq!(frame.rcx, 9);
        assert_eq!(kernel.hardware().slab_maps, maps);
        assert_eq!(kernel.processes().state(1), ProcessState::Running);
    }
}
