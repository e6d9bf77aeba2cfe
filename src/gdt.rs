// Global descriptor table and the task-state segment whose rsp0 follows the running process
use crate::process::context::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use core::ptr::{addr_of, addr_of_mut};
use lazy_static::lazy_static;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5;

static mut DOUBLE_FAULT_STACK: [u8; DOUBLE_FAULT_STACK_SIZE] = [0; DOUBLE_FAULT_STACK_SIZE];

static mut TSS: TaskStateSegment = TaskStateSegment::new();

pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub tss: SegmentSelector,
}

lazy_static! {
    pub static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.add_entry(Descriptor::kernel_code_segment());
        let kernel_data = gdt.add_entry(Descriptor::kernel_data_segment());
        // Data before code, so user selectors come out as 0x1B / 0x23.
        let user_data = gdt.add_entry(Descriptor::user_data_segment());
        let user_code = gdt.add_entry(Descriptor::user_code_segment());
        let tss = gdt.add_entry(Descriptor::tss_segment(unsafe { &*addr_of!(TSS) }));
        (
            gdt,
            Selectors {
                kernel_code,
                kernel_data,
                user_data,
                user_code,
                tss,
            },
        )
    };
}

pub fn init() {
    use x86_64::instructions::segmentation::{Segment, CS, SS};
    use x86_64::instructions::tables::load_tss;

    unsafe {
        let stack_start = VirtAddr::from_ptr(addr_of!(DOUBLE_FAULT_STACK));
        (*addr_of_mut!(TSS)).interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
            stack_start + DOUBLE_FAULT_STACK_SIZE as u64;
    }

    GDT.0.load();
    let selectors = &GDT.1;
    if selectors.user_code.0 != USER_CODE_SELECTOR as u16
        || selectors.user_data.0 != USER_DATA_SELECTOR as u16
    {
        panic!(
            "user selectors {:#x}/{:#x} do not match the frame layout {:#x}/{:#x}",
            selectors.user_code.0, selectors.user_data.0, USER_CODE_SELECTOR, USER_DATA_SELECTOR
        );
    }
    unsafe {
        CS::set_reg(selectors.kernel_code);
        SS::set_reg(selectors.kernel_data);
        load_tss(selectors.tss);
    }
}

/// Point the ring-0 stack used on the next user-mode trap at `top`.
pub fn set_privileged_stack(top: VirtAddr) {
    x86_64::instructions::interrupts::without_interrupts(|| unsafe {
        (*addr_of_mut!(TSS)).privilege_stack_table[0] = top;
    });
}
