// src/interrupts.rs
use crate::keyboard::KeyboardDecoder;
use crate::process::TrapFrame;
use crate::rtc::{self, RTC};
use crate::{gdt, syscalls, KERNEL};
use lazy_static::lazy_static;
use pic8259::ChainedPics;
use x86_64::instructions::port::Port;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};
use x86_64::PrivilegeLevel;
use x86_64::VirtAddr;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// PIT input clock
const PIT_HZ: u32 = 1_193_182;

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard,
    Rtc = PIC_2_OFFSET,
    Syscall = 0x80,
}

impl InterruptIndex {
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn as_usize(self) -> usize {
        usize::from(self.as_u8())
    }
}

pub static PICS: spin::Mutex<ChainedPics> =
    spin::Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

lazy_static! {
    static ref KEYBOARD: spin::Mutex<KeyboardDecoder> = spin::Mutex::new(KeyboardDecoder::new());
}

/// Generate an entry stub that saves every register into a `TrapFrame`,
/// hands it to `$handler`, and resumes whatever the frame holds afterwards.
macro_rules! trap_stub {
    ($name:ident, $handler:ident) => {
        trap_stub!($name, $handler, "");
    };
    ($name:ident, $handler:ident, $prologue:literal) => {
        #[unsafe(naked)]
        extern "C" fn $name() -> ! {
            core::arch::naked_asm!(
                $prologue,
                "push r15",
                "push r14",
                "push r13",
                "push r12",
                "push r11",
                "push r10",
                "push r9",
                "push r8",
                "push rbp",
                "push rdi",
                "push rsi",
                "push rdx",
                "push rcx",
                "push rbx",
                "push rax",
                "mov rdi, rsp",
                "mov rbp, rsp",
                "and rsp, -16",
                "call {handler}",
                "mov rsp, rbp",
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
                handler = sym $handler,
            );
        }
    };
}

trap_stub!(syscall_entry, syscall_handler);
trap_stub!(timer_entry, timer_handler);
trap_stub!(divide_error_entry, exception_handler);
trap_stub!(invalid_opcode_entry, exception_handler);
// These push an error code the frame has no slot for.
trap_stub!(general_protection_entry, exception_handler, "add rsp, 8");
trap_stub!(page_fault_entry, page_fault_handler, "add rsp, 8");

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
            idt.divide_error
                .set_handler_addr(VirtAddr::new(divide_error_entry as u64));
            idt.invalid_opcode
                .set_handler_addr(VirtAddr::new(invalid_opcode_entry as u64));
            idt.general_protection_fault
                .set_handler_addr(VirtAddr::new(general_protection_entry as u64));
            idt.page_fault
                .set_handler_addr(VirtAddr::new(page_fault_entry as u64));
            // timer -> IRQ0
            idt[InterruptIndex::Timer.as_usize()]
                .set_handler_addr(VirtAddr::new(timer_entry as u64));
            // syscall -> 0x80, callable from ring 3
            idt[InterruptIndex::Syscall.as_usize()]
                .set_handler_addr(VirtAddr::new(syscall_entry as u64))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }
        // keyboard -> IRQ1, rtc -> IRQ8
        idt[InterruptIndex::Keyboard.as_usize()].set_handler_fn(keyboard_interrupt_handler);
        idt[InterruptIndex::Rtc.as_usize()].set_handler_fn(rtc_interrupt_handler);
        idt
    };
}

pub fn init_idt() {
    IDT.load();
}

/// Let the timer, keyboard, cascade and RTC lines through.
pub fn unmask_irqs() {
    let mut primary = Port::<u8>::new(0x21);
    let mut secondary = Port::<u8>::new(0xA1);
    unsafe {
        primary.write(!0b0000_0111);
        secondary.write(!0b0000_0001);
    }
}

/// Initialize the PIT for timer interrupts.
/// `hz` = frequency in Hertz.
pub fn init_pit(hz: u32) {
    let divisor = (PIT_HZ / hz) as u16;
    let mut command = Port::<u8>::new(0x43);
    let mut channel0 = Port::<u8>::new(0x40);
    unsafe {
        // Channel 0, low/high byte access, mode 2 (rate generator), binary
        command.write(0x34);
        channel0.write((divisor & 0xFF) as u8);
        channel0.write((divisor >> 8) as u8);
    }
    log::debug!("pit programmed at {} Hz", hz);
}

extern "C" fn syscall_handler(frame: &mut TrapFrame) {
    match KERNEL.lock().as_mut() {
        Some(kernel) => syscalls::handle_syscall(kernel, frame),
        None => frame.rax = syscalls::SYSCALL_FAILURE,
    }
}

extern "C" fn timer_handler(frame: &mut TrapFrame) {
    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Timer.as_u8());
    }
    // Only user contexts are preempted; the boot path never is.
    if frame.from_user_mode() {
        if let Some(kernel) = KERNEL.lock().as_mut() {
            kernel.schedule(frame);
        }
    }
}

extern "C" fn exception_handler(frame: &mut TrapFrame) {
    if !frame.from_user_mode() {
        panic!("EXCEPTION in kernel mode\n{:#x?}", frame);
    }
    if let Some(kernel) = KERNEL.lock().as_mut() {
        kernel.fault(frame);
    }
}

extern "C" fn page_fault_handler(frame: &mut TrapFrame) {
    use x86_64::registers::control::Cr2;

    log::warn!("page fault accessing {:?}", Cr2::read());
    exception_handler(frame);
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    log::warn!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

/// Keyboard IRQ handler (IRQ1)
extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    let mut port = Port::new(0x60);
    let scancode: u8 = unsafe { port.read() };

    if let Some(key) = KEYBOARD.lock().add_scancode(scancode) {
        if let Some(kernel) = KERNEL.lock().as_mut() {
            kernel.handle_key(key);
        }
    }

    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Keyboard.as_u8());
    }
}

/// RTC IRQ handler (IRQ8)
extern "x86-interrupt" fn rtc_interrupt_handler(_stack_frame: InterruptStackFrame) {
    RTC.tick();
    rtc::acknowledge();
    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Rtc.as_u8());
    }
}
