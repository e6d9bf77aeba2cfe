// Rivet kernel library: process table, scheduler, address-space mapping and
// the system-call surface, plus the boot-time devices they drive.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]

pub mod config;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod keyboard;
pub mod memory;
pub mod process;
pub mod rtc;
pub mod serial;
pub mod syscalls;
pub mod terminal;
pub mod userland;

#[cfg(target_os = "none")]
pub mod gdt;
#[cfg(target_os = "none")]
pub mod interrupts;

pub use error::KernelError;
pub use kernel::Kernel;

/// The kernel instance every interrupt handler works on.
#[cfg(target_os = "none")]
pub static KERNEL: spin::Mutex<Option<kernel::BootKernel>> = spin::Mutex::new(None);

/// Bring up descriptor tables, interrupt controllers and timers.
#[cfg(target_os = "none")]
pub fn init() {
    gdt::init();
    interrupts::init_idt();
    unsafe { interrupts::PICS.lock().initialize() };
    interrupts::unmask_irqs();
    interrupts::init_pit(config::SCHEDULER_HZ);
    rtc::init_hardware();
}

#[cfg(target_os = "none")]
pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
