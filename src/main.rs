#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use bootloader::{entry_point, BootInfo};
    use core::fmt::Write;
    use core::panic::PanicInfo;
    use core::ptr::addr_of_mut;
    use rivet::fs::{BootImage, BLOCK_SIZE};
    use rivet::kernel::Kernel;
    use rivet::memory::paging::{self, BareMetal, BootInfoFrameAllocator};
    use rivet::process::context::enter_user;
    use rivet::rtc::RTC;
    use rivet::terminal::{self, Buffer, Color, ColorCode, Cursor, ScreenWriter, Terminals, TERMINALS};
    use rivet::{userland, KERNEL};
    use x86_64::{PhysAddr, VirtAddr};

    entry_point!(kernel_main);

    /// A page-aligned frame a background terminal draws into.
    #[repr(C, align(4096))]
    struct ShadowPage([u8; 4096]);

    static mut SHADOW_PAGES: [ShadowPage; TERMINALS] =
        [const { ShadowPage([0; 4096]) }; TERMINALS];

    static mut BOOT_IMAGE: [u8; 16 * BLOCK_SIZE] = [0; 16 * BLOCK_SIZE];

    fn shadow_buffers(hw: &BareMetal) -> [(&'static mut Buffer, PhysAddr); TERMINALS] {
        let pages = unsafe { &mut *addr_of_mut!(SHADOW_PAGES) };
        pages.each_mut().map(|page| {
            let page: *mut ShadowPage = page;
            let virt = VirtAddr::from_ptr(page);
            let phys = match hw.physical_address(virt) {
                Some(phys) => phys,
                None => panic!("shadow page {:?} is not mapped", virt),
            };
            let buffer = unsafe { &mut *(page as *mut Buffer) };
            buffer.clear();
            (buffer, phys)
        })
    }

    fn kernel_main(boot_info: &'static BootInfo) -> ! {
        rivet::serial::init_logger();
        log::info!("rivet booting");
        rivet::init();

        let phys_mem_offset = VirtAddr::new(boot_info.physical_memory_offset);
        let mapper = unsafe { paging::init(phys_mem_offset) };
        let frames = unsafe { BootInfoFrameAllocator::init(&boot_info.memory_map) };
        if !frames.slab_range_is_free() {
            panic!("physical memory for process slabs is not available");
        }
        let hw = BareMetal::new(mapper, frames);

        let screen = unsafe { terminal::vga_buffer() };
        screen.clear();
        let terminals = Terminals::new(screen, shadow_buffers(&hw));

        let image = unsafe { &mut *addr_of_mut!(BOOT_IMAGE) };
        let len = userland::build_boot_image(&mut image[..])
            .unwrap_or_else(|err| panic!("cannot build boot image: {}", err));
        let image: &'static [u8] = image;
        let fs = BootImage::mount(&image[..len])
            .unwrap_or_else(|err| panic!("cannot mount boot image: {}", err));

        let mut kernel = Kernel::new(hw, fs, terminals, &RTC);
        for terminal in 0..TERMINALS {
            if let Err(err) = kernel.spawn_root(terminal) {
                panic!("cannot start terminal {}: {}", terminal, err);
            }
        }
        let frame = match kernel.start() {
            Some(frame) => frame,
            None => panic!("nothing to run"),
        };
        *KERNEL.lock() = Some(kernel);

        log::info!("entering user mode at {:#x}", frame.rip);
        unsafe { enter_user(&frame) }
    }

    /// This function is called on panic.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        x86_64::instructions::interrupts::disable();
        log::error!("{}", info);
        let mut cursor = Cursor::new(ColorCode::new(Color::White, Color::Red));
        let screen = unsafe { terminal::vga_buffer() };
        let _ = write!(ScreenWriter::new(&mut cursor, screen), "KERNEL PANIC: {}", info);
        rivet::hlt_loop();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {}
