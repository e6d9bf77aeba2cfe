// Page-table backed implementation of the address-space interface
use super::{
    reserved_slab_range, AddressSpace, Privilege, StackSwitch, KERNEL_STACK_SIZE, SLAB_SIZE,
    USER_WINDOW,
};
use crate::process::MAX_PROCESSES;
use bootloader::bootinfo::{MemoryMap, MemoryRegionType};
use core::mem::size_of;
use core::ptr::addr_of;
use x86_64::structures::paging::{
    FrameAllocator, Mapper, OffsetPageTable, Page, PageSize, PageTable, PageTableFlags,
    PhysFrame, Size2MiB, Size4KiB, Translate,
};
use x86_64::{PhysAddr, VirtAddr};

#[repr(C, align(16))]
struct KernelStack([u8; KERNEL_STACK_SIZE as usize]);

static_assertions::const_assert_eq!(size_of::<KernelStack>(), KERNEL_STACK_SIZE as usize);

/// One 8 KiB block per pid; pid n uses the block ending n blocks below the top.
static mut KERNEL_STACK_AREA: [KernelStack; MAX_PROCESSES] =
    [const { KernelStack([0; KERNEL_STACK_SIZE as usize]) }; MAX_PROCESSES];

/// Initialize a new OffsetPageTable.
///
/// # Safety
/// The complete physical memory must be mapped at `physical_memory_offset`
/// and this may only be called once.
pub unsafe fn init(physical_memory_offset: VirtAddr) -> OffsetPageTable<'static> {
    let level_4_table = active_level_4_table(physical_memory_offset);
    OffsetPageTable::new(level_4_table, physical_memory_offset)
}

unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    use x86_64::registers::control::Cr3;

    let (level_4_table_frame, _) = Cr3::read();

    let phys = level_4_table_frame.start_address();
    let virt = physical_memory_offset + phys.as_u64();
    let page_table_ptr: *mut PageTable = virt.as_mut_ptr();

    &mut *page_table_ptr
}

/// A FrameAllocator that returns usable frames from the bootloader's memory
/// map, never touching the physical range reserved for process slabs.
pub struct BootInfoFrameAllocator {
    memory_map: &'static MemoryMap,
    next: usize,
}

impl BootInfoFrameAllocator {
    /// # Safety
    /// The memory map must be valid: every frame marked `Usable` has to be
    /// really unused.
    pub unsafe fn init(memory_map: &'static MemoryMap) -> Self {
        BootInfoFrameAllocator {
            memory_map,
            next: 0,
        }
    }

    /// Whether the slab range is entirely usable RAM the bootloader left alone.
    pub fn slab_range_is_free(&self) -> bool {
        let reserved = reserved_slab_range();
        let mut covered = reserved.start;
        // Regions arrive sorted by address.
        for region in self.memory_map.iter() {
            if region.region_type != MemoryRegionType::Usable {
                continue;
            }
            let (start, end) = (region.range.start_addr(), region.range.end_addr());
            if start <= covered && end > covered {
                covered = end;
            }
        }
        covered >= reserved.end
    }

    fn usable_frames(&self) -> impl Iterator<Item = PhysFrame> {
        let reserved = reserved_slab_range();
        self.memory_map
            .iter()
            .filter(|r| r.region_type == MemoryRegionType::Usable)
            .map(|r| r.range.start_addr()..r.range.end_addr())
            .flat_map(|r| r.step_by(4096))
            .filter(move |addr| !reserved.contains(addr))
            .map(|addr| PhysFrame::containing_address(PhysAddr::new(addr)))
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootInfoFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let frame = self.usable_frames().nth(self.next);
        self.next += 1;
        frame
    }
}

/// The real machine: live page tables plus the TSS.
pub struct BareMetal {
    mapper: OffsetPageTable<'static>,
    frames: BootInfoFrameAllocator,
}

impl BareMetal {
    pub fn new(mapper: OffsetPageTable<'static>, frames: BootInfoFrameAllocator) -> Self {
        BareMetal { mapper, frames }
    }

    /// Physical address behind a kernel virtual address.
    pub fn physical_address(&self, addr: VirtAddr) -> Option<PhysAddr> {
        self.mapper.translate_addr(addr)
    }

    fn install<S: PageSize>(&mut self, page: Page<S>, frame: PhysFrame<S>, privilege: Privilege)
    where
        OffsetPageTable<'static>: Mapper<S>,
    {
        if let Ok((_, flush)) = self.mapper.unmap(page) {
            flush.ignore();
        }
        let flags = match privilege {
            Privilege::User => {
                PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE
            }
        };
        let parent_flags = flags;
        let result = unsafe {
            self.mapper
                .map_to_with_table_flags(page, frame, flags, parent_flags, &mut self.frames)
        };
        match result {
            Ok(flush) => flush.flush(),
            Err(err) => panic!("cannot map {:?} -> {:?}: {:?}", page, frame, err),
        }
    }
}

impl AddressSpace for BareMetal {
    fn map_user_slab(&mut self, phys: PhysAddr, virt: VirtAddr, privilege: Privilege) {
        // No 4 MiB pages in long mode: two 2 MiB pages cover the slab.
        for i in 0..SLAB_SIZE / Size2MiB::SIZE {
            let offset = i * Size2MiB::SIZE;
            let page = Page::<Size2MiB>::containing_address(virt + offset);
            let frame = PhysFrame::<Size2MiB>::containing_address(phys + offset);
            self.install(page, frame, privilege);
        }
    }

    fn map_video(&mut self, phys: PhysAddr, virt: VirtAddr, privilege: Privilege) {
        let page = Page::<Size4KiB>::containing_address(virt);
        let frame = PhysFrame::<Size4KiB>::containing_address(phys);
        self.install(page, frame, privilege);
    }

    fn user_window(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(USER_WINDOW as *mut u8, SLAB_SIZE as usize) }
    }
}

impl StackSwitch for BareMetal {
    fn set_privileged_stack(&mut self, top: VirtAddr) {
        crate::gdt::set_privileged_stack(top);
    }

    fn kernel_stack_area_top(&self) -> VirtAddr {
        let base = VirtAddr::from_ptr(unsafe { addr_of!(KERNEL_STACK_AREA) });
        base + size_of::<[KernelStack; MAX_PROCESSES]>() as u64
    }
}
