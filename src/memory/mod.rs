//! # Memory management
//!
//! Physical bitmap allocator, software page tables and the kernel heap.
//! All physical memory is reached through a [`PhysAccess`] aperture so the
//! same code runs over a kernel's permanent physical mapping or over an
//! in-memory arena under test.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

pub mod heap;
pub mod pmm;
pub mod vmm;

pub use self::pmm::PhysicalMemory;
pub use self::vmm::{AddressSpace, PageFlags};

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;

/// Base of the region used for heap and on-demand mappings.
pub const KERNEL_HEAP: usize = 1 << 45;

/// Base of the optional permanently-mapped physical window.
pub const LINEAR_WINDOW: usize = 1 << 46;

/// Physical ceiling covered by the page bitmap. Chosen at compile time;
/// E820 ranges at or above it are ignored.
pub const MAX_PHYSICAL: u64 = 1 << 32;

/// Lowest physical memory reserved for the kernel footprint. Allocation
/// never hands out frames below this.
pub const KERNEL_RESERVED: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    pub const fn new(address: usize) -> Self {
        PhysicalAddress(address)
    }
    pub const fn data(&self) -> usize {
        self.0
    }
    pub const fn add(self, offset: usize) -> Self {
        PhysicalAddress(self.0 + offset)
    }
    /// Align down to the containing page frame.
    pub const fn frame(self) -> Self {
        PhysicalAddress(self.0 & !(PAGE_SIZE - 1))
    }
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress({:#x})", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    pub const fn new(address: usize) -> Self {
        VirtualAddress(address)
    }
    pub const fn data(&self) -> usize {
        self.0
    }
    pub const fn add(self, offset: usize) -> Self {
        VirtualAddress(self.0 + offset)
    }
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({:#x})", self.0)
    }
}

/// A memory map area as handed over by the bootloader (E820 row).
#[derive(Copy, Clone, Debug)]
pub struct MemoryArea {
    pub base: u64,
    pub length: u64,
    pub kind: u32,
    /// ACPI 3.0 extended attributes; bit 0 clear means "ignore this entry".
    pub acpi: u32,
}

pub const MEMORY_AREA_USABLE: u32 = 1;
pub const MEMORY_AREA_RESERVED: u32 = 2;
pub const MEMORY_AREA_ACPI_DATA: u32 = 3;
pub const MEMORY_AREA_ACPI_NVS: u32 = 4;
pub const MEMORY_AREA_BAD: u32 = 5;

impl MemoryArea {
    pub const fn usable(base: u64, length: u64) -> Self {
        MemoryArea {
            base,
            length,
            kind: MEMORY_AREA_USABLE,
            acpi: 1,
        }
    }
    pub const fn reserved(base: u64, length: u64) -> Self {
        MemoryArea {
            base,
            length,
            kind: MEMORY_AREA_RESERVED,
            acpi: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryError {
    /// No contiguous physical or virtual range satisfies the request.
    NoSpace,
    /// Zero-size request rejected at the call boundary.
    ZeroSize,
    /// The virtual address is not mapped.
    NotMapped,
    /// Size arithmetic overflowed.
    TooLarge,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::NoSpace => write!(f, "out of memory"),
            MemoryError::ZeroSize => write!(f, "zero-size request"),
            MemoryError::NotMapped => write!(f, "address not mapped"),
            MemoryError::TooLarge => write!(f, "size overflow"),
        }
    }
}

/// Aperture into physical memory. A kernel implements this over its
/// permanently-mapped physical window; tests implement it over an arena.
///
/// Accesses may cross page boundaries; implementations are linear in
/// physical address space.
pub trait PhysAccess {
    fn read(&self, address: PhysicalAddress, buf: &mut [u8]);
    fn write(&self, address: PhysicalAddress, buf: &[u8]);
    fn fill(&self, address: PhysicalAddress, len: usize, value: u8);
}

/// A contiguous memory arena starting at physical address zero.
pub struct LinearMemory {
    bytes: Mutex<Vec<u8>>,
}

impl LinearMemory {
    pub fn new(size: usize) -> Self {
        LinearMemory {
            bytes: Mutex::new(vec![0; size]),
        }
    }
    pub fn size(&self) -> usize {
        self.bytes.lock().len()
    }
}

impl PhysAccess for LinearMemory {
    fn read(&self, address: PhysicalAddress, buf: &mut [u8]) {
        let bytes = self.bytes.lock();
        let start = address.data();
        assert!(
            start + buf.len() <= bytes.len(),
            "physical read past end of memory: {:#x}+{:#x}",
            start,
            buf.len()
        );
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
    }

    fn write(&self, address: PhysicalAddress, buf: &[u8]) {
        let mut bytes = self.bytes.lock();
        let start = address.data();
        assert!(
            start + buf.len() <= bytes.len(),
            "physical write past end of memory: {:#x}+{:#x}",
            start,
            buf.len()
        );
        bytes[start..start + buf.len()].copy_from_slice(buf);
    }

    fn fill(&self, address: PhysicalAddress, len: usize, value: u8) {
        let mut bytes = self.bytes.lock();
        let start = address.data();
        assert!(
            start + len <= bytes.len(),
            "physical fill past end of memory: {:#x}+{:#x}",
            start,
            len
        );
        bytes[start..start + len].fill(value);
    }
}

/// The composition root: physical allocator, address space and aperture.
///
/// The initialization order required by the rest of the kernel is encoded
/// here: the PMM is built first, the address space second, and only then are
/// the heap entry points usable.
pub struct MemoryManager<P: PhysAccess> {
    pub pmm: PhysicalMemory,
    pub vmm: AddressSpace,
    phys: P,
}

impl<P: PhysAccess> MemoryManager<P> {
    pub fn new(areas: &[MemoryArea], phys: P) -> Result<Self, MemoryError> {
        let pmm = PhysicalMemory::new(areas)?;
        let vmm = AddressSpace::new();
        Ok(MemoryManager { pmm, vmm, phys })
    }

    /// Like [`MemoryManager::new`], with a permanently-mapped physical
    /// window so plain read-write `request_map` calls short-circuit.
    pub fn with_linear_window(areas: &[MemoryArea], phys: P) -> Result<Self, MemoryError> {
        let pmm = PhysicalMemory::new(areas)?;
        let vmm = AddressSpace::with_linear_window(VirtualAddress::new(LINEAR_WINDOW));
        Ok(MemoryManager { pmm, vmm, phys })
    }

    pub fn phys(&self) -> &P {
        &self.phys
    }

    /// Allocate `count` virtual pages backed by fresh physical frames,
    /// zero-filled. First-fit in virtual space starting at `start`.
    pub fn allocate_region(
        &self,
        start: usize,
        count: usize,
        flags: PageFlags,
    ) -> Result<VirtualAddress, MemoryError> {
        if count == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let physical = self.pmm.allocate(count)?;
        let virtual_base = match self.vmm.map_fresh(start, physical, count, flags) {
            Ok(base) => base,
            Err(err) => {
                self.pmm.mark_free(physical, count);
                return Err(err);
            }
        };

        for page in 0..count {
            self.phys
                .fill(physical.add(page << PAGE_SHIFT), PAGE_SIZE, 0);
        }

        Ok(virtual_base)
    }

    /// Free the physical frames behind an allocated region and unmap it.
    /// A no-op if the region is already unmapped.
    ///
    /// This is the counterpart of [`MemoryManager::allocate_region`]; bare
    /// `unmap` on the address space is for MMIO/firmware ranges the PMM
    /// never owned.
    pub fn release(&self, address: VirtualAddress, count: usize) {
        if count == 0 {
            return;
        }

        let physical = match self.vmm.translate(address) {
            Some(physical) => physical.frame(),
            None => return,
        };

        self.pmm.mark_free(physical, count);
        self.vmm.unmap(address, count);
    }

    /// Map a caller-provided physical range (firmware table, device MMIO)
    /// into a fresh virtual range. The returned address carries the
    /// sub-page offset of `physical`.
    pub fn request_map(
        &self,
        physical: PhysicalAddress,
        count: usize,
        flags: PageFlags,
    ) -> Result<VirtualAddress, MemoryError> {
        self.vmm.request_map(physical, count, flags)
    }

    /// Unmap a range previously returned by [`MemoryManager::request_map`],
    /// including the spill page mapped for unaligned starts.
    pub fn unmap(&self, address: VirtualAddress, count: usize) {
        if self.vmm.in_linear_window(address) {
            return;
        }
        let base = VirtualAddress::new(address.data() & !(PAGE_SIZE - 1));
        self.vmm.unmap(base, count + 1);
    }

    /// Copy bytes out of mapped virtual memory.
    pub fn read(&self, address: VirtualAddress, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.walk(address, buf.len(), |offset, physical, len| {
            self.phys.read(physical, &mut buf[offset..offset + len]);
        })
    }

    /// Copy bytes into mapped virtual memory.
    pub fn write(&self, address: VirtualAddress, buf: &[u8]) -> Result<(), MemoryError> {
        self.walk(address, buf.len(), |offset, physical, len| {
            self.phys.write(physical, &buf[offset..offset + len]);
        })
    }

    fn walk(
        &self,
        address: VirtualAddress,
        len: usize,
        mut access: impl FnMut(usize, PhysicalAddress, usize),
    ) -> Result<(), MemoryError> {
        let mut offset = 0;
        while offset < len {
            let current = address.add(offset);
            let physical = self.vmm.translate(current).ok_or(MemoryError::NotMapped)?;
            let chunk = core::cmp::min(len - offset, PAGE_SIZE - current.page_offset());
            access(offset, physical, chunk);
            offset += chunk;
        }
        Ok(())
    }
}

pub const fn page_count(bytes: usize) -> usize {
    (bytes + PAGE_SIZE - 1) >> PAGE_SHIFT
}
