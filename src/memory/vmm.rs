//! Virtual address space manager.
//!
//! A 4-level radix page table owned by the kernel. Intermediate tables are
//! allocated on demand while mapping, never while querying. The table is a
//! software structure reached through the physical aperture; an embedding
//! kernel mirrors installs into the hardware table and performs TLB
//! invalidation after [`AddressSpace::map`] returns (flush-on-map).

use alloc::boxed::Box;
use core::array;

use bitflags::bitflags;
use spin::Mutex;

use super::{MemoryError, PhysicalAddress, VirtualAddress, KERNEL_HEAP, MAX_PHYSICAL, PAGE_SHIFT, PAGE_SIZE};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const NO_CACHE = 1 << 4;
        const HUGE = 1 << 7;
    }
}

impl PageFlags {
    pub fn kernel_rw() -> Self {
        PageFlags::PRESENT | PageFlags::WRITABLE
    }
    pub fn mmio() -> Self {
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::NO_CACHE
    }
}

const ENTRIES: usize = 512;
const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Top of the usable virtual space (48-bit, lower half).
pub const VIRT_CEILING: usize = 1 << 47;

struct Pt {
    entries: [u64; ENTRIES],
}

struct Pd {
    slots: [Option<Box<Pt>>; ENTRIES],
}

struct Pdpt {
    slots: [Option<Box<Pd>>; ENTRIES],
}

struct Pml4 {
    slots: [Option<Box<Pdpt>>; ENTRIES],
}

fn index(address: usize, level: u32) -> usize {
    (address >> (PAGE_SHIFT + 9 * level as usize)) & (ENTRIES - 1)
}

struct Tables {
    root: Pml4,
}

impl Tables {
    fn new() -> Self {
        Tables {
            root: Pml4 {
                slots: array::from_fn(|_| None),
            },
        }
    }

    /// Raw entry for a page, zero when absent. Never allocates.
    fn entry(&self, address: usize) -> u64 {
        let pdpt = match self.root.slots[index(address, 3)] {
            Some(ref pdpt) => pdpt,
            None => return 0,
        };
        let pd = match pdpt.slots[index(address, 2)] {
            Some(ref pd) => pd,
            None => return 0,
        };
        let pt = match pd.slots[index(address, 1)] {
            Some(ref pt) => pt,
            None => return 0,
        };
        pt.entries[index(address, 0)]
    }

    /// Slot for a page, allocating intermediate levels on demand.
    fn entry_mut(&mut self, address: usize) -> &mut u64 {
        let pdpt = self.root.slots[index(address, 3)].get_or_insert_with(|| {
            Box::new(Pdpt {
                slots: array::from_fn(|_| None),
            })
        });
        let pd = pdpt.slots[index(address, 2)].get_or_insert_with(|| {
            Box::new(Pd {
                slots: array::from_fn(|_| None),
            })
        });
        let pt = pd.slots[index(address, 1)].get_or_insert_with(|| {
            Box::new(Pt {
                entries: [0; ENTRIES],
            })
        });
        &mut pt.entries[index(address, 0)]
    }

    /// Clear a page's entry without allocating anything.
    fn clear(&mut self, address: usize) {
        if let Some(ref mut pdpt) = self.root.slots[index(address, 3)] {
            if let Some(ref mut pd) = pdpt.slots[index(address, 2)] {
                if let Some(ref mut pt) = pd.slots[index(address, 1)] {
                    pt.entries[index(address, 0)] = 0;
                }
            }
        }
    }

    fn map(&mut self, address: usize, physical: usize, count: usize, flags: PageFlags) {
        for page in 0..count {
            *self.entry_mut(address + (page << PAGE_SHIFT)) =
                (physical + (page << PAGE_SHIFT)) as u64 | flags.bits();
        }
    }

    fn is_present(&self, address: usize, window: Option<(usize, usize)>) -> bool {
        if let Some((base, size)) = window {
            if address >= base && address < base + size {
                return true;
            }
        }
        self.entry(address) & PageFlags::PRESENT.bits() != 0
    }

    /// First-fit scan for `count` unmapped pages starting at `start`.
    fn find_free(
        &self,
        window: Option<(usize, usize)>,
        start: usize,
        count: usize,
    ) -> Option<usize> {
        if count == 0 {
            return None;
        }
        // the last start that keeps [base, base + span) under the ceiling
        let span = count.checked_mul(PAGE_SIZE)?;
        let limit = VIRT_CEILING.checked_sub(span)?;

        let mut base = start;
        let mut free = 0;

        while free < count {
            if base > limit {
                return None;
            }
            if !self.is_present(base + (free << PAGE_SHIFT), window) {
                free += 1;
            } else {
                base += PAGE_SIZE;
                free = 0;
            }
        }

        Some(base)
    }
}

pub struct AddressSpace {
    tables: Mutex<Tables>,
    linear_window: Option<VirtualAddress>,
}

impl AddressSpace {
    pub fn new() -> Self {
        AddressSpace {
            tables: Mutex::new(Tables::new()),
            linear_window: None,
        }
    }

    /// An address space with a permanently-mapped physical window at
    /// `base`, covering the whole physical ceiling as plain read-write
    /// memory. `request_map` short-circuits through it.
    pub fn with_linear_window(base: VirtualAddress) -> Self {
        AddressSpace {
            tables: Mutex::new(Tables::new()),
            linear_window: Some(base),
        }
    }

    fn window(&self) -> Option<(usize, usize)> {
        self.linear_window
            .map(|base| (base.data(), MAX_PHYSICAL as usize))
    }

    pub fn in_linear_window(&self, address: VirtualAddress) -> bool {
        match self.window() {
            Some((base, size)) => address.data() >= base && address.data() < base + size,
            None => false,
        }
    }

    /// Physical frame and flags for a mapped page, or `None` when absent.
    pub fn get_mapping(&self, address: VirtualAddress) -> Option<(PhysicalAddress, PageFlags)> {
        if let Some((base, _)) = self.window() {
            if self.in_linear_window(address) {
                let physical = (address.data() - base) & !(PAGE_SIZE - 1);
                return Some((PhysicalAddress::new(physical), PageFlags::kernel_rw()));
            }
        }

        let entry = self.tables.lock().entry(address.data());
        if entry & PageFlags::PRESENT.bits() == 0 {
            return None;
        }
        Some((
            PhysicalAddress::new((entry & ADDRESS_MASK) as usize),
            PageFlags::from_bits_truncate(entry & !ADDRESS_MASK),
        ))
    }

    /// Byte-granular translation, carrying the sub-page offset over.
    pub fn translate(&self, address: VirtualAddress) -> Option<PhysicalAddress> {
        let (frame, _) = self.get_mapping(address)?;
        Some(frame.add(address.page_offset()))
    }

    /// Install `count` entries mapping `address` onto `physical`.
    ///
    /// The embedding kernel must invalidate the translation cache for the
    /// touched range once this returns; stale entries are never flushed
    /// lazily.
    pub fn map(&self, address: VirtualAddress, physical: PhysicalAddress, count: usize, flags: PageFlags) {
        if count == 0 {
            return;
        }
        self.tables
            .lock()
            .map(address.data(), physical.data(), count, flags);
    }

    /// Clear `count` entries. Does not free backing frames; callers that
    /// allocated-and-mapped use [`super::MemoryManager::release`] instead.
    pub fn unmap(&self, address: VirtualAddress, count: usize) {
        if count == 0 {
            return;
        }
        let mut tables = self.tables.lock();
        for page in 0..count {
            tables.clear(address.data() + (page << PAGE_SHIFT));
        }
    }

    pub fn find_free_range(&self, start: usize, count: usize) -> Option<VirtualAddress> {
        self.tables
            .lock()
            .find_free(self.window(), start, count)
            .map(VirtualAddress::new)
    }

    /// Find a free virtual range and map it onto `physical` under a single
    /// lock acquisition.
    pub(super) fn map_fresh(
        &self,
        start: usize,
        physical: PhysicalAddress,
        count: usize,
        flags: PageFlags,
    ) -> Result<VirtualAddress, MemoryError> {
        let mut tables = self.tables.lock();
        let base = tables
            .find_free(self.window(), start, count)
            .ok_or(MemoryError::NoSpace)?;
        tables.map(base, physical.data(), count, flags);
        Ok(VirtualAddress::new(base))
    }

    /// Map a given physical range into a fresh virtual range, keeping the
    /// physical sub-page remainder in the returned address. One extra page
    /// is mapped so unaligned starts cannot run off the end.
    pub fn request_map(
        &self,
        physical: PhysicalAddress,
        count: usize,
        flags: PageFlags,
    ) -> Result<VirtualAddress, MemoryError> {
        if count == 0 {
            return Err(MemoryError::ZeroSize);
        }

        if let Some(base) = self.linear_window {
            if flags == PageFlags::kernel_rw() {
                return Ok(base.add(physical.data()));
            }
        }

        let base = self.map_fresh(KERNEL_HEAP, physical.frame(), count + 1, flags)?;
        Ok(base.add(physical.page_offset()))
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        AddressSpace::new()
    }
}
