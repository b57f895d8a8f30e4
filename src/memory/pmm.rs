//! Physical page allocator.
//!
//! One bit per page frame over a fixed 4 GiB ceiling. Frames are marked
//! used for every reserved E820 range and for the kernel's low-memory
//! footprint at init; allocation is a first-fit scan above the reservation.

use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::{
    page_count, MemoryArea, MemoryError, PhysicalAddress, KERNEL_RESERVED, MAX_PHYSICAL,
    MEMORY_AREA_ACPI_DATA, MEMORY_AREA_ACPI_NVS, MEMORY_AREA_BAD, MEMORY_AREA_RESERVED,
    MEMORY_AREA_USABLE, PAGE_SHIFT, PAGE_SIZE,
};

const BITMAP_SIZE: usize = (MAX_PHYSICAL as usize >> PAGE_SHIFT) / 8;

pub struct PhysicalMemory {
    inner: Mutex<Bitmap>,
}

struct Bitmap {
    bits: Vec<u8>,
    highest_usable: usize,
    total_pages: usize,
    used_pages: usize,
    reserved_pages: usize,
    total_memory: u64,
    usable_memory: u64,
}

impl Bitmap {
    fn is_free(&self, page: usize) -> bool {
        if page >= self.highest_usable {
            return false;
        }
        let index = page >> PAGE_SHIFT;
        self.bits[index >> 3] & (1 << (index & 7)) == 0
    }

    fn mark_page_used(&mut self, page: usize) {
        let index = page >> PAGE_SHIFT;
        let mask = 1 << (index & 7);
        if self.bits[index >> 3] & mask == 0 {
            self.bits[index >> 3] |= mask;
            self.used_pages += 1;
        }
    }

    fn mark_page_free(&mut self, page: usize) {
        let index = page >> PAGE_SHIFT;
        let mask = 1 << (index & 7);
        if self.bits[index >> 3] & mask != 0 {
            self.bits[index >> 3] &= !mask;
            self.used_pages -= 1;
        }
    }

    fn mark_used(&mut self, base: usize, count: usize) {
        for page in 0..count {
            self.mark_page_used(base + (page << PAGE_SHIFT));
        }
    }

    fn mark_free(&mut self, base: usize, count: usize) {
        for page in 0..count {
            self.mark_page_free(base + (page << PAGE_SHIFT));
        }
    }

    /// First-fit scan for `count` contiguous free pages, starting just
    /// above the kernel reservation.
    fn find_range(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }

        let mut base = KERNEL_RESERVED;
        let mut free = 0;

        while free < count {
            if self.is_free(base + (free << PAGE_SHIFT)) {
                free += 1;
            } else {
                base += PAGE_SIZE;
                if base >= self.highest_usable {
                    return None;
                }
                free = 0;
            }
        }

        Some(base)
    }

    fn add_area(&mut self, area: &MemoryArea) {
        // No PAE; everything at or past the ceiling is invisible.
        if area.base >= MAX_PHYSICAL || area.base + area.length > MAX_PHYSICAL {
            return;
        }
        if area.length == 0 {
            return;
        }
        // ACPI 3.0 extended attributes
        if area.acpi & 1 == 0 {
            return;
        }

        let pages = page_count(area.length as usize);
        self.total_pages += pages;
        self.total_memory += area.length;

        if area.kind == MEMORY_AREA_USABLE {
            self.usable_memory += area.length;
            self.highest_usable = (area.base + area.length) as usize;
        } else {
            self.reserved_pages += pages;
            self.mark_used(area.base as usize, pages);
        }
    }
}

impl PhysicalMemory {
    pub fn new(areas: &[MemoryArea]) -> Result<Self, MemoryError> {
        let mut bitmap = Bitmap {
            bits: vec![0; BITMAP_SIZE],
            highest_usable: 0,
            total_pages: 0,
            used_pages: 0,
            reserved_pages: 0,
            total_memory: 0,
            usable_memory: 0,
        };

        for area in areas {
            log::debug!(
                "pmm: {:#018x} - {:#018x} - {}",
                area.base,
                area.base + area.length,
                match area.kind {
                    MEMORY_AREA_USABLE => "usable RAM",
                    MEMORY_AREA_RESERVED => "hardware-reserved",
                    MEMORY_AREA_ACPI_DATA => "ACPI data",
                    MEMORY_AREA_ACPI_NVS => "ACPI NVS",
                    MEMORY_AREA_BAD => "bad memory",
                    _ => "undefined type",
                }
            );
            bitmap.add_area(area);
        }

        if bitmap.highest_usable == 0 {
            return Err(MemoryError::NoSpace);
        }

        // Kernel footprint: the lowest 16 MiB never leave the allocator.
        bitmap.mark_used(0, KERNEL_RESERVED >> PAGE_SHIFT);

        log::info!(
            "pmm: total of {} MB memory, of which {} MB are usable",
            bitmap.total_memory / 1024 / 1024,
            bitmap.usable_memory / 1024 / 1024
        );
        log::info!(
            "pmm: {} pages, {} used, {} hardware reserved",
            bitmap.total_pages,
            bitmap.used_pages,
            bitmap.reserved_pages
        );

        Ok(PhysicalMemory {
            inner: Mutex::new(bitmap),
        })
    }

    /// Mark a range of pages used. Idempotent per page; the used counter
    /// moves only on actual transitions.
    pub fn mark_used(&self, base: PhysicalAddress, count: usize) {
        if count == 0 {
            return;
        }
        self.inner.lock().mark_used(base.data(), count);
    }

    /// Mark a range of pages free. Idempotent per page.
    pub fn mark_free(&self, base: PhysicalAddress, count: usize) {
        if count == 0 {
            return;
        }
        self.inner.lock().mark_free(base.data(), count);
    }

    /// Pages at or after the highest usable physical address always report
    /// not-free.
    pub fn is_free(&self, page: PhysicalAddress) -> bool {
        self.inner.lock().is_free(page.data())
    }

    pub fn find_range(&self, count: usize) -> Option<PhysicalAddress> {
        self.inner.lock().find_range(count).map(PhysicalAddress::new)
    }

    /// Find and claim `count` contiguous pages under one lock.
    ///
    /// Exhaustion is reported, never fatal; every subsequent call on an
    /// exhausted allocator keeps returning [`MemoryError::NoSpace`].
    pub fn allocate(&self, count: usize) -> Result<PhysicalAddress, MemoryError> {
        if count == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let mut bitmap = self.inner.lock();
        let base = bitmap.find_range(count).ok_or(MemoryError::NoSpace)?;
        bitmap.mark_used(base, count);
        Ok(PhysicalAddress::new(base))
    }

    pub fn used_pages(&self) -> usize {
        self.inner.lock().used_pages
    }

    pub fn total_pages(&self) -> usize {
        self.inner.lock().total_pages
    }

    pub fn reserved_pages(&self) -> usize {
        self.inner.lock().reserved_pages
    }

    pub fn usable_memory(&self) -> u64 {
        self.inner.lock().usable_memory
    }

    pub fn highest_usable(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.inner.lock().highest_usable)
    }
}
