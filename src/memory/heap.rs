//! Kernel heap.
//!
//! Page-granular allocations with a small header in front of every user
//! pointer recording the page count and the requested byte size. The
//! header belongs to the allocator; user data starts at `base + 16`.

use super::{
    page_count, MemoryError, MemoryManager, PageFlags, PhysAccess, VirtualAddress, KERNEL_HEAP,
};

/// Header size in bytes. Sized so user pointers stay 16-byte aligned.
pub const HEAP_HEADER: usize = 16;

impl<P: PhysAccess> MemoryManager<P> {
    /// Allocate `bytes` of zero-initialized kernel memory.
    pub fn allocate(&self, bytes: usize) -> Result<VirtualAddress, MemoryError> {
        if bytes == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let total = bytes.checked_add(HEAP_HEADER).ok_or(MemoryError::TooLarge)?;
        let pages = page_count(total);

        let base = self.allocate_region(KERNEL_HEAP, pages, PageFlags::kernel_rw())?;

        let mut header = [0u8; HEAP_HEADER];
        header[0..8].copy_from_slice(&(pages as u64).to_le_bytes());
        header[8..16].copy_from_slice(&(bytes as u64).to_le_bytes());
        self.write(base, &header)?;

        Ok(base.add(HEAP_HEADER))
    }

    /// Allocate zero-initialized storage for `count` elements of
    /// `size` bytes each.
    pub fn allocate_zeroed(&self, size: usize, count: usize) -> Result<VirtualAddress, MemoryError> {
        let bytes = size.checked_mul(count).ok_or(MemoryError::TooLarge)?;
        self.allocate(bytes)
    }

    /// Move an allocation to `new_bytes` of storage, preserving
    /// `min(old, new)` bytes of content, and free the original.
    pub fn reallocate(
        &self,
        pointer: VirtualAddress,
        new_bytes: usize,
    ) -> Result<VirtualAddress, MemoryError> {
        if pointer.data() == 0 {
            return self.allocate(new_bytes);
        }
        if new_bytes == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let (_, old_bytes) = self.read_header(pointer)?;
        let new_pointer = self.allocate(new_bytes)?;

        let mut remaining = core::cmp::min(old_bytes, new_bytes);
        let mut offset = 0;
        let mut chunk = [0u8; 512];
        while remaining > 0 {
            let len = core::cmp::min(remaining, chunk.len());
            self.read(pointer.add(offset), &mut chunk[..len])?;
            self.write(new_pointer.add(offset), &chunk[..len])?;
            offset += len;
            remaining -= len;
        }

        self.free(pointer);
        Ok(new_pointer)
    }

    /// Free a heap allocation. A null pointer is a no-op.
    pub fn free(&self, pointer: VirtualAddress) {
        if pointer.data() == 0 {
            return;
        }
        let (pages, _) = match self.read_header(pointer) {
            Ok(header) => header,
            Err(_) => return,
        };
        self.release(VirtualAddress::new(pointer.data() - HEAP_HEADER), pages);
    }

    fn read_header(&self, pointer: VirtualAddress) -> Result<(usize, usize), MemoryError> {
        let mut header = [0u8; HEAP_HEADER];
        self.read(VirtualAddress::new(pointer.data() - HEAP_HEADER), &mut header)?;
        let mut pages = [0u8; 8];
        pages.copy_from_slice(&header[0..8]);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&header[8..16]);
        Ok((
            u64::from_le_bytes(pages) as usize,
            u64::from_le_bytes(bytes) as usize,
        ))
    }
}
