//! I/O APIC register access and redirection entries.

use crate::memory::{
    MemoryError, MemoryManager, PageFlags, PhysAccess, PhysicalAddress, VirtualAddress,
};

pub const IOAPIC_REG_ID: u32 = 0x00;
pub const IOAPIC_REG_VERSION: u32 = 0x01;
const IOAPIC_REG_TABLE: u32 = 0x10;

/// Distance from the register selector to the data window.
const WINDOW_OFFSET: usize = 16;

const REDIRECTION_MASKED: u64 = 1 << 16;

/// The memory mapped register pair of one I/O APIC: a register
/// selector at the base and a data window sixteen bytes above it.
pub struct IoApicRegs {
    base: VirtualAddress,
}

impl IoApicRegs {
    pub fn new(base: VirtualAddress) -> IoApicRegs {
        IoApicRegs { base }
    }

    pub fn read_reg<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        reg: u32,
    ) -> Result<u32, MemoryError> {
        mm.write(self.base, &reg.to_le_bytes())?;
        let mut value = [0; 4];
        mm.read(self.base.add(WINDOW_OFFSET), &mut value)?;
        Ok(u32::from_le_bytes(value))
    }

    pub fn write_reg<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        reg: u32,
        value: u32,
    ) -> Result<(), MemoryError> {
        mm.write(self.base, &reg.to_le_bytes())?;
        mm.write(self.base.add(WINDOW_OFFSET), &value.to_le_bytes())
    }
}

/// One discovered I/O APIC and the global system interrupt range it
/// serves.
pub struct IoApic {
    pub id: u8,
    pub gsi_base: u32,
    /// Highest redirection entry index, inclusive.
    pub max_index: u32,
    regs: IoApicRegs,
}

impl IoApic {
    /// Map the register pair at `address` and size the redirection
    /// table from the version register.
    pub fn new<P: PhysAccess>(
        mm: &MemoryManager<P>,
        id: u8,
        address: u32,
        gsi_base: u32,
    ) -> Result<IoApic, MemoryError> {
        let base = mm.request_map(PhysicalAddress::new(address as usize), 1, PageFlags::mmio())?;
        let regs = IoApicRegs::new(base);

        let version = regs.read_reg(mm, IOAPIC_REG_VERSION)?;
        let max_index = (version >> 16) & 0xFF;
        log::info!(
            "apic: I/O APIC {} at {:#x}, version {:#x}, GSIs {}-{}",
            id,
            address,
            version & 0xFF,
            gsi_base,
            gsi_base + max_index
        );

        Ok(IoApic {
            id,
            gsi_base,
            max_index,
            regs,
        })
    }

    pub fn line_count(&self) -> u32 {
        self.max_index + 1
    }

    pub fn handles_gsi(&self, gsi: u32) -> bool {
        gsi >= self.gsi_base && gsi <= self.gsi_base + self.max_index
    }

    fn entry_reg(&self, gsi: u32) -> u32 {
        IOAPIC_REG_TABLE + 2 * (gsi - self.gsi_base)
    }

    pub fn read_redirection<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        gsi: u32,
    ) -> Result<u64, MemoryError> {
        let reg = self.entry_reg(gsi);
        let low = self.regs.read_reg(mm, reg)? as u64;
        let high = self.regs.read_reg(mm, reg + 1)? as u64;
        Ok(low | high << 32)
    }

    pub fn write_redirection<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        gsi: u32,
        entry: u64,
    ) -> Result<(), MemoryError> {
        let reg = self.entry_reg(gsi);
        self.regs.write_reg(mm, reg, entry as u32)?;
        self.regs.write_reg(mm, reg + 1, (entry >> 32) as u32)
    }

    pub fn mask<P: PhysAccess>(&self, mm: &MemoryManager<P>, gsi: u32) -> Result<(), MemoryError> {
        let entry = self.read_redirection(mm, gsi)?;
        self.write_redirection(mm, gsi, entry | REDIRECTION_MASKED)
    }

    pub fn unmask<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        gsi: u32,
    ) -> Result<(), MemoryError> {
        let entry = self.read_redirection(mm, gsi)?;
        self.write_redirection(mm, gsi, entry & !REDIRECTION_MASKED)
    }
}
