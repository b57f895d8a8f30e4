//! Interrupt topology from the MADT.
//!
//! Collects local APICs, I/O APICs, and interrupt source overrides,
//! maps the controller registers, and routes ISA interrupt lines
//! through the redirection tables. Without a MADT the machine is
//! treated as a single processor behind the legacy PIC pair.

use arrayvec::ArrayVec;
use bitflags::bitflags;

use crate::acpi::madt::{Madt, MadtEntry, MADT_IRQ_ACTIVE_LOW, MADT_IRQ_LEVEL};
use crate::memory::{
    MemoryError, MemoryManager, PageFlags, PhysAccess, PhysicalAddress, VirtualAddress,
};

pub mod ioapic;

pub use self::ioapic::{IoApic, IoApicRegs};

/// Interrupt vectors for IRQs start here; 0x00-0x2F belong to
/// exceptions and reserved traps.
pub const IRQ_BASE: u8 = 0x30;

const MAX_LOCAL_APICS: usize = 16;
const MAX_IO_APICS: usize = 16;
const MAX_OVERRIDES: usize = 48;

bitflags! {
    /// Line polarity and trigger shape of an interrupt source.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IrqFlags: u8 {
        const ACTIVE_LOW = 0x01;
        const LEVEL = 0x02;
        /// Deliver to every processor instead of one destination.
        const BROADCAST = 0x80;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqMode {
    IoApic,
    Pic,
}

#[derive(Clone, Copy, Debug)]
pub struct LocalApic {
    pub processor: u8,
    pub id: u8,
    pub usable: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct IrqOverride {
    pub bus: u8,
    pub irq: u8,
    pub gsi: u32,
    pub flags: IrqFlags,
}

/// Compute a redirection table entry: vector in the low byte, polarity
/// in bit 13, trigger mode in bit 15, destination APIC in the top
/// byte. Broadcast routes switch to logical destination mode aimed at
/// everyone.
pub fn redirection_entry(vector: u8, flags: IrqFlags, destination: u8) -> u64 {
    let mut entry = vector as u64;
    if flags.contains(IrqFlags::ACTIVE_LOW) {
        entry |= 1 << 13;
    }
    if flags.contains(IrqFlags::LEVEL) {
        entry |= 1 << 15;
    }
    let destination = if flags.contains(IrqFlags::BROADCAST) {
        entry |= 1 << 11;
        0xFF
    } else {
        destination
    };
    entry | (destination as u64) << 56
}

/// The interrupt controllers of the machine.
pub struct InterruptTopology {
    pub mode: IrqMode,
    pub local_apic_address: u32,
    pub local_apic_mmio: Option<VirtualAddress>,
    local_apics: ArrayVec<LocalApic, MAX_LOCAL_APICS>,
    io_apics: ArrayVec<IoApic, MAX_IO_APICS>,
    overrides: ArrayVec<IrqOverride, MAX_OVERRIDES>,
}

impl InterruptTopology {
    /// Build the topology from the MADT. `None` means the firmware
    /// offered no MADT at all; the fallback is one synthetic boot
    /// processor behind the PIC.
    pub fn init<P: PhysAccess>(
        mm: &MemoryManager<P>,
        madt: Option<&Madt>,
    ) -> Result<InterruptTopology, MemoryError> {
        let madt = match madt {
            Some(madt) => madt,
            None => {
                log::warn!("apic: no MADT, assuming one processor on the PIC");
                return Ok(Self::pic_fallback());
            }
        };

        let mut topology = InterruptTopology {
            mode: IrqMode::IoApic,
            local_apic_address: madt.local_apic_address,
            local_apic_mmio: None,
            local_apics: ArrayVec::new(),
            io_apics: ArrayVec::new(),
            overrides: ArrayVec::new(),
        };

        for entry in madt.iter() {
            match entry {
                MadtEntry::LocalApic(lapic) => {
                    log::info!(
                        "apic: local APIC {} for processor {}{}",
                        lapic.id,
                        lapic.processor,
                        if lapic.usable() { "" } else { " (disabled)" }
                    );
                    let record = LocalApic {
                        processor: lapic.processor,
                        id: lapic.id,
                        usable: lapic.usable(),
                    };
                    if topology.local_apics.try_push(record).is_err() {
                        log::warn!("apic: dropping local APIC {} past the cap", lapic.id);
                    }
                }
                MadtEntry::IoApic(ioapic) => {
                    if topology.io_apics.is_full() {
                        log::warn!("apic: dropping I/O APIC {} past the cap", ioapic.id);
                        continue;
                    }
                    let io_apic = IoApic::new(mm, ioapic.id, ioapic.address, ioapic.gsi_base)?;
                    topology.io_apics.push(io_apic);
                }
                MadtEntry::IntSrcOverride(over) => {
                    let flags = override_flags(over.flags);
                    log::info!(
                        "apic: bus {} IRQ {} routes to GSI {} ({:?})",
                        over.bus,
                        over.irq,
                        over.gsi,
                        flags
                    );
                    let record = IrqOverride {
                        bus: over.bus,
                        irq: over.irq,
                        gsi: over.gsi,
                        flags,
                    };
                    if topology.overrides.try_push(record).is_err() {
                        log::warn!("apic: dropping override for IRQ {} past the cap", over.irq);
                    }
                }
                MadtEntry::Unknown(kind) => {
                    log::debug!("apic: skipping MADT record type {}", kind)
                }
                MadtEntry::Invalid(kind) => {
                    log::warn!("apic: malformed MADT record type {}", kind)
                }
            }
        }

        if topology.local_apics.is_empty() {
            log::warn!("apic: MADT listed no processors, synthesizing the boot processor");
            topology.local_apics.push(LocalApic {
                processor: 0,
                id: 0,
                usable: true,
            });
        }

        if topology.io_apics.is_empty() {
            log::warn!("apic: MADT listed no I/O APIC, falling back to the PIC");
            topology.mode = IrqMode::Pic;
        } else {
            let mmio = mm.request_map(
                PhysicalAddress::new(topology.local_apic_address as usize),
                1,
                PageFlags::mmio(),
            )?;
            topology.local_apic_mmio = Some(mmio);
            log::info!(
                "apic: local APIC registers at {:#x}",
                topology.local_apic_address
            );
        }

        Ok(topology)
    }

    fn pic_fallback() -> InterruptTopology {
        let mut local_apics = ArrayVec::new();
        local_apics.push(LocalApic {
            processor: 0,
            id: 0,
            usable: true,
        });
        InterruptTopology {
            mode: IrqMode::Pic,
            local_apic_address: 0,
            local_apic_mmio: None,
            local_apics,
            io_apics: ArrayVec::new(),
            overrides: ArrayVec::new(),
        }
    }

    pub fn local_apics(&self) -> &[LocalApic] {
        &self.local_apics
    }

    pub fn io_apics(&self) -> &[IoApic] {
        &self.io_apics
    }

    pub fn overrides(&self) -> &[IrqOverride] {
        &self.overrides
    }

    pub fn usable_processors(&self) -> usize {
        self.local_apics.iter().filter(|lapic| lapic.usable).count()
    }

    pub fn io_apic_for_gsi(&self, gsi: u32) -> Option<&IoApic> {
        self.io_apics.iter().find(|apic| apic.handles_gsi(gsi))
    }

    pub fn override_for_isa_irq(&self, irq: u8) -> Option<&IrqOverride> {
        self.overrides.iter().find(|over| over.irq == irq)
    }

    /// Where an ISA interrupt line actually ends up. An override
    /// replaces both the GSI and the requested flags; without one the
    /// line maps identity with the flags the caller asked for.
    pub fn effective_route(&self, irq: u8, flags: IrqFlags) -> (u32, IrqFlags) {
        match self.override_for_isa_irq(irq) {
            Some(over) => (over.gsi, over.flags),
            None => (irq as u32, flags),
        }
    }

    /// Route an ISA interrupt line to `destination` and enable it.
    /// Returns the vector it was assigned, or `None` when no I/O APIC
    /// serves the line.
    pub fn configure_irq<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        irq: u8,
        flags: IrqFlags,
        destination: u8,
    ) -> Result<Option<u8>, MemoryError> {
        let (gsi, flags) = self.effective_route(irq, flags);
        let vector = IRQ_BASE as u32 + gsi;

        if self.mode == IrqMode::Pic {
            // the PIC pair was programmed with identity routes at init
            return Ok(Some(vector as u8));
        }

        let io_apic = match self.io_apic_for_gsi(gsi) {
            Some(io_apic) => io_apic,
            None => {
                log::warn!("apic: no I/O APIC serves GSI {}", gsi);
                return Ok(None);
            }
        };

        log::info!(
            "apic: IRQ {} -> GSI {}, vector {:#x}, {:?}",
            irq,
            gsi,
            vector,
            flags
        );
        io_apic.write_redirection(mm, gsi, redirection_entry(vector as u8, flags, destination))?;
        Ok(Some(vector as u8))
    }

    pub fn mask_irq<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        irq: u8,
    ) -> Result<(), MemoryError> {
        let (gsi, _) = self.effective_route(irq, IrqFlags::empty());
        if let Some(io_apic) = self.io_apic_for_gsi(gsi) {
            io_apic.mask(mm, gsi)?;
        }
        Ok(())
    }

    pub fn unmask_irq<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        irq: u8,
    ) -> Result<(), MemoryError> {
        let (gsi, _) = self.effective_route(irq, IrqFlags::empty());
        if let Some(io_apic) = self.io_apic_for_gsi(gsi) {
            io_apic.unmask(mm, gsi)?;
        }
        Ok(())
    }
}

fn override_flags(madt_flags: u16) -> IrqFlags {
    let mut flags = IrqFlags::empty();
    if madt_flags & MADT_IRQ_ACTIVE_LOW != 0 {
        flags |= IrqFlags::ACTIVE_LOW;
    }
    if madt_flags & MADT_IRQ_LEVEL != 0 {
        flags |= IrqFlags::LEVEL;
    }
    flags
}
