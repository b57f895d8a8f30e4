//! Memory management and firmware discovery core of a small x86
//! kernel.
//!
//! The pieces build on each other in boot order: a bitmap physical
//! frame allocator and a page table layer combine into a
//! [`MemoryManager`], which carries the kernel heap and every later
//! mapping. On top of it [`acpi::Acpi`] locates the firmware tables,
//! [`acpi::aml`] folds their definition blocks into a flat namespace,
//! and [`apic::InterruptTopology`] wires up the interrupt controllers
//! from the MADT.
//!
//! Physical memory is reached only through the [`memory::PhysAccess`]
//! trait, so the whole stack runs identically over a real linear
//! mapping and over an in-process arena under test.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::fmt;

pub mod acpi;
pub mod apic;
pub mod memory;

pub use crate::acpi::aml::{self, Namespace};
pub use crate::acpi::{Acpi, AcpiError, Madt};
pub use crate::apic::{InterruptTopology, IrqFlags, IrqMode};
pub use crate::memory::{
    LinearMemory, MemoryArea, MemoryError, MemoryManager, PhysAccess, PhysicalAddress,
    VirtualAddress,
};

#[derive(Debug)]
pub enum BootError {
    Memory(MemoryError),
    Acpi(AcpiError),
}

impl From<MemoryError> for BootError {
    fn from(err: MemoryError) -> Self {
        BootError::Memory(err)
    }
}

impl From<AcpiError> for BootError {
    fn from(err: AcpiError) -> Self {
        BootError::Acpi(err)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Memory(err) => write!(f, "memory: {}", err),
            BootError::Acpi(err) => write!(f, "acpi: {}", err),
        }
    }
}

/// Everything the early kernel discovers about the machine.
pub struct System<P: PhysAccess> {
    pub mm: MemoryManager<P>,
    pub acpi: Acpi,
    pub namespace: Namespace,
    pub topology: InterruptTopology,
}

impl<P: PhysAccess> System<P> {
    /// Run the discovery sequence over an initialized memory manager:
    /// locate the ACPI tables, load the AML namespace, then bring up
    /// the interrupt topology from the MADT.
    pub fn bring_up(mm: MemoryManager<P>) -> Result<System<P>, BootError> {
        let acpi = Acpi::init(&mm)?;
        let namespace = aml::build_namespace(&mm, &acpi)?;

        let madt_sdt = acpi.find_table(&mm, b"APIC", 0)?;
        let madt = madt_sdt.as_ref().and_then(Madt::new);
        let topology = InterruptTopology::init(&mm, madt.as_ref())?;
        if let Some(sdt) = madt_sdt {
            sdt.release(&mm);
        }

        Ok(System {
            mm,
            acpi,
            namespace,
            topology,
        })
    }
}
