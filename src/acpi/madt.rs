//! Multiple APIC Description Table.

use alloc::vec::Vec;

use super::sdt::Sdt;

/// Local APIC flags: the processor is usable.
pub const MADT_LAPIC_ENABLED: u32 = 1 << 0;

/// Interrupt override flags.
pub const MADT_IRQ_ACTIVE_LOW: u16 = 0x0002;
pub const MADT_IRQ_LEVEL: u16 = 0x0008;

const MADT_ENTRY_LAPIC: u8 = 0;
const MADT_ENTRY_IOAPIC: u8 = 1;
const MADT_ENTRY_OVERRIDE: u8 = 2;

#[derive(Clone, Copy, Debug)]
pub struct MadtLocalApic {
    pub processor: u8,
    pub id: u8,
    pub flags: u32,
}

impl MadtLocalApic {
    pub fn usable(&self) -> bool {
        self.flags & MADT_LAPIC_ENABLED != 0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MadtIoApic {
    pub id: u8,
    pub address: u32,
    pub gsi_base: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct MadtIntSrcOverride {
    pub bus: u8,
    pub irq: u8,
    pub gsi: u32,
    pub flags: u16,
}

#[derive(Clone, Copy, Debug)]
pub enum MadtEntry {
    LocalApic(MadtLocalApic),
    IoApic(MadtIoApic),
    IntSrcOverride(MadtIntSrcOverride),
    /// A record kind this kernel does not consume.
    Unknown(u8),
    /// A known kind whose record is too short to parse.
    Invalid(u8),
}

/// The MADT body, owned so the mapping behind the table can be dropped.
#[derive(Clone, Debug)]
pub struct Madt {
    pub local_apic_address: u32,
    pub flags: u32,
    records: Vec<u8>,
}

impl Madt {
    pub fn new(sdt: &Sdt) -> Option<Madt> {
        if &sdt.header.signature != b"APIC" {
            return None;
        }
        let body = sdt.body();
        if body.len() < 8 {
            return None;
        }

        Some(Madt {
            local_apic_address: u32::from_le_bytes([body[0], body[1], body[2], body[3]]),
            flags: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
            records: body[8..].to_vec(),
        })
    }

    pub fn iter(&self) -> MadtIter<'_> {
        MadtIter {
            records: &self.records,
            i: 0,
        }
    }
}

pub struct MadtIter<'a> {
    records: &'a [u8],
    i: usize,
}

impl Iterator for MadtIter<'_> {
    type Item = MadtEntry;

    fn next(&mut self) -> Option<MadtEntry> {
        if self.i + 2 > self.records.len() {
            return None;
        }

        let kind = self.records[self.i];
        let len = self.records[self.i + 1] as usize;
        // A record length of two or less cannot advance the walk;
        // treat the rest of the table as garbage.
        if len <= 2 || self.i + len > self.records.len() {
            return None;
        }

        let record = &self.records[self.i..self.i + len];
        self.i += len;

        Some(match kind {
            MADT_ENTRY_LAPIC => {
                if len < 8 {
                    MadtEntry::Invalid(kind)
                } else {
                    MadtEntry::LocalApic(MadtLocalApic {
                        processor: record[2],
                        id: record[3],
                        flags: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
                    })
                }
            }
            MADT_ENTRY_IOAPIC => {
                if len < 12 {
                    MadtEntry::Invalid(kind)
                } else {
                    MadtEntry::IoApic(MadtIoApic {
                        id: record[2],
                        address: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
                        gsi_base: u32::from_le_bytes([
                            record[8], record[9], record[10], record[11],
                        ]),
                    })
                }
            }
            MADT_ENTRY_OVERRIDE => {
                if len < 10 {
                    MadtEntry::Invalid(kind)
                } else {
                    MadtEntry::IntSrcOverride(MadtIntSrcOverride {
                        bus: record[2],
                        irq: record[3],
                        gsi: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
                        flags: u16::from_le_bytes([record[8], record[9]]),
                    })
                }
            }
            other => MadtEntry::Unknown(other),
        })
    }
}
