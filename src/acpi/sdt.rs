//! System description table headers and mapped table handles.

use alloc::vec::Vec;

use crate::memory::{page_count, MemoryManager, PhysAccess, PhysicalAddress, VirtualAddress};

/// Size of the common header shared by every system description table.
pub const SDT_HEADER_LEN: usize = 36;

/// The common header at the start of every ACPI table.
#[derive(Clone, Debug)]
pub struct SdtHeader {
    pub signature: [u8; 4],
    pub length: u32,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_revision: u32,
    pub creator_id: u32,
    pub creator_revision: u32,
}

impl SdtHeader {
    pub fn parse(bytes: &[u8]) -> Option<SdtHeader> {
        if bytes.len() < SDT_HEADER_LEN {
            return None;
        }

        let mut signature = [0; 4];
        signature.copy_from_slice(&bytes[0..4]);
        let mut oem_id = [0; 6];
        oem_id.copy_from_slice(&bytes[10..16]);
        let mut oem_table_id = [0; 8];
        oem_table_id.copy_from_slice(&bytes[16..24]);

        Some(SdtHeader {
            signature,
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            revision: bytes[8],
            checksum: bytes[9],
            oem_id,
            oem_table_id,
            oem_revision: u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
            creator_id: u32::from_le_bytes([bytes[28], bytes[29], bytes[30], bytes[31]]),
            creator_revision: u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]),
        })
    }

    pub fn signature_str(&self) -> &str {
        core::str::from_utf8(&self.signature).unwrap_or("????")
    }
}

/// A system description table that has been mapped and copied in.
///
/// `data` holds the whole table, header included, so offsets from the
/// table specifications apply directly. The mapping behind `virt` stays
/// live until [`Sdt::release`].
#[derive(Debug)]
pub struct Sdt {
    pub header: SdtHeader,
    pub phys: PhysicalAddress,
    pub virt: VirtualAddress,
    pub data: Vec<u8>,
}

impl Sdt {
    /// The table payload after the common header.
    pub fn body(&self) -> &[u8] {
        &self.data[SDT_HEADER_LEN.min(self.data.len())..]
    }

    pub fn pages(&self) -> usize {
        page_count(self.header.length as usize)
    }

    /// Drop the virtual mapping behind this table. The copied bytes in
    /// `data` are unaffected.
    pub fn release<P: PhysAccess>(&self, mm: &MemoryManager<P>) {
        mm.unmap(self.virt, self.pages());
    }
}
