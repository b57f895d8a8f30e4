//! RSDP location and parsing.

use crate::memory::{PhysAccess, PhysicalAddress};

/// Root System Description Pointer.
#[derive(Clone, Debug)]
pub struct Rsdp {
    pub signature: [u8; 8],
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub revision: u8,
    pub rsdt_address: u32,
    pub length: u32,
    pub xsdt_address: u64,
    pub extended_checksum: u8,
}

impl Rsdp {
    /// First candidate address of the BIOS read-only area scan.
    pub const SEARCH_START: usize = 0x000E_0000;
    /// One past the last candidate address.
    pub const SEARCH_END: usize = 0x000F_FFF0;

    /// Scan the BIOS area on 16 byte boundaries for the RSDP signature.
    pub fn search<P: PhysAccess>(phys: &P) -> Option<Rsdp> {
        let mut address = Self::SEARCH_START;
        while address < Self::SEARCH_END {
            let mut signature = [0; 8];
            phys.read(PhysicalAddress::new(address), &mut signature);
            if &signature == b"RSD PTR " {
                let mut bytes = [0; 36];
                phys.read(PhysicalAddress::new(address), &mut bytes);
                return Some(Rsdp::parse(&bytes));
            }
            address += 16;
        }
        None
    }

    fn parse(bytes: &[u8; 36]) -> Rsdp {
        let mut signature = [0; 8];
        signature.copy_from_slice(&bytes[0..8]);
        let mut oem_id = [0; 6];
        oem_id.copy_from_slice(&bytes[9..15]);
        let revision = bytes[15];

        // The extended fields only exist from ACPI 2.0 on.
        let (length, xsdt_address, extended_checksum) = if revision >= 2 {
            (
                u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
                u64::from_le_bytes([
                    bytes[24], bytes[25], bytes[26], bytes[27], bytes[28], bytes[29], bytes[30],
                    bytes[31],
                ]),
                bytes[32],
            )
        } else {
            (0, 0, 0)
        };

        Rsdp {
            signature,
            checksum: bytes[8],
            oem_id,
            revision,
            rsdt_address: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
            length,
            xsdt_address,
            extended_checksum,
        }
    }

    /// Physical address of the root table directory.
    pub fn sdt_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.rsdt_address as usize)
    }
}
