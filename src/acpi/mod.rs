//! ACPI table discovery.
//!
//! Locates the RSDP in the BIOS read-only area, walks the RSDT to build
//! a directory of table pointers, and loads the FADT and DSDT. Further
//! tables are looked up on demand through [`Acpi::find_table`].

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::memory::{
    page_count, MemoryError, MemoryManager, PageFlags, PhysAccess, PhysicalAddress,
};

pub mod aml;
pub mod fadt;
pub mod madt;
pub mod rsdp;
pub mod sdt;

pub use self::aml::AmlError;
pub use self::fadt::Fadt;
pub use self::madt::Madt;
pub use self::rsdp::Rsdp;
pub use self::sdt::{Sdt, SdtHeader, SDT_HEADER_LEN};

#[derive(Debug)]
pub enum AcpiError {
    RsdpNotFound,
    TableNotFound([u8; 4]),
    ChecksumFailed([u8; 4]),
    Truncated([u8; 4]),
    Memory(MemoryError),
    Aml(AmlError),
}

impl From<MemoryError> for AcpiError {
    fn from(err: MemoryError) -> Self {
        AcpiError::Memory(err)
    }
}

impl From<AmlError> for AcpiError {
    fn from(err: AmlError) -> Self {
        AcpiError::Aml(err)
    }
}

fn signature_str(signature: &[u8; 4]) -> &str {
    core::str::from_utf8(signature).unwrap_or("????")
}

impl fmt::Display for AcpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcpiError::RsdpNotFound => write!(f, "RSDP not found in BIOS area"),
            AcpiError::TableNotFound(sig) => write!(f, "table '{}' not found", signature_str(sig)),
            AcpiError::ChecksumFailed(sig) => {
                write!(f, "table '{}' failed its checksum", signature_str(sig))
            }
            AcpiError::Truncated(sig) => write!(f, "table '{}' is truncated", signature_str(sig)),
            AcpiError::Memory(err) => write!(f, "memory error: {}", err),
            AcpiError::Aml(err) => write!(f, "AML error: {}", err),
        }
    }
}

/// Sum every byte of a table; valid tables sum to zero modulo 256.
pub fn checksum_valid(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte)) == 0
}

/// The discovered ACPI tables: the root pointer, the table directory
/// from the RSDT, and the two tables every boot requires.
pub struct Acpi {
    pub rsdp: Rsdp,
    pub fadt: Fadt,
    pub dsdt: Sdt,
    directory: Vec<(PhysicalAddress, [u8; 4])>,
}

impl Acpi {
    pub fn init<P: PhysAccess>(mm: &MemoryManager<P>) -> Result<Acpi, AcpiError> {
        let rsdp = Rsdp::search(mm.phys()).ok_or(AcpiError::RsdpNotFound)?;
        log::info!(
            "acpi: revision {} root directory at {:?}",
            rsdp.revision,
            rsdp.sdt_address()
        );

        let rsdt = Self::map_table(mm, rsdp.sdt_address())?;
        if &rsdt.header.signature != b"RSDT" {
            rsdt.release(mm);
            return Err(AcpiError::TableNotFound(*b"RSDT"));
        }

        let mut directory = Vec::new();
        for pointer in rsdt.body().chunks_exact(4) {
            let phys = u32::from_le_bytes([pointer[0], pointer[1], pointer[2], pointer[3]]);
            if phys == 0 {
                continue;
            }
            let phys = PhysicalAddress::new(phys as usize);

            // A single page probe is enough for the header; the full
            // table is only mapped when somebody asks for it.
            let probe = mm.request_map(phys, 1, PageFlags::kernel_rw())?;
            let mut head = [0; SDT_HEADER_LEN];
            mm.read(probe, &mut head)?;
            if let Some(header) = SdtHeader::parse(&head) {
                log::info!(
                    "acpi: table '{}' at {:?}, {} bytes",
                    header.signature_str(),
                    phys,
                    header.length
                );
                directory.push((phys, header.signature));
            }
            mm.unmap(probe, 1);
        }
        rsdt.release(mm);

        let fadt_sdt = Self::lookup(&directory, mm, b"FACP", 0)?
            .ok_or(AcpiError::TableNotFound(*b"FACP"))?;
        let fadt = Fadt::parse(&fadt_sdt).ok_or(AcpiError::Truncated(*b"FACP"))?;
        fadt_sdt.release(mm);

        let dsdt_phys = fadt.dsdt_address();
        if dsdt_phys == 0 {
            return Err(AcpiError::TableNotFound(*b"DSDT"));
        }
        let dsdt = Self::map_table(mm, PhysicalAddress::new(dsdt_phys as usize))?;
        if &dsdt.header.signature != b"DSDT" {
            log::warn!(
                "acpi: DSDT pointer leads to '{}'",
                dsdt.header.signature_str()
            );
        }
        log::info!(
            "acpi: DSDT at {:?}, {} bytes of AML",
            dsdt.phys,
            dsdt.body().len()
        );

        Ok(Acpi {
            rsdp,
            fadt,
            dsdt,
            directory,
        })
    }

    /// Map and load the `index`th table carrying `signature`.
    ///
    /// A table that exists but fails its checksum is treated as absent,
    /// with a warning. The caller owns the returned mapping and drops
    /// it with [`Sdt::release`].
    pub fn find_table<P: PhysAccess>(
        &self,
        mm: &MemoryManager<P>,
        signature: &[u8; 4],
        index: usize,
    ) -> Result<Option<Sdt>, AcpiError> {
        match Self::lookup(&self.directory, mm, signature, index) {
            Err(AcpiError::ChecksumFailed(sig)) => {
                log::warn!("acpi: ignoring '{}' with bad checksum", signature_str(&sig));
                Ok(None)
            }
            other => other,
        }
    }

    /// How many directory entries carry `signature`.
    pub fn table_count(&self, signature: &[u8; 4]) -> usize {
        self.directory
            .iter()
            .filter(|(_, sig)| sig == signature)
            .count()
    }

    fn lookup<P: PhysAccess>(
        directory: &[(PhysicalAddress, [u8; 4])],
        mm: &MemoryManager<P>,
        signature: &[u8; 4],
        index: usize,
    ) -> Result<Option<Sdt>, AcpiError> {
        let mut seen = 0;
        for (phys, sig) in directory {
            if sig == signature {
                if seen == index {
                    return Self::map_table(mm, *phys).map(Some);
                }
                seen += 1;
            }
        }
        log::debug!("acpi: no table '{}' [{}]", signature_str(signature), index);
        Ok(None)
    }

    /// Map a table at `phys`: probe one page for the header, then map
    /// the declared length and verify its checksum. The probe mapping
    /// is dropped before the full mapping is made.
    fn map_table<P: PhysAccess>(
        mm: &MemoryManager<P>,
        phys: PhysicalAddress,
    ) -> Result<Sdt, AcpiError> {
        let probe = mm.request_map(phys, 1, PageFlags::kernel_rw())?;
        let mut head = [0; SDT_HEADER_LEN];
        mm.read(probe, &mut head)?;
        mm.unmap(probe, 1);

        let header =
            SdtHeader::parse(&head).ok_or(AcpiError::Truncated(*b"????"))?;
        if (header.length as usize) < SDT_HEADER_LEN {
            return Err(AcpiError::Truncated(header.signature));
        }

        let pages = page_count(header.length as usize);
        let virt = mm.request_map(phys, pages, PageFlags::kernel_rw())?;
        let mut data = vec![0; header.length as usize];
        mm.read(virt, &mut data)?;

        if !checksum_valid(&data) {
            mm.unmap(virt, pages);
            return Err(AcpiError::ChecksumFailed(header.signature));
        }

        Ok(Sdt {
            header,
            phys,
            virt,
            data,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::memory::{LinearMemory, MemoryArea};

    pub const ARENA_SIZE: usize = 32 * 1024 * 1024;

    /// Build a table with a valid header and checksum around `body`.
    pub fn build_table(signature: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; SDT_HEADER_LEN];
        data[0..4].copy_from_slice(signature);
        data[8] = 1;
        data[10..16].copy_from_slice(b"TESTOS");
        data.extend_from_slice(body);
        let length = data.len() as u32;
        data[4..8].copy_from_slice(&length.to_le_bytes());
        fix_checksum(&mut data);
        data
    }

    pub fn fix_checksum(data: &mut [u8]) {
        data[9] = 0;
        let sum = data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        data[9] = sum.wrapping_neg();
    }

    /// A machine image with an RSDP at `0xE0000` and tables laid out
    /// from `base`. Returns the manager and the physical base cursor.
    pub struct Machine {
        pub mm: MemoryManager<LinearMemory>,
        cursor: usize,
    }

    impl Machine {
        pub fn new() -> Machine {
            let areas = [MemoryArea::usable(0, ARENA_SIZE as u64)];
            let mm = MemoryManager::new(&areas, LinearMemory::new(ARENA_SIZE)).unwrap();
            Machine {
                mm,
                // inside the low reservation, like firmware tables are
                cursor: 0x000F_1000,
            }
        }

        pub fn place(&mut self, bytes: &[u8]) -> u32 {
            let phys = self.cursor;
            self.mm.phys().write(PhysicalAddress::new(phys), bytes);
            self.cursor = (phys + bytes.len() + 63) & !63;
            phys as u32
        }

        pub fn install_rsdp(&mut self, rsdt_address: u32) {
            let mut rsdp = vec![0u8; 20];
            rsdp[0..8].copy_from_slice(b"RSD PTR ");
            rsdp[9..15].copy_from_slice(b"TESTOS");
            rsdp[15] = 0;
            rsdp[16..20].copy_from_slice(&rsdt_address.to_le_bytes());
            let sum = rsdp.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
            rsdp[8] = sum.wrapping_neg();
            self.mm
                .phys()
                .write(PhysicalAddress::new(0x000E_0000), &rsdp);
        }

        pub fn install_rsdt(&mut self, pointers: &[u32]) {
            let mut body = Vec::new();
            for pointer in pointers {
                body.extend_from_slice(&pointer.to_le_bytes());
            }
            let rsdt = build_table(b"RSDT", &body);
            let address = self.place(&rsdt);
            self.install_rsdp(address);
        }
    }

    pub fn build_fadt(dsdt: u32) -> Vec<u8> {
        let mut body = vec![0u8; 129 - SDT_HEADER_LEN];
        body[40 - SDT_HEADER_LEN..44 - SDT_HEADER_LEN].copy_from_slice(&dsdt.to_le_bytes());
        // SCI on IRQ 9, century register at 0x32
        body[46 - SDT_HEADER_LEN] = 9;
        body[108 - SDT_HEADER_LEN] = 0x32;
        build_table(b"FACP", &body)
    }

    #[test]
    fn checksum_detects_corruption() {
        let mut table = build_table(b"SSDT", &[1, 2, 3, 4]);
        assert!(checksum_valid(&table));
        table[SDT_HEADER_LEN] ^= 0x40;
        assert!(!checksum_valid(&table));
    }

    #[test]
    fn init_finds_fadt_and_dsdt() {
        let mut machine = Machine::new();
        let dsdt = build_table(b"DSDT", &[super::aml::NOP_OP]);
        let dsdt_phys = machine.place(&dsdt);
        let fadt_phys = machine.place(&build_fadt(dsdt_phys));
        machine.install_rsdt(&[fadt_phys]);

        let acpi = Acpi::init(&machine.mm).unwrap();
        assert_eq!(acpi.fadt.dsdt, dsdt_phys);
        assert_eq!(acpi.fadt.sci_interrupt, 9);
        assert_eq!(acpi.fadt.century, 0x32);
        assert_eq!(acpi.dsdt.body(), &[super::aml::NOP_OP]);
    }

    #[test]
    fn missing_rsdp_is_an_error() {
        let areas = [MemoryArea::usable(0, ARENA_SIZE as u64)];
        let mm = MemoryManager::new(&areas, LinearMemory::new(ARENA_SIZE)).unwrap();
        assert!(matches!(Acpi::init(&mm), Err(AcpiError::RsdpNotFound)));
    }

    #[test]
    fn find_table_honors_index() {
        let mut machine = Machine::new();
        let dsdt_phys = machine.place(&build_table(b"DSDT", &[super::aml::NOP_OP]));
        let fadt_phys = machine.place(&build_fadt(dsdt_phys));
        let ssdt0 = machine.place(&build_table(b"SSDT", &[0x10]));
        let ssdt1 = machine.place(&build_table(b"SSDT", &[0x11]));
        machine.install_rsdt(&[fadt_phys, ssdt0, ssdt1]);

        let acpi = Acpi::init(&machine.mm).unwrap();
        assert_eq!(acpi.table_count(b"SSDT"), 2);

        let first = acpi.find_table(&machine.mm, b"SSDT", 0).unwrap().unwrap();
        assert_eq!(first.body(), &[0x10]);
        first.release(&machine.mm);
        let second = acpi.find_table(&machine.mm, b"SSDT", 1).unwrap().unwrap();
        assert_eq!(second.body(), &[0x11]);
        second.release(&machine.mm);
        assert!(acpi.find_table(&machine.mm, b"SSDT", 2).unwrap().is_none());
    }

    #[test]
    fn bad_checksum_table_is_treated_as_absent() {
        let mut machine = Machine::new();
        let dsdt_phys = machine.place(&build_table(b"DSDT", &[super::aml::NOP_OP]));
        let fadt_phys = machine.place(&build_fadt(dsdt_phys));
        let mut broken = build_table(b"SSDT", &[0x10]);
        broken[9] ^= 0xFF;
        let broken_phys = machine.place(&broken);
        machine.install_rsdt(&[fadt_phys, broken_phys]);

        let acpi = Acpi::init(&machine.mm).unwrap();
        assert!(acpi.find_table(&machine.mm, b"SSDT", 0).unwrap().is_none());
    }
}
