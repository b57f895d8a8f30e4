//! AML namespace loading.
//!
//! The definition blocks of the DSDT and any SSDT/PSDT are scanned for
//! the objects that name things. No method is ever evaluated here; the
//! result is a flat namespace of paths to devices, values, regions,
//! fields, and method body windows.

use core::fmt;

use crate::memory::{MemoryManager, PhysAccess};

use super::{Acpi, AcpiError};

mod dataobj;
mod namedobj;
mod namespace;
mod namespacemodifier;
mod namestring;
mod pkglength;
mod termlist;

pub use self::dataobj::{parse_integer, AmlValue};
pub use self::namespace::{
    FieldFlags, Namespace, NamespaceEntry, NamespaceKind, RegionSpace,
};
pub use self::namestring::parse_name_string;
pub use self::pkglength::parse_pkg_length;

pub const ZERO_OP: u8 = 0x00;
pub const ONE_OP: u8 = 0x01;
pub const ALIAS_OP: u8 = 0x06;
pub const NAME_OP: u8 = 0x08;
pub const BYTE_PREFIX: u8 = 0x0A;
pub const WORD_PREFIX: u8 = 0x0B;
pub const DWORD_PREFIX: u8 = 0x0C;
pub const STRING_PREFIX: u8 = 0x0D;
pub const QWORD_PREFIX: u8 = 0x0E;
pub const SCOPE_OP: u8 = 0x10;
pub const BUFFER_OP: u8 = 0x11;
pub const PACKAGE_OP: u8 = 0x12;
pub const VAR_PACKAGE_OP: u8 = 0x13;
pub const METHOD_OP: u8 = 0x14;
pub const DUAL_NAME_PREFIX: u8 = 0x2E;
pub const MULTI_NAME_PREFIX: u8 = 0x2F;
pub const EXT_OP_PREFIX: u8 = 0x5B;
pub const ROOT_CHAR: u8 = 0x5C;
pub const PARENT_CHAR: u8 = 0x5E;
pub const CREATE_WORD_FIELD_OP: u8 = 0x8C;
pub const IF_OP: u8 = 0xA0;
pub const ELSE_OP: u8 = 0xA1;
pub const NOP_OP: u8 = 0xA3;
pub const ONES_OP: u8 = 0xFF;

// second byte after EXT_OP_PREFIX
pub const MUTEX_OP: u8 = 0x01;
pub const OPREGION_OP: u8 = 0x80;
pub const FIELD_OP: u8 = 0x81;
pub const DEVICE_OP: u8 = 0x82;
pub const PROCESSOR_OP: u8 = 0x83;
pub const INDEX_FIELD_OP: u8 = 0x86;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmlError {
    /// An encoding ran past the end of the definition block.
    UnexpectedEnd,
    /// A name segment with bytes outside the name character set.
    InvalidName { offset: usize },
    /// An opcode outside the load time subset.
    InvalidOpcode { opcode: u8, offset: usize },
}

impl fmt::Display for AmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmlError::UnexpectedEnd => write!(f, "definition block ended unexpectedly"),
            AmlError::InvalidName { offset } => {
                write!(f, "invalid name at offset {:#x}", offset)
            }
            AmlError::InvalidOpcode { opcode, offset } => {
                write!(f, "unhandled opcode {:#04x} at offset {:#x}", opcode, offset)
            }
        }
    }
}

impl Namespace {
    /// Append one definition block and register everything it names.
    /// Method windows index into the concatenation of every block
    /// loaded so far.
    pub fn load_table(&mut self, aml: &[u8]) -> Result<(), AmlError> {
        let start = self.code.len();
        let mut code = core::mem::take(&mut self.code);
        code.extend_from_slice(aml);
        let end = code.len();

        let result = termlist::register_scope(self, &code, start, end, "\\");
        self.code = code;
        result
    }
}

/// Load the DSDT and every SSDT and PSDT into one namespace.
pub fn build_namespace<P: PhysAccess>(
    mm: &MemoryManager<P>,
    acpi: &Acpi,
) -> Result<Namespace, AcpiError> {
    let mut ns = Namespace::new();
    log::info!("aml: loading DSDT, {} bytes", acpi.dsdt.body().len());
    ns.load_table(acpi.dsdt.body())?;

    for signature in [b"SSDT", b"PSDT"] {
        let mut index = 0;
        while let Some(sdt) = acpi.find_table(mm, signature, index)? {
            log::info!(
                "aml: loading {} [{}], {} bytes",
                sdt.header.signature_str(),
                index,
                sdt.body().len()
            );
            let result = ns.load_table(sdt.body());
            sdt.release(mm);
            result?;
            index += 1;
        }
    }

    log::info!("aml: namespace holds {} entries", ns.len());
    Ok(ns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;

    fn load(aml: &[u8]) -> Namespace {
        let mut ns = Namespace::new();
        ns.load_table(aml).unwrap();
        ns
    }

    /// Scope(\_SB) { Device(PCI0) { Name(_HID, 0x0A0341D0) } }
    fn sb_pci0() -> Vec<u8> {
        let mut aml = alloc::vec![SCOPE_OP, 0x17, ROOT_CHAR];
        aml.extend_from_slice(b"_SB_");
        aml.extend_from_slice(&[EXT_OP_PREFIX, DEVICE_OP, 0x0F]);
        aml.extend_from_slice(b"PCI0");
        aml.push(NAME_OP);
        aml.extend_from_slice(b"_HID");
        aml.extend_from_slice(&[DWORD_PREFIX, 0xD0, 0x41, 0x03, 0x0A]);
        aml
    }

    #[test]
    fn nested_scopes_register_three_entries() {
        let ns = load(&sb_pci0());
        assert_eq!(ns.len(), 3);

        assert_eq!(ns.get("\\_SB").unwrap().kind, NamespaceKind::Scope);
        assert_eq!(ns.get("\\_SB.PCI0").unwrap().kind, NamespaceKind::Device);
        assert_eq!(
            ns.get("\\_SB.PCI0._HID").unwrap().kind,
            NamespaceKind::Name(AmlValue::Integer(0x0A03_41D0))
        );
        assert_eq!(ns.resolve("_HID").unwrap().path, "\\_SB.PCI0._HID");
    }

    #[test]
    fn method_records_its_body_window() {
        // Method(FOO, 2) { Nop Nop }
        let mut aml = alloc::vec![METHOD_OP, 0x08];
        aml.extend_from_slice(b"FOO_");
        aml.extend_from_slice(&[0x02, NOP_OP, NOP_OP]);

        let ns = load(&aml);
        match ns.get("\\FOO").unwrap().kind {
            NamespaceKind::Method {
                offset,
                length,
                arg_count,
                serialized,
            } => {
                assert_eq!((offset, length), (7, 2));
                assert_eq!(arg_count, 2);
                assert!(!serialized);
            }
            ref other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(ns.method_body("FOO").unwrap(), &[NOP_OP, NOP_OP]);
    }

    #[test]
    fn method_windows_stay_absolute_across_tables() {
        let first = sb_pci0();
        let mut second = alloc::vec![METHOD_OP, 0x08];
        second.extend_from_slice(b"BAR_");
        second.extend_from_slice(&[0x01, NOP_OP, NOP_OP]);

        let mut ns = Namespace::new();
        ns.load_table(&first).unwrap();
        ns.load_table(&second).unwrap();

        assert_eq!(ns.len(), 4);
        match ns.get("\\BAR").unwrap().kind {
            NamespaceKind::Method { offset, length, .. } => {
                assert_eq!(offset, first.len() + 7);
                assert_eq!(length, 2);
            }
            ref other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(ns.method_body("BAR").unwrap(), &[NOP_OP, NOP_OP]);
    }

    #[test]
    fn opregion_and_field_units() {
        // OperationRegion(GPIO, SystemIO, 0x800, 8)
        let mut aml = alloc::vec![EXT_OP_PREFIX, OPREGION_OP];
        aml.extend_from_slice(b"GPIO");
        aml.extend_from_slice(&[0x01, WORD_PREFIX, 0x00, 0x08, BYTE_PREFIX, 0x08]);
        // Field(GPIO, AnyAcc Lock) { LVL0, 8, Offset(2), LVL2, 16 }
        aml.extend_from_slice(&[EXT_OP_PREFIX, FIELD_OP, 0x12]);
        aml.extend_from_slice(b"GPIO");
        aml.push(0x10);
        aml.extend_from_slice(b"LVL0");
        aml.push(0x08);
        aml.extend_from_slice(&[0x00, 0x08]);
        aml.extend_from_slice(b"LVL2");
        aml.push(0x10);

        let ns = load(&aml);
        assert_eq!(
            ns.get("\\GPIO").unwrap().kind,
            NamespaceKind::OpRegion {
                space: RegionSpace::SystemIo,
                offset: 0x800,
                length: 8,
            }
        );

        match &ns.get("\\LVL0").unwrap().kind {
            NamespaceKind::Field {
                region,
                flags,
                offset,
                length,
            } => {
                assert_eq!(region, "\\GPIO");
                assert!(flags.lock());
                assert_eq!((*offset, *length), (0, 8));
            }
            other => panic!("unexpected kind {:?}", other),
        }
        match &ns.get("\\LVL2").unwrap().kind {
            // the Offset marker skipped 8 reserved bits
            NamespaceKind::Field { offset, length, .. } => {
                assert_eq!((*offset, *length), (16, 16));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn field_for_unregistered_region_is_dropped() {
        // Field(NOPE, AnyAcc) { UNIT, 8 } with no OperationRegion(NOPE)
        let mut aml = alloc::vec![EXT_OP_PREFIX, FIELD_OP, 0x0B];
        aml.extend_from_slice(b"NOPE");
        aml.push(0x00);
        aml.extend_from_slice(b"UNIT");
        aml.push(0x08);
        // IndexField(IDX0, DAT0, AnyAcc) { UNI2, 8 }, both names unregistered
        aml.extend_from_slice(&[EXT_OP_PREFIX, INDEX_FIELD_OP, 0x0F]);
        aml.extend_from_slice(b"IDX0");
        aml.extend_from_slice(b"DAT0");
        aml.push(0x00);
        aml.extend_from_slice(b"UNI2");
        aml.push(0x08);
        // the walk continues past both skipped definitions
        aml.push(NAME_OP);
        aml.extend_from_slice(b"ANSW");
        aml.extend_from_slice(&[BYTE_PREFIX, 42]);

        let ns = load(&aml);
        assert_eq!(ns.len(), 1);
        assert!(ns.get("\\UNIT").is_none());
        assert!(ns.get("\\UNI2").is_none());
        assert_eq!(
            ns.get("\\ANSW").unwrap().kind,
            NamespaceKind::Name(AmlValue::Integer(42))
        );
    }

    #[test]
    fn if_blocks_are_skipped_whole() {
        // If(...) { opcodes outside the subset } followed by Name(ANSW, 42)
        let mut aml = alloc::vec![IF_OP, 0x05, 0x70, 0x71, 0x72, 0x73];
        aml.push(NAME_OP);
        aml.extend_from_slice(b"ANSW");
        aml.extend_from_slice(&[BYTE_PREFIX, 42]);

        let ns = load(&aml);
        assert_eq!(ns.len(), 1);
        assert_eq!(
            ns.get("\\ANSW").unwrap().kind,
            NamespaceKind::Name(AmlValue::Integer(42))
        );
    }

    #[test]
    fn unknown_opcode_is_reported_with_its_offset() {
        let mut ns = Namespace::new();
        assert_eq!(
            ns.load_table(&[NOP_OP, 0x70]),
            Err(AmlError::InvalidOpcode {
                opcode: 0x70,
                offset: 1
            })
        );
    }

    #[test]
    fn processor_and_mutex() {
        // Processor(CPU0, 1, 0x1010, 6) {}
        let mut aml = alloc::vec![EXT_OP_PREFIX, PROCESSOR_OP, 0x0B];
        aml.extend_from_slice(b"CPU0");
        aml.push(0x01);
        aml.extend_from_slice(&0x1010u32.to_le_bytes());
        aml.push(0x06);
        // Mutex(MUT0, 3)
        aml.extend_from_slice(&[EXT_OP_PREFIX, MUTEX_OP]);
        aml.extend_from_slice(b"MUT0");
        aml.push(0x03);

        let ns = load(&aml);
        assert_eq!(
            ns.get("\\CPU0").unwrap().kind,
            NamespaceKind::Processor {
                id: 1,
                block_address: 0x1010,
                block_length: 6,
            }
        );
        assert_eq!(
            ns.get("\\MUT0").unwrap().kind,
            NamespaceKind::Mutex { sync_level: 3 }
        );
    }

    #[test]
    fn alias_and_package_name() {
        // Name(_PRS, Package(2) { 0x05, \_SB.LNKA }) and an alias to it
        let mut aml = alloc::vec![NAME_OP];
        aml.extend_from_slice(b"_PRS");
        aml.extend_from_slice(&[PACKAGE_OP, 0x0E, 0x02, BYTE_PREFIX, 0x05, ROOT_CHAR, 0x2E]);
        aml.extend_from_slice(b"_SB_LNKA");
        aml.push(ALIAS_OP);
        aml.extend_from_slice(b"_PRS");
        aml.extend_from_slice(b"PRS2");

        let ns = load(&aml);
        assert_eq!(
            ns.get("\\_PRS").unwrap().kind,
            NamespaceKind::Name(AmlValue::Package(alloc::vec![
                AmlValue::Integer(5),
                AmlValue::Name(String::from("\\_SB.LNKA")),
            ]))
        );
        assert_eq!(
            ns.get("\\PRS2").unwrap().kind,
            NamespaceKind::Alias {
                target: String::from("\\_PRS")
            }
        );
    }
}
