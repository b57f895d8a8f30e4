//! End to end bring-up over a synthetic machine image: firmware tables
//! in an in-process memory arena, from RSDP search through namespace
//! and interrupt topology.

use kernel_core::acpi::aml::{AmlValue, NamespaceKind, RegionSpace};
use kernel_core::apic::IRQ_BASE;
use kernel_core::memory::PAGE_SIZE;
use kernel_core::{
    IrqFlags, IrqMode, LinearMemory, MemoryArea, MemoryManager, PhysAccess, PhysicalAddress,
    System,
};

const ARENA_SIZE: usize = 32 * 1024 * 1024;
const IOAPIC_PHYS: u32 = 0x00FE_0000;

const SDT_HEADER_LEN: usize = 36;

fn build_table(signature: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; SDT_HEADER_LEN];
    data[0..4].copy_from_slice(signature);
    data[8] = 1;
    data[10..16].copy_from_slice(b"TESTOS");
    data.extend_from_slice(body);
    let length = data.len() as u32;
    data[4..8].copy_from_slice(&length.to_le_bytes());
    data[9] = 0;
    let sum = data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
    data[9] = sum.wrapping_neg();
    data
}

fn build_fadt(dsdt: u32) -> Vec<u8> {
    let mut body = vec![0u8; 129 - SDT_HEADER_LEN];
    body[40 - SDT_HEADER_LEN..44 - SDT_HEADER_LEN].copy_from_slice(&dsdt.to_le_bytes());
    body[46 - SDT_HEADER_LEN] = 9; // SCI interrupt
    body[108 - SDT_HEADER_LEN] = 0x32; // century register
    build_table(b"FACP", &body)
}

/// Scope(\_SB) { Device(PCI0) { Name(_HID, 0x0A0341D0) } }
/// Method(FOO) { Nop }
/// OperationRegion(GPIO, SystemIO, 0x800, 8) with one field unit
fn build_dsdt_aml() -> Vec<u8> {
    let mut aml = vec![0x10, 0x17, 0x5C];
    aml.extend_from_slice(b"_SB_");
    aml.extend_from_slice(&[0x5B, 0x82, 0x0F]);
    aml.extend_from_slice(b"PCI0");
    aml.push(0x08);
    aml.extend_from_slice(b"_HID");
    aml.extend_from_slice(&[0x0C, 0xD0, 0x41, 0x03, 0x0A]);

    aml.extend_from_slice(&[0x14, 0x07]);
    aml.extend_from_slice(b"FOO_");
    aml.extend_from_slice(&[0x00, 0xA3]);

    aml.extend_from_slice(&[0x5B, 0x80]);
    aml.extend_from_slice(b"GPIO");
    aml.extend_from_slice(&[0x01, 0x0B, 0x00, 0x08, 0x0A, 0x08]);
    aml.extend_from_slice(&[0x5B, 0x81, 0x0B]);
    aml.extend_from_slice(b"GPIO");
    aml.push(0x00);
    aml.extend_from_slice(b"LVL0");
    aml.push(0x08);
    aml
}

/// Device(COM1) { Name(_UID, One) }
fn build_ssdt_aml() -> Vec<u8> {
    let mut aml = vec![0x5B, 0x82, 0x0B];
    aml.extend_from_slice(b"COM1");
    aml.push(0x08);
    aml.extend_from_slice(b"_UID");
    aml.push(0x01);
    aml
}

fn build_madt() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
    body.extend_from_slice(&1u32.to_le_bytes());

    // two usable processors and one disabled
    for (processor, id, flags) in [(0u8, 0u8, 1u32), (1, 1, 1), (2, 2, 0)] {
        body.extend_from_slice(&[0, 8, processor, id]);
        body.extend_from_slice(&flags.to_le_bytes());
    }

    body.extend_from_slice(&[1, 12, 0, 0]);
    body.extend_from_slice(&IOAPIC_PHYS.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());

    // SCI on IRQ 9: level triggered, active low
    body.extend_from_slice(&[2, 10, 0, 9]);
    body.extend_from_slice(&9u32.to_le_bytes());
    body.extend_from_slice(&0x000Au16.to_le_bytes());
    // PIT rerouted to GSI 2
    body.extend_from_slice(&[2, 10, 0, 0]);
    body.extend_from_slice(&2u32.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());

    build_table(b"APIC", &body)
}

struct Machine {
    mm: MemoryManager<LinearMemory>,
    cursor: usize,
}

impl Machine {
    fn new() -> Machine {
        let areas = [MemoryArea::usable(0, ARENA_SIZE as u64)];
        let mm = MemoryManager::new(&areas, LinearMemory::new(ARENA_SIZE)).unwrap();
        Machine {
            mm,
            cursor: 0x000F_1000,
        }
    }

    fn place(&mut self, bytes: &[u8]) -> u32 {
        let phys = self.cursor;
        self.mm.phys().write(PhysicalAddress::new(phys), bytes);
        self.cursor = (phys + bytes.len() + 63) & !63;
        phys as u32
    }

    fn install_rsdp(&mut self, rsdt_address: u32) {
        let mut rsdp = vec![0u8; 20];
        rsdp[0..8].copy_from_slice(b"RSD PTR ");
        rsdp[9..15].copy_from_slice(b"TESTOS");
        rsdp[16..20].copy_from_slice(&rsdt_address.to_le_bytes());
        let sum = rsdp.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        rsdp[8] = sum.wrapping_neg();
        self.mm
            .phys()
            .write(PhysicalAddress::new(0x000E_0000), &rsdp);
    }
}

fn boot() -> System<LinearMemory> {
    let mut machine = Machine::new();

    // version 0x11, 24 redirection entries
    machine.mm.phys().write(
        PhysicalAddress::new(IOAPIC_PHYS as usize + 16),
        &0x0017_0011u32.to_le_bytes(),
    );

    let dsdt = machine.place(&build_table(b"DSDT", &build_dsdt_aml()));
    let fadt = machine.place(&build_fadt(dsdt));
    let ssdt = machine.place(&build_table(b"SSDT", &build_ssdt_aml()));
    let madt = machine.place(&build_madt());

    let mut rsdt_body = Vec::new();
    for pointer in [fadt, ssdt, madt] {
        rsdt_body.extend_from_slice(&pointer.to_le_bytes());
    }
    let rsdt = machine.place(&build_table(b"RSDT", &rsdt_body));
    machine.install_rsdp(rsdt);

    System::bring_up(machine.mm).unwrap()
}

#[test]
fn namespace_covers_both_tables() {
    let system = boot();
    // DSDT: \_SB, \_SB.PCI0, \_SB.PCI0._HID, \FOO, \GPIO, \LVL0
    // SSDT: \COM1, \COM1._UID
    assert_eq!(system.namespace.len(), 8);

    assert_eq!(
        system.namespace.get("\\_SB").unwrap().kind,
        NamespaceKind::Scope
    );
    assert_eq!(
        system.namespace.get("\\_SB.PCI0._HID").unwrap().kind,
        NamespaceKind::Name(AmlValue::Integer(0x0A03_41D0))
    );
    assert_eq!(
        system.namespace.resolve("_HID").unwrap().path,
        "\\_SB.PCI0._HID"
    );
    assert_eq!(
        system.namespace.get("\\COM1._UID").unwrap().kind,
        NamespaceKind::Name(AmlValue::Integer(1))
    );
    assert_eq!(system.namespace.method_body("FOO").unwrap(), &[0xA3]);

    match &system.namespace.get("\\GPIO").unwrap().kind {
        NamespaceKind::OpRegion {
            space,
            offset,
            length,
        } => {
            assert_eq!(*space, RegionSpace::SystemIo);
            assert_eq!((*offset, *length), (0x800, 8));
        }
        other => panic!("unexpected kind {:?}", other),
    }
}

#[test]
fn fadt_fields_survive_the_trip() {
    let system = boot();
    assert_eq!(system.acpi.fadt.sci_interrupt, 9);
    assert_eq!(system.acpi.fadt.century, 0x32);
}

#[test]
fn topology_reflects_the_madt() {
    let system = boot();
    assert_eq!(system.topology.mode, IrqMode::IoApic);
    assert_eq!(system.topology.local_apics().len(), 3);
    assert_eq!(system.topology.usable_processors(), 2);
    assert_eq!(system.topology.local_apic_address, 0xFEE0_0000);

    let io_apics = system.topology.io_apics();
    assert_eq!(io_apics.len(), 1);
    assert_eq!(io_apics[0].line_count(), 24);
    assert!(io_apics[0].handles_gsi(23));
    assert!(!io_apics[0].handles_gsi(24));
}

#[test]
fn sci_override_goes_active_low_level() {
    let system = boot();
    let (gsi, flags) = system.topology.effective_route(9, IrqFlags::empty());
    assert_eq!(gsi, 9);
    assert_eq!(flags, IrqFlags::ACTIVE_LOW | IrqFlags::LEVEL);

    // the PIT moved to GSI 2 with default wiring
    let (gsi, flags) = system.topology.effective_route(0, IrqFlags::empty());
    assert_eq!(gsi, 2);
    assert_eq!(flags, IrqFlags::empty());

    let vector = system
        .topology
        .configure_irq(&system.mm, 9, IrqFlags::empty(), 0)
        .unwrap();
    assert_eq!(vector, Some(IRQ_BASE + 9));
}

#[test]
fn heap_round_trip_over_the_arena() {
    let system = boot();
    let mm = &system.mm;

    let block = mm.allocate(5000).unwrap();
    let payload = vec![0xA5u8; 5000];
    mm.write(block, &payload).unwrap();

    let grown = mm.reallocate(block, 3 * PAGE_SIZE).unwrap();
    let mut check = vec![0u8; 5000];
    mm.read(grown, &mut check).unwrap();
    assert_eq!(check, payload);

    let used_before = mm.pmm.used_pages();
    mm.free(grown);
    assert!(mm.pmm.used_pages() < used_before);
}
