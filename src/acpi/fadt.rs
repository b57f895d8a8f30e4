//! Fixed ACPI Description Table.

use super::sdt::Sdt;

/// Generic address structure used by the reset register.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericAddress {
    pub address_space: u8,
    pub bit_width: u8,
    pub bit_offset: u8,
    pub access_size: u8,
    pub address: u64,
}

impl GenericAddress {
    fn parse(bytes: &[u8]) -> GenericAddress {
        GenericAddress {
            address_space: bytes[0],
            bit_width: bytes[1],
            bit_offset: bytes[2],
            access_size: bytes[3],
            address: u64::from_le_bytes([
                bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11],
            ]),
        }
    }
}

/// The fields of the FADT the kernel actually consumes. Offsets are
/// absolute from the start of the table.
#[derive(Clone, Debug)]
pub struct Fadt {
    pub firmware_ctrl: u32,
    pub dsdt: u32,
    pub preferred_profile: u8,
    pub sci_interrupt: u16,
    pub smi_command: u32,
    pub acpi_enable: u8,
    pub acpi_disable: u8,
    pub pm1a_event_block: u32,
    pub pm1b_event_block: u32,
    pub pm1a_control_block: u32,
    pub pm1b_control_block: u32,
    pub pm_timer_block: u32,
    pub pm1_event_length: u8,
    pub pm1_control_length: u8,
    pub pm_timer_length: u8,
    pub century: u8,
    pub iapc_boot_arch: u16,
    pub flags: u32,
    pub reset_register: GenericAddress,
    pub reset_value: u8,
    pub x_dsdt: u64,
}

fn get_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn get_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn get_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

impl Fadt {
    /// Parse the FADT out of its mapped table. Requires the table to
    /// reach through the reset value; the 64 bit DSDT pointer is taken
    /// only when the table is long enough to carry it.
    pub fn parse(sdt: &Sdt) -> Option<Fadt> {
        if &sdt.header.signature != b"FACP" {
            return None;
        }
        let data = &sdt.data;
        if data.len() < 129 {
            return None;
        }

        Some(Fadt {
            firmware_ctrl: get_u32(data, 36),
            dsdt: get_u32(data, 40),
            preferred_profile: data[45],
            sci_interrupt: get_u16(data, 46),
            smi_command: get_u32(data, 48),
            acpi_enable: data[52],
            acpi_disable: data[53],
            pm1a_event_block: get_u32(data, 56),
            pm1b_event_block: get_u32(data, 60),
            pm1a_control_block: get_u32(data, 64),
            pm1b_control_block: get_u32(data, 68),
            pm_timer_block: get_u32(data, 76),
            pm1_event_length: data[88],
            pm1_control_length: data[89],
            pm_timer_length: data[91],
            century: data[108],
            iapc_boot_arch: get_u16(data, 109),
            flags: get_u32(data, 112),
            reset_register: GenericAddress::parse(&data[116..128]),
            reset_value: data[128],
            x_dsdt: if data.len() >= 148 {
                get_u64(data, 140)
            } else {
                0
            },
        })
    }

    /// Physical address of the DSDT, preferring the 32 bit pointer and
    /// falling back to the extended one when the former is zero.
    pub fn dsdt_address(&self) -> u64 {
        if self.dsdt != 0 {
            self.dsdt as u64
        } else {
            self.x_dsdt
        }
    }
}
