//! The flat ACPI namespace.
//!
//! Entries are stored in definition order, with a by-path index for
//! exact lookups. Duplicate paths keep the first definition, matching
//! the first-match semantics of the linear scan they replaced.

use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;

use super::dataobj::AmlValue;

/// Address space of an operation region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionSpace {
    SystemMemory,
    SystemIo,
    PciConfig,
    EmbeddedControl,
    SmBus,
    Cmos,
    /// An OEM defined or unhandled space id.
    Unknown(u8),
}

impl RegionSpace {
    pub fn from_id(id: u8) -> RegionSpace {
        match id {
            0 => RegionSpace::SystemMemory,
            1 => RegionSpace::SystemIo,
            2 => RegionSpace::PciConfig,
            3 => RegionSpace::EmbeddedControl,
            4 => RegionSpace::SmBus,
            5 => RegionSpace::Cmos,
            other => RegionSpace::Unknown(other),
        }
    }
}

/// Field unit access flags: access type in the low four bits, the lock
/// bit above them, then the update rule.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FieldFlags(u8);

impl FieldFlags {
    pub fn new(raw: u8) -> FieldFlags {
        FieldFlags(raw)
    }
    pub fn raw(&self) -> u8 {
        self.0
    }
    pub fn access_type(&self) -> u8 {
        self.0 & 0x0F
    }
    pub fn lock(&self) -> bool {
        self.0 & 0x10 != 0
    }
    pub fn update_rule(&self) -> u8 {
        (self.0 >> 5) & 0x03
    }
}

impl core::fmt::Debug for FieldFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FieldFlags")
            .field("access_type", &self.access_type())
            .field("lock", &self.lock())
            .field("update_rule", &self.update_rule())
            .finish()
    }
}

/// What a namespace entry names.
#[derive(Clone, Debug, PartialEq)]
pub enum NamespaceKind {
    Scope,
    Device,
    Name(AmlValue),
    Alias {
        target: String,
    },
    Method {
        /// Offset of the method body in the loaded AML.
        offset: usize,
        length: usize,
        arg_count: u8,
        serialized: bool,
    },
    OpRegion {
        space: RegionSpace,
        offset: u64,
        length: u64,
    },
    Field {
        region: String,
        flags: FieldFlags,
        /// Bit offset of this unit inside the region.
        offset: u64,
        /// Width of this unit in bits.
        length: u64,
    },
    IndexField {
        index: String,
        data: String,
        flags: FieldFlags,
        offset: u64,
        length: u64,
    },
    Processor {
        id: u8,
        block_address: u32,
        block_length: u8,
    },
    Mutex {
        sync_level: u8,
    },
    /// A fixed width window into a buffer, from CreateWordField and
    /// friends.
    BufferField {
        source: String,
        /// Byte index of the window inside the source buffer.
        index: u64,
        /// Window width in bits.
        width: u8,
    },
}

#[derive(Clone, Debug)]
pub struct NamespaceEntry {
    pub path: String,
    pub kind: NamespaceKind,
}

/// Entries past this count suggest a runaway table; they are kept, but
/// loudly.
const NAMESPACE_SOFT_CAP: usize = 8192;

pub struct Namespace {
    entries: Vec<NamespaceEntry>,
    by_path: HashMap<String, usize>,
    pub(super) code: Vec<u8>,
}

impl Namespace {
    pub fn new() -> Namespace {
        Namespace {
            entries: Vec::new(),
            by_path: HashMap::new(),
            code: Vec::new(),
        }
    }

    pub(super) fn push(&mut self, path: String, kind: NamespaceKind) {
        log::trace!("aml: {} = {:?}", path, kind);
        if self.entries.len() == NAMESPACE_SOFT_CAP {
            log::warn!("aml: namespace grew past {} entries", NAMESPACE_SOFT_CAP);
        }

        let index = self.entries.len();
        self.entries.push(NamespaceEntry { path, kind });
        let path = self.entries[index].path.clone();
        self.by_path.entry(path).or_insert(index);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &NamespaceEntry> {
        self.entries.iter()
    }

    /// Exact lookup of an absolute path.
    pub fn get(&self, path: &str) -> Option<&NamespaceEntry> {
        self.by_path.get(path).map(|&index| &self.entries[index])
    }

    /// Find an entry by absolute path, or by bare name against the
    /// final path segment, first definition winning.
    pub fn resolve(&self, name: &str) -> Option<&NamespaceEntry> {
        if name.starts_with('\\') {
            return self.get(name);
        }

        let wanted = name.trim_end_matches('_');
        self.entries.iter().find(|entry| {
            let last = match entry.path.rfind(['.', '\\']) {
                Some(at) => &entry.path[at + 1..],
                None => entry.path.as_str(),
            };
            last == wanted
        })
    }

    /// The AML bytes of a method body.
    pub fn method_body(&self, path: &str) -> Option<&[u8]> {
        match self.resolve(path)?.kind {
            NamespaceKind::Method { offset, length, .. } => self.code.get(offset..offset + length),
            _ => None,
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace::new()
    }
}
