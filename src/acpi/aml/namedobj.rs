//! Named objects: methods, devices, operation regions, fields,
//! processors, mutexes.

use super::dataobj::parse_integer;
use super::namespace::{FieldFlags, Namespace, NamespaceKind, RegionSpace};
use super::namestring::{child_path, parse_name_string};
use super::pkglength::parse_pkg_length;
use super::termlist::register_scope;
use super::AmlError;

/// `Method(name, flags) { ... }`: the body is not evaluated, only its
/// window into the loaded AML is recorded.
pub(super) fn create_method(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let (size, pkg_bytes) = parse_pkg_length(code, at + 1)?;
    let end = at + 1 + size;
    if end > code.len() {
        return Err(AmlError::UnexpectedEnd);
    }

    let mut i = at + 1 + pkg_bytes;
    let (path, name_size) = parse_name_string(scope, code, i)?;
    i += name_size;
    let flags = *code.get(i).ok_or(AmlError::UnexpectedEnd)?;
    i += 1;
    if i > end {
        return Err(AmlError::UnexpectedEnd);
    }

    ns.push(
        path,
        NamespaceKind::Method {
            offset: i,
            length: end - i,
            arg_count: flags & 0x07,
            serialized: flags & 0x08 != 0,
        },
    );
    Ok(1 + size)
}

/// `Device(name) { ... }`: register the device and walk its body as a
/// nested scope.
pub(super) fn create_device(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let (size, pkg_bytes) = parse_pkg_length(code, at + 2)?;
    let end = at + 2 + size;
    if end > code.len() {
        return Err(AmlError::UnexpectedEnd);
    }

    let (path, name_size) = parse_name_string(scope, code, at + 2 + pkg_bytes)?;
    ns.push(path.clone(), NamespaceKind::Device);
    register_scope(ns, code, at + 2 + pkg_bytes + name_size, end, &path)?;
    Ok(2 + size)
}

/// `Processor(name, id, pblk, pblklen) { ... }`: only the processor
/// block itself is registered; its body is skipped.
pub(super) fn create_processor(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let (size, pkg_bytes) = parse_pkg_length(code, at + 2)?;
    let end = at + 2 + size;
    if end > code.len() {
        return Err(AmlError::UnexpectedEnd);
    }

    let mut i = at + 2 + pkg_bytes;
    let (path, name_size) = parse_name_string(scope, code, i)?;
    i += name_size;
    let block = code.get(i..i + 6).ok_or(AmlError::UnexpectedEnd)?;
    if i + 6 > end {
        return Err(AmlError::UnexpectedEnd);
    }

    ns.push(
        path,
        NamespaceKind::Processor {
            id: block[0],
            block_address: u32::from_le_bytes([block[1], block[2], block[3], block[4]]),
            block_length: block[5],
        },
    );
    Ok(2 + size)
}

/// `OperationRegion(name, space, offset, length)`: the offset and
/// length must be literal integers.
pub(super) fn create_opregion(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let mut i = at + 2;
    let (path, name_size) = parse_name_string(scope, code, i)?;
    i += name_size;

    let space_id = *code.get(i).ok_or(AmlError::UnexpectedEnd)?;
    i += 1;
    let space = RegionSpace::from_id(space_id);
    if let RegionSpace::Unknown(id) = space {
        log::warn!("aml: {} uses unhandled region space {:#x}", path, id);
    }

    let (offset, consumed) = require_integer(code, i)?;
    i += consumed;
    let (length, consumed) = require_integer(code, i)?;
    i += consumed;

    ns.push(
        path,
        NamespaceKind::OpRegion {
            space,
            offset,
            length,
        },
    );
    Ok(i - at)
}

fn require_integer(code: &[u8], at: usize) -> Result<(u64, usize), AmlError> {
    match parse_integer(code, at)? {
        Some(integer) => Ok(integer),
        None => Err(AmlError::InvalidOpcode {
            opcode: code[at],
            offset: at,
        }),
    }
}

/// `Field(region, flags) { ... }`: registers one entry per named field
/// unit, tracking the running bit offset.
pub(super) fn create_field(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let (size, pkg_bytes) = parse_pkg_length(code, at + 2)?;
    let end = at + 2 + size;
    if end > code.len() {
        return Err(AmlError::UnexpectedEnd);
    }

    let mut i = at + 2 + pkg_bytes;
    let (region, name_size) = parse_name_string(scope, code, i)?;
    i += name_size;
    let flags = *code.get(i).ok_or(AmlError::UnexpectedEnd)?;
    i += 1;

    // Forward references are not supported: the region must already be
    // registered, otherwise the whole field definition is dropped.
    if ns.resolve(&region).is_none() {
        log::warn!("aml: field names unregistered region {}, skipping", region);
        return Ok(2 + size);
    }

    walk_field_units(code, i, end, flags, |path_seg, at, flags, offset, length| {
        let path = child_path(scope, path_seg, at)?;
        ns.push(
            path,
            NamespaceKind::Field {
                region: region.clone(),
                flags,
                offset,
                length,
            },
        );
        Ok(())
    })?;
    Ok(2 + size)
}

/// `IndexField(index, data, flags) { ... }`.
pub(super) fn create_index_field(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let (size, pkg_bytes) = parse_pkg_length(code, at + 2)?;
    let end = at + 2 + size;
    if end > code.len() {
        return Err(AmlError::UnexpectedEnd);
    }

    let mut i = at + 2 + pkg_bytes;
    let (index, consumed) = parse_name_string(scope, code, i)?;
    i += consumed;
    let (data, consumed) = parse_name_string(scope, code, i)?;
    i += consumed;
    let flags = *code.get(i).ok_or(AmlError::UnexpectedEnd)?;
    i += 1;

    if ns.resolve(&index).is_none() || ns.resolve(&data).is_none() {
        log::warn!(
            "aml: index field names unregistered {} or {}, skipping",
            index,
            data
        );
        return Ok(2 + size);
    }

    walk_field_units(code, i, end, flags, |path_seg, at, flags, offset, length| {
        let path = child_path(scope, path_seg, at)?;
        ns.push(
            path,
            NamespaceKind::IndexField {
                index: index.clone(),
                data: data.clone(),
                flags,
                offset,
                length,
            },
        );
        Ok(())
    })?;
    Ok(2 + size)
}

/// Walk a field unit list: named units advance the bit cursor by their
/// width, `0x00` markers skip reserved bits, `0x01` markers change the
/// access type for the units that follow.
fn walk_field_units(
    code: &[u8],
    start: usize,
    end: usize,
    flags: u8,
    mut unit: impl FnMut(&[u8], usize, FieldFlags, u64, u64) -> Result<(), AmlError>,
) -> Result<(), AmlError> {
    let mut i = start;
    let mut bit = 0u64;
    let mut flags = FieldFlags::new(flags);

    while i < end {
        match code[i] {
            0x00 => {
                let (skip, consumed) = parse_pkg_length(code, i + 1)?;
                bit += skip as u64;
                i += 1 + consumed;
            }
            0x01 => {
                let access = code.get(i + 1..i + 3).ok_or(AmlError::UnexpectedEnd)?;
                flags = FieldFlags::new((flags.raw() & 0xF0) | (access[0] & 0x0F));
                i += 3;
            }
            _ => {
                let seg = code.get(i..i + 4).ok_or(AmlError::UnexpectedEnd)?;
                let (width, consumed) = parse_pkg_length(code, i + 4)?;
                unit(seg, i, flags, bit, width as u64)?;
                bit += width as u64;
                i += 4 + consumed;
            }
        }
    }
    Ok(())
}

/// `Mutex(name, sync)`.
pub(super) fn create_mutex(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let mut i = at + 2;
    let (path, name_size) = parse_name_string(scope, code, i)?;
    i += name_size;
    let sync = *code.get(i).ok_or(AmlError::UnexpectedEnd)?;
    i += 1;

    ns.push(
        path,
        NamespaceKind::Mutex {
            sync_level: sync & 0x0F,
        },
    );
    Ok(i - at)
}
