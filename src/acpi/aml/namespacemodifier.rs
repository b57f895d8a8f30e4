//! Namespace modifier objects: Scope, Name, Alias, and the buffer
//! field creators.

use super::dataobj::{parse_data_object, parse_integer};
use super::namespace::{Namespace, NamespaceKind};
use super::namestring::parse_name_string;
use super::pkglength::parse_pkg_length;
use super::termlist::register_scope;
use super::AmlError;

/// `Scope(name) { ... }`: register the scope and walk its body with the
/// resolved path as the new current scope.
pub(super) fn create_scope(
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

    let (path, name_size) = parse_name_string(scope, code, at + 1 + pkg_bytes)?;
    ns.push(path.clone(), NamespaceKind::Scope);
    register_scope(ns, code, at + 1 + pkg_bytes + name_size, end, &path)?;
    Ok(1 + size)
}

/// `Name(name, value)`: an entry carrying an evaluated data object.
pub(super) fn create_name(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let (path, name_size) = parse_name_string(scope, code, at + 1)?;
    let (value, value_size) = parse_data_object(scope, code, at + 1 + name_size)?;
    ns.push(path, NamespaceKind::Name(value));
    Ok(1 + name_size + value_size)
}

/// `Alias(target, alias)`.
pub(super) fn create_alias(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
) -> Result<usize, AmlError> {
    let (target, target_size) = parse_name_string(scope, code, at + 1)?;
    let (alias, alias_size) = parse_name_string(scope, code, at + 1 + target_size)?;
    ns.push(alias, NamespaceKind::Alias { target });
    Ok(1 + target_size + alias_size)
}

/// `CreateWordField(source, index, name)` and the other fixed width
/// buffer field creators. The byte index must be a literal integer.
pub(super) fn create_buffer_field(
    ns: &mut Namespace,
    code: &[u8],
    at: usize,
    scope: &str,
    width: u8,
) -> Result<usize, AmlError> {
    let mut i = at + 1;
    let (source, consumed) = parse_name_string(scope, code, i)?;
    i += consumed;

    let (index, consumed) = match parse_integer(code, i)? {
        Some(integer) => integer,
        None => {
            return Err(AmlError::InvalidOpcode {
                opcode: code[i],
                offset: i,
            })
        }
    };
    i += consumed;

    let (path, consumed) = parse_name_string(scope, code, i)?;
    i += consumed;

    ns.push(
        path,
        NamespaceKind::BufferField {
            source,
            index,
            width,
        },
    );
    Ok(i - at)
}
