//! The term list walk.
//!
//! A definition block is scanned object by object. Objects that name
//! things are registered; control flow and plain data objects are
//! skipped by their encoded size. Anything else stops the load with
//! the offending opcode and offset, so a table using constructs outside
//! this subset fails loudly instead of desynchronizing the walk.

use super::namedobj::{
    create_device, create_field, create_index_field, create_method, create_mutex,
    create_opregion, create_processor,
};
use super::namespace::Namespace;
use super::namespacemodifier::{create_alias, create_buffer_field, create_name, create_scope};
use super::pkglength::parse_pkg_length;
use super::{
    AmlError, ALIAS_OP, BUFFER_OP, BYTE_PREFIX, CREATE_WORD_FIELD_OP, DEVICE_OP, DWORD_PREFIX,
    ELSE_OP, EXT_OP_PREFIX, FIELD_OP, IF_OP, INDEX_FIELD_OP, METHOD_OP, MUTEX_OP, NAME_OP, NOP_OP,
    ONES_OP, ONE_OP, OPREGION_OP, PACKAGE_OP, PROCESSOR_OP, QWORD_PREFIX, SCOPE_OP, STRING_PREFIX,
    VAR_PACKAGE_OP, WORD_PREFIX, ZERO_OP,
};

/// Walk `code[start..end]` as a term list in `scope`, registering every
/// named object into `ns`.
pub(super) fn register_scope(
    ns: &mut Namespace,
    code: &[u8],
    start: usize,
    end: usize,
    scope: &str,
) -> Result<(), AmlError> {
    if end > code.len() {
        return Err(AmlError::UnexpectedEnd);
    }

    let mut i = start;
    while i < end {
        let op = code[i];
        match op {
            ZERO_OP | ONE_OP | ONES_OP | NOP_OP => i += 1,
            BYTE_PREFIX => i += 2,
            WORD_PREFIX => i += 3,
            DWORD_PREFIX => i += 5,
            QWORD_PREFIX => i += 9,
            STRING_PREFIX => i += skip_string(code, i)?,
            // sized blocks this walk does not look into
            BUFFER_OP | PACKAGE_OP | VAR_PACKAGE_OP | IF_OP | ELSE_OP => {
                let (size, _) = parse_pkg_length(code, i + 1)?;
                i += 1 + size;
            }
            SCOPE_OP => i += create_scope(ns, code, i, scope)?,
            NAME_OP => i += create_name(ns, code, i, scope)?,
            ALIAS_OP => i += create_alias(ns, code, i, scope)?,
            METHOD_OP => i += create_method(ns, code, i, scope)?,
            CREATE_WORD_FIELD_OP => i += create_buffer_field(ns, code, i, scope, 16)?,
            EXT_OP_PREFIX => {
                let ext = *code.get(i + 1).ok_or(AmlError::UnexpectedEnd)?;
                match ext {
                    MUTEX_OP => i += create_mutex(ns, code, i, scope)?,
                    OPREGION_OP => i += create_opregion(ns, code, i, scope)?,
                    FIELD_OP => i += create_field(ns, code, i, scope)?,
                    DEVICE_OP => i += create_device(ns, code, i, scope)?,
                    PROCESSOR_OP => i += create_processor(ns, code, i, scope)?,
                    INDEX_FIELD_OP => i += create_index_field(ns, code, i, scope)?,
                    _ => {
                        return Err(AmlError::InvalidOpcode {
                            opcode: ext,
                            offset: i + 1,
                        })
                    }
                }
            }
            _ => {
                return Err(AmlError::InvalidOpcode {
                    opcode: op,
                    offset: i,
                })
            }
        }

        if i > end {
            return Err(AmlError::UnexpectedEnd);
        }
    }
    Ok(())
}

/// Size of a NUL terminated string object including its prefix byte.
fn skip_string(code: &[u8], at: usize) -> Result<usize, AmlError> {
    let mut len = 1;
    loop {
        match code.get(at + len) {
            Some(0) => return Ok(len + 1),
            Some(_) => len += 1,
            None => return Err(AmlError::UnexpectedEnd),
        }
    }
}
