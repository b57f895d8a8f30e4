//! Data object parsing: integer constants, strings, buffers, packages.

use alloc::string::String;
use alloc::vec::Vec;

use super::namestring::{is_name_start, parse_name_string};
use super::pkglength::parse_pkg_length;
use super::{
    AmlError, BUFFER_OP, BYTE_PREFIX, DWORD_PREFIX, ONES_OP, ONE_OP, PACKAGE_OP, QWORD_PREFIX,
    STRING_PREFIX, VAR_PACKAGE_OP, WORD_PREFIX, ZERO_OP,
};

/// An evaluated data object.
#[derive(Clone, Debug, PartialEq)]
pub enum AmlValue {
    Integer(u64),
    String(String),
    Buffer(Vec<u8>),
    Package(Vec<AmlValue>),
    /// A reference to another namespace path.
    Name(String),
}

impl AmlValue {
    pub fn as_integer(&self) -> Option<u64> {
        match self {
            AmlValue::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

/// Decode an integer constant at `at`. Returns `None` when the byte is
/// not an integer opcode; the consumed size is one for the constant
/// opcodes and one plus the payload width for the prefixed forms.
pub fn parse_integer(code: &[u8], at: usize) -> Result<Option<(u64, usize)>, AmlError> {
    let op = *code.get(at).ok_or(AmlError::UnexpectedEnd)?;
    let (width, value) = match op {
        ZERO_OP => return Ok(Some((0, 1))),
        ONE_OP => return Ok(Some((1, 1))),
        ONES_OP => return Ok(Some((u64::MAX, 1))),
        BYTE_PREFIX => (1, 0u64),
        WORD_PREFIX => (2, 0),
        DWORD_PREFIX => (4, 0),
        QWORD_PREFIX => (8, 0),
        _ => return Ok(None),
    };

    let bytes = code
        .get(at + 1..at + 1 + width)
        .ok_or(AmlError::UnexpectedEnd)?;
    let mut value = value;
    for (i, &byte) in bytes.iter().enumerate() {
        value |= (byte as u64) << (8 * i);
    }
    Ok(Some((value, 1 + width)))
}

/// Decode the NUL terminated string at `at` (including its prefix
/// byte). Consumes the prefix, the characters, and the terminator.
fn parse_string(code: &[u8], at: usize) -> Result<(String, usize), AmlError> {
    let mut end = at + 1;
    loop {
        match code.get(end) {
            Some(0) => break,
            Some(_) => end += 1,
            None => return Err(AmlError::UnexpectedEnd),
        }
    }
    let text = String::from_utf8_lossy(&code[at + 1..end]).into_owned();
    Ok((text, end + 1 - at))
}

fn parse_buffer(code: &[u8], at: usize) -> Result<(Vec<u8>, usize), AmlError> {
    let (size, pkg_bytes) = parse_pkg_length(code, at + 1)?;
    let end = at + 1 + size;
    if end > code.len() {
        return Err(AmlError::UnexpectedEnd);
    }

    // The declared byte count is a term argument; only a literal
    // integer identifies where the initializer bytes start.
    let mut start = at + 1 + pkg_bytes;
    if let Some((_, consumed)) = parse_integer(code, start)? {
        start += consumed;
    }
    Ok((code[start.min(end)..end].to_vec(), 1 + size))
}

fn parse_package(
    scope: &str,
    code: &[u8],
    at: usize,
    variable: bool,
) -> Result<(Vec<AmlValue>, usize), AmlError> {
    let (size, pkg_bytes) = parse_pkg_length(code, at + 1)?;
    let end = at + 1 + size;
    if end > code.len() {
        return Err(AmlError::UnexpectedEnd);
    }

    let mut i = at + 1 + pkg_bytes;
    if variable {
        // VarPackage carries its element count as a term argument
        match parse_integer(code, i)? {
            Some((_, consumed)) => i += consumed,
            None => {
                return Err(AmlError::InvalidOpcode {
                    opcode: *code.get(i).ok_or(AmlError::UnexpectedEnd)?,
                    offset: i,
                })
            }
        }
    } else {
        if i >= end {
            return Err(AmlError::UnexpectedEnd);
        }
        i += 1;
    }

    let mut elements = Vec::new();
    while i < end {
        let (element, consumed) = parse_data_object(scope, code, i)?;
        elements.push(element);
        i += consumed;
    }
    Ok((elements, 1 + size))
}

/// Decode the data object at `at`: an integer, string, buffer, package,
/// or a name reference. Anything else is an opcode this evaluator does
/// not handle.
pub fn parse_data_object(
    scope: &str,
    code: &[u8],
    at: usize,
) -> Result<(AmlValue, usize), AmlError> {
    if let Some((value, consumed)) = parse_integer(code, at)? {
        return Ok((AmlValue::Integer(value), consumed));
    }

    let op = code[at];
    match op {
        STRING_PREFIX => {
            let (text, consumed) = parse_string(code, at)?;
            Ok((AmlValue::String(text), consumed))
        }
        BUFFER_OP => {
            let (bytes, consumed) = parse_buffer(code, at)?;
            Ok((AmlValue::Buffer(bytes), consumed))
        }
        PACKAGE_OP => {
            let (elements, consumed) = parse_package(scope, code, at, false)?;
            Ok((AmlValue::Package(elements), consumed))
        }
        VAR_PACKAGE_OP => {
            let (elements, consumed) = parse_package(scope, code, at, true)?;
            Ok((AmlValue::Package(elements), consumed))
        }
        _ if is_name_start(op) => {
            let (path, consumed) = parse_name_string(scope, code, at)?;
            Ok((AmlValue::Name(path), consumed))
        }
        _ => Err(AmlError::InvalidOpcode {
            opcode: op,
            offset: at,
        }),
    }
}
