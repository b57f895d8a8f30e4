//! NameString decoding and namespace path building.
//!
//! Encoded names are resolved against the scope they appear in and
//! normalized: segments lose their trailing underscore padding, path
//! components join with '.', and every full path is absolute from '\'.

use alloc::string::String;

use super::{AmlError, DUAL_NAME_PREFIX, MULTI_NAME_PREFIX, PARENT_CHAR, ROOT_CHAR};

fn is_lead_name_char(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte == b'_'
}

fn is_name_char(byte: u8) -> bool {
    is_lead_name_char(byte) || byte.is_ascii_digit()
}

/// Whether `byte` can start an encoded NameString.
pub fn is_name_start(byte: u8) -> bool {
    is_lead_name_char(byte)
        || byte == ROOT_CHAR
        || byte == PARENT_CHAR
        || byte == DUAL_NAME_PREFIX
        || byte == MULTI_NAME_PREFIX
}

/// Append one four character segment to `path`, trimming the trailing
/// underscore padding. A segment of nothing but underscores keeps one.
pub(super) fn push_segment(path: &mut String, seg: &[u8], at: usize) -> Result<(), AmlError> {
    if seg.len() != 4 || !is_lead_name_char(seg[0]) || !seg[1..].iter().all(|&b| is_name_char(b)) {
        return Err(AmlError::InvalidName { offset: at });
    }

    let mut len = 4;
    while len > 1 && seg[len - 1] == b'_' {
        len -= 1;
    }

    if !path.is_empty() && !path.ends_with('\\') {
        path.push('.');
    }
    for &byte in &seg[..len] {
        path.push(byte as char);
    }
    Ok(())
}

/// Path of a direct child of `scope` named by the raw segment `seg`.
pub(super) fn child_path(scope: &str, seg: &[u8], at: usize) -> Result<String, AmlError> {
    let mut path = String::from(scope);
    push_segment(&mut path, seg, at)?;
    Ok(path)
}

fn pop_segment(path: &mut String) {
    match path.rfind('.') {
        Some(dot) => path.truncate(dot),
        // already a root child; the parent prefix clamps at the root
        None => path.truncate(1),
    }
}

/// Decode the NameString at `at`, resolved against `scope`. Returns the
/// absolute path and the number of bytes consumed: one for a root or
/// each parent prefix, then four per segment plus one byte for the dual
/// prefix or two for the multi prefix and its count.
pub fn parse_name_string(
    scope: &str,
    code: &[u8],
    at: usize,
) -> Result<(String, usize), AmlError> {
    let mut i = at;
    let mut path = String::new();

    if *code.get(i).ok_or(AmlError::UnexpectedEnd)? == ROOT_CHAR {
        path.push('\\');
        i += 1;
    } else {
        path.push_str(scope);
        while *code.get(i).ok_or(AmlError::UnexpectedEnd)? == PARENT_CHAR {
            pop_segment(&mut path);
            i += 1;
        }
    }

    let segments = match *code.get(i).ok_or(AmlError::UnexpectedEnd)? {
        0x00 => {
            i += 1;
            0
        }
        DUAL_NAME_PREFIX => {
            i += 1;
            2
        }
        MULTI_NAME_PREFIX => {
            let count = *code.get(i + 1).ok_or(AmlError::UnexpectedEnd)?;
            i += 2;
            count as usize
        }
        _ => 1,
    };

    for _ in 0..segments {
        let seg = code.get(i..i + 4).ok_or(AmlError::UnexpectedEnd)?;
        push_segment(&mut path, seg, i)?;
        i += 4;
    }

    Ok((path, i - at))
}
