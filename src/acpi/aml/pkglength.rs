//! PkgLength decoding.

use super::AmlError;

/// Decode a PkgLength at `at`, returning the encoded value and the
/// number of bytes the encoding itself occupies.
///
/// The top two bits of the first byte select zero to three following
/// bytes. The single byte form carries the value in its low six bits;
/// the longer forms keep the low four bits of the first byte and stack
/// following bytes above them.
pub fn parse_pkg_length(code: &[u8], at: usize) -> Result<(usize, usize), AmlError> {
    let lead = *code.get(at).ok_or(AmlError::UnexpectedEnd)?;
    let extra = (lead >> 6) as usize;
    if extra == 0 {
        return Ok(((lead & 0x3F) as usize, 1));
    }

    let mut value = (lead & 0x0F) as usize;
    for (i, shift) in (0..extra).map(|i| (i, 4 + 8 * i)) {
        let byte = *code.get(at + 1 + i).ok_or(AmlError::UnexpectedEnd)?;
        value |= (byte as usize) << shift;
    }
    Ok((value, 1 + extra))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: usize) -> alloc::vec::Vec<u8> {
        if value < 0x40 {
            return alloc::vec![value as u8];
        }
        let extra = if value < 0x1000 {
            1
        } else if value < 0x10_0000 {
            2
        } else {
            3
        };
        let mut bytes = alloc::vec![(extra as u8) << 6 | (value & 0xF) as u8];
        for i in 0..extra {
            bytes.push((value >> (4 + 8 * i)) as u8);
        }
        bytes
    }

    #[test]
    fn single_byte_form() {
        assert_eq!(parse_pkg_length(&[0x00], 0).unwrap(), (0, 1));
        assert_eq!(parse_pkg_length(&[0x3F], 0).unwrap(), (63, 1));
    }

    #[test]
    fn encoding_width_matches_value() {
        for (value, width) in [
            (0, 1),
            (63, 1),
            (64, 2),
            (0xFFF, 2),
            (0x1000, 3),
            (0xF_FFFF, 3),
            (0x10_0000, 4),
            (0xFFF_FFFF, 4),
        ] {
            let bytes = encode(value);
            assert_eq!(bytes.len(), width, "value {:#x}", value);
            assert_eq!(parse_pkg_length(&bytes, 0).unwrap(), (value, width));
        }
    }

    #[test]
    fn offset_is_honored() {
        let code = [0xA3, 0xA3, 0x42, 0x0F];
        assert_eq!(parse_pkg_length(&code, 2).unwrap(), (0xF2, 2));
    }

    #[test]
    fn truncated_encoding() {
        assert!(matches!(
            parse_pkg_length(&[0x42], 0),
            Err(AmlError::UnexpectedEnd)
        ));
        assert!(matches!(parse_pkg_length(&[], 0), Err(AmlError::UnexpectedEnd)));
    }
}
