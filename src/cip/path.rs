//! CIP path elements: the connection path matcher and the symbolic tag path.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use super::{read_slice, Fault};

/// Symbolic segment marker, an ASCII tag name.
const SEGMENT_SYMBOLIC: u8 = 0x91;
/// Numeric segment markers for 8, 16 and 32 bit element indices.
const SEGMENT_INDEX_U8: u8 = 0x28;
const SEGMENT_INDEX_U16: u8 = 0x29;
const SEGMENT_INDEX_U32: u8 = 0x2A;

/// Match the connection path trailing a Forward Open or Forward Close
/// request against the configured routing path.
///
/// The first byte is the claimed path length in 16-bit words. When `padded`,
/// a reserved byte sits between the length and the path body so the body
/// starts on a 16-bit boundary.
pub(super) fn match_connection_path(
    r: &mut Cursor<&[u8]>,
    padded: bool,
    reference: &[u8],
) -> Result<(), Fault> {
    let words = r.read_u8()? as usize;
    if words * 2 != reference.len() {
        return Err(Fault::unsupported());
    }

    if padded {
        r.read_u8()?;
    }

    if read_slice(r, reference.len())? != reference {
        return Err(Fault::unsupported());
    }

    Ok(())
}

/// Read the symbolic segment naming a tag, including the trailing pad byte
/// present when the name length is odd.
pub(super) fn read_symbolic<'a>(r: &mut Cursor<&'a [u8]>) -> Result<&'a str, Fault> {
    if r.read_u8()? != SEGMENT_SYMBOLIC {
        return Err(Fault::unsupported());
    }

    let len = r.read_u8()? as usize;
    if len == 0 {
        return Err(Fault::unsupported());
    }

    let name = read_slice(r, len)?;
    if len % 2 == 1 {
        r.read_u8()?;
    }

    std::str::from_utf8(name).map_err(|_| Fault::unsupported())
}

/// Read exactly `count` numeric index segments.
///
/// `count` is the dimensionality of the tag being addressed; a request that
/// carries a different number of indices stops matching here and reports the
/// out-of-range condition.
pub(super) fn read_indices(r: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<u32>, Fault> {
    let mut indices = Vec::with_capacity(count);

    for _ in 0..count {
        let marker = r.read_u8().map_err(|_| Fault::out_of_range())?;
        let index = match marker {
            SEGMENT_INDEX_U8 => u32::from(r.read_u8()?),
            SEGMENT_INDEX_U16 => {
                r.read_u8()?;
                u32::from(r.read_u16::<LittleEndian>()?)
            }
            SEGMENT_INDEX_U32 => {
                r.read_u8()?;
                r.read_u32::<LittleEndian>()?
            }
            _ => return Err(Fault::out_of_range()),
        };
        indices.push(index);
    }

    Ok(indices)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    const REFERENCE: [u8; 4] = [0x20, 0x04, 0x24, 0x01];

    #[test]
    fn test_connection_path_unpadded() {
        let raw = hex!("02 20 04 24 01");
        let mut c = Cursor::new(raw.as_slice());
        match_connection_path(&mut c, false, &REFERENCE).unwrap();
        assert_eq!(c.position(), 5);
    }

    #[test]
    fn test_connection_path_padded() {
        let raw = hex!("02 00 20 04 24 01");
        let mut c = Cursor::new(raw.as_slice());
        match_connection_path(&mut c, true, &REFERENCE).unwrap();
        assert_eq!(c.position(), 6);
    }

    #[test]
    fn test_connection_path_wrong_word_count() {
        let raw = hex!("03 20 04 24 01 00 00");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(
            match_connection_path(&mut c, false, &REFERENCE),
            Err(Fault::unsupported())
        );
    }

    #[test]
    fn test_connection_path_wrong_bytes() {
        // class 0x02 instead of the configured 0x04
        let raw = hex!("02 20 02 24 01");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(
            match_connection_path(&mut c, false, &REFERENCE),
            Err(Fault::unsupported())
        );
    }

    #[test]
    fn test_connection_path_truncated() {
        let raw = hex!("02 20 04");
        let mut c = Cursor::new(raw.as_slice());
        assert!(match_connection_path(&mut c, false, &REFERENCE).is_err());
    }

    #[test]
    fn test_symbolic_odd_name_is_padded() {
        // "MyTag" is 5 bytes, so a pad byte completes the segment.
        let raw = hex!("91 05 4D 79 54 61 67 00 28 03");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(read_symbolic(&mut c).unwrap(), "MyTag");
        assert_eq!(c.position(), 8);
    }

    #[test]
    fn test_symbolic_even_name_is_not_padded() {
        let raw = hex!("91 04 44 61 74 61");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(read_symbolic(&mut c).unwrap(), "Data");
        assert_eq!(c.position(), 6);
    }

    #[test]
    fn test_symbolic_rejects_other_markers() {
        let raw = hex!("28 03");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(read_symbolic(&mut c), Err(Fault::unsupported()));
    }

    #[test]
    fn test_index_widths() {
        let raw = hex!("28 03  29 00 34 12  2A 00 78 56 34 12");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(
            read_indices(&mut c, 3).unwrap(),
            vec![3, 0x1234, 0x1234_5678]
        );
        assert_eq!(c.position() as usize, raw.len());
    }

    #[test]
    fn test_index_count_mismatch() {
        // One index supplied, two expected: the next bytes are not a numeric
        // segment.
        let raw = hex!("28 03 01 00");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(read_indices(&mut c, 2), Err(Fault::out_of_range()));
    }

    #[test]
    fn test_index_none_expected() {
        let raw = hex!("01 00");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(read_indices(&mut c, 0).unwrap(), Vec::<u32>::new());
        assert_eq!(c.position(), 0);
    }
}
