//! Read Tag and Read Tag Fragmented services.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use super::{
    path, Fault, DONE, SERVICE_READ_TAG, SERVICE_READ_TAG_FRAG, STATUS_FRAGMENT, STATUS_OK,
};
use crate::plc::Plc;

/// Payloads longer than this floor are trimmed down to a 4-byte boundary.
const ALIGN_FLOOR: usize = 8;

/// Serve a read of up to `capacity` reply bytes.
///
/// The request body is the tag path size in 16-bit words, the symbolic tag
/// segment with one numeric index segment per declared dimension, the element
/// count, and, for the fragmented service, the byte offset to resume from.
pub(super) fn read_tag(
    input: &[u8],
    fragmented: bool,
    capacity: usize,
    plc: &Plc,
) -> Result<Vec<u8>, Fault> {
    let mut r = Cursor::new(input);

    // The path size must cover at least the symbolic segment. Some clients
    // count the index segments in it as well; the index segments themselves
    // are parsed against the dimensionality of the tag they follow.
    let path_words = r.read_u8()? as usize;
    let path_start = r.position();
    let name = path::read_symbolic(&mut r)?;
    if path_words * 2 < (r.position() - path_start) as usize {
        return Err(Fault::unsupported());
    }

    let tag = plc.tags().find(name).ok_or_else(Fault::unsupported)?;
    let indices = path::read_indices(&mut r, tag.dims().len())?;
    let start = tag.element_offset(&indices).ok_or_else(Fault::out_of_range)?;

    let elem_count = r.read_u16::<LittleEndian>()? as usize;
    let frag_offset = if fragmented {
        r.read_u32::<LittleEndian>()? as usize
    } else {
        0
    };

    let total = tag.data().len();
    let span = elem_count * tag.tag_type().elem_size();
    if start + span > total || start + frag_offset > total {
        return Err(Fault::out_of_range());
    }

    let cap = capacity.saturating_sub(4);
    let remaining = span.saturating_sub(frag_offset);
    let need_frag = remaining > cap;
    let mut take = remaining.min(cap);
    if take > ALIGN_FLOOR {
        take &= !3;
    }

    let service = if fragmented {
        SERVICE_READ_TAG_FRAG
    } else {
        SERVICE_READ_TAG
    };
    let status = if need_frag { STATUS_FRAGMENT } else { STATUS_OK };

    let from = start + frag_offset;
    let mut reply = Vec::with_capacity(6 + take);
    reply.extend_from_slice(&[service | DONE, 0, status, 0]);
    reply.extend_from_slice(&tag.tag_type().wire_code().to_le_bytes());
    reply.extend_from_slice(&tag.data()[from..from + take]);

    Ok(reply)
}
