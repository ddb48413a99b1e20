//! CIP service layer: request routing, the connection manager services and
//! the tag read services.
//!
//! A CIP request opens with a one-byte service code. The connection manager
//! services (Forward Open, Forward Close) carry the canonical Connection
//! Manager request path right after the service code; the tag services are
//! recognised by service code alone and carry the tag path in their body.
//! Anything else is answered with general status `0x08`.

mod forward;
mod path;
mod read;

use std::io::Cursor;

use crate::plc::{Plc, Session};

/// Reply bit ORed into the echoed service code.
const DONE: u8 = 0x80;

const SERVICE_READ_TAG: u8 = 0x4C;
const SERVICE_FORWARD_CLOSE: u8 = 0x4E;
const SERVICE_READ_TAG_FRAG: u8 = 0x52;
const SERVICE_FORWARD_OPEN: u8 = 0x54;
const SERVICE_FORWARD_OPEN_EX: u8 = 0x5B;

/// Request path of the Connection Manager object (class 0x06, instance 1).
const CONNECTION_MANAGER_PATH: [u8; 5] = [0x02, 0x20, 0x06, 0x24, 0x01];

/// General status: success.
const STATUS_OK: u8 = 0x00;
/// General status: partial transfer, more fragments to come.
const STATUS_FRAGMENT: u8 = 0x06;
/// General status: service, path or identity not recognised.
const STATUS_UNSUPPORTED: u8 = 0x08;
/// General status signalling an extended status word follows.
const STATUS_EXTENDED: u8 = 0xFF;
/// Extended status: the request addresses data beyond the end of the tag.
const EXT_STATUS_OUT_OF_RANGE: u16 = 0x2105;

/// A CIP-level failure.
///
/// Faults never leave the CIP layer as errors; [`dispatch`] encodes them into
/// an error reply so the enclosing framing is always well formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fault {
    status: u8,
    extended: Option<u16>,
}

impl Fault {
    /// The request named an unknown service, path, tag or identity.
    pub(crate) fn unsupported() -> Self {
        Self {
            status: STATUS_UNSUPPORTED,
            extended: None,
        }
    }

    /// The request addresses data outside the tag.
    pub(crate) fn out_of_range() -> Self {
        Self {
            status: STATUS_EXTENDED,
            extended: Some(EXT_STATUS_OUT_OF_RANGE),
        }
    }
}

impl From<std::io::Error> for Fault {
    fn from(_: std::io::Error) -> Self {
        Self::unsupported()
    }
}

/// Route a CIP request to its service handler and encode the reply.
///
/// `capacity` is the number of bytes the reply may occupy inside the
/// enclosing framing; the read services use it to size fragments.
pub(crate) fn dispatch(input: &[u8], capacity: usize, session: &mut Session, plc: &Plc) -> Vec<u8> {
    let service = input.first().copied().unwrap_or(0);

    let result = match service {
        SERVICE_READ_TAG => read::read_tag(&input[1..], false, capacity, plc),
        SERVICE_READ_TAG_FRAG => read::read_tag(&input[1..], true, capacity, plc),
        SERVICE_FORWARD_OPEN | SERVICE_FORWARD_OPEN_EX | SERVICE_FORWARD_CLOSE
            if input.len() > CONNECTION_MANAGER_PATH.len()
                && input[1..=CONNECTION_MANAGER_PATH.len()] == CONNECTION_MANAGER_PATH =>
        {
            let body = &input[1 + CONNECTION_MANAGER_PATH.len()..];
            match service {
                SERVICE_FORWARD_CLOSE => forward::forward_close(body, session, plc),
                s => forward::forward_open(body, s == SERVICE_FORWARD_OPEN_EX, session, plc),
            }
        }
        _ => Err(Fault::unsupported()),
    };

    match result {
        Ok(reply) => reply,
        Err(fault) => error_reply(service, fault),
    }
}

/// Encode a CIP error reply: the echoed service code with the reply bit, a
/// reserved byte, the general status, and the extended status count followed
/// by the extended word when one is present.
fn error_reply(service: u8, fault: Fault) -> Vec<u8> {
    let mut reply = vec![service | DONE, 0, fault.status];
    match fault.extended {
        Some(ext) => {
            reply.push(1);
            reply.extend_from_slice(&ext.to_le_bytes());
        }
        None => reply.push(0),
    }
    reply
}

/// Borrow `len` bytes from the cursor without copying.
fn read_slice<'a>(c: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8], Fault> {
    let data = *c.get_ref();
    let start = c.position() as usize;
    let end = start.checked_add(len).ok_or_else(Fault::unsupported)?;

    if end > data.len() {
        return Err(Fault::unsupported());
    }

    c.set_position(end as u64);
    Ok(&data[start..end])
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::{
        plc::PlcKind,
        tag::{TagDef, TagStore, TagType},
    };

    fn micro800() -> Plc {
        let mut tags = TagStore::new();
        tags.insert(TagDef::new("MyTag", TagType::DINT, &[10]).unwrap())
            .unwrap();
        Plc::new(PlcKind::Micro800, None, tags).unwrap()
    }

    #[test]
    fn test_unknown_service() {
        let mut session = Session::seeded(0);
        let plc = micro800();

        // 0x4D is Write Tag, which this simulator does not serve.
        let reply = dispatch(&hex!("4D 00"), 500, &mut session, &plc);
        assert_eq!(reply, hex!("CD 00 08 00"));
    }

    #[test]
    fn test_forward_open_needs_connection_manager_path() {
        let mut session = Session::seeded(0);
        let plc = micro800();

        // Service 0x54 with a Message Router path instead of the Connection
        // Manager path.
        let reply = dispatch(&hex!("54 02 20 02 24 01 00 00"), 500, &mut session, &plc);
        assert_eq!(reply, hex!("D4 00 08 00"));
    }

    #[test]
    fn test_empty_input() {
        let mut session = Session::seeded(0);
        let plc = micro800();

        let reply = dispatch(&[], 500, &mut session, &plc);
        assert_eq!(reply, hex!("80 00 08 00"));
    }

    #[test]
    fn test_error_reply_shapes() {
        assert_eq!(
            error_reply(0x4C, Fault::unsupported()),
            hex!("CC 00 08 00")
        );
        assert_eq!(
            error_reply(0x52, Fault::out_of_range()),
            hex!("D2 00 FF 01 05 21")
        );
    }

    #[test]
    fn test_read_slice_bounds() {
        let data = [1u8, 2, 3];
        let mut c = Cursor::new(data.as_slice());

        assert_eq!(read_slice(&mut c, 2).unwrap(), &[1, 2]);
        assert_eq!(read_slice(&mut c, 2), Err(Fault::unsupported()));
        assert_eq!(read_slice(&mut c, 1).unwrap(), &[3]);
    }
}
