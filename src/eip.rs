//! EIP encapsulation layer: session registration and request routing.
//!
//! Every frame opens with the 24-byte encapsulation header. RegisterSession
//! grants the session handle every later command must present; SendRRData
//! and SendUnitData wrap CPF envelopes; UnregisterSession ends the session
//! and the connection with it.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    cpf,
    plc::{Plc, Session},
    Error,
};

/// Encapsulation header length in bytes.
pub const HEADER_LEN: usize = 24;

/// Protocol version accepted by RegisterSession.
const EIP_VERSION: u16 = 1;

const REGISTER_SESSION: u16 = 0x0065;
const UNREGISTER_SESSION: u16 = 0x0066;
const SEND_RR_DATA: u16 = 0x006F;
const SEND_UNIT_DATA: u16 = 0x0070;

/// A parsed encapsulation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EncapHeader {
    pub(crate) command: u16,
    pub(crate) length: u16,
    pub(crate) session_handle: u32,
    pub(crate) status: u32,
    pub(crate) sender_context: u64,
    pub(crate) options: u32,
}

impl EncapHeader {
    pub(crate) fn from_cursor(r: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Ok(Self {
            command: r.read_u16::<LittleEndian>()?,
            length: r.read_u16::<LittleEndian>()?,
            session_handle: r.read_u32::<LittleEndian>()?,
            status: r.read_u32::<LittleEndian>()?,
            sender_context: r.read_u64::<LittleEndian>()?,
            options: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// Disposition of a fully processed encapsulation frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Write the bytes and keep the connection open.
    Send(Vec<u8>),
    /// Write the bytes, then close the connection.
    SendAndClose(Vec<u8>),
}

impl Reply {
    /// The reply bytes to put on the wire.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Send(b) | Self::SendAndClose(b) => b,
        }
    }

    /// True when the connection should close after the write.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::SendAndClose(_))
    }
}

/// Dispatch one complete encapsulation frame.
///
/// `capacity` bounds the total reply size, header included. Request faults
/// are answered with an empty-payload header carrying the fault status; only
/// a header whose length field disagrees with the frame is unanswerable and
/// returns an error.
pub fn dispatch(
    frame: &[u8],
    capacity: usize,
    session: &mut Session,
    plc: &Plc,
) -> Result<Reply, Error> {
    let mut r = Cursor::new(frame);
    let header = EncapHeader::from_cursor(&mut r)?;

    let declared = HEADER_LEN + header.length as usize;
    if frame.len() != declared {
        return Err(Error::FrameLength {
            declared,
            actual: frame.len(),
        });
    }

    let payload = &frame[HEADER_LEN..];
    let payload_capacity = capacity.saturating_sub(HEADER_LEN);

    match route(&header, payload, payload_capacity, session, plc) {
        Ok(Routed::Payload(body)) => Ok(Reply::Send(encap_frame(&header, session, 0, &body)?)),
        Ok(Routed::Unregistered) => {
            Ok(Reply::SendAndClose(encap_frame(&header, session, 0, &[])?))
        }
        Err(e) => match e.encap_status() {
            Some(status) => Ok(Reply::Send(encap_frame(&header, session, status, &[])?)),
            None => Err(e),
        },
    }
}

enum Routed {
    Payload(Vec<u8>),
    Unregistered,
}

fn route(
    header: &EncapHeader,
    payload: &[u8],
    capacity: usize,
    session: &mut Session,
    plc: &Plc,
) -> Result<Routed, Error> {
    // Everything except RegisterSession runs against the registered handle.
    if header.command != REGISTER_SESSION
        && (header.session_handle == 0 || header.session_handle != session.handle)
    {
        return Err(Error::BadRequest);
    }

    match header.command {
        REGISTER_SESSION => register_session(header, payload, session).map(Routed::Payload),
        UNREGISTER_SESSION => Ok(Routed::Unregistered),
        SEND_RR_DATA => cpf::unconnected(payload, capacity, session, plc).map(Routed::Payload),
        SEND_UNIT_DATA => cpf::connected(payload, capacity, session, plc).map(Routed::Payload),
        cmd => Err(Error::UnsupportedCommand(cmd)),
    }
}

fn register_session(
    header: &EncapHeader,
    payload: &[u8],
    session: &mut Session,
) -> Result<Vec<u8>, Error> {
    let mut r = Cursor::new(payload);
    let eip_version = r.read_u16::<LittleEndian>()?;
    let option_flags = r.read_u16::<LittleEndian>()?;

    // A registration must arrive on a blank header and request no options.
    if header.session_handle != 0
        || header.status != 0
        || header.sender_context != 0
        || header.options != 0
        || eip_version != EIP_VERSION
        || option_flags != 0
    {
        return Err(Error::BadRequest);
    }

    session.handle = session.next_id();
    session.sender_context = header.sender_context;

    let mut reply = Vec::with_capacity(4);
    reply.write_u16::<LittleEndian>(eip_version)?;
    reply.write_u16::<LittleEndian>(option_flags)?;
    Ok(reply)
}

/// Frame a reply: the echoed command and options, the session's handle and
/// sender context, the given status, and the payload.
fn encap_frame(
    header: &EncapHeader,
    session: &Session,
    status: u32,
    payload: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.write_u16::<LittleEndian>(header.command)?;
    out.write_u16::<LittleEndian>(payload.len() as u16)?;
    out.write_u32::<LittleEndian>(session.handle)?;
    out.write_u32::<LittleEndian>(status)?;
    out.write_u64::<LittleEndian>(session.sender_context)?;
    out.write_u32::<LittleEndian>(header.options)?;
    out.extend_from_slice(payload);
    Ok(out)
}
