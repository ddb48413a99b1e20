//! Forward Open and Forward Close connection manager services.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{
    path::match_connection_path, Fault, DONE, SERVICE_FORWARD_CLOSE, SERVICE_FORWARD_OPEN,
    SERVICE_FORWARD_OPEN_EX, STATUS_OK,
};
use crate::plc::{Plc, Session};

/// Low bits of a connection parameter word carrying the negotiated packet
/// size: 9 bits for the original service, 12 for the large variant.
const PACKET_SIZE_MASK: u32 = 0x1FF;
const PACKET_SIZE_MASK_EX: u32 = 0xFFF;

/// Establish a class 3 connection.
///
/// On success the session records the peer's connection identity and both
/// requested packet intervals, and allocates a fresh server-side connection
/// id and sequence seed for the connected CPF envelope to use.
pub(super) fn forward_open(
    input: &[u8],
    extended: bool,
    session: &mut Session,
    plc: &Plc,
) -> Result<Vec<u8>, Fault> {
    let mut r = Cursor::new(input);

    let _secs_per_tick = r.read_u8()?;
    let _timeout_ticks = r.read_u8()?;
    let _server_conn_id = r.read_u32::<LittleEndian>()?;
    let client_conn_id = r.read_u32::<LittleEndian>()?;
    let conn_serial = r.read_u16::<LittleEndian>()?;
    let orig_vendor_id = r.read_u16::<LittleEndian>()?;
    let orig_serial = r.read_u32::<LittleEndian>()?;
    let _timeout_multiplier = r.read_u8()?;
    for _ in 0..3 {
        r.read_u8()?; // reserved
    }
    let c2s_rpi = r.read_u32::<LittleEndian>()?;
    let c2s_params = read_conn_params(&mut r, extended)?;
    let s2c_rpi = r.read_u32::<LittleEndian>()?;
    let s2c_params = read_conn_params(&mut r, extended)?;
    let _transport_class = r.read_u8()?;

    // The fixed region is an odd number of bytes, so the path size byte
    // lands on an odd offset and the body that follows is already on a
    // 16-bit boundary. A reserved byte pads the path only when the size
    // byte lands even.
    let padded = r.position() % 2 == 0;
    match_connection_path(&mut r, padded, plc.path())?;

    let mask = if extended {
        PACKET_SIZE_MASK_EX
    } else {
        PACKET_SIZE_MASK
    };

    session.client_connection_id = client_conn_id;
    session.client_connection_serial = conn_serial;
    session.client_vendor_id = orig_vendor_id;
    session.client_serial_number = orig_serial;
    session.client_to_server_rpi = c2s_rpi;
    session.server_to_client_rpi = s2c_rpi;
    session.client_to_server_max_packet = (c2s_params & mask) as u16;
    session.server_to_client_max_packet = (s2c_params & mask) as u16;
    session.server_connection_id = session.next_id();
    session.server_connection_seq = session.next_seq();

    let service = if extended {
        SERVICE_FORWARD_OPEN_EX
    } else {
        SERVICE_FORWARD_OPEN
    };

    let mut reply = Vec::with_capacity(30);
    reply.extend_from_slice(&[service | DONE, 0, STATUS_OK, 0]);
    reply.write_u32::<LittleEndian>(session.server_connection_id)?;
    reply.write_u32::<LittleEndian>(client_conn_id)?;
    reply.write_u16::<LittleEndian>(conn_serial)?;
    reply.write_u16::<LittleEndian>(orig_vendor_id)?;
    reply.write_u32::<LittleEndian>(orig_serial)?;
    reply.write_u32::<LittleEndian>(c2s_rpi)?;
    reply.write_u32::<LittleEndian>(s2c_rpi)?;
    reply.extend_from_slice(&[0, 0]); // application reply size, reserved

    Ok(reply)
}

/// Tear down the connection established by [`forward_open`].
///
/// The connection serial, vendor id and originator serial must match the
/// values recorded at open; a mismatch leaves the connection in force.
pub(super) fn forward_close(
    input: &[u8],
    session: &mut Session,
    plc: &Plc,
) -> Result<Vec<u8>, Fault> {
    let mut r = Cursor::new(input);

    let _secs_per_tick = r.read_u8()?;
    let _timeout_ticks = r.read_u8()?;
    let conn_serial = r.read_u16::<LittleEndian>()?;
    let orig_vendor_id = r.read_u16::<LittleEndian>()?;
    let orig_serial = r.read_u32::<LittleEndian>()?;

    // Close paths always carry the pad byte.
    match_connection_path(&mut r, true, plc.path())?;

    if conn_serial != session.client_connection_serial
        || orig_vendor_id != session.client_vendor_id
        || orig_serial != session.client_serial_number
    {
        return Err(Fault::unsupported());
    }

    session.clear_connection();

    let mut reply = Vec::with_capacity(14);
    reply.extend_from_slice(&[SERVICE_FORWARD_CLOSE | DONE, 0, STATUS_OK, 0]);
    reply.write_u16::<LittleEndian>(conn_serial)?;
    reply.write_u16::<LittleEndian>(orig_vendor_id)?;
    reply.write_u32::<LittleEndian>(orig_serial)?;
    reply.extend_from_slice(&[0, 0]); // application reply size, reserved

    Ok(reply)
}

fn read_conn_params(r: &mut Cursor<&[u8]>, extended: bool) -> Result<u32, Fault> {
    if extended {
        Ok(r.read_u32::<LittleEndian>()?)
    } else {
        Ok(u32::from(r.read_u16::<LittleEndian>()?))
    }
}
