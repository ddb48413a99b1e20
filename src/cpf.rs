//! Common Packet Format framing carried inside SendRRData and SendUnitData.
//!
//! Both envelopes are a two-item list: an address item and a data item. The
//! unconnected form uses a null address; the connected form addresses the
//! connection negotiated by Forward Open and carries a sequence number in
//! front of the CIP payload.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    cip,
    plc::{Plc, Session},
    Error,
};

const ITEM_NULL_ADDRESS: u16 = 0x0000;
const ITEM_CONNECTED_ADDRESS: u16 = 0x00A1;
const ITEM_CONNECTED_DATA: u16 = 0x00B1;
const ITEM_UNCONNECTED_DATA: u16 = 0x00B2;

const UNCONNECTED_HEADER_LEN: usize = 10;
const CONNECTED_HEADER_LEN: usize = 16;

/// Handle the unconnected envelope of a SendRRData request.
pub(crate) fn unconnected(
    input: &[u8],
    capacity: usize,
    session: &mut Session,
    plc: &Plc,
) -> Result<Vec<u8>, Error> {
    if input.len() <= UNCONNECTED_HEADER_LEN {
        return Err(Error::BadRequest);
    }

    let mut r = Cursor::new(input);
    let item_count = r.read_u16::<LittleEndian>()?;
    let addr_type = r.read_u16::<LittleEndian>()?;
    let addr_len = r.read_u16::<LittleEndian>()?;
    let data_type = r.read_u16::<LittleEndian>()?;
    let _data_len = r.read_u16::<LittleEndian>()?;

    if item_count != 2
        || addr_type != ITEM_NULL_ADDRESS
        || addr_len != 0
        || data_type != ITEM_UNCONNECTED_DATA
    {
        return Err(Error::BadRequest);
    }

    let reply = cip::dispatch(
        &input[UNCONNECTED_HEADER_LEN..],
        capacity.saturating_sub(UNCONNECTED_HEADER_LEN),
        session,
        plc,
    );

    let mut out = Vec::with_capacity(UNCONNECTED_HEADER_LEN + reply.len());
    out.write_u16::<LittleEndian>(2)?;
    out.write_u16::<LittleEndian>(ITEM_NULL_ADDRESS)?;
    out.write_u16::<LittleEndian>(0)?;
    out.write_u16::<LittleEndian>(ITEM_UNCONNECTED_DATA)?;
    out.write_u16::<LittleEndian>(reply.len() as u16)?;
    out.extend_from_slice(&reply);

    Ok(out)
}

/// Handle the connected envelope of a SendUnitData request.
///
/// The address item must carry the connection id allocated by Forward Open;
/// the reply is addressed with the peer's connection id and echoes the
/// request sequence number.
pub(crate) fn connected(
    input: &[u8],
    capacity: usize,
    session: &mut Session,
    plc: &Plc,
) -> Result<Vec<u8>, Error> {
    if input.len() <= CONNECTED_HEADER_LEN {
        return Err(Error::BadRequest);
    }

    let mut r = Cursor::new(input);
    let item_count = r.read_u16::<LittleEndian>()?;
    let addr_type = r.read_u16::<LittleEndian>()?;
    let addr_len = r.read_u16::<LittleEndian>()?;
    let conn_id = r.read_u32::<LittleEndian>()?;
    let data_type = r.read_u16::<LittleEndian>()?;
    let _data_len = r.read_u16::<LittleEndian>()?;
    let conn_seq = r.read_u16::<LittleEndian>()?;

    if item_count != 2
        || addr_type != ITEM_CONNECTED_ADDRESS
        || addr_len != 4
        || data_type != ITEM_CONNECTED_DATA
    {
        return Err(Error::BadRequest);
    }

    // Only a Forward Open allocates a connection id, so a zero id never
    // addresses an established connection.
    if conn_id == 0 || conn_id != session.server_connection_id {
        return Err(Error::BadRequest);
    }

    // Sequence numbers are recorded but not required to be monotonic.
    session.client_connection_seq = conn_seq;

    let reply = cip::dispatch(
        &input[CONNECTED_HEADER_LEN..],
        capacity.saturating_sub(CONNECTED_HEADER_LEN),
        session,
        plc,
    );

    let mut out = Vec::with_capacity(CONNECTED_HEADER_LEN + reply.len());
    out.write_u16::<LittleEndian>(2)?;
    out.write_u16::<LittleEndian>(ITEM_CONNECTED_ADDRESS)?;
    out.write_u16::<LittleEndian>(4)?;
    out.write_u32::<LittleEndian>(session.client_connection_id)?;
    out.write_u16::<LittleEndian>(ITEM_CONNECTED_DATA)?;
    out.write_u16::<LittleEndian>(reply.len() as u16 + 2)?;
    out.write_u16::<LittleEndian>(session.client_connection_seq)?;
    out.extend_from_slice(&reply);

    Ok(out)
}
