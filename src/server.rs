//! Dispatch entry and the TCP accept loop.
//!
//! The entry point accumulates bytes per connection until a complete
//! encapsulation frame is buffered, dispatches exactly one frame at a time,
//! and maps the outcome to a server disposition: answer, wait for more
//! bytes, or close the connection.

use std::{io, sync::Arc};

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use crate::{
    eip::{self, Reply},
    plc::{Plc, Session},
    Error,
};

/// Receive and transmit buffer size per connection. CIP allows 4002 bytes
/// for a request; the rest covers the framing overhead.
pub const BUFFER_LEN: usize = 4200;

/// Wire length of the encapsulation frame at the head of `buf`.
///
/// Returns [`Error::Incomplete`] until the header and its declared payload
/// are fully buffered.
pub fn expected_frame_len(buf: &[u8]) -> Result<usize, Error> {
    if buf.len() < eip::HEADER_LEN {
        return Err(Error::Incomplete {
            have: buf.len(),
            need: eip::HEADER_LEN,
        });
    }

    let declared = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let need = eip::HEADER_LEN + declared;
    if buf.len() < need {
        return Err(Error::Incomplete {
            have: buf.len(),
            need,
        });
    }

    Ok(need)
}

/// Dispatch the frame at the head of `buf`.
///
/// Returns the reply and the number of bytes consumed, so pipelined frames
/// behind the first stay in the buffer. [`Error::Incomplete`] asks the
/// caller for more bytes; any other error closes the connection.
pub fn process(buf: &[u8], session: &mut Session, plc: &Plc) -> Result<(Reply, usize), Error> {
    let n = expected_frame_len(buf)?;
    let reply = eip::dispatch(&buf[..n], BUFFER_LEN, session, plc)?;
    Ok((reply, n))
}

/// Accept connections until ctrl-c, serving each on its own task with its
/// own session state and buffers.
pub async fn run(listener: TcpListener, plc: Arc<Plc>) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                info!(%peer, "accepted connection");
                let plc = Arc::clone(&plc);
                tokio::spawn(async move {
                    serve(stream, plc).await;
                });
            }
        }
    }
}

async fn serve(mut stream: TcpStream, plc: Arc<Plc>) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };

    let mut session = Session::new();
    let mut buf = BytesMut::with_capacity(BUFFER_LEN);

    loop {
        match process(&buf, &mut session, &plc) {
            Ok((reply, consumed)) => {
                debug!(%peer, consumed, "request\n{}", hexdump(&buf[..consumed]));
                buf.advance(consumed);

                debug!(%peer, len = reply.bytes().len(), "reply\n{}", hexdump(reply.bytes()));
                if let Err(e) = stream.write_all(reply.bytes()).await {
                    warn!(%peer, error = %e, "write failed");
                    return;
                }

                if reply.is_close() {
                    info!(%peer, "session unregistered, closing");
                    return;
                }
            }
            Err(Error::Incomplete { need, .. }) => {
                if need > BUFFER_LEN {
                    warn!(%peer, need, "frame exceeds receive buffer, closing");
                    return;
                }

                match stream.read_buf(&mut buf).await {
                    Ok(0) => {
                        info!(%peer, "peer closed connection");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%peer, error = %e, "read failed");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(%peer, error = %e, "closing connection");
                return;
            }
        }
    }
}

/// Render a frame as offset-prefixed rows of ten hex bytes.
pub(crate) fn hexdump(data: &[u8]) -> String {
    use std::fmt::Write;

    const COLUMNS: usize = 10;

    let mut out = String::with_capacity(data.len() * 3 + data.len() / COLUMNS * 5 + 8);
    for (row, bytes) in data.chunks(COLUMNS).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:03}", row * COLUMNS);
        for b in bytes {
            let _ = write!(out, " {b:02x}");
        }
    }

    out
}
