use thiserror::Error;

/// Error types returned by the protocol dispatch path.
///
/// Only [`Error::Incomplete`] and [`Error::FrameLength`] escape to the TCP
/// loop; the remaining variants are converted into encapsulation replies with
/// a non-zero status field before a frame is answered.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The receive buffer does not yet hold a complete encapsulation frame.
    ///
    /// The caller should keep accumulating bytes until `need` are available
    /// and then retry the dispatch.
    #[error("incomplete encapsulation frame (have {have} bytes, need {need})")]
    Incomplete {
        /// Bytes currently buffered.
        have: usize,

        /// Bytes required before the frame can be dispatched.
        need: usize,
    },

    /// The encapsulation header length field disagrees with the frame that
    /// was actually delivered.
    ///
    /// This is unrecoverable mid-stream; the connection closes without a
    /// reply.
    #[error("encapsulation length declares {declared} bytes but frame holds {actual}")]
    FrameLength {
        /// Total frame length implied by the header.
        declared: usize,

        /// Length of the frame handed to the dispatcher.
        actual: usize,
    },

    /// The request failed EIP or CPF validation, or named a session handle
    /// that is zero or not the registered one.
    #[error("malformed encapsulation request")]
    BadRequest,

    /// The encapsulation command is not one the simulator implements.
    #[error("unsupported encapsulation command {0:#06x}")]
    UnsupportedCommand(u16),
}

impl Error {
    /// The EIP encapsulation status code reported to the peer, if this error
    /// is answered on the wire rather than closing the connection.
    pub(crate) fn encap_status(&self) -> Option<u32> {
        match self {
            Self::BadRequest => Some(0x0003),
            Self::UnsupportedCommand(_) => Some(0x0001),
            _ => None,
        }
    }
}

// A cursor underrun while parsing a length-validated frame means the request
// body is shorter than its framing claims.
impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self {
        Self::BadRequest
    }
}
