use nom::error::ErrorKind as NomErrorKind;
use thiserror::Error;

use super::FrameType;
use crate::error::{ErrorKind as TransportErrorKind, QuicError as TransportError};

/// Parse errors when decoding frames.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum Error {
    #[error("A packet containing no frames")]
    NoFrames,
    #[error("Incomplete frame type: {0}")]
    IncompleteType(String),
    #[error("Invalid frame type from {0:#04x}")]
    InvalidType(u8),
    #[error("Incomplete frame {0:?}: {1}")]
    IncompleteFrame(FrameType, String),
    #[error("Error occurred when parsing frame {0:?}: {1}")]
    ParseError(FrameType, String),
}

impl Error {
    /// Whether the input ended before the frame did.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::IncompleteType(_) | Error::IncompleteFrame(..))
    }
}

impl From<Error> for TransportError {
    fn from(e: Error) -> Self {
        tracing::warn!(target: "quic", "   Cause by: parse frame error {e}");
        match e {
            Error::NoFrames => {
                Self::with_default_fty(TransportErrorKind::MissingPayload, e.to_string())
            }
            Error::IncompleteType(_) | Error::InvalidType(_) => {
                Self::with_default_fty(TransportErrorKind::InvalidFrameData, e.to_string())
            }
            Error::IncompleteFrame(fty, _) | Error::ParseError(fty, _) => {
                Self::new(invalid_data_kind(fty), fty, e.to_string())
            }
        }
    }
}

fn invalid_data_kind(frame_type: FrameType) -> TransportErrorKind {
    match frame_type {
        FrameType::Stream(_) => TransportErrorKind::InvalidStreamData,
        FrameType::Ack(_) => TransportErrorKind::InvalidAckData,
        FrameType::StopWaiting => TransportErrorKind::InvalidStopWaitingData,
        FrameType::RstStream => TransportErrorKind::InvalidRstStreamData,
        FrameType::ConnectionClose => TransportErrorKind::InvalidConnectionCloseData,
        FrameType::MaxData | FrameType::MaxStreamData => {
            TransportErrorKind::InvalidWindowUpdateData
        }
        FrameType::Blocked | FrameType::StreamBlocked => TransportErrorKind::InvalidBlockedData,
        _ => TransportErrorKind::InvalidFrameData,
    }
}

impl From<nom::Err<Error>> for Error {
    fn from(error: nom::Err<Error>) -> Self {
        match error {
            nom::Err::Incomplete(_needed) => {
                unreachable!("Because the parsing of QUIC packets and frames is not stream-based.")
            }
            nom::Err::Error(err) | nom::Err::Failure(err) => err,
        }
    }
}

impl nom::error::ParseError<&[u8]> for Error {
    fn from_error_kind(input: &[u8], kind: NomErrorKind) -> Self {
        if kind == NomErrorKind::Eof || input.is_empty() {
            Error::IncompleteType(format!("{kind:?}"))
        } else {
            Error::ParseError(FrameType::Padding, format!("{kind:?}"))
        }
    }

    fn append(_input: &[u8], _kind: NomErrorKind, source: Self) -> Self {
        source
    }
}
