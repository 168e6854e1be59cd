use std::{borrow::Cow, fmt};

use thiserror::Error;

use crate::frame::{ConnectionCloseFrame, FrameType};

/// Error codes a connection can be closed with.
///
/// Only the codes this send path can raise, plus `NoError` for a graceful
/// close, are listed. Unknown codes received from the peer stay raw `u32`s
/// inside [`ConnectionCloseFrame`].
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ErrorKind {
    NoError,
    InternalError,
    StreamDataAfterTermination,
    InvalidFrameData,
    InvalidRstStreamData,
    InvalidConnectionCloseData,
    InvalidAckData,
    PeerGoingAway,
    TooManyOpenStreams,
    InvalidStreamData,
    MissingPayload,
    InvalidWindowUpdateData,
    InvalidBlockedData,
    FlowControlReceivedTooMuchData,
    InvalidStopWaitingData,
}

impl From<ErrorKind> for u32 {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoError => 0,
            ErrorKind::InternalError => 1,
            ErrorKind::StreamDataAfterTermination => 2,
            ErrorKind::InvalidFrameData => 4,
            ErrorKind::InvalidRstStreamData => 6,
            ErrorKind::InvalidConnectionCloseData => 7,
            ErrorKind::InvalidAckData => 9,
            ErrorKind::PeerGoingAway => 16,
            ErrorKind::TooManyOpenStreams => 18,
            ErrorKind::InvalidStreamData => 46,
            ErrorKind::MissingPayload => 48,
            ErrorKind::InvalidWindowUpdateData => 57,
            ErrorKind::InvalidBlockedData => 58,
            ErrorKind::FlowControlReceivedTooMuchData => 59,
            ErrorKind::InvalidStopWaitingData => 60,
        }
    }
}

impl TryFrom<u32> for ErrorKind {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => ErrorKind::NoError,
            1 => ErrorKind::InternalError,
            2 => ErrorKind::StreamDataAfterTermination,
            4 => ErrorKind::InvalidFrameData,
            6 => ErrorKind::InvalidRstStreamData,
            7 => ErrorKind::InvalidConnectionCloseData,
            9 => ErrorKind::InvalidAckData,
            16 => ErrorKind::PeerGoingAway,
            18 => ErrorKind::TooManyOpenStreams,
            46 => ErrorKind::InvalidStreamData,
            48 => ErrorKind::MissingPayload,
            57 => ErrorKind::InvalidWindowUpdateData,
            58 => ErrorKind::InvalidBlockedData,
            59 => ErrorKind::FlowControlReceivedTooMuchData,
            60 => ErrorKind::InvalidStopWaitingData,
            unknown => return Err(unknown),
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", u32::from(*self))
    }
}

/// A protocol violation committed by the peer.
///
/// The send path only reports these, closing the connection is up to the
/// caller, usually by packing the [`ConnectionCloseFrame`] built from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("QUIC error occured in {frame_type:?}, kind: {kind}, reason: {reason}")]
pub struct QuicError {
    kind: ErrorKind,
    frame_type: Option<FrameType>,
    reason: Cow<'static, str>,
}

impl QuicError {
    pub fn new<T: Into<Cow<'static, str>>>(
        kind: ErrorKind,
        frame_type: FrameType,
        reason: T,
    ) -> Self {
        Self {
            kind,
            frame_type: Some(frame_type),
            reason: reason.into(),
        }
    }

    /// An error not tied to a specific frame.
    pub fn with_default_fty<T: Into<Cow<'static, str>>>(kind: ErrorKind, reason: T) -> Self {
        Self {
            kind,
            frame_type: None,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        self.frame_type
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<QuicError> for ConnectionCloseFrame {
    fn from(e: QuicError) -> Self {
        Self {
            error_code: e.kind.into(),
            reason: e.reason.into_owned(),
        }
    }
}
