// CONNECTION_CLOSE Frame {
//   Type (8) = 0x02,
//   Error Code (32),
//   Reason Phrase Length (16),
//   Reason Phrase (..),
// }

use super::FrameType;
use crate::{
    error::ErrorKind,
    version::{ByteOrder, Version},
};

/// Closes the connection, nothing else is sent in the same packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionCloseFrame {
    pub error_code: u32,
    pub reason: String,
}

const CONNECTION_CLOSE_FRAME_TYPE: u8 = 0x02;

impl super::BeFrame for ConnectionCloseFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::ConnectionClose
    }

    fn min_length(&self, _version: Version) -> usize {
        1 + 4 + 2 + self.reason_len()
    }
}

impl ConnectionCloseFrame {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            error_code: kind.into(),
            reason: reason.into(),
        }
    }

    /// The known error kind, or the raw code the peer sent.
    pub fn error_kind(&self) -> Result<ErrorKind, u32> {
        ErrorKind::try_from(self.error_code)
    }

    // the length field is 16 bits wide, longer reasons are cut on a char boundary
    fn reason_len(&self) -> usize {
        let mut len = self.reason.len().min(u16::MAX as usize);
        while !self.reason.is_char_boundary(len) {
            len -= 1;
        }
        len
    }
}

// nom parser for CONNECTION_CLOSE_FRAME
pub fn be_connection_close_frame(
    order: ByteOrder,
) -> impl Fn(&[u8]) -> nom::IResult<&[u8], ConnectionCloseFrame> {
    use nom::{Parser, bytes::complete::take};

    use crate::version::ext::be_uint;
    move |input: &[u8]| {
        let (remain, (error_code, reason_len)) = (be_uint(order, 4), be_uint(order, 2)).parse(input)?;
        let (remain, reason) = take(reason_len as usize).parse(remain)?;
        let reason = std::str::from_utf8(reason).map_err(|_| {
            nom::Err::Error(nom::error::make_error(input, nom::error::ErrorKind::Verify))
        })?;
        Ok((
            remain,
            ConnectionCloseFrame {
                error_code: error_code as u32,
                reason: reason.to_owned(),
            },
        ))
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<ConnectionCloseFrame> for T {
    fn put_frame(&mut self, frame: &ConnectionCloseFrame, version: Version) {
        use crate::version::ext::WriteUint;
        let order = version.byte_order();
        let reason_len = frame.reason_len();
        self.put_u8(CONNECTION_CLOSE_FRAME_TYPE);
        self.put_uint_in(order, frame.error_code as u64, 4);
        self.put_uint_in(order, reason_len as u64, 2);
        self.put_slice(&frame.reason.as_bytes()[..reason_len]);
    }
}
