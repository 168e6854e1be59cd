// PING Frame {
//   Type (8) = 0x07,
// }

use crate::version::Version;

/// Elicits an acknowledgment without carrying anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingFrame;

const PING_FRAME_TYPE: u8 = 0x07;

impl super::BeFrame for PingFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::Ping
    }

    fn min_length(&self, _version: Version) -> usize {
        1
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<PingFrame> for T {
    fn put_frame(&mut self, _frame: &PingFrame, _version: Version) {
        self.put_u8(PING_FRAME_TYPE);
    }
}
