// BLOCKED Frame {
//   Type (8) = 0x08,
// }

use crate::version::Version;

/// Tells the peer that the connection-level window is used up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockedFrame;

const BLOCKED_FRAME_TYPE: u8 = 0x08;

impl super::BeFrame for BlockedFrame {
    fn frame_type(&self) -> super::FrameType {
        super::FrameType::Blocked
    }

    fn min_length(&self, _version: Version) -> usize {
        1
    }
}

impl<T: bytes::BufMut> super::io::WriteFrame<BlockedFrame> for T {
    fn put_frame(&mut self, _frame: &BlockedFrame, _version: Version) {
        self.put_u8(BLOCKED_FRAME_TYPE);
    }
}
