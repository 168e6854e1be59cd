use derive_more::{Display, From};

use crate::role::Role;

/// A stream identifier, 32 bits wide on the wire.
///
/// The lowest bit tells who opened the stream: odd IDs belong to the client,
/// even IDs to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
pub struct StreamId(u32);

impl StreamId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }

    pub fn initiator(&self) -> Role {
        if self.0 & 1 == 1 {
            Role::Client
        } else {
            Role::Server
        }
    }

    /// The next stream ID opened by the same side.
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(2).map(Self)
    }

    /// Minimal number of bytes needed to encode this ID in a STREAM frame.
    pub fn encoding_size(&self) -> usize {
        match self.0 {
            0..=0xff => 1,
            0x100..=0xffff => 2,
            0x1_0000..=0xff_ffff => 3,
            _ => 4,
        }
    }
}

impl From<StreamId> for u32 {
    fn from(sid: StreamId) -> Self {
        sid.0
    }
}
