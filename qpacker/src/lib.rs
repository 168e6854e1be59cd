//! The packet packer and the send path built around it.
//!
//! [`PacketPacker`] decides what goes into the next packet and seals it,
//! [`SendPath`] drives it together with the stream framer and the sent
//! packet handler, one send step at a time.

pub mod error;
mod packer;
mod send_path;

pub use packer::{PackedPacket, PacketPacker};
pub use send_path::SendPath;
