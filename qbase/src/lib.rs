pub mod cid;
pub mod config;
pub mod error;
pub mod flow;
pub mod frame;
pub mod handshake;
pub mod packet;
pub mod role;
pub mod sid;
pub mod version;
