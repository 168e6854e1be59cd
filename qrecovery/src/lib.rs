//! The reliable part of the send path: packet numbers, streams, the framer
//! that cuts stream data into frames, and the handler tracking every sent
//! packet until it is acknowledged or lost.

pub mod framer;
pub mod number;
pub mod sent;
pub mod streams;
