use std::{fmt, ops};

/// The perspective of an endpoint: which side of the connection it is.
///
/// Most of the send path does not care, but a few rules do: only the client
/// announces its version in the header while the handshake is running, only
/// the server attaches a diversification nonce, and the client may send
/// application data once the connection is `Secure` while the server has to
/// wait for `ForwardSecure`.
///
/// Stream IDs also encode the initiator, client-initiated streams are odd.
///
/// # Example
///
/// ```
/// use qbase::role::Role;
///
/// let local = Role::Client;
/// let peer = !local;
/// assert_eq!(peer, Role::Server);
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Role {
    /// The initiator of a connection
    Client,
    /// The acceptor of a connection
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match *self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

impl ops::Not for Role {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}
