use std::{fmt, sync::Arc};

use crate::packet::{DIVERSIFICATION_NONCE_LEN, EncryptionLevel, PacketType};

/// Seals packets at one encryption level.
pub trait Sealer: Send + Sync {
    /// Append the sealed `plaintext` to `dst`. The header is passed as
    /// associated data and is not part of the output.
    fn seal(&self, dst: &mut Vec<u8>, plaintext: &[u8], packet_number: u64, associated_data: &[u8]);

    /// How many bytes sealing adds to the plaintext.
    fn overhead(&self) -> usize;
}

/// A shared sealer, cheap to hand out together with its encryption level.
#[derive(Clone)]
pub struct ArcSealer(Arc<dyn Sealer>);

impl ArcSealer {
    pub fn new(sealer: impl Sealer + 'static) -> Self {
        Self(Arc::new(sealer))
    }

    pub fn seal(&self, dst: &mut Vec<u8>, plaintext: &[u8], packet_number: u64, associated_data: &[u8]) {
        self.0.seal(dst, plaintext, packet_number, associated_data)
    }

    pub fn overhead(&self) -> usize {
        self.0.overhead()
    }
}

impl fmt::Debug for ArcSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcSealer")
            .field("overhead", &self.overhead())
            .finish()
    }
}

/// What the send path needs from the cryptographic handshake.
///
/// The handshake itself runs elsewhere, the packer only asks which keys to
/// use for the next packet.
pub trait CryptoSetup: Send + Sync {
    /// The sealer of the highest level currently available.
    fn sealer(&self) -> (EncryptionLevel, ArcSealer);

    /// The sealer for data of the crypto stream, which may lag behind
    /// [`CryptoSetup::sealer`].
    fn sealer_for_crypto_stream(&self) -> (EncryptionLevel, ArcSealer);

    /// The sealer of a specific level, if its keys are still around.
    fn sealer_with_encryption_level(&self, level: EncryptionLevel) -> Option<ArcSealer>;

    /// The nonce a server mixes into the keys of the secure level.
    fn diversification_nonce(&self) -> Option<[u8; DIVERSIFICATION_NONCE_LEN]>;

    /// The long header type of the next handshake packet.
    fn next_packet_type(&self) -> PacketType;
}
