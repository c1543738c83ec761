//! AirTunes v2 RTP audio path.
//!
//! One [`RtpSession`] per master session assigns sequence numbers and RTP
//! timestamps, keeps the retransmit ring, and builds sync packets. Audio
//! payload encryption happens per device session with [`PacketCipher`],
//! because every session negotiates its own audio key.

mod cipher;
mod packet;
mod ring;
mod session;

#[cfg(test)]
mod tests;

pub use cipher::{AUDIO_KEY_LEN, PacketCipher};
pub use packet::{AUDIO_PAYLOAD_TYPE, RTP_HEADER_LEN, audio_header, sync_packet};
pub use ring::{RetransmitRing, RingPacket};
pub use session::RtpSession;

use thiserror::Error;

/// AirTunes v2 frames per packet.
pub const SAMPLES_PER_PACKET: u32 = 352;

/// Packets kept for retransmission.
pub const RETRANSMIT_RING_SIZE: usize = 1000;

/// RTP path errors.
#[derive(Debug, Error)]
pub enum RtpError {
    /// The audio key has the wrong length.
    #[error("audio key must be 32 bytes, got {0}")]
    BadKeyLength(usize),

    /// Packet payload encryption failed.
    #[error("packet encryption failed")]
    CipherFailed,

    /// Inbound packet too short to carry the claimed structure.
    #[error("packet truncated")]
    Truncated,
}
