//! Error types

use crate::types::AudioQuality;

/// Top-level error type for engine operations.
///
/// Layer-specific errors (`RTSP`, pairing, plist, RTP) are wrapped so that
/// everything funnels into a single failure path; see the session failure
/// handling in [`crate::engine`].
#[derive(Debug, thiserror::Error)]
pub enum AirTunesError {
    /// The player registry has no device with this id.
    #[error("unknown device id {0:#x}")]
    UnknownDevice(u64),

    /// The device record has no usable address for the requested family.
    #[error("device '{0}' has no usable address")]
    NoAddress(String),

    /// A session already exists for this device.
    #[error("device '{0}' already has an active session")]
    SessionExists(String),

    /// No session exists for this device.
    #[error("no active session for device id {0:#x}")]
    NoSession(u64),

    /// The required audio quality could not be provided.
    #[error("unsupported audio quality {0}")]
    QualityUnsupported(AudioQuality),

    /// RTSP transport or protocol failure.
    #[error(transparent)]
    Rtsp(#[from] crate::rtsp::RtspError),

    /// Pairing handshake failure.
    #[error(transparent)]
    Pairing(#[from] crate::pairing::PairingError),

    /// Cryptographic failure outside a pairing handshake.
    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),

    /// Binary plist encode/decode failure.
    #[error(transparent)]
    Plist(#[from] crate::plist::PlistError),

    /// RTP packetization or cipher failure.
    #[error(transparent)]
    Rtp(#[from] crate::rtp::RtpError),

    /// The peer answered with something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Socket level failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine task is gone (shutdown or panic).
    #[error("engine is not running")]
    EngineGone,
}
