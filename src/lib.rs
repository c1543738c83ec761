//! # airtunes
//!
//! An `AirPlay` 2 session engine: connects to receivers advertising
//! `_airplay._tcp`, pairs (transient, PIN or stored keys), and streams
//! synchronized ALAC audio over AirTunes v2 RTP with retransmit support.
//!
//! The crate is the protocol core only. Discovery, the audio source and the
//! device registry live with the caller, which talks to the engine through
//! [`AirTunesEngine`] and gets state changes back through the [`Player`]
//! callback trait.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use airtunes::{AirTunesEngine, EngineConfig};
//!
//! # async fn example(player: Arc<dyn airtunes::Player>) -> Result<(), airtunes::AirTunesError> {
//! let device_id = 0xF0CADu64;
//! let callback_id = 1;
//!
//! let engine = AirTunesEngine::start(player, EngineConfig::default()).await?;
//!
//! // Kick off a session; progress arrives via Player::outputs_cb.
//! engine.device_start(device_id, callback_id)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Core types: devices, qualities, metadata, public states
pub mod types;

// Protocol plumbing
/// Cryptographic primitives for pairing and audio encryption
pub mod crypto;
/// DMAP/DAAP metadata encoding for `SET_PARAMETER` side channels
pub mod dmap;
/// Session engine: sequences, sessions, shared services lifecycle
pub mod engine;
/// Pair-setup / pair-verify / transient pairing handshakes
pub mod pairing;
/// Binary property list codec for `AirPlay` protocol messages
pub mod plist;
/// AirTunes v2 RTP audio path: packets, retransmit ring, sync
pub mod rtp;
/// RTSP request/response layer
pub mod rtsp;
/// Shared UDP timing and control services
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use engine::{AirTunesEngine, EngineConfig, Player};
pub use error::AirTunesError;
pub use types::{
    Artwork, ArtworkFormat, AudioQuality, Device, DeviceState, DeviceType, MetadataMask, Progress,
    TrackMetadata,
};
