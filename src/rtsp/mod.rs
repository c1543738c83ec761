//! RTSP request/response layer.
//!
//! `AirPlay` 2 drives everything over one RTSP connection per session. The
//! sequencer builds [`RtspRequest`]s, a per-connection task serializes them
//! onto the socket (optionally through the control-channel AEAD envelope)
//! and decoded [`RtspResponse`]s come back as [`RtspEvent`]s.

mod codec;
mod connection;
mod request;
mod response;


pub use codec::ResponseCodec;
pub use connection::{RtspConnection, RtspEvent};
pub use request::RtspRequest;
pub use response::{RtspResponse, StatusCode};

use thiserror::Error;

/// RTSP methods the `AirPlay` 2 session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Plain GET (`/info`)
    Get,
    /// POST (pairing endpoints, `/feedback`)
    Post,
    /// Configure the session or a stream
    Setup,
    /// Announce timing peers
    SetPeers,
    /// Start the stream
    Record,
    /// Drop buffered audio
    Flush,
    /// End the session
    Teardown,
    /// Volume, metadata, progress, artwork
    SetParameter,
}

impl Method {
    /// The wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Setup => "SETUP",
            Method::SetPeers => "SETPEERS",
            Method::Record => "RECORD",
            Method::Flush => "FLUSH",
            Method::Teardown => "TEARDOWN",
            Method::SetParameter => "SET_PARAMETER",
        }
    }
}

/// RTSP layer errors.
#[derive(Debug, Error)]
pub enum RtspError {
    /// Could not reach the receiver.
    #[error("connect failed: {0}")]
    ConnectFailed(std::io::Error),

    /// The connection task is gone or its queue overflowed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Response parse failure.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    /// A response grew beyond the size cap.
    #[error("response too large ({0} bytes)")]
    ResponseTooLarge(usize),

    /// The control channel cipher rejected inbound data.
    #[error("channel decryption failed")]
    ChannelCipher,
}
