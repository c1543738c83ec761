//! Sequence descriptors: the table of RTSP request chains that drive a
//! session.
//!
//! A sequence is an ordered list of steps; each step names its RTSP
//! method, an optional payload builder and an optional response handler.
//! The handler decides what happens next: advance, abort, or chain into
//! another sequence. Success and error dispositions are per sequence, not
//! per step.

use crate::error::AirTunesError;
use crate::rtsp::{Method, RtspResponse};
use crate::types::DeviceState;

use super::session::{Session, handlers, payloads};

/// Every sequence kind the engine can run.
///
/// The discriminants index [`DESCRIPTORS`]; `check_alignment` verifies
/// the mapping at engine init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SeqKind {
    /// `GET /info`, the first request of every start attempt
    Start = 0,
    /// The main startup chain: SETUP, SETPEERS, SETUP, RECORD, volume
    StartPlayback,
    /// `GET /info` to test reachability
    Probe,
    /// FLUSH buffered audio
    Flush,
    /// TEARDOWN on user stop
    Stop,
    /// TEARDOWN after a mid-session failure
    Failure,
    /// `POST /pair-pin-start` to put a PIN on the receiver's screen
    PinStart,
    /// One `SET_PARAMETER` carrying volume
    SendVolume,
    /// One `SET_PARAMETER` carrying DMAP track text
    SendText,
    /// One `SET_PARAMETER` carrying progress
    SendProgress,
    /// One `SET_PARAMETER` carrying artwork
    SendArtwork,
    /// Three POSTs to `/pair-setup` with a user PIN
    PairSetup,
    /// Two POSTs to `/pair-verify` against stored keys
    PairVerify,
    /// Two POSTs to `/pair-setup` with the transient PIN
    PairTransient,
    /// `POST /feedback`, the keep-alive
    Feedback,
}

/// What a response handler tells the driver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqNext {
    /// Advance to the next step (or finish the sequence).
    Continue,
    /// Invoke the sequence's error disposition.
    Abort,
    /// Terminate this sequence and start another one.
    Chain(SeqKind),
}

/// Sequence-level success disposition, interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnSuccess {
    /// Nothing; the session simply goes on.
    Nothing,
    /// Transition to `CONNECTED` and report it.
    Connected,
    /// Report current state, then clean the session up.
    SuccessAndCleanup,
    /// Report current state; session stays.
    Status,
    /// Pairing finished: run the stored `next_seq` or finish.
    PairSuccess,
}

/// Sequence-level error disposition, interpreted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// Declare the session failed.
    Failure,
    /// `START` failed: maybe fall back to the other address family.
    StartRetry,
    /// Startup failed after pairing: maybe clear a stale auth key.
    StartFailure,
}

/// Payload a step builder produced.
pub struct StepPayload {
    /// Body bytes (may be empty)
    pub body: Vec<u8>,
    /// Content type override; falls back to the step's static one
    pub content_type: Option<String>,
    /// Extra request headers (RECORD and FLUSH carry `RTP-Info`)
    pub headers: Vec<(String, String)>,
}

impl StepPayload {
    /// A bodyless payload.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            body: Vec::new(),
            content_type: None,
            headers: Vec::new(),
        }
    }

    /// A payload that is just a body.
    #[must_use]
    pub fn body(body: Vec<u8>) -> Self {
        Self {
            body,
            content_type: None,
            headers: Vec::new(),
        }
    }
}

/// Builds a step's request body from session state and the sequence
/// argument.
pub type PayloadFn = fn(&mut Session, &SeqArg) -> Result<StepPayload, AirTunesError>;

/// Consumes a step's response and picks the next move.
pub type HandlerFn = fn(&mut Session, &RtspResponse) -> SeqNext;

/// Argument a sequence was started with.
#[derive(Debug, Clone)]
pub enum SeqArg {
    /// No argument
    None,
    /// Volume for `SendVolume`
    Volume(i32),
    /// Track text for `SendText`
    Text(crate::types::TrackMetadata),
    /// Progress for `SendProgress`
    Progress(crate::types::Progress),
    /// Artwork for `SendArtwork`
    Artwork(crate::types::Artwork),
    /// PIN for `PairSetup`
    Pin(String),
}

/// One step of a sequence.
pub struct SeqStep {
    /// Step name for logging
    pub name: &'static str,
    /// RTSP method
    pub method: Method,
    /// Optional payload builder
    pub payload: Option<PayloadFn>,
    /// Optional response handler
    pub handler: Option<HandlerFn>,
    /// Static content type (payload builders may override)
    pub content_type: Option<&'static str>,
    /// Request URI; `None` means the session URL
    pub uri: Option<&'static str>,
    /// Keep going on a non-2xx RTSP status
    pub proceed_on_rtsp_not_ok: bool,
}

/// A sequence kind bundled with its dispositions and steps.
pub struct SeqDescriptor {
    /// The kind this descriptor belongs to
    pub kind: SeqKind,
    /// Success disposition
    pub on_success: OnSuccess,
    /// Error disposition
    pub on_error: OnError,
    /// Ordered steps
    pub steps: &'static [SeqStep],
}

/// In-flight sequence state stored on the session.
pub struct SequenceCtx {
    /// Which sequence is running
    pub kind: SeqKind,
    /// Index of the step whose response we are waiting for
    pub step: usize,
    /// Argument the sequence was started with
    pub arg: SeqArg,
}

/// All kinds, in discriminant order.
pub const ALL_KINDS: [SeqKind; 15] = [
    SeqKind::Start,
    SeqKind::StartPlayback,
    SeqKind::Probe,
    SeqKind::Flush,
    SeqKind::Stop,
    SeqKind::Failure,
    SeqKind::PinStart,
    SeqKind::SendVolume,
    SeqKind::SendText,
    SeqKind::SendProgress,
    SeqKind::SendArtwork,
    SeqKind::PairSetup,
    SeqKind::PairVerify,
    SeqKind::PairTransient,
    SeqKind::Feedback,
];

const START_STEPS: &[SeqStep] = &[SeqStep {
    name: "GET /info",
    method: Method::Get,
    payload: None,
    handler: Some(handlers::info_start),
    content_type: None,
    uri: Some("/info"),
    proceed_on_rtsp_not_ok: false,
}];

const START_PLAYBACK_STEPS: &[SeqStep] = &[
    // Proceed on non-OK so a 401 with WWW-Authenticate reaches the
    // handler instead of killing the sequence outright.
    SeqStep {
        name: "SETUP (session)",
        method: Method::Setup,
        payload: Some(payloads::setup_session),
        handler: Some(handlers::setup_session),
        content_type: Some("application/x-apple-binary-plist"),
        uri: None,
        proceed_on_rtsp_not_ok: true,
    },
    SeqStep {
        name: "SETPEERS",
        method: Method::SetPeers,
        payload: Some(payloads::setpeers),
        handler: None,
        content_type: Some("/peer-list-changed"),
        uri: None,
        proceed_on_rtsp_not_ok: false,
    },
    SeqStep {
        name: "SETUP (stream)",
        method: Method::Setup,
        payload: Some(payloads::setup_stream),
        handler: Some(handlers::setup_stream),
        content_type: Some("application/x-apple-binary-plist"),
        uri: None,
        proceed_on_rtsp_not_ok: false,
    },
    SeqStep {
        name: "RECORD",
        method: Method::Record,
        payload: Some(payloads::record),
        handler: Some(handlers::record),
        content_type: None,
        uri: None,
        proceed_on_rtsp_not_ok: false,
    },
    // Some speakers (e.g. Sonos Symfonisk) drop the volume unless it is
    // the last request of the chain.
    SeqStep {
        name: "SET_PARAMETER (volume)",
        method: Method::SetParameter,
        payload: Some(payloads::volume),
        handler: None,
        content_type: Some("text/parameters"),
        uri: None,
        proceed_on_rtsp_not_ok: true,
    },
];

const PROBE_STEPS: &[SeqStep] = &[SeqStep {
    name: "GET /info (probe)",
    method: Method::Get,
    payload: None,
    handler: Some(handlers::info_probe),
    content_type: None,
    uri: Some("/info"),
    proceed_on_rtsp_not_ok: false,
}];

const FLUSH_STEPS: &[SeqStep] = &[SeqStep {
    name: "FLUSH",
    method: Method::Flush,
    payload: Some(payloads::flush),
    handler: Some(handlers::flush),
    content_type: None,
    uri: None,
    proceed_on_rtsp_not_ok: false,
}];

const STOP_STEPS: &[SeqStep] = &[SeqStep {
    name: "TEARDOWN",
    method: Method::Teardown,
    payload: None,
    handler: Some(handlers::teardown),
    content_type: None,
    uri: None,
    proceed_on_rtsp_not_ok: true,
}];

const FAILURE_STEPS: &[SeqStep] = &[SeqStep {
    name: "TEARDOWN (failure)",
    method: Method::Teardown,
    payload: None,
    handler: Some(handlers::teardown_failure),
    content_type: None,
    uri: None,
    proceed_on_rtsp_not_ok: false,
}];

const PIN_START_STEPS: &[SeqStep] = &[SeqStep {
    name: "PIN start",
    method: Method::Post,
    payload: None,
    handler: Some(handlers::pin_start),
    content_type: None,
    uri: Some("/pair-pin-start"),
    proceed_on_rtsp_not_ok: false,
}];

const SEND_VOLUME_STEPS: &[SeqStep] = &[SeqStep {
    name: "SET_PARAMETER (volume)",
    method: Method::SetParameter,
    payload: Some(payloads::volume),
    handler: None,
    content_type: Some("text/parameters"),
    uri: None,
    proceed_on_rtsp_not_ok: true,
}];

const SEND_TEXT_STEPS: &[SeqStep] = &[SeqStep {
    name: "SET_PARAMETER (text)",
    method: Method::SetParameter,
    payload: Some(payloads::text),
    handler: None,
    content_type: Some("application/x-dmap-tagged"),
    uri: None,
    proceed_on_rtsp_not_ok: true,
}];

const SEND_PROGRESS_STEPS: &[SeqStep] = &[SeqStep {
    name: "SET_PARAMETER (progress)",
    method: Method::SetParameter,
    payload: Some(payloads::progress),
    handler: None,
    content_type: Some("text/parameters"),
    uri: None,
    proceed_on_rtsp_not_ok: true,
}];

const SEND_ARTWORK_STEPS: &[SeqStep] = &[SeqStep {
    name: "SET_PARAMETER (artwork)",
    method: Method::SetParameter,
    payload: Some(payloads::artwork),
    handler: None,
    content_type: None,
    uri: None,
    proceed_on_rtsp_not_ok: true,
}];

const PAIR_SETUP_STEPS: &[SeqStep] = &[
    SeqStep {
        name: "pair setup 1",
        method: Method::Post,
        payload: Some(payloads::pair_setup_start),
        handler: Some(handlers::pair_step),
        content_type: Some("application/octet-stream"),
        uri: Some("/pair-setup"),
        proceed_on_rtsp_not_ok: false,
    },
    SeqStep {
        name: "pair setup 2",
        method: Method::Post,
        payload: Some(payloads::pair_next),
        handler: Some(handlers::pair_step),
        content_type: Some("application/octet-stream"),
        uri: Some("/pair-setup"),
        proceed_on_rtsp_not_ok: false,
    },
    SeqStep {
        name: "pair setup 3",
        method: Method::Post,
        payload: Some(payloads::pair_next),
        handler: Some(handlers::pair_setup_finish),
        content_type: Some("application/octet-stream"),
        uri: Some("/pair-setup"),
        proceed_on_rtsp_not_ok: false,
    },
];

const PAIR_VERIFY_STEPS: &[SeqStep] = &[
    // Proceed on non-OK so the handler can discard a stale stored key.
    SeqStep {
        name: "pair verify 1",
        method: Method::Post,
        payload: Some(payloads::pair_verify_start),
        handler: Some(handlers::pair_verify_first),
        content_type: Some("application/octet-stream"),
        uri: Some("/pair-verify"),
        proceed_on_rtsp_not_ok: true,
    },
    SeqStep {
        name: "pair verify 2",
        method: Method::Post,
        payload: Some(payloads::pair_next),
        handler: Some(handlers::pair_finish),
        content_type: Some("application/octet-stream"),
        uri: Some("/pair-verify"),
        proceed_on_rtsp_not_ok: false,
    },
];

const PAIR_TRANSIENT_STEPS: &[SeqStep] = &[
    // Proceed on non-OK: a 470 here means the receiver wants a real PIN
    // pairing, and the handler routes to the PIN sequence.
    SeqStep {
        name: "pair setup 1 (transient)",
        method: Method::Post,
        payload: Some(payloads::pair_transient_start),
        handler: Some(handlers::pair_transient_first),
        content_type: Some("application/octet-stream"),
        uri: Some("/pair-setup"),
        proceed_on_rtsp_not_ok: true,
    },
    SeqStep {
        name: "pair setup 2 (transient)",
        method: Method::Post,
        payload: Some(payloads::pair_next),
        handler: Some(handlers::pair_finish),
        content_type: Some("application/octet-stream"),
        uri: Some("/pair-setup"),
        proceed_on_rtsp_not_ok: false,
    },
];

const FEEDBACK_STEPS: &[SeqStep] = &[SeqStep {
    name: "POST /feedback",
    method: Method::Post,
    payload: None,
    handler: None,
    content_type: None,
    uri: Some("/feedback"),
    proceed_on_rtsp_not_ok: true,
}];

/// The descriptor table, indexed by [`SeqKind`] discriminant.
pub const DESCRIPTORS: [SeqDescriptor; 15] = [
    SeqDescriptor {
        kind: SeqKind::Start,
        on_success: OnSuccess::Nothing,
        on_error: OnError::StartRetry,
        steps: START_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::StartPlayback,
        on_success: OnSuccess::Connected,
        on_error: OnError::StartFailure,
        steps: START_PLAYBACK_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::Probe,
        on_success: OnSuccess::SuccessAndCleanup,
        on_error: OnError::Failure,
        steps: PROBE_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::Flush,
        on_success: OnSuccess::Status,
        on_error: OnError::Failure,
        steps: FLUSH_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::Stop,
        on_success: OnSuccess::SuccessAndCleanup,
        on_error: OnError::Failure,
        steps: STOP_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::Failure,
        on_success: OnSuccess::SuccessAndCleanup,
        on_error: OnError::Failure,
        steps: FAILURE_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::PinStart,
        on_success: OnSuccess::SuccessAndCleanup,
        on_error: OnError::Failure,
        steps: PIN_START_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::SendVolume,
        on_success: OnSuccess::Status,
        on_error: OnError::Failure,
        steps: SEND_VOLUME_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::SendText,
        on_success: OnSuccess::Nothing,
        on_error: OnError::Failure,
        steps: SEND_TEXT_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::SendProgress,
        on_success: OnSuccess::Nothing,
        on_error: OnError::Failure,
        steps: SEND_PROGRESS_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::SendArtwork,
        on_success: OnSuccess::Nothing,
        on_error: OnError::Failure,
        steps: SEND_ARTWORK_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::PairSetup,
        on_success: OnSuccess::PairSuccess,
        on_error: OnError::Failure,
        steps: PAIR_SETUP_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::PairVerify,
        on_success: OnSuccess::PairSuccess,
        on_error: OnError::Failure,
        steps: PAIR_VERIFY_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::PairTransient,
        on_success: OnSuccess::PairSuccess,
        on_error: OnError::Failure,
        steps: PAIR_TRANSIENT_STEPS,
    },
    SeqDescriptor {
        kind: SeqKind::Feedback,
        on_success: OnSuccess::Nothing,
        on_error: OnError::Failure,
        steps: FEEDBACK_STEPS,
    },
];

/// Look up a sequence's descriptor.
#[must_use]
pub fn descriptor(kind: SeqKind) -> &'static SeqDescriptor {
    &DESCRIPTORS[kind as usize]
}

/// Verify that descriptors line up with their kinds, and that no
/// sequence is empty. A mismatch is a programmer error and refuses to
/// start the engine.
///
/// # Errors
/// Returns a protocol error naming the first misaligned entry.
pub fn check_alignment() -> Result<(), AirTunesError> {
    for (index, kind) in ALL_KINDS.iter().enumerate() {
        let descriptor = &DESCRIPTORS[index];
        if descriptor.kind != *kind || descriptor.steps.is_empty() {
            return Err(AirTunesError::Protocol(format!(
                "sequence table misaligned at index {index} ({kind:?})"
            )));
        }
    }
    Ok(())
}

/// Map an internal session state onto the coarse public one. `Teardown`
/// is transitional and must never be reported; mapping it is a bug we
/// log and paper over as `Stopped`.
#[must_use]
pub fn public_state(state: super::session::SessionState) -> DeviceState {
    use super::session::SessionState;
    match state {
        SessionState::Stopped => DeviceState::Stopped,
        SessionState::Info
        | SessionState::Encrypted
        | SessionState::Setup
        | SessionState::Record => DeviceState::Startup,
        SessionState::Connected => DeviceState::Connected,
        SessionState::Streaming => DeviceState::Streaming,
        SessionState::Auth => DeviceState::Password,
        SessionState::Failed => DeviceState::Failed,
        SessionState::Teardown => {
            tracing::error!("bug: reporting transitional TEARDOWN state");
            DeviceState::Stopped
        }
    }
}
