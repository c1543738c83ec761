//! Per-device session state and the step handlers that mutate it.

use std::net::IpAddr;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::AirTunesError;
use crate::pairing::{ChannelCipher, PairContext, PairSetup, PairStatus, PairVerify, TransientPair};
use crate::plist::{self, Value};
use crate::rtp::PacketCipher;
use crate::rtsp::{RtspConnection, RtspResponse};
use crate::types::{AudioQuality, MetadataMask};

use super::Player;
use super::sequence::{SeqKind, SequenceCtx};

/// User agent on every request.
pub const USER_AGENT: &str = "AirPlay/540.31";

/// Receiver status flags from `GET /info` (the subset that matters for
/// the auth decision).
pub mod status_flags {
    /// Receiver wants a PIN for this session
    pub const PIN_REQUIRED: u64 = 1 << 3;
    /// Receiver is password protected
    pub const PASSWORD_REQUIRED: u64 = 1 << 7;
    /// One-time HomeKit pairing required
    pub const ONE_TIME_PAIRING_REQUIRED: u64 = 1 << 9;
}

/// Internal session state. Grouped into phases: `Info..Record` are the
/// startup states, `Connected..Teardown` the established ones, `Failed`
/// and `Auth` the terminal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session activity
    Stopped,
    /// `GET /info` running
    Info,
    /// Cipher installed after pairing
    Encrypted,
    /// SETUP exchanges done
    Setup,
    /// RECORD acked
    Record,
    /// Ready for media
    Connected,
    /// Media flowing
    Streaming,
    /// TEARDOWN in flight (transitional, never reported)
    Teardown,
    /// Startup or session failed
    Failed,
    /// Waiting for PIN or password
    Auth,
}

impl SessionState {
    /// In the startup phase?
    #[must_use]
    pub fn is_startup(self) -> bool {
        matches!(
            self,
            SessionState::Info | SessionState::Encrypted | SessionState::Setup | SessionState::Record
        )
    }

    /// Session established (connected, streaming or tearing down)?
    #[must_use]
    pub fn is_connected_phase(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Streaming | SessionState::Teardown
        )
    }

    /// Failed or waiting for credentials?
    #[must_use]
    pub fn is_failed_phase(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Auth)
    }
}

/// One device session: the RTSP connection, protocol state, pairing and
/// cipher state, and the negotiated stream endpoints.
pub struct Session {
    /// Device id this session belongs to
    pub device_id: u64,
    /// Pending callback id, `-1` after it was consumed
    pub callback_id: i32,
    /// Device name for logging
    pub devname: String,
    /// Protocol state
    pub state: SessionState,
    /// Sequence to run after a pairing sequence succeeds
    pub next_seq: Option<SeqKind>,
    /// Currently running sequence
    pub seq: Option<SequenceCtx>,
    /// Requests without a response yet; while non-zero, idle close
    /// handling stays disarmed
    pub reqs_in_flight: u32,
    /// Responses still owed to a cancelled sequence; they are consumed
    /// silently so they cannot be taken for the current step's answer
    pub stale_responses: u32,
    /// The RTSP connection
    pub conn: RtspConnection,
    /// This attempt runs over IPv6
    pub family_v6: bool,
    /// Receiver address (for the control service lookup)
    pub peer_ip: IpAddr,
    /// Stream quality, keys the master session
    pub quality: AudioQuality,
    /// Current volume
    pub volume: i32,
    /// Volume scale maximum
    pub max_volume: i32,
    /// Stored pairing key, if any
    pub auth_key: Option<String>,
    /// Device demands pairing
    pub requires_auth: bool,
    /// Receiver advertises transient pairing
    pub supports_pairing_transient: bool,
    /// Metadata side channels the receiver wants
    pub wanted_metadata: MetadataMask,
    /// Status flags from the last `/info`
    pub statusflags: u64,
    /// Random 32-bit session id (part of the session URL)
    pub session_id: u32,
    /// `rtsp://<local>/<session_id>`
    pub session_url: String,
    /// Session UUID for SETUP
    pub session_uuid: String,
    /// Our MAC-style pairing identifier
    pub client_id: String,
    /// Random per-session instance id (DACP-ID, Client-Instance)
    pub client_instance: String,
    /// Random Active-Remote token
    pub active_remote: String,
    /// In-flight pairing handshake
    pub pair_ctx: Option<PairContext>,
    /// Shared secret once paired (32 or 64 bytes)
    pub shared_secret: Option<Vec<u8>>,
    /// Audio packet cipher once paired
    pub packet_cipher: Option<PacketCipher>,
    /// UDP socket connected to the receiver's data port
    pub data_socket: Option<tokio::net::UdpSocket>,
    /// Receiver's control port from SETUP (sync packet destination)
    pub remote_control_port: u16,
    /// Receiver's event port from SETUP (unused, kept for teardown logs)
    pub events_port: u16,
    /// Our shared timing service port
    pub shared_timing_port: u16,
    /// Our shared control service port
    pub shared_control_port: u16,
    /// Master session counters at the last response (RECORD/FLUSH use
    /// these in `RTP-Info`)
    pub rtp_snapshot: (u16, u32),
    /// The player callback surface
    pub player: Arc<dyn Player>,
}

impl Session {
    /// Random ids every session needs. Returns
    /// `(session_id, session_uuid, client_instance, active_remote)`.
    #[must_use]
    pub fn make_ids() -> (u32, String, String, String) {
        let mut rng = rand::thread_rng();
        let session_id: u32 = rng.r#gen();
        let uuid = format!(
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            rng.r#gen::<u32>(),
            rng.r#gen::<u16>(),
            rng.r#gen::<u16>(),
            rng.r#gen::<u16>(),
            rng.r#gen::<u64>() & 0xFFFF_FFFF_FFFF
        );
        let instance = format!("{:016X}", rng.r#gen::<u64>());
        let remote = rng.r#gen::<u32>().to_string();
        (session_id, uuid, instance, remote)
    }

    /// Session URL for a local address: `rtsp://addr/<session_id>`,
    /// brackets around IPv6.
    #[must_use]
    pub fn make_url(local: IpAddr, session_id: u32) -> String {
        match local {
            IpAddr::V4(ip) => format!("rtsp://{ip}/{session_id}"),
            IpAddr::V6(ip) => format!("rtsp://[{ip}]/{session_id}"),
        }
    }

    /// Install both ciphers from the completed pairing context and enter
    /// the `Encrypted` state.
    ///
    /// # Errors
    /// Fails if the context has no secret or key material is unusable.
    pub fn cipher_setup(&mut self) -> Result<(), AirTunesError> {
        let secret = self
            .pair_ctx
            .as_ref()
            .and_then(PairContext::shared_secret)
            .ok_or_else(|| AirTunesError::Protocol("pairing finished without a secret".into()))?
            .to_vec();

        let channel = ChannelCipher::from_shared_secret(&secret)?;
        let packet_cipher = PacketCipher::new(&secret)?;
        self.conn.install_cipher(channel)?;

        debug!(
            device = %self.devname,
            secret_len = secret.len(),
            "ciphering set up, now in encrypted mode"
        );

        self.shared_secret = Some(secret);
        self.packet_cipher = Some(packet_cipher);
        self.pair_ctx = None;
        self.state = SessionState::Encrypted;
        Ok(())
    }

    /// Volume in `AirPlay` decibels for this session's volume scale.
    #[must_use]
    pub fn volume_db(&self) -> f32 {
        volume_to_db(self.volume, self.max_volume)
    }

    fn parse_info(&mut self, response: &RtspResponse) -> Result<(), AirTunesError> {
        if response.body.is_empty() {
            return Ok(());
        }
        let info = plist::decode(&response.body)?;
        if let Some(flags) = info.get("statusFlags").and_then(Value::as_u64) {
            self.statusflags = flags;
        }
        Ok(())
    }
}

/// Map a `0..=max` volume onto `AirPlay` decibels: `0` mutes with
/// `-144`, everything else lands linearly in `-30..0`.
#[must_use]
pub fn volume_to_db(volume: i32, max_volume: i32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    if volume <= 0 {
        -144.0
    } else {
        -30.0 + 30.0 * (volume.min(max_volume) as f32) / (max_volume as f32)
    }
}

/// Step response handlers. Each consumes the response, mutates the
/// session and picks the next move.
pub mod handlers {
    use super::*;
    use crate::engine::sequence::SeqNext;
    use crate::rtsp::StatusCode;

    /// `GET /info` during startup: route into the right pairing ceremony.
    pub fn info_start(s: &mut Session, r: &RtspResponse) -> SeqNext {
        if let Err(err) = s.parse_info(r) {
            warn!(device = %s.devname, "malformed /info response: {err}");
            return SeqNext::Abort;
        }

        let flags_demand_pin = s.statusflags
            & (status_flags::PIN_REQUIRED
                | status_flags::PASSWORD_REQUIRED
                | status_flags::ONE_TIME_PAIRING_REQUIRED)
            != 0;

        // A stored key short-circuits everything; transient is next in
        // line so receivers that actually demand a PIN can 470 us into
        // the PIN flow.
        if s.auth_key.is_some() {
            s.next_seq = Some(SeqKind::StartPlayback);
            return SeqNext::Chain(SeqKind::PairVerify);
        }
        if s.supports_pairing_transient {
            s.next_seq = Some(SeqKind::StartPlayback);
            return SeqNext::Chain(SeqKind::PairTransient);
        }

        if flags_demand_pin || s.requires_auth {
            info!(device = %s.devname, "device requires pairing, waiting for PIN");
        } else {
            info!(device = %s.devname, "device offers no supported pairing path");
        }
        s.state = SessionState::Auth;
        SeqNext::Abort
    }

    /// `GET /info` as a reachability probe.
    pub fn info_probe(s: &mut Session, r: &RtspResponse) -> SeqNext {
        if let Err(err) = s.parse_info(r) {
            warn!(device = %s.devname, "malformed /info response: {err}");
            return SeqNext::Abort;
        }
        let flags_demand_pin = s.statusflags
            & (status_flags::PIN_REQUIRED
                | status_flags::PASSWORD_REQUIRED
                | status_flags::ONE_TIME_PAIRING_REQUIRED)
            != 0;
        if (flags_demand_pin || s.requires_auth) && s.auth_key.is_none() {
            s.state = SessionState::Auth;
        }
        SeqNext::Continue
    }

    /// `SETUP` (session level): store the receiver's service ports.
    pub fn setup_session(s: &mut Session, r: &RtspResponse) -> SeqNext {
        if r.status == StatusCode::UNAUTHORIZED {
            warn!(device = %s.devname, "SETUP rejected with 401, credentials required");
            s.state = SessionState::Auth;
            return SeqNext::Abort;
        }
        if !r.is_success() {
            return SeqNext::Abort;
        }

        let Ok(body) = plist::decode(&r.body) else {
            warn!(device = %s.devname, "SETUP (session) response is not a plist");
            return SeqNext::Abort;
        };
        if let Some(port) = body.get("eventPort").and_then(Value::as_u64) {
            #[allow(clippy::cast_possible_truncation)]
            {
                s.events_port = port as u16;
            }
        }
        s.state = SessionState::Setup;
        SeqNext::Continue
    }

    /// `SETUP` (stream level): open the data socket towards the
    /// receiver's negotiated ports.
    pub fn setup_stream(s: &mut Session, r: &RtspResponse) -> SeqNext {
        let Ok(body) = plist::decode(&r.body) else {
            warn!(device = %s.devname, "SETUP (stream) response is not a plist");
            return SeqNext::Abort;
        };
        let Some(stream) = body
            .get("streams")
            .and_then(Value::as_array)
            .and_then(<[Value]>::first)
        else {
            warn!(device = %s.devname, "SETUP (stream) response has no streams");
            return SeqNext::Abort;
        };

        let Some(data_port) = stream.get("dataPort").and_then(Value::as_u64) else {
            warn!(device = %s.devname, "SETUP (stream) response has no dataPort");
            return SeqNext::Abort;
        };
        #[allow(clippy::cast_possible_truncation)]
        let data_port = data_port as u16;
        #[allow(clippy::cast_possible_truncation)]
        let control_port = stream
            .get("controlPort")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u16;

        match connect_udp(s.peer_ip, data_port) {
            Ok(socket) => s.data_socket = Some(socket),
            Err(err) => {
                warn!(device = %s.devname, "could not open data socket: {err}");
                return SeqNext::Abort;
            }
        }
        s.remote_control_port = control_port;
        debug!(
            device = %s.devname,
            data_port, control_port, "stream endpoints negotiated"
        );
        SeqNext::Continue
    }

    /// `RECORD` acked; streaming may begin.
    pub fn record(s: &mut Session, r: &RtspResponse) -> SeqNext {
        if let Some(latency) = r.header("Audio-Latency") {
            debug!(device = %s.devname, latency, "receiver reported audio latency");
        }
        s.state = SessionState::Record;
        SeqNext::Continue
    }

    /// `FLUSH` acked; back to connected.
    pub fn flush(s: &mut Session, _r: &RtspResponse) -> SeqNext {
        s.state = SessionState::Connected;
        SeqNext::Continue
    }

    /// `TEARDOWN` acked on a user stop.
    pub fn teardown(s: &mut Session, _r: &RtspResponse) -> SeqNext {
        s.state = SessionState::Stopped;
        SeqNext::Continue
    }

    /// `TEARDOWN` acked while failing; keep the failure state.
    pub fn teardown_failure(s: &mut Session, _r: &RtspResponse) -> SeqNext {
        if s.state != SessionState::Auth {
            s.state = SessionState::Failed;
        }
        SeqNext::Continue
    }

    /// `/pair-pin-start` acked; the receiver is showing a PIN now.
    pub fn pin_start(s: &mut Session, _r: &RtspResponse) -> SeqNext {
        info!(device = %s.devname, "receiver is displaying a PIN");
        s.state = SessionState::Auth;
        SeqNext::Continue
    }

    fn pair_read(s: &mut Session, r: &RtspResponse) -> Result<PairStatus, AirTunesError> {
        let ctx = s
            .pair_ctx
            .as_mut()
            .ok_or_else(|| AirTunesError::Protocol("no pairing in progress".into()))?;
        Ok(ctx.read_response(&r.body)?)
    }

    /// Intermediate pairing step: feed the response into the context.
    pub fn pair_step(s: &mut Session, r: &RtspResponse) -> SeqNext {
        match pair_read(s, r) {
            Ok(_) => SeqNext::Continue,
            Err(err) => {
                warn!(device = %s.devname, "pairing step failed: {err}");
                SeqNext::Abort
            }
        }
    }

    /// Final pairing step of verify/transient: install the ciphers.
    pub fn pair_finish(s: &mut Session, r: &RtspResponse) -> SeqNext {
        match pair_read(s, r) {
            Ok(PairStatus::Complete) => {}
            Ok(PairStatus::InProgress) => {
                warn!(device = %s.devname, "pairing ended while still in progress");
                return SeqNext::Abort;
            }
            Err(err) => {
                warn!(device = %s.devname, "pairing failed: {err}");
                return SeqNext::Abort;
            }
        }
        match s.cipher_setup() {
            Ok(()) => SeqNext::Continue,
            Err(err) => {
                warn!(device = %s.devname, "cipher setup failed: {err}");
                SeqNext::Abort
            }
        }
    }

    /// Final pair-setup step: persist the keys, then verify to get the
    /// session secret.
    pub fn pair_setup_finish(s: &mut Session, r: &RtspResponse) -> SeqNext {
        match pair_read(s, r) {
            Ok(PairStatus::Complete) => {}
            Ok(PairStatus::InProgress) | Err(_) => {
                warn!(device = %s.devname, "pair setup did not complete");
                return SeqNext::Abort;
            }
        }

        let auth_key = match s.pair_ctx.as_ref() {
            Some(PairContext::Setup(setup)) => setup.auth_key().map(str::to_string),
            _ => None,
        };
        let Some(auth_key) = auth_key else {
            warn!(device = %s.devname, "pair setup finished without a key");
            return SeqNext::Abort;
        };

        info!(device = %s.devname, "pairing established, persisting key");
        s.auth_key = Some(auth_key.clone());
        s.requires_auth = false;
        if let Some(mut device) = s.player.device_get(s.device_id) {
            device.auth_key = Some(auth_key);
            device.requires_auth = false;
            s.player.device_update(&device);
        }
        s.pair_ctx = None;

        // The setup ceremony authenticates; verify establishes the
        // session secret.
        SeqNext::Chain(SeqKind::PairVerify)
    }

    /// First pair-verify step; a rejection means our stored key is
    /// stale.
    pub fn pair_verify_first(s: &mut Session, r: &RtspResponse) -> SeqNext {
        if !r.is_success() {
            warn!(
                device = %s.devname,
                status = r.status.as_u16(),
                "pair verify rejected, clearing stored pairing keys"
            );
            s.auth_key = None;
            s.requires_auth = true;
            if let Some(mut device) = s.player.device_get(s.device_id) {
                device.auth_key = None;
                device.requires_auth = true;
                s.player.device_update(&device);
            }
            s.state = SessionState::Auth;
            return SeqNext::Abort;
        }
        pair_step(s, r)
    }

    /// First transient step; a 470 routes into the PIN flow.
    pub fn pair_transient_first(s: &mut Session, r: &RtspResponse) -> SeqNext {
        if r.status == StatusCode::AUTH_REQUIRED {
            info!(device = %s.devname, "transient pairing refused (470), requesting PIN");
            s.requires_auth = true;
            if let Some(mut device) = s.player.device_get(s.device_id) {
                device.requires_auth = true;
                s.player.device_update(&device);
            }
            return SeqNext::Chain(SeqKind::PinStart);
        }
        if !r.is_success() {
            return SeqNext::Abort;
        }
        pair_step(s, r)
    }

    fn connect_udp(peer: IpAddr, port: u16) -> std::io::Result<tokio::net::UdpSocket> {
        let bind_addr = if peer.is_ipv6() {
            std::net::SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
        } else {
            std::net::SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 0))
        };
        let socket = std::net::UdpSocket::bind(bind_addr)?;
        socket.connect((peer, port))?;
        socket.set_nonblocking(true)?;
        tokio::net::UdpSocket::from_std(socket)
    }
}

/// Step payload builders.
pub mod payloads {
    use super::*;
    use crate::engine::sequence::{SeqArg, StepPayload};
    use crate::rtp::SAMPLES_PER_PACKET;

    /// Session-level `SETUP` body.
    pub fn setup_session(s: &mut Session, _arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let body = plist::dict(vec![
            ("deviceID", Value::from(s.client_id.as_str())),
            ("sessionUUID", Value::from(s.session_uuid.as_str())),
            ("timingProtocol", Value::from("NTP")),
            ("timingPort", Value::Integer(i64::from(s.shared_timing_port))),
        ]);
        Ok(StepPayload::body(plist::encode(&body)?))
    }

    /// `SETPEERS` body: the receiver's address and ours.
    pub fn setpeers(s: &mut Session, _arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let local = s.conn.local_addr().ip();
        let body = Value::Array(vec![
            Value::String(s.peer_ip.to_string()),
            Value::String(local.to_string()),
        ]);
        Ok(StepPayload::body(plist::encode(&body)?))
    }

    /// Stream-level `SETUP` body.
    pub fn setup_stream(s: &mut Session, _arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let secret = s
            .shared_secret
            .as_ref()
            .ok_or_else(|| AirTunesError::Protocol("SETUP (stream) before pairing".into()))?;
        let audio_key = secret[..crate::rtp::AUDIO_KEY_LEN.min(secret.len())].to_vec();

        let stream = plist::dict(vec![
            ("type", Value::Integer(96)),
            ("ct", Value::Integer(2)),
            ("spf", Value::Integer(i64::from(SAMPLES_PER_PACKET))),
            ("shk", Value::Data(audio_key)),
            (
                "controlPort",
                Value::Integer(i64::from(s.shared_control_port)),
            ),
            ("latencyMin", Value::Integer(11025)),
            ("latencyMax", Value::Integer(88200)),
        ]);
        let body = plist::dict(vec![("streams", Value::Array(vec![stream]))]);
        Ok(StepPayload::body(plist::encode(&body)?))
    }

    /// `RECORD` carries the stream origin in `RTP-Info`.
    pub fn record(s: &mut Session, _arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let (seq, rtptime) = s.rtp_snapshot;
        let mut payload = StepPayload::empty();
        payload.headers.push(("Range".into(), "npt=0-".into()));
        payload
            .headers
            .push(("RTP-Info".into(), format!("seq={seq};rtptime={rtptime}")));
        Ok(payload)
    }

    /// `FLUSH` names the point to flush up to.
    pub fn flush(s: &mut Session, _arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let (seq, rtptime) = s.rtp_snapshot;
        let mut payload = StepPayload::empty();
        payload
            .headers
            .push(("RTP-Info".into(), format!("seq={seq};rtptime={rtptime}")));
        Ok(payload)
    }

    /// Volume body, from the session's current volume.
    pub fn volume(s: &mut Session, _arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let db = s.volume_db();
        Ok(StepPayload::body(
            format!("volume: {db:.6}\r\n").into_bytes(),
        ))
    }

    /// DMAP track text body.
    pub fn text(_s: &mut Session, arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let SeqArg::Text(track) = arg else {
            return Err(AirTunesError::Protocol("SEND_TEXT without metadata".into()));
        };
        Ok(StepPayload::body(crate::dmap::encode_track(track)))
    }

    /// Progress body.
    pub fn progress(_s: &mut Session, arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let SeqArg::Progress(progress) = arg else {
            return Err(AirTunesError::Protocol(
                "SEND_PROGRESS without progress".into(),
            ));
        };
        Ok(StepPayload::body(progress.to_body().into_bytes()))
    }

    /// Artwork body; the content type rides on the payload.
    pub fn artwork(_s: &mut Session, arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let SeqArg::Artwork(artwork) = arg else {
            return Err(AirTunesError::Protocol(
                "SEND_ARTWORK without artwork".into(),
            ));
        };
        Ok(StepPayload {
            body: artwork.data.clone(),
            content_type: Some(artwork.format.mime_type().to_string()),
            headers: Vec::new(),
        })
    }

    /// First pair-setup request: build the context from the PIN.
    pub fn pair_setup_start(s: &mut Session, arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let SeqArg::Pin(pin) = arg else {
            return Err(AirTunesError::Protocol("pair setup without a PIN".into()));
        };
        let mut ctx = PairContext::Setup(PairSetup::new(pin, &s.client_id));
        let body = ctx.make_request()?;
        s.pair_ctx = Some(ctx);
        Ok(StepPayload::body(body))
    }

    /// First transient request.
    pub fn pair_transient_start(
        s: &mut Session,
        _arg: &SeqArg,
    ) -> Result<StepPayload, AirTunesError> {
        let mut ctx = PairContext::Transient(TransientPair::new());
        let body = ctx.make_request()?;
        s.pair_ctx = Some(ctx);
        Ok(StepPayload::body(body))
    }

    /// First pair-verify request: build the context from the stored key.
    pub fn pair_verify_start(s: &mut Session, _arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let auth_key = s
            .auth_key
            .as_ref()
            .ok_or_else(|| AirTunesError::Protocol("pair verify without a stored key".into()))?;
        let mut ctx = PairContext::Verify(PairVerify::new(auth_key, &s.client_id)?);
        let body = ctx.make_request()?;
        s.pair_ctx = Some(ctx);
        Ok(StepPayload::body(body))
    }

    /// Any follow-up pairing request.
    pub fn pair_next(s: &mut Session, _arg: &SeqArg) -> Result<StepPayload, AirTunesError> {
        let ctx = s
            .pair_ctx
            .as_mut()
            .ok_or_else(|| AirTunesError::Protocol("no pairing in progress".into()))?;
        Ok(StepPayload::body(ctx.make_request()?))
    }
}
