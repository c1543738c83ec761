//! The session engine: one task owning every session, master session and
//! the shared services.
//!
//! The engine is an actor. Player calls, RTSP responses, retransmit
//! requests, keep-alive ticks and deferred failures all arrive as events
//! on its queue, so session state never needs a lock — the same shape as
//! running everything on one event loop.

pub mod master;
pub mod sequence;
pub mod session;


pub use master::{AlacFrameEncoder, FrameEncoder, MasterSession};
pub use sequence::{SeqArg, SeqKind};
pub use session::{Session, SessionState};

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::AirTunesError;
use crate::rtsp::{RtspConnection, RtspEvent, RtspRequest};
use crate::services::{ControlService, NtpTime, RetransmitRequest, TimingService};
use crate::types::{Artwork, AudioQuality, Device, DeviceState, MetadataMask, Progress, TrackMetadata};

use sequence::{OnError, OnSuccess, SeqNext, SequenceCtx, StepPayload, descriptor, public_state};

/// Callback surface the engine drives. The player owns the device
/// registry and the audio pipeline; the engine only keeps device ids.
pub trait Player: Send + Sync {
    /// A state change for `device_id`. `callback_id` is the id the
    /// triggering operation was called with, `-1` when the change was
    /// spontaneous. Delivered exactly once per callback id.
    fn outputs_cb(&self, callback_id: i32, device_id: u64, state: DeviceState);

    /// Fetch a device record.
    fn device_get(&self, device_id: u64) -> Option<Device>;

    /// Persist changed device fields (`auth_key`, `requires_auth`,
    /// `v6_disabled`, volume).
    fn device_update(&self, device: &Device);

    /// A session now exists for this device.
    fn device_session_add(&self, device_id: u64);

    /// The session for this device is gone.
    fn device_session_remove(&self, device_id: u64);

    /// The engine needs PCM in this quality. `false` refuses the
    /// quality and fails the session being set up.
    fn quality_subscribe(&self, quality: AudioQuality) -> bool;

    /// No session needs this quality anymore.
    fn quality_unsubscribe(&self, quality: AudioQuality);
}

/// Factory for the frame encoder seam, overridable for tests.
pub type EncoderFactory =
    Arc<dyn Fn(AudioQuality) -> Result<Box<dyn FrameEncoder>, AirTunesError> + Send + Sync>;

/// Engine construction parameters.
#[derive(Clone)]
pub struct EngineConfig {
    /// Our 64-bit device id (the low 48 bits become the MAC-style
    /// pairing id)
    pub device_id: u64,
    /// Volume scale maximum (volumes are `0..=max_volume`)
    pub max_volume: i32,
    /// Seconds of audio the receiver is told to buffer
    pub output_buffer_seconds: u32,
    /// Per-request RTSP timeout
    pub request_timeout: Duration,
    /// Keep-alive cadence (idle receivers drop us without it)
    pub keep_alive_interval: Duration,
    /// Frame encoder factory
    pub encoder_factory: EncoderFactory,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_id: rand::thread_rng().r#gen(),
            max_volume: 11,
            output_buffer_seconds: 2,
            request_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(25),
            encoder_factory: Arc::new(|quality| {
                Ok(Box::new(AlacFrameEncoder::new(quality)?) as Box<dyn FrameEncoder>)
            }),
        }
    }
}

#[derive(Debug, Clone)]
enum Launch {
    Start,
    Probe,
    PinStart,
    Authorize(String),
}

enum Command {
    DeviceStart {
        device_id: u64,
        callback_id: i32,
        launch: Launch,
    },
    ConnectFinished {
        device_id: u64,
        callback_id: i32,
        launch: Launch,
        conn: Option<(RtspConnection, bool)>,
    },
    DeviceStop {
        device_id: u64,
        callback_id: i32,
    },
    Flush {
        device_id: u64,
        callback_id: i32,
    },
    SetVolume {
        device_id: u64,
        volume: i32,
        callback_id: i32,
    },
    SendText {
        device_id: u64,
        metadata: TrackMetadata,
    },
    SendProgress {
        device_id: u64,
        progress: Progress,
    },
    SendArtwork {
        device_id: u64,
        artwork: Artwork,
    },
    Write {
        quality: AudioQuality,
        pcm: Bytes,
    },
    DeferredFailure {
        device_id: u64,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running engine. Operations enqueue onto the engine task;
/// results come back through [`Player::outputs_cb`].
pub struct AirTunesEngine {
    cmd_tx: mpsc::UnboundedSender<Command>,
    timing_port: u16,
    control_port: u16,
}

impl AirTunesEngine {
    /// Start the shared services and the engine task.
    ///
    /// # Errors
    /// Fails when the sequence tables are misaligned (a build bug) or a
    /// service socket cannot be bound.
    pub async fn start(
        player: Arc<dyn Player>,
        config: EngineConfig,
    ) -> Result<Self, AirTunesError> {
        sequence::check_alignment()?;

        let timing = TimingService::start().await?;
        let (ctrl_tx, ctrl_rx) = mpsc::channel(64);
        let control = ControlService::start(ctrl_tx).await?;

        let timing_port = timing.port();
        let control_port = control.port();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (rtsp_tx, rtsp_rx) = mpsc::channel(64);

        let client_id = mac_style_id(config.device_id);
        info!(client_id, timing_port, control_port, "engine starting");

        let engine = Engine {
            player,
            config,
            client_id,
            sessions: HashMap::new(),
            masters: Vec::new(),
            timing,
            control,
            rtsp_tx,
            cmd_tx: cmd_tx.clone(),
            conn_seq: 0,
        };
        tokio::spawn(engine.run(cmd_rx, rtsp_rx, ctrl_rx));

        Ok(Self {
            cmd_tx,
            timing_port,
            control_port,
        })
    }

    /// Start a session towards a device.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn device_start(&self, device_id: u64, callback_id: i32) -> Result<(), AirTunesError> {
        self.send(Command::DeviceStart {
            device_id,
            callback_id,
            launch: Launch::Start,
        })
    }

    /// Probe a device's reachability.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn device_probe(&self, device_id: u64, callback_id: i32) -> Result<(), AirTunesError> {
        self.send(Command::DeviceStart {
            device_id,
            callback_id,
            launch: Launch::Probe,
        })
    }

    /// Ask the receiver to display a pairing PIN.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn pin_start(&self, device_id: u64, callback_id: i32) -> Result<(), AirTunesError> {
        self.send(Command::DeviceStart {
            device_id,
            callback_id,
            launch: Launch::PinStart,
        })
    }

    /// Run PIN pairing and, on success, continue into playback.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn authorize(
        &self,
        device_id: u64,
        pin: &str,
        callback_id: i32,
    ) -> Result<(), AirTunesError> {
        self.send(Command::DeviceStart {
            device_id,
            callback_id,
            launch: Launch::Authorize(pin.to_string()),
        })
    }

    /// Stop the session for a device. Idempotent: without a session the
    /// callback still fires once with `Stopped`.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn device_stop(&self, device_id: u64, callback_id: i32) -> Result<(), AirTunesError> {
        self.send(Command::DeviceStop {
            device_id,
            callback_id,
        })
    }

    /// Flush buffered audio; the session returns to `Connected`.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn flush(&self, device_id: u64, callback_id: i32) -> Result<(), AirTunesError> {
        self.send(Command::Flush {
            device_id,
            callback_id,
        })
    }

    /// Set the volume (`0..=max_volume`).
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn set_volume(
        &self,
        device_id: u64,
        volume: i32,
        callback_id: i32,
    ) -> Result<(), AirTunesError> {
        self.send(Command::SetVolume {
            device_id,
            volume,
            callback_id,
        })
    }

    /// Push now-playing text (sent only if the receiver asked for it).
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn send_text(&self, device_id: u64, metadata: TrackMetadata) -> Result<(), AirTunesError> {
        self.send(Command::SendText {
            device_id,
            metadata,
        })
    }

    /// Push playback progress.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn send_progress(&self, device_id: u64, progress: Progress) -> Result<(), AirTunesError> {
        self.send(Command::SendProgress {
            device_id,
            progress,
        })
    }

    /// Push cover art.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn send_artwork(&self, device_id: u64, artwork: Artwork) -> Result<(), AirTunesError> {
        self.send(Command::SendArtwork {
            device_id,
            artwork,
        })
    }

    /// Push PCM for every session streaming this quality. Synchronous:
    /// the bytes are queued and the call returns.
    ///
    /// # Errors
    /// Fails if the engine task is gone.
    pub fn write(&self, quality: AudioQuality, pcm: Bytes) -> Result<(), AirTunesError> {
        self.send(Command::Write { quality, pcm })
    }

    /// The shared timing service port.
    #[must_use]
    pub fn timing_port(&self) -> u16 {
        self.timing_port
    }

    /// The shared control service port.
    #[must_use]
    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    /// Stop the engine: sessions drop, services stop.
    ///
    /// # Errors
    /// Fails if the engine task is already gone.
    pub async fn shutdown(&self) -> Result<(), AirTunesError> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Shutdown { ack })?;
        done.await.map_err(|_| AirTunesError::EngineGone)
    }

    fn send(&self, command: Command) -> Result<(), AirTunesError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| AirTunesError::EngineGone)
    }
}

/// MAC-style id string from the low 48 bits of the device id.
fn mac_style_id(device_id: u64) -> String {
    let b = device_id.to_be_bytes();
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        b[2], b[3], b[4], b[5], b[6], b[7]
    )
}

/// Address equality that sees through v4-mapped-v6.
fn ip_equal(a: IpAddr, b: IpAddr) -> bool {
    canonical_ip(a) == canonical_ip(b)
}

fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

struct Engine {
    player: Arc<dyn Player>,
    config: EngineConfig,
    client_id: String,
    sessions: HashMap<u64, Session>,
    masters: Vec<MasterSession>,
    timing: TimingService,
    control: ControlService,
    rtsp_tx: mpsc::Sender<RtspEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Generation counter for connection tokens; a stale event from a
    /// torn-down connection can never hit a successor session.
    conn_seq: u64,
}

impl Engine {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut rtsp_rx: mpsc::Receiver<RtspEvent>,
        mut ctrl_rx: mpsc::Receiver<RetransmitRequest>,
    ) {
        let mut keep_alive = tokio::time::interval(self.config.keep_alive_interval);
        keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; swallow it.
        keep_alive.tick().await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown { ack }) => {
                        self.shutdown();
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = rtsp_rx.recv() => self.handle_rtsp_event(event),
                Some(request) = ctrl_rx.recv() => self.handle_retransmit(&request),
                _ = keep_alive.tick() => self.keep_alive_tick(),
            }
        }
    }

    fn shutdown(&mut self) {
        let ids: Vec<u64> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(session) = self.sessions.remove(&id) {
                self.session_cleanup(session);
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::DeviceStart {
                device_id,
                callback_id,
                launch,
            } => self.start_device(device_id, callback_id, launch),
            Command::ConnectFinished {
                device_id,
                callback_id,
                launch,
                conn,
            } => self.connect_finished(device_id, callback_id, launch, conn),
            Command::DeviceStop {
                device_id,
                callback_id,
            } => self.device_stop(device_id, callback_id),
            Command::Flush {
                device_id,
                callback_id,
            } => self.device_flush(device_id, callback_id),
            Command::SetVolume {
                device_id,
                volume,
                callback_id,
            } => self.set_volume(device_id, volume, callback_id),
            Command::SendText {
                device_id,
                metadata,
            } => self.side_channel(
                device_id,
                SeqKind::SendText,
                SeqArg::Text(metadata),
                MetadataMask::TEXT,
            ),
            Command::SendProgress {
                device_id,
                progress,
            } => self.side_channel(
                device_id,
                SeqKind::SendProgress,
                SeqArg::Progress(progress),
                MetadataMask::PROGRESS,
            ),
            Command::SendArtwork {
                device_id,
                artwork,
            } => self.side_channel(
                device_id,
                SeqKind::SendArtwork,
                SeqArg::Artwork(artwork),
                MetadataMask::ARTWORK,
            ),
            Command::Write { quality, pcm } => self.write_audio(quality, &pcm),
            Command::DeferredFailure { device_id } => {
                if let Some(session) = self.sessions.remove(&device_id) {
                    debug!(device = %session.devname, "cleaning up failed session (deferred)");
                    self.session_failure(session);
                }
            }
            Command::Shutdown { .. } => unreachable!("handled in run()"),
        }
    }

    // ------------------------------------------------------ startup

    fn start_device(&mut self, device_id: u64, callback_id: i32, launch: Launch) {
        if self.sessions.contains_key(&device_id) {
            warn!(device_id, "device already has a session");
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Failed);
            return;
        }
        let Some(device) = self.player.device_get(device_id) else {
            warn!(device_id, "start for unknown device");
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Failed);
            return;
        };

        let v6 = device.endpoint(true);
        let v4 = device.endpoint(false);
        if v6.is_none() && v4.is_none() {
            warn!(device = %device.name, "device has no usable address");
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Failed);
            return;
        }

        self.conn_seq += 1;
        let token = self.conn_seq;
        let rtsp_tx = self.rtsp_tx.clone();
        let cmd_tx = self.cmd_tx.clone();
        let timeout = self.config.request_timeout;
        tokio::spawn(async move {
            let mut conn = None;
            if let Some(addr) = v6 {
                match RtspConnection::connect(addr, token, rtsp_tx.clone(), timeout).await {
                    Ok(c) => conn = Some((c, true)),
                    Err(err) => debug!(device_id, "ipv6 connect failed: {err}"),
                }
            }
            if conn.is_none() {
                if let Some(addr) = v4 {
                    match RtspConnection::connect(addr, token, rtsp_tx, timeout).await {
                        Ok(c) => conn = Some((c, false)),
                        Err(err) => debug!(device_id, "ipv4 connect failed: {err}"),
                    }
                }
            }
            let _ = cmd_tx.send(Command::ConnectFinished {
                device_id,
                callback_id,
                launch,
                conn,
            });
        });
    }

    fn connect_finished(
        &mut self,
        device_id: u64,
        callback_id: i32,
        launch: Launch,
        conn: Option<(RtspConnection, bool)>,
    ) {
        let Some((conn, family_v6)) = conn else {
            warn!(device_id, "could not connect to device");
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Failed);
            return;
        };
        if self.sessions.contains_key(&device_id) {
            warn!(device_id, "session appeared while connecting, dropping attempt");
            return;
        }
        let Some(device) = self.player.device_get(device_id) else {
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Failed);
            return;
        };

        if let Err(err) = self.master_acquire(device.quality) {
            warn!(device = %device.name, "no master session: {err}");
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Failed);
            return;
        }

        let (session_id, session_uuid, client_instance, active_remote) = Session::make_ids();
        let session_url = Session::make_url(conn.local_addr().ip(), session_id);
        let peer_ip = conn.peer_addr().ip();

        // Only a real start enters the startup phase; probe, PIN and
        // authorize sessions report `Stopped` when they succeed.
        let initial_state = if matches!(launch, Launch::Start) {
            SessionState::Info
        } else {
            SessionState::Stopped
        };

        let mut session = Session {
            device_id,
            callback_id,
            devname: device.name.clone(),
            state: initial_state,
            next_seq: None,
            seq: None,
            reqs_in_flight: 0,
            stale_responses: 0,
            conn,
            family_v6,
            peer_ip,
            quality: device.quality,
            volume: device.volume,
            max_volume: self.config.max_volume,
            auth_key: device.auth_key.clone(),
            requires_auth: device.requires_auth,
            supports_pairing_transient: device.supports_pairing_transient,
            wanted_metadata: device.wanted_metadata,
            statusflags: 0,
            session_id,
            session_url,
            session_uuid,
            client_id: self.client_id.clone(),
            client_instance,
            active_remote,
            pair_ctx: None,
            shared_secret: None,
            packet_cipher: None,
            data_socket: None,
            remote_control_port: 0,
            events_port: 0,
            shared_timing_port: self.timing.port(),
            shared_control_port: self.control.port(),
            rtp_snapshot: (0, 0),
            player: Arc::clone(&self.player),
        };

        self.player.device_session_add(device_id);

        let (kind, arg) = match launch {
            Launch::Start => (SeqKind::Start, SeqArg::None),
            Launch::Probe => (SeqKind::Probe, SeqArg::None),
            Launch::PinStart => (SeqKind::PinStart, SeqArg::None),
            Launch::Authorize(pin) => {
                session.next_seq = Some(SeqKind::StartPlayback);
                (SeqKind::PairSetup, SeqArg::Pin(pin))
            }
        };
        self.sequence_begin(session, kind, arg, "device_start");
    }

    fn master_acquire(&mut self, quality: AudioQuality) -> Result<(), AirTunesError> {
        if self.masters.iter().any(|m| m.quality == quality) {
            return Ok(());
        }
        if !self.player.quality_subscribe(quality) {
            return Err(AirTunesError::QualityUnsupported(quality));
        }
        let encoder = match (self.config.encoder_factory)(quality) {
            Ok(encoder) => encoder,
            Err(err) => {
                self.player.quality_unsubscribe(quality);
                return Err(err);
            }
        };
        let output_buffer_samples = self.config.output_buffer_seconds * quality.sample_rate;
        self.masters.push(MasterSession::with_encoder(
            quality,
            output_buffer_samples,
            encoder,
        ));
        Ok(())
    }

    // ---------------------------------------------------- operations

    fn device_stop(&mut self, device_id: u64, callback_id: i32) {
        let Some(mut session) = self.sessions.remove(&device_id) else {
            // Idempotent: still exactly one callback.
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Stopped);
            return;
        };
        session.callback_id = callback_id;
        if session.seq.is_some() {
            debug!(device = %session.devname, "stop cancels the running sequence");
            session.seq = None;
            // A response may still be owed to the cancelled step; it
            // must not be taken for the TEARDOWN's answer.
            session.stale_responses += session.reqs_in_flight;
        }
        if session.state.is_connected_phase() {
            session.state = SessionState::Teardown;
        }
        self.sequence_begin(session, SeqKind::Stop, SeqArg::None, "device_stop");
    }

    fn device_flush(&mut self, device_id: u64, callback_id: i32) {
        let Some(mut session) = self.sessions.remove(&device_id) else {
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Stopped);
            return;
        };
        session.callback_id = callback_id;
        if session.state != SessionState::Streaming || session.seq.is_some() {
            self.session_status(&mut session);
            self.sessions.insert(device_id, session);
            return;
        }
        self.sequence_begin(session, SeqKind::Flush, SeqArg::None, "flush");
    }

    fn set_volume(&mut self, device_id: u64, volume: i32, callback_id: i32) {
        let Some(mut session) = self.sessions.remove(&device_id) else {
            self.player
                .outputs_cb(callback_id, device_id, DeviceState::Failed);
            return;
        };
        session.volume = volume.clamp(0, self.config.max_volume);
        session.callback_id = callback_id;

        if session.state.is_connected_phase() && session.seq.is_none() {
            self.sequence_begin(session, SeqKind::SendVolume, SeqArg::None, "set_volume");
        } else {
            // Volume is applied by the startup chain's last step; ack
            // with the current state.
            self.session_status(&mut session);
            self.sessions.insert(device_id, session);
        }
    }

    fn side_channel(&mut self, device_id: u64, kind: SeqKind, arg: SeqArg, want: MetadataMask) {
        let Some(session) = self.sessions.remove(&device_id) else {
            return;
        };
        if !session.state.is_connected_phase() {
            debug!(device = %session.devname, ?kind, "not connected, dropping side channel send");
            self.sessions.insert(device_id, session);
            return;
        }
        if !session.wanted_metadata.wants(want) {
            debug!(device = %session.devname, ?kind, "receiver does not want this metadata");
            self.sessions.insert(device_id, session);
            return;
        }
        if session.seq.is_some() {
            debug!(device = %session.devname, ?kind, "sequence busy, dropping side channel send");
            self.sessions.insert(device_id, session);
            return;
        }
        self.sequence_begin(session, kind, arg, "side_channel");
    }

    fn keep_alive_tick(&mut self) {
        // tvOS 10-era Apple TVs and HomePods drop idle sessions; a
        // periodic feedback request keeps them listening.
        let due: Vec<u64> = self
            .sessions
            .values()
            .filter(|s| s.state.is_connected_phase() && s.seq.is_none())
            .map(|s| s.device_id)
            .collect();
        for device_id in due {
            if let Some(session) = self.sessions.remove(&device_id) {
                self.sequence_begin(session, SeqKind::Feedback, SeqArg::None, "keep_alive");
            }
        }
    }

    // ---------------------------------------------------- audio path

    fn write_audio(&mut self, quality: AudioQuality, pcm: &[u8]) {
        let Some(master) = self.masters.iter_mut().find(|m| m.quality == quality) else {
            debug!(%quality, "audio write without a master session");
            return;
        };

        let packets = match master.write(pcm) {
            Ok(packets) => packets,
            Err(err) => {
                warn!(%quality, "audio encode failed: {err}");
                return;
            }
        };
        if packets.is_empty() {
            return;
        }

        let headers: Vec<[u8; 12]> = packets.iter().map(|p| master.rtp.header_for(p)).collect();
        let sync = master
            .sync_due(packets.len())
            .then(|| master.rtp.make_sync_packet(NtpTime::now().0, master.output_buffer_samples));

        let control_socket = self.control.socket();
        for session in self
            .sessions
            .values_mut()
            .filter(|s| s.quality == quality && s.state.is_connected_phase())
        {
            if session.state == SessionState::Connected {
                session.state = SessionState::Streaming;
            }
            if session.state != SessionState::Streaming {
                continue;
            }
            let (Some(cipher), Some(socket)) =
                (session.packet_cipher.as_mut(), session.data_socket.as_ref())
            else {
                continue;
            };

            for (packet, header) in packets.iter().zip(&headers) {
                match cipher.seal_packet(header, &packet.payload) {
                    Ok(wire) => {
                        if let Err(err) = socket.try_send(&wire) {
                            debug!(device = %session.devname, "audio send failed: {err}");
                        }
                    }
                    Err(err) => warn!(device = %session.devname, "packet seal failed: {err}"),
                }
            }

            if let Some(sync_packet) = &sync {
                if session.remote_control_port != 0 {
                    let dest = SocketAddr::new(session.peer_ip, session.remote_control_port);
                    let _ = control_socket.try_send_to(sync_packet, dest);
                }
            }
        }
    }

    fn handle_retransmit(&mut self, request: &RetransmitRequest) {
        let peer_ip = request.peer.ip();
        let Some((device_id, quality)) = self
            .sessions
            .values()
            .find(|s| ip_equal(s.peer_ip, peer_ip))
            .map(|s| (s.device_id, s.quality))
        else {
            warn!(peer = %request.peer, "control request from unknown peer");
            return;
        };

        let Some(master) = self.masters.iter().find(|m| m.quality == quality) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&device_id) else {
            return;
        };
        let (Some(cipher), Some(socket)) =
            (session.packet_cipher.as_mut(), session.data_socket.as_ref())
        else {
            return;
        };

        let mut found = 0u16;
        for packet in master.rtp.ring().range(request.seq_start, request.seq_len) {
            found += 1;
            let header = master.rtp.header_for(packet);
            match cipher.seal_packet(&header, &packet.payload) {
                Ok(wire) => {
                    if let Err(err) = socket.try_send(&wire) {
                        debug!(device = %session.devname, "retransmit send failed: {err}");
                    }
                }
                Err(err) => warn!(device = %session.devname, "retransmit seal failed: {err}"),
            }
        }
        if found < request.seq_len {
            warn!(
                device = %session.devname,
                seq_start = request.seq_start,
                requested = request.seq_len,
                found,
                "retransmit request partly outside the ring"
            );
        }
    }

    // ------------------------------------------------- the sequencer

    fn sequence_begin(&mut self, mut session: Session, kind: SeqKind, arg: SeqArg, caller: &str) {
        debug!(device = %session.devname, ?kind, caller, "sequence start");
        session.seq = Some(SequenceCtx { kind, step: 0, arg });
        self.refresh_snapshot(&mut session);
        match self.send_current_step(&mut session) {
            Ok(()) => {
                self.sessions.insert(session.device_id, session);
            }
            Err(err) => {
                warn!(device = %session.devname, ?kind, "could not send request: {err}");
                self.sequence_error(session, kind);
            }
        }
    }

    fn send_current_step(&self, session: &mut Session) -> Result<(), AirTunesError> {
        let (kind, step_index, arg) = {
            let ctx = session
                .seq
                .as_ref()
                .ok_or_else(|| AirTunesError::Protocol("no sequence to advance".into()))?;
            (ctx.kind, ctx.step, ctx.arg.clone())
        };
        let step = &descriptor(kind).steps[step_index];

        let payload = match step.payload {
            Some(build) => build(session, &arg)?,
            None => StepPayload::empty(),
        };

        let uri = step
            .uri
            .map_or_else(|| session.session_url.clone(), str::to_string);
        let mut request = RtspRequest::new(step.method, uri)
            .header("User-Agent", session::USER_AGENT)
            .header("Client-Instance", session.client_instance.clone())
            .header("DACP-ID", session.client_instance.clone())
            .header("Active-Remote", session.active_remote.clone());

        for (name, value) in payload.headers {
            request = request.header(name, value);
        }
        let content_type = payload
            .content_type
            .or_else(|| step.content_type.map(str::to_string));
        match content_type {
            Some(ct) if payload.body.is_empty() => {
                request = request.header("Content-Type", ct);
            }
            Some(ct) => {
                request = request.body(&ct, payload.body);
            }
            None => {
                request.body = payload.body;
            }
        }

        session.conn.send_request(request)?;
        session.reqs_in_flight += 1;
        debug!(device = %session.devname, step = step.name, "request sent");
        Ok(())
    }

    fn handle_rtsp_event(&mut self, event: RtspEvent) {
        match event {
            RtspEvent::Response { token, response } => self.handle_response(token, response),
            RtspEvent::Closed { token } => self.handle_closed(token),
        }
    }

    /// Resolve a connection token to the session that owns it. A miss
    /// means the event outlived its connection.
    fn session_by_token(&self, token: u64) -> Option<u64> {
        self.sessions
            .values()
            .find(|s| s.conn.token() == token)
            .map(|s| s.device_id)
    }

    fn handle_closed(&mut self, token: u64) {
        let Some(device_id) = self.session_by_token(token) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&device_id) else {
            return;
        };
        warn!(device = %session.devname, "device closed RTSP connection");
        if session.reqs_in_flight > 0 {
            // The in-flight request will surface the failure itself.
            return;
        }
        if session.state != SessionState::Auth {
            session.state = SessionState::Failed;
        }
        let _ = self.cmd_tx.send(Command::DeferredFailure { device_id });
    }

    fn handle_response(&mut self, token: u64, response: Option<crate::rtsp::RtspResponse>) {
        let Some(device_id) = self.session_by_token(token) else {
            debug!(token, "response for a session that is gone");
            return;
        };
        let Some(mut session) = self.sessions.remove(&device_id) else {
            return;
        };
        session.reqs_in_flight = session.reqs_in_flight.saturating_sub(1);

        if session.stale_responses > 0 {
            session.stale_responses -= 1;
            debug!(device = %session.devname, "dropping response to a cancelled step");
            self.sessions.insert(device_id, session);
            return;
        }

        let Some(ctx) = session.seq.as_ref() else {
            // The sequence was cancelled (stop during startup); the
            // response is stale.
            debug!(device = %session.devname, "response without a running sequence");
            self.sessions.insert(device_id, session);
            return;
        };
        let kind = ctx.kind;
        let step = &descriptor(kind).steps[ctx.step];

        let next = match response {
            None => {
                warn!(device = %session.devname, step = step.name, "no response (transport failure)");
                SeqNext::Abort
            }
            Some(response) => {
                if !response.is_success() && !step.proceed_on_rtsp_not_ok {
                    warn!(
                        device = %session.devname,
                        step = step.name,
                        status = response.status.as_u16(),
                        "request failed"
                    );
                    SeqNext::Abort
                } else {
                    self.refresh_snapshot(&mut session);
                    match step.handler {
                        Some(handle) => handle(&mut session, &response),
                        None => SeqNext::Continue,
                    }
                }
            }
        };

        match next {
            SeqNext::Abort => self.sequence_error(session, kind),
            SeqNext::Continue => {
                let Some(ctx) = session.seq.as_mut() else {
                    self.sessions.insert(device_id, session);
                    return;
                };
                ctx.step += 1;
                if ctx.step < descriptor(kind).steps.len() {
                    match self.send_current_step(&mut session) {
                        Ok(()) => {
                            self.sessions.insert(device_id, session);
                        }
                        Err(err) => {
                            warn!(device = %session.devname, "could not send next request: {err}");
                            self.sequence_error(session, kind);
                        }
                    }
                } else {
                    self.sequence_success(session, kind);
                }
            }
            SeqNext::Chain(next_kind) => {
                session.seq = None;
                self.sequence_begin(session, next_kind, SeqArg::None, "chain");
            }
        }
    }

    fn sequence_success(&mut self, mut session: Session, kind: SeqKind) {
        session.seq = None;
        match descriptor(kind).on_success {
            OnSuccess::Nothing => {
                self.sessions.insert(session.device_id, session);
            }
            OnSuccess::Connected => {
                session.state = SessionState::Connected;
                self.session_status(&mut session);
                self.sessions.insert(session.device_id, session);
            }
            OnSuccess::Status => {
                if kind == SeqKind::Flush {
                    if let Some(master) =
                        self.masters.iter_mut().find(|m| m.quality == session.quality)
                    {
                        master.flush();
                    }
                }
                self.session_status(&mut session);
                self.sessions.insert(session.device_id, session);
            }
            OnSuccess::SuccessAndCleanup => {
                self.session_status(&mut session);
                self.session_cleanup(session);
            }
            OnSuccess::PairSuccess => match session.next_seq.take() {
                Some(next) => self.sequence_begin(session, next, SeqArg::None, "pair_success"),
                None => {
                    self.session_status(&mut session);
                    self.session_cleanup(session);
                }
            },
        }
    }

    fn sequence_error(&mut self, mut session: Session, kind: SeqKind) {
        session.seq = None;
        session.pair_ctx = None;
        match descriptor(kind).on_error {
            OnError::Failure => self.session_failure(session),
            OnError::StartRetry => self.start_retry(session),
            OnError::StartFailure => self.start_failure(session),
        }
    }

    // ------------------------------------------------ failure funnel

    fn start_retry(&mut self, session: Session) {
        // Fall back to ipv4 unless the failure was a hard one (bad PIN,
        // cleared pairing) or we already were on ipv4.
        if !session.family_v6 || session.state.is_failed_phase() {
            self.session_failure(session);
            return;
        }
        let Some(mut device) = self.player.device_get(session.device_id) else {
            self.session_failure(session);
            return;
        };

        info!(device = %device.name, "ipv6 attempt failed, falling back to ipv4");
        // Permanent; mdns updates never reset it.
        device.v6_disabled = true;
        self.player.device_update(&device);

        let device_id = session.device_id;
        let callback_id = session.callback_id;
        self.session_cleanup(session);
        self.start_device(device_id, callback_id, Launch::Start);
    }

    fn start_failure(&mut self, session: Session) {
        // An encrypted request that timed out usually means the device
        // reset its pairings; our stored key is useless now.
        if let Some(mut device) = self.player.device_get(session.device_id) {
            if device.auth_key.is_some() {
                warn!(
                    device = %device.name,
                    "clearing pairing keys, you need to pair again"
                );
                device.auth_key = None;
                device.requires_auth = true;
                self.player.device_update(&device);
            }
        }
        // Past SETUP the receiver holds stream state; tear that down
        // before reporting the failure.
        if matches!(session.state, SessionState::Setup | SessionState::Record) {
            self.sequence_begin(session, SeqKind::Failure, SeqArg::None, "start_failure");
            return;
        }
        self.session_failure(session);
    }

    fn session_failure(&mut self, mut session: Session) {
        if session.state != SessionState::Auth {
            session.state = SessionState::Failed;
        }
        self.session_status(&mut session);
        self.session_cleanup(session);
    }

    fn session_status(&self, session: &mut Session) {
        let state = public_state(session.state);
        self.player
            .outputs_cb(session.callback_id, session.device_id, state);
        session.callback_id = -1;
    }

    fn session_cleanup(&mut self, session: Session) {
        let quality = session.quality;
        let device_id = session.device_id;
        drop(session);
        self.player.device_session_remove(device_id);

        if !self.sessions.values().any(|s| s.quality == quality) {
            if let Some(index) = self.masters.iter().position(|m| m.quality == quality) {
                self.masters.remove(index);
                self.player.quality_unsubscribe(quality);
            }
        }
    }

    fn refresh_snapshot(&self, session: &mut Session) {
        if let Some(master) = self.masters.iter().find(|m| m.quality == session.quality) {
            session.rtp_snapshot = (master.rtp.next_sequence(), master.rtp.next_timestamp());
        }
    }
}
