//! In-process test doubles: an SRP server half, the receiver side of the
//! control-channel envelope, a scripted `AirPlay` receiver and a player
//! stub. Compiled for tests only.

#![allow(clippy::missing_panics_doc)]

mod mock_receiver;
mod srp_server;

pub use mock_receiver::{MockReceiver, ReceiverConfig};
pub use srp_server::SrpServer;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::crypto::{ChaChaCipher, HkdfSha512, Nonce};
use crate::engine::Player;
use crate::types::{AudioQuality, Device, DeviceState};

/// Receiver half of the control channel envelope: opens with the
/// sender's write key, seals with its read key.
pub struct MirrorCipher {
    open: ChaChaCipher,
    seal: ChaChaCipher,
    open_count: u64,
    seal_count: u64,
}

impl MirrorCipher {
    pub fn new(secret: &[u8]) -> Self {
        let hkdf = HkdfSha512::new(Some(b"Control-Salt"), secret);
        let write_key: [u8; 32] = hkdf.expand(b"Control-Write-Encryption-Key").unwrap();
        let read_key: [u8; 32] = hkdf.expand(b"Control-Read-Encryption-Key").unwrap();
        Self {
            open: ChaChaCipher::new(&write_key).unwrap(),
            seal: ChaChaCipher::new(&read_key).unwrap(),
            open_count: 0,
            seal_count: 0,
        }
    }

    /// Drain every complete envelope in `crypt` into plaintext.
    pub fn open_stream(&mut self, crypt: &mut Vec<u8>, plain: &mut Vec<u8>) {
        loop {
            if crypt.len() < 2 {
                return;
            }
            let len = usize::from(u16::from_le_bytes([crypt[0], crypt[1]]));
            let total = 2 + len + crate::crypto::CHACHA_TAG_LEN;
            if crypt.len() < total {
                return;
            }
            let opened = self
                .open
                .open(
                    &Nonce::from_counter(self.open_count),
                    &crypt[..2],
                    &crypt[2..total],
                )
                .expect("test peer sent an unopenable envelope");
            self.open_count += 1;
            plain.extend_from_slice(&opened);
            crypt.drain(..total);
        }
    }

    /// Seal one outgoing message.
    pub fn seal_message(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(plaintext.len() + 32);
        for block in plaintext.chunks(0x400) {
            #[allow(clippy::cast_possible_truncation)]
            let len = (block.len() as u16).to_le_bytes();
            let sealed = self
                .seal
                .seal(&Nonce::from_counter(self.seal_count), &len, block)
                .unwrap();
            self.seal_count += 1;
            out.extend_from_slice(&len);
            out.extend_from_slice(&sealed);
        }
        out
    }
}

/// A decoded RTSP request, as the mock receiver sees it.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Pull one complete request off the front of `buf`, if present.
pub fn parse_request(buf: &mut Vec<u8>) -> Option<ParsedRequest> {
    let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");

    let request_line = lines.next()?;
    let mut parts = request_line.split(' ');
    let method = parts.next()?.to_string();
    let uri = parts.next()?.to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_string();
            let value = value.trim().to_string();
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = value.parse().unwrap_or(0);
            }
            headers.push((name, value));
        }
    }

    let body_start = head_end + 4;
    if buf.len() < body_start + content_length {
        return None;
    }
    let body = buf[body_start..body_start + content_length].to_vec();
    buf.drain(..body_start + content_length);

    Some(ParsedRequest {
        method,
        uri,
        headers,
        body,
    })
}

/// Serialize an RTSP response.
pub fn rtsp_response(status: u16, reason: &str, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("RTSP/1.0 {status} {reason}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if !body.is_empty() {
        out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

/// Player stub: a device registry plus a callback channel the test can
/// await on.
pub struct TestPlayer {
    pub devices: Mutex<HashMap<u64, Device>>,
    callbacks_tx: mpsc::UnboundedSender<(i32, u64, DeviceState)>,
    callbacks_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(i32, u64, DeviceState)>>,
    pub subscribed: Mutex<Vec<AudioQuality>>,
    pub refuse_quality: Mutex<bool>,
}

impl TestPlayer {
    pub fn new(devices: Vec<Device>) -> Self {
        let (callbacks_tx, callbacks_rx) = mpsc::unbounded_channel();
        Self {
            devices: Mutex::new(devices.into_iter().map(|d| (d.id, d)).collect()),
            callbacks_tx,
            callbacks_rx: tokio::sync::Mutex::new(callbacks_rx),
            subscribed: Mutex::new(Vec::new()),
            refuse_quality: Mutex::new(false),
        }
    }

    /// Await the next state callback (5 s deadline).
    pub async fn next_callback(&self) -> (i32, u64, DeviceState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            self.callbacks_rx.lock().await.recv().await
        })
        .await
        .expect("timed out waiting for a state callback")
        .expect("callback channel closed")
    }

    /// True if another callback arrives within `wait`.
    pub async fn callback_within(&self, wait: Duration) -> bool {
        tokio::time::timeout(wait, async { self.callbacks_rx.lock().await.recv().await })
            .await
            .is_ok()
    }

    pub fn device(&self, device_id: u64) -> Device {
        self.devices
            .lock()
            .unwrap()
            .get(&device_id)
            .cloned()
            .expect("unknown test device")
    }
}

impl Player for TestPlayer {
    fn outputs_cb(&self, callback_id: i32, device_id: u64, state: DeviceState) {
        let _ = self.callbacks_tx.send((callback_id, device_id, state));
    }

    fn device_get(&self, device_id: u64) -> Option<Device> {
        self.devices.lock().unwrap().get(&device_id).cloned()
    }

    fn device_update(&self, device: &Device) {
        self.devices
            .lock()
            .unwrap()
            .insert(device.id, device.clone());
    }

    fn device_session_add(&self, _device_id: u64) {}

    fn device_session_remove(&self, _device_id: u64) {}

    fn quality_subscribe(&self, quality: AudioQuality) -> bool {
        if *self.refuse_quality.lock().unwrap() {
            return false;
        }
        self.subscribed.lock().unwrap().push(quality);
        true
    }

    fn quality_unsubscribe(&self, quality: AudioQuality) {
        self.subscribed.lock().unwrap().retain(|q| *q != quality);
    }
}
