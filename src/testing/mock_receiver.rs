//! A scripted `AirPlay` 2 receiver: real sockets, canned protocol
//! behavior, enough state to complete the pairing ceremonies.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::crypto::{ChaChaCipher, EdKeyPair, HkdfSha512, Nonce, X25519KeyPair, X25519PublicKey};
use crate::pairing::SRP_USERNAME;
use crate::pairing::tlv::{TlvReader, TlvType, TlvWriter};
use crate::plist::{self, Value};

use super::{MirrorCipher, ParsedRequest, SrpServer, parse_request, rtsp_response};

/// What the scripted receiver should do.
#[derive(Clone)]
pub struct ReceiverConfig {
    /// `statusFlags` in the `/info` answer
    pub status_flags: u64,
    /// Answer transient pairing attempts with 470
    pub reject_transient_with_470: bool,
    /// Answer pair-verify step 1 with 470 (stale stored key)
    pub reject_verify: bool,
    /// PIN expected in pair-setup
    pub pin: String,
    /// Seed of the accessory's long-term Ed25519 identity
    pub device_seed: [u8; 32],
    /// Close the connection instead of answering the n-th
    /// `SET_PARAMETER` (1-based)
    pub drop_on_set_parameter: Option<u32>,
    /// Accept and immediately close every connection
    pub close_on_accept: bool,
    /// Listen on `[::1]` instead of `127.0.0.1`
    pub bind_v6: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            status_flags: 0,
            reject_transient_with_470: false,
            reject_verify: false,
            pin: "1234".to_string(),
            device_seed: [7u8; 32],
            drop_on_set_parameter: None,
            close_on_accept: false,
            bind_v6: false,
        }
    }
}

/// Handle to a running scripted receiver.
pub struct MockReceiver {
    /// The RTSP listen address
    pub addr: SocketAddr,
    datagrams: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    _task: JoinHandle<()>,
}

impl MockReceiver {
    pub async fn start(config: ReceiverConfig) -> Self {
        let bind = if config.bind_v6 { "[::1]:0" } else { "127.0.0.1:0" };
        let listener = TcpListener::bind(bind).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dgram_tx, dgram_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(accept_loop(listener, config, dgram_tx));
        Self {
            addr,
            datagrams: tokio::sync::Mutex::new(dgram_rx),
            _task: task,
        }
    }

    /// Await the next datagram on the receiver's data port.
    pub async fn next_datagram(&self) -> Vec<u8> {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            self.datagrams.lock().await.recv().await
        })
        .await
        .expect("timed out waiting for a datagram")
        .expect("datagram channel closed")
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ReceiverConfig,
    dgram_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        if config.close_on_accept {
            drop(stream);
            continue;
        }
        let conn = Conn {
            stream,
            config: config.clone(),
            dgram_tx: dgram_tx.clone(),
            cipher: None,
            pending_secret: None,
            crypt: Vec::new(),
            plain: Vec::new(),
            srp: None,
            srp_key: None,
            transient: false,
            verify_secret: None,
            set_parameter_count: 0,
        };
        tokio::spawn(conn.run());
    }
}

enum Action {
    Respond(Vec<u8>),
    Close,
}

struct Conn {
    stream: TcpStream,
    config: ReceiverConfig,
    dgram_tx: mpsc::UnboundedSender<Vec<u8>>,
    cipher: Option<MirrorCipher>,
    pending_secret: Option<Vec<u8>>,
    crypt: Vec<u8>,
    plain: Vec<u8>,
    srp: Option<SrpServer>,
    srp_key: Option<Vec<u8>>,
    transient: bool,
    verify_secret: Option<Vec<u8>>,
    set_parameter_count: u32,
}

impl Conn {
    async fn run(mut self) {
        loop {
            let Some(request) = self.read_request().await else {
                return;
            };
            match self.dispatch(&request).await {
                Action::Respond(bytes) => {
                    let wire = match self.cipher.as_mut() {
                        Some(cipher) => cipher.seal_message(&bytes),
                        None => bytes,
                    };
                    if self.stream.write_all(&wire).await.is_err() {
                        return;
                    }
                    // A completed handshake encrypts everything after
                    // the final plaintext answer.
                    if let Some(secret) = self.pending_secret.take() {
                        self.cipher = Some(MirrorCipher::new(&secret));
                    }
                }
                Action::Close => return,
            }
        }
    }

    async fn read_request(&mut self) -> Option<ParsedRequest> {
        loop {
            if let Some(request) = parse_request(&mut self.plain) {
                return Some(request);
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            match self.cipher.as_mut() {
                Some(cipher) => {
                    self.crypt.extend_from_slice(&buf[..n]);
                    cipher.open_stream(&mut self.crypt, &mut self.plain);
                }
                None => self.plain.extend_from_slice(&buf[..n]),
            }
        }
    }

    async fn dispatch(&mut self, request: &ParsedRequest) -> Action {
        match (request.method.as_str(), request.uri.as_str()) {
            ("GET", "/info") => {
                #[allow(clippy::cast_possible_wrap)]
                let body = plist::dict(vec![(
                    "statusFlags",
                    Value::Integer(self.config.status_flags as i64),
                )]);
                Action::Respond(rtsp_response(
                    200,
                    "OK",
                    &[("Content-Type", "application/x-apple-binary-plist".into())],
                    &plist::encode(&body).unwrap(),
                ))
            }
            ("POST", "/pair-setup") => self.pair_setup(request),
            ("POST", "/pair-verify") => self.pair_verify(request),
            ("POST", _) => Action::Respond(rtsp_response(200, "OK", &[], &[])),
            ("SETUP", _) => self.setup(request).await,
            ("RECORD", _) => Action::Respond(rtsp_response(
                200,
                "OK",
                &[("Audio-Latency", "11025".into())],
                &[],
            )),
            ("SETPEERS" | "FLUSH" | "TEARDOWN", _) => {
                Action::Respond(rtsp_response(200, "OK", &[], &[]))
            }
            ("SET_PARAMETER", _) => {
                self.set_parameter_count += 1;
                if self.config.drop_on_set_parameter == Some(self.set_parameter_count) {
                    return Action::Close;
                }
                Action::Respond(rtsp_response(200, "OK", &[], &[]))
            }
            _ => Action::Respond(rtsp_response(501, "Not Implemented", &[], &[])),
        }
    }

    async fn setup(&mut self, request: &ParsedRequest) -> Action {
        let body = plist::decode(&request.body).expect("SETUP body must be a plist");
        if body.get("streams").is_none() {
            let reply = plist::dict(vec![
                ("eventPort", Value::Integer(0)),
                ("timingPort", Value::Integer(0)),
            ]);
            return Action::Respond(rtsp_response(
                200,
                "OK",
                &[("Content-Type", "application/x-apple-binary-plist".into())],
                &plist::encode(&reply).unwrap(),
            ));
        }

        // Stream setup: open real data/control sockets and forward what
        // arrives on the data port to the test.
        let data_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let control_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let data_port = data_socket.local_addr().unwrap().port();
        let control_port = control_socket.local_addr().unwrap().port();

        let dgram_tx = self.dgram_tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((n, _)) = data_socket.recv_from(&mut buf).await else {
                    return;
                };
                if dgram_tx.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
        });
        // Keep the control socket alive; sync packets land here.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                if control_socket.recv_from(&mut buf).await.is_err() {
                    return;
                }
            }
        });

        let stream = plist::dict(vec![
            ("type", Value::Integer(96)),
            ("dataPort", Value::Integer(i64::from(data_port))),
            ("controlPort", Value::Integer(i64::from(control_port))),
        ]);
        let reply = plist::dict(vec![("streams", Value::Array(vec![stream]))]);
        Action::Respond(rtsp_response(
            200,
            "OK",
            &[("Content-Type", "application/x-apple-binary-plist".into())],
            &plist::encode(&reply).unwrap(),
        ))
    }

    fn pair_setup(&mut self, request: &ParsedRequest) -> Action {
        let tlv = TlvReader::parse(&request.body).expect("pair-setup body must be TLV");
        let state = tlv
            .get(TlvType::State)
            .and_then(<[u8]>::first)
            .copied()
            .unwrap_or(0);

        match state {
            1 => {
                let transient = tlv
                    .get(TlvType::Flags)
                    .and_then(<[u8]>::first)
                    .is_some_and(|flags| flags & 0x10 != 0);
                if transient && self.config.reject_transient_with_470 {
                    return Action::Respond(rtsp_response(
                        470,
                        "Connection Authorization Required",
                        &[],
                        &[],
                    ));
                }
                let password = if transient {
                    b"3939".to_vec()
                } else {
                    self.config.pin.clone().into_bytes()
                };
                let srp = SrpServer::new(SRP_USERNAME, &password);
                let m2 = TlvWriter::new()
                    .state(2)
                    .put(TlvType::Salt, &srp.salt)
                    .put(TlvType::PublicKey, &srp.public_key())
                    .finish();
                self.srp = Some(srp);
                self.transient = transient;
                self.respond_tlv(&m2)
            }
            3 => {
                let srp = self.srp.as_ref().expect("M3 before M1");
                let client_public = tlv.require(TlvType::PublicKey).unwrap();
                let client_proof = tlv.require(TlvType::Proof).unwrap();

                let (expected_proof, server_proof, key) = srp.answer(client_public);
                if client_proof != expected_proof {
                    let error = TlvWriter::new()
                        .state(4)
                        .put_u8(TlvType::Error, 0x02)
                        .finish();
                    return self.respond_tlv(&error);
                }

                let m4 = TlvWriter::new()
                    .state(4)
                    .put(TlvType::Proof, &server_proof)
                    .finish();
                if self.transient {
                    self.pending_secret = Some(key.clone());
                }
                self.srp_key = Some(key);
                self.respond_tlv(&m4)
            }
            5 => {
                let key = self.srp_key.clone().expect("M5 before M4");
                let identity = EdKeyPair::from_seed(&self.config.device_seed).unwrap();

                let accessory_x: [u8; 32] =
                    HkdfSha512::new(Some(b"Pair-Setup-Accessory-Sign-Salt"), &key)
                        .expand(b"Pair-Setup-Accessory-Sign-Info")
                        .unwrap();
                let mut signed = Vec::new();
                signed.extend_from_slice(&accessory_x);
                signed.extend_from_slice(b"mock-accessory");
                signed.extend_from_slice(identity.public_key().as_bytes());
                let signature = identity.sign(&signed);

                let inner = TlvWriter::new()
                    .put(TlvType::Identifier, b"mock-accessory")
                    .put(TlvType::PublicKey, identity.public_key().as_bytes())
                    .put(TlvType::Signature, &signature.to_bytes())
                    .finish();

                let encrypt_key: [u8; 32] =
                    HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), &key)
                        .expand(b"Pair-Setup-Encrypt-Info")
                        .unwrap();
                let cipher = ChaChaCipher::new(&encrypt_key).unwrap();
                let sealed = cipher
                    .seal(&Nonce::from_label(b"PS-Msg06"), &[], &inner)
                    .unwrap();

                let m6 = TlvWriter::new()
                    .state(6)
                    .put(TlvType::EncryptedData, &sealed)
                    .finish();
                self.respond_tlv(&m6)
            }
            _ => Action::Respond(rtsp_response(400, "Bad Request", &[], &[])),
        }
    }

    fn pair_verify(&mut self, request: &ParsedRequest) -> Action {
        let tlv = TlvReader::parse(&request.body).expect("pair-verify body must be TLV");
        let state = tlv
            .get(TlvType::State)
            .and_then(<[u8]>::first)
            .copied()
            .unwrap_or(0);

        match state {
            1 => {
                if self.config.reject_verify {
                    return Action::Respond(rtsp_response(
                        470,
                        "Connection Authorization Required",
                        &[],
                        &[],
                    ));
                }
                let client_ephemeral_bytes = tlv.require(TlvType::PublicKey).unwrap().to_vec();
                let client_ephemeral =
                    X25519PublicKey::from_bytes(&client_ephemeral_bytes).unwrap();

                let accessory_ephemeral = X25519KeyPair::generate();
                let shared = accessory_ephemeral.diffie_hellman(&client_ephemeral);

                let session_key: [u8; 32] =
                    HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes())
                        .expand(b"Pair-Verify-Encrypt-Info")
                        .unwrap();
                let cipher = ChaChaCipher::new(&session_key).unwrap();

                let identity = EdKeyPair::from_seed(&self.config.device_seed).unwrap();
                let mut signed = Vec::new();
                signed.extend_from_slice(accessory_ephemeral.public_key().as_bytes());
                signed.extend_from_slice(&client_ephemeral_bytes);
                let signature = identity.sign(&signed);

                let inner = TlvWriter::new()
                    .put(TlvType::Identifier, b"mock-accessory")
                    .put(TlvType::Signature, &signature.to_bytes())
                    .finish();
                let sealed = cipher
                    .seal(&Nonce::from_label(b"PV-Msg02"), &[], &inner)
                    .unwrap();

                let m2 = TlvWriter::new()
                    .state(2)
                    .put(
                        TlvType::PublicKey,
                        accessory_ephemeral.public_key().as_bytes(),
                    )
                    .put(TlvType::EncryptedData, &sealed)
                    .finish();

                self.verify_secret = Some(shared.as_bytes().to_vec());
                self.respond_tlv(&m2)
            }
            3 => {
                let m4 = TlvWriter::new().state(4).finish();
                self.pending_secret = self.verify_secret.clone();
                self.respond_tlv(&m4)
            }
            _ => Action::Respond(rtsp_response(400, "Bad Request", &[], &[])),
        }
    }

    fn respond_tlv(&self, body: &[u8]) -> Action {
        Action::Respond(rtsp_response(
            200,
            "OK",
            &[("Content-Type", "application/octet-stream".into())],
            body,
        ))
    }
}
