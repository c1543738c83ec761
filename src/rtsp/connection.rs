use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::pairing::ChannelCipher;

use super::{ResponseCodec, RtspError, RtspRequest, RtspResponse};

/// Events a connection task reports back to the engine.
#[derive(Debug)]
pub enum RtspEvent {
    /// Outcome of a request. `None` means transport failure or timeout;
    /// there is no response to look at.
    Response {
        /// The owning session's token (device id)
        token: u64,
        /// The decoded response, if one arrived
        response: Option<RtspResponse>,
    },
    /// The peer closed the connection while no request was in flight.
    Closed {
        /// The owning session's token (device id)
        token: u64,
    },
}

enum ConnCommand {
    Send(RtspRequest),
    InstallCipher(Box<ChannelCipher>),
}

/// Handle to a per-session RTSP connection task.
///
/// Requests are strictly serialized: the task writes one request, waits
/// for its response (or the timeout) and reports an [`RtspEvent`] before
/// touching the next command. Dropping the handle closes the connection.
pub struct RtspConnection {
    cmd_tx: mpsc::UnboundedSender<ConnCommand>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    token: u64,
}

impl RtspConnection {
    /// Connect to a receiver and spawn the connection task.
    ///
    /// # Errors
    /// Fails if the TCP connect fails.
    pub async fn connect(
        addr: SocketAddr,
        token: u64,
        events: mpsc::Sender<RtspEvent>,
        request_timeout: Duration,
    ) -> Result<Self, RtspError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(RtspError::ConnectFailed)?;
        let local_addr = stream.local_addr().map_err(RtspError::ConnectFailed)?;
        let peer_addr = stream.peer_addr().map_err(RtspError::ConnectFailed)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = ConnTask {
            stream,
            codec: ResponseCodec::new(),
            cipher: None,
            crypt_buf: Vec::new(),
            cseq: 1,
            token,
            events,
            request_timeout,
        };
        tokio::spawn(task.run(cmd_rx));

        Ok(Self {
            cmd_tx,
            local_addr,
            peer_addr,
            token,
        })
    }

    /// Queue a request. The response arrives as an [`RtspEvent`].
    ///
    /// # Errors
    /// Fails if the connection task is gone.
    pub fn send_request(&self, request: RtspRequest) -> Result<(), RtspError> {
        self.cmd_tx
            .send(ConnCommand::Send(request))
            .map_err(|_| RtspError::ConnectionClosed)
    }

    /// Install the control-channel cipher; every later request and
    /// response goes through the AEAD envelope.
    ///
    /// # Errors
    /// Fails if the connection task is gone.
    pub fn install_cipher(&self, cipher: ChannelCipher) -> Result<(), RtspError> {
        self.cmd_tx
            .send(ConnCommand::InstallCipher(Box::new(cipher)))
            .map_err(|_| RtspError::ConnectionClosed)
    }

    /// Our side of the connection.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The receiver's side of the connection.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The session token this connection reports events under.
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }
}

struct ConnTask {
    stream: TcpStream,
    codec: ResponseCodec,
    cipher: Option<Box<ChannelCipher>>,
    crypt_buf: Vec<u8>,
    cseq: u32,
    token: u64,
    events: mpsc::Sender<RtspEvent>,
    request_timeout: Duration,
}

impl ConnTask {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ConnCommand>) {
        let mut read_buf = [0u8; 4096];
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ConnCommand::Send(request)) => {
                        let response = self.roundtrip(request).await;
                        let failed = response.is_none();
                        let event = RtspEvent::Response { token: self.token, response };
                        if self.events.send(event).await.is_err() || failed {
                            break;
                        }
                    }
                    Some(ConnCommand::InstallCipher(cipher)) => {
                        debug!(token = self.token, "control channel cipher installed");
                        self.cipher = Some(cipher);
                    }
                    None => break,
                },
                result = self.stream.read(&mut read_buf) => {
                    match result {
                        Ok(0) | Err(_) => {
                            let _ = self.events.send(RtspEvent::Closed { token: self.token }).await;
                            break;
                        }
                        Ok(n) => {
                            if self.ingest(&read_buf[..n]).is_err() {
                                let _ = self.events.send(RtspEvent::Closed { token: self.token }).await;
                                break;
                            }
                            // Nothing is in flight here, so any decoded
                            // response is unsolicited.
                            while let Ok(Some(response)) = self.codec.next_response() {
                                warn!(
                                    token = self.token,
                                    status = response.status.as_u16(),
                                    "dropping unsolicited RTSP response"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    /// Write one request and wait for its response.
    async fn roundtrip(&mut self, request: RtspRequest) -> Option<RtspResponse> {
        let cseq = self.cseq;
        self.cseq += 1;

        let plain = request.encode(cseq);
        let wire = match self.cipher.as_mut() {
            Some(cipher) => cipher.seal_message(&plain).ok()?,
            None => plain,
        };
        self.stream.write_all(&wire).await.ok()?;

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let mut buf = [0u8; 4096];
        loop {
            if let Ok(Some(response)) = self.codec.next_response() {
                return Some(response);
            }
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut buf))
                .await
                .ok()?
                .ok()?;
            if read == 0 {
                return None;
            }
            self.ingest(&buf[..read]).ok()?;
        }
    }

    /// Push socket bytes through the cipher (when installed) into the
    /// response codec.
    fn ingest(&mut self, bytes: &[u8]) -> Result<(), RtspError> {
        match self.cipher.as_mut() {
            Some(cipher) => {
                self.crypt_buf.extend_from_slice(bytes);
                loop {
                    match cipher
                        .open_block(&self.crypt_buf)
                        .map_err(|_| RtspError::ChannelCipher)?
                    {
                        Some((plaintext, used)) => {
                            self.crypt_buf.drain(..used);
                            self.codec.feed(&plaintext)?;
                        }
                        None => break,
                    }
                }
                Ok(())
            }
            None => self.codec.feed(bytes),
        }
    }
}
