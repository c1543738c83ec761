use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Retransmit request header bytes.
const RETRANSMIT_REQUEST: [u8; 2] = [0x80, 0xd5];

/// A parsed retransmit request, forwarded to the engine for session
/// lookup by peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// Who asked (the receiver's control socket address)
    pub peer: SocketAddr,
    /// First missing sequence number
    pub seq_start: u16,
    /// How many packets are missing
    pub seq_len: u16,
}

/// The shared control service: one UDP socket receiving retransmit
/// requests for every session.
pub struct ControlService {
    port: u16,
    socket: Arc<UdpSocket>,
    task: JoinHandle<()>,
}

impl ControlService {
    /// Bind an ephemeral port and start forwarding requests.
    ///
    /// # Errors
    /// Fails if no socket can be bound.
    pub async fn start(requests: mpsc::Sender<RetransmitRequest>) -> std::io::Result<Self> {
        let socket = Arc::new(super::timing::bind_any().await?);
        let port = socket.local_addr()?.port();

        let task = tokio::spawn(run(Arc::clone(&socket), requests));
        Ok(Self { port, socket, task })
    }

    /// The bound port, announced to receivers in `SETUP`.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The underlying socket; sync packets go out through it so they
    /// originate from the port receivers know.
    #[must_use]
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

impl Drop for ControlService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(socket: Arc<UdpSocket>, requests: mpsc::Sender<RetransmitRequest>) {
    let mut buf = [0u8; 32];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(recv) => recv,
            Err(err) => {
                warn!("control service read failed: {err}");
                continue;
            }
        };

        if len != 8 {
            warn!("control request from {peer} has size {len}");
            continue;
        }
        if buf[..2] != RETRANSMIT_REQUEST {
            warn!(
                "packet from {peer} is not a retransmit request (got 0x{:02x}{:02x})",
                buf[0], buf[1]
            );
            continue;
        }

        let request = RetransmitRequest {
            peer,
            seq_start: u16::from_be_bytes([buf[4], buf[5]]),
            seq_len: u16::from_be_bytes([buf[6], buf[7]]),
        };

        if requests.send(request).await.is_err() {
            // Engine is gone; nothing left to serve.
            break;
        }
    }
}
