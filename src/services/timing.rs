use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970).
const NTP_EPOCH_DELTA: u64 = 2_208_988_800;

/// Timing request header bytes.
const TIMING_REQUEST: [u8; 2] = [0x80, 0xd2];
/// Timing response header bytes.
const TIMING_RESPONSE: [u8; 2] = [0x80, 0xd3];

/// 64-bit NTP timestamp: seconds since 1900 in the high half, binary
/// fraction in the low half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTime(pub u64);

impl NtpTime {
    /// Current wall clock as NTP time.
    #[must_use]
    pub fn now() -> Self {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_unix(unix)
    }

    /// Convert a UNIX-epoch duration.
    #[must_use]
    pub fn from_unix(unix: Duration) -> Self {
        let seconds = unix.as_secs() + NTP_EPOCH_DELTA;
        let fraction = (u64::from(unix.subsec_nanos()) << 32) / 1_000_000_000;
        Self((seconds << 32) | fraction)
    }

    /// Seconds part.
    #[must_use]
    pub fn seconds(self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (self.0 >> 32) as u32
        }
    }

    /// Fraction part.
    #[must_use]
    pub fn fraction(self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.0 as u32
        }
    }

    /// Big-endian wire bytes.
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

/// Build the 32-byte reply for a validated timing request.
///
/// Pure function of the request and the two clock readings: byte 2 is
/// echoed, the client's originate timestamp moves to bytes 8..16, receive
/// and transmit timestamps fill the rest. A missing transmit reading
/// falls back to the receive one, which is close enough to matter less
/// than failing.
#[must_use]
pub fn timing_reply(request: &[u8; 32], recv: NtpTime, xmit: Option<NtpTime>) -> [u8; 32] {
    let mut reply = [0u8; 32];
    reply[0] = TIMING_RESPONSE[0];
    reply[1] = TIMING_RESPONSE[1];
    reply[2] = request[2];

    reply[8..16].copy_from_slice(&request[24..32]);
    reply[16..24].copy_from_slice(&recv.to_be_bytes());
    reply[24..32].copy_from_slice(&xmit.unwrap_or(recv).to_be_bytes());
    reply
}

/// The shared timing service: one UDP socket answering AirTunes v2 NTP
/// queries from any receiver.
pub struct TimingService {
    port: u16,
    task: JoinHandle<()>,
}

impl TimingService {
    /// Bind an ephemeral port and start answering.
    ///
    /// # Errors
    /// Fails if no socket can be bound.
    pub async fn start() -> std::io::Result<Self> {
        let socket = Arc::new(bind_any().await?);
        let port = socket.local_addr()?.port();

        let task = tokio::spawn(run(socket));
        Ok(Self { port, task })
    }

    /// The bound port, announced to receivers in `SETUP`.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for TimingService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Prefer a dual-stack v6 socket so v6 receivers can query too.
pub(super) async fn bind_any() -> std::io::Result<UdpSocket> {
    match UdpSocket::bind("[::]:0").await {
        Ok(socket) => Ok(socket),
        Err(_) => UdpSocket::bind("0.0.0.0:0").await,
    }
}

async fn run(socket: Arc<UdpSocket>) {
    let mut buf = [0u8; 64];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(recv) => recv,
            Err(err) => {
                warn!("timing service read failed: {err}");
                continue;
            }
        };
        let recv_time = NtpTime::now();

        if len != 32 {
            warn!("timing request from {peer} has size {len}");
            continue;
        }
        if buf[..2] != TIMING_REQUEST {
            warn!(
                "packet from {peer} is not a timing request (got 0x{:02x}{:02x})",
                buf[0], buf[1]
            );
            continue;
        }

        let request: [u8; 32] = buf[..32].try_into().unwrap_or_default();
        let reply = timing_reply(&request, recv_time, Some(NtpTime::now()));

        if let Err(err) = socket.send_to(&reply, peer).await {
            warn!("could not send timing reply to {peer}: {err}");
        } else {
            debug!("timing reply sent to {peer}");
        }
    }
}
