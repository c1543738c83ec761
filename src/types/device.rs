use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Audio quality triple shared by a master session and every device
/// session attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioQuality {
    /// Samples per second
    pub sample_rate: u32,
    /// Bits per sample (only 16 is streamed today)
    pub bits_per_sample: u8,
    /// Channel count
    pub channels: u8,
}

impl AudioQuality {
    /// Bytes per audio frame (one sample for every channel).
    #[must_use]
    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels)
    }
}

impl Default for AudioQuality {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bits_per_sample: 16,
            channels: 2,
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.sample_rate, self.bits_per_sample, self.channels
        )
    }
}

/// Receiver model, derived from the mDNS `am=` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// `AirPort` Express 2nd gen (802.11n)
    AirportExpress2,
    /// `AirPort` Express 3rd gen (802.11n)
    AirportExpress3,
    /// Apple TV (3rd gen and earlier)
    AppleTv,
    /// Apple TV 4 and later
    AppleTv4,
    /// `HomePod` and `HomePod` mini
    HomePod,
    /// Anything else (third-party speakers)
    #[default]
    Other,
}

/// Which metadata side channels a receiver asked for.
///
/// Bit layout follows the original wanted-metadata mask: text, artwork,
/// progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetadataMask(pub u16);

impl MetadataMask {
    /// Track title/artist/album as DMAP
    pub const TEXT: MetadataMask = MetadataMask(1 << 0);
    /// Cover art
    pub const ARTWORK: MetadataMask = MetadataMask(1 << 1);
    /// Playback progress
    pub const PROGRESS: MetadataMask = MetadataMask(1 << 2);

    /// All side channels
    #[must_use]
    pub fn all() -> Self {
        Self(Self::TEXT.0 | Self::ARTWORK.0 | Self::PROGRESS.0)
    }

    /// True if every bit of `other` is set in `self`.
    #[must_use]
    pub fn wants(&self, other: MetadataMask) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A receiver as the player registry knows it.
///
/// The registry owns these records; the engine only holds the stable `id`
/// and asks the player for a fresh copy when it needs one. `auth_key`,
/// `requires_auth` and `v6_disabled` are the persisted fields the engine
/// writes back through the player.
#[derive(Debug, Clone, Default)]
pub struct Device {
    /// Stable 64-bit id
    pub id: u64,
    /// Friendly name
    pub name: String,
    /// IPv4 endpoint, if the device advertised one
    pub v4: Option<(Ipv4Addr, u16)>,
    /// IPv6 endpoint, if the device advertised one
    pub v6: Option<(Ipv6Addr, u16)>,
    /// Speaker password, if the user configured one
    pub password: Option<String>,
    /// Persisted pairing key from a completed pair-setup
    pub auth_key: Option<String>,
    /// Device demands pairing and no usable key is stored
    pub requires_auth: bool,
    /// IPv6 attempts failed before; never connect over v6 again
    pub v6_disabled: bool,
    /// Stream quality for this device
    pub quality: AudioQuality,
    /// Current volume, `0..=max_volume`
    pub volume: i32,
    /// Receiver model
    pub devtype: DeviceType,
    /// Name as it appeared in mDNS (may differ from `name`)
    pub mdns_name: String,
    /// Metadata side channels the receiver wants
    pub wanted_metadata: MetadataMask,
    /// Receiver supports the legacy `/auth-setup` exchange
    pub supports_auth_setup: bool,
    /// Receiver advertises transient (PIN-less) pairing
    pub supports_pairing_transient: bool,
}

impl Device {
    /// Pick the endpoint for an address family, honoring `v6_disabled`.
    #[must_use]
    pub fn endpoint(&self, want_v6: bool) -> Option<std::net::SocketAddr> {
        if want_v6 {
            if self.v6_disabled {
                return None;
            }
            self.v6
                .map(|(ip, port)| std::net::SocketAddr::from((ip, port)))
        } else {
            self.v4
                .map(|(ip, port)| std::net::SocketAddr::from((ip, port)))
        }
    }
}

/// Coarse device state reported to the player.
///
/// Internal session states collapse onto these; see the state mapping in
/// the engine. `Teardown` is transitional and never surfaces here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// No session
    Stopped,
    /// Session startup in progress
    Startup,
    /// Session established, ready for media
    Connected,
    /// Media flowing
    Streaming,
    /// Waiting for a PIN or password
    Password,
    /// Session failed
    Failed,
}
