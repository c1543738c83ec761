//! AirTunes v2 packet layouts.

/// RTP payload type for realtime audio.
pub const AUDIO_PAYLOAD_TYPE: u8 = 0x60;

/// Audio packet header length.
pub const RTP_HEADER_LEN: usize = 12;

/// Build the 12-byte audio packet header.
///
/// Layout: version/flags, marker+payload type, sequence, RTP timestamp,
/// SSRC. The marker bit is set on the first packet after RECORD or a
/// flush.
#[must_use]
pub fn audio_header(first: bool, sequence: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_LEN] {
    let mut header = [0u8; RTP_HEADER_LEN];
    header[0] = 0x80;
    header[1] = if first {
        0x80 | AUDIO_PAYLOAD_TYPE
    } else {
        AUDIO_PAYLOAD_TYPE
    };
    header[2..4].copy_from_slice(&sequence.to_be_bytes());
    header[4..8].copy_from_slice(&timestamp.to_be_bytes());
    header[8..12].copy_from_slice(&ssrc.to_be_bytes());
    header
}

/// Build a 20-byte AirTunes v2 sync packet.
///
/// `reported` is the stream position the receiver should align playback
/// to; it lags the real position by the configured output buffer. The
/// extension bit is set on the first sync after RECORD or a flush.
#[must_use]
pub fn sync_packet(first: bool, reported: u32, ntp_time: u64, current: u32) -> [u8; 20] {
    let mut packet = [0u8; 20];
    packet[0] = if first { 0x90 } else { 0x80 };
    packet[1] = 0xd4;
    packet[2..4].copy_from_slice(&0x0007u16.to_be_bytes());
    packet[4..8].copy_from_slice(&reported.to_be_bytes());
    packet[8..16].copy_from_slice(&ntp_time.to_be_bytes());
    packet[16..20].copy_from_slice(&current.to_be_bytes());
    packet
}
