use bytes::Bytes;
use rand::Rng;

use super::packet::{RTP_HEADER_LEN, audio_header, sync_packet};
use super::ring::{RetransmitRing, RingPacket};
use super::SAMPLES_PER_PACKET;

/// Per-master-session RTP state: monotonic counters plus the retransmit
/// ring. Counters start at random values and only ever advance; a flush
/// re-arms the marker bits but never rewinds.
pub struct RtpSession {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    first_packet: bool,
    first_sync: bool,
    ring: RetransmitRing,
}

impl RtpSession {
    /// Fresh session with random SSRC and counter origins.
    #[must_use]
    pub fn new(ring_capacity: usize) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            ssrc: rng.r#gen(),
            sequence: rng.r#gen(),
            timestamp: rng.r#gen(),
            first_packet: true,
            first_sync: true,
            ring: RetransmitRing::new(ring_capacity),
        }
    }

    /// Assign counters to an encoded frame, cache it for retransmission
    /// and hand it back for sending.
    pub fn next_packet(&mut self, payload: Bytes) -> RingPacket {
        let packet = RingPacket {
            sequence: self.sequence,
            timestamp: self.timestamp,
            first: self.first_packet,
            payload,
        };
        self.ring.push(packet.clone());

        self.first_packet = false;
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(SAMPLES_PER_PACKET);
        packet
    }

    /// Header bytes for a cached packet (original counters, marker as
    /// first sent).
    #[must_use]
    pub fn header_for(&self, packet: &RingPacket) -> [u8; RTP_HEADER_LEN] {
        audio_header(packet.first, packet.sequence, packet.timestamp, self.ssrc)
    }

    /// Build the next sync packet. The reported position lags the stream
    /// by `output_buffer_samples`, which is the receiver's buffering
    /// headroom.
    pub fn make_sync_packet(&mut self, ntp_time: u64, output_buffer_samples: u32) -> [u8; 20] {
        let first = self.first_sync;
        self.first_sync = false;
        let reported = self.timestamp.wrapping_sub(output_buffer_samples);
        sync_packet(first, reported, ntp_time, self.timestamp)
    }

    /// Forget buffered packets and re-arm the marker bits. Counters keep
    /// advancing monotonically.
    pub fn flush(&mut self) {
        self.ring.clear();
        self.first_packet = true;
        self.first_sync = true;
    }

    /// Stream SSRC.
    #[must_use]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will get.
    #[must_use]
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// RTP timestamp the next packet will get.
    #[must_use]
    pub fn next_timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Retransmit cache.
    #[must_use]
    pub fn ring(&self) -> &RetransmitRing {
        &self.ring
    }
}
