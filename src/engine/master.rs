//! Master sessions: the shared encoding context for every device session
//! streaming the same audio quality.

use bytes::{Bytes, BytesMut};

use crate::error::AirTunesError;
use crate::rtp::{RETRANSMIT_RING_SIZE, RingPacket, RtpSession, SAMPLES_PER_PACKET};
use crate::types::AudioQuality;

/// Sync packet cadence in audio packets (~1 s at 44.1 kHz).
const SYNC_INTERVAL_PACKETS: u32 = 126;

/// The "encode one packet of PCM16 into a compressed frame" seam.
///
/// The engine only ever hands over exactly one packet worth of samples.
/// Production uses [`AlacFrameEncoder`]; tests substitute their own.
pub trait FrameEncoder: Send {
    /// Encode one packet of interleaved PCM16 into the payload to ship.
    ///
    /// # Errors
    /// Implementations fail when the codec rejects the input.
    fn encode_frame(&mut self, pcm: &[u8]) -> Result<Vec<u8>, AirTunesError>;
}

/// ALAC encoder behind the seam.
pub struct AlacFrameEncoder {
    encoder: alac_encoder::AlacEncoder,
    input_format: alac_encoder::FormatDescription,
}

impl AlacFrameEncoder {
    /// Build an encoder for a quality.
    ///
    /// # Errors
    /// Fails for qualities ALAC streaming does not cover (only 16-bit
    /// PCM is sent today).
    pub fn new(quality: AudioQuality) -> Result<Self, AirTunesError> {
        if quality.bits_per_sample != 16 || quality.channels == 0 {
            return Err(AirTunesError::QualityUnsupported(quality));
        }
        let output_format = alac_encoder::FormatDescription::alac(
            f64::from(quality.sample_rate),
            SAMPLES_PER_PACKET,
            u32::from(quality.channels),
        );
        let input_format = alac_encoder::FormatDescription::pcm::<i16>(
            f64::from(quality.sample_rate),
            u32::from(quality.channels),
        );
        Ok(Self {
            encoder: alac_encoder::AlacEncoder::new(&output_format),
            input_format,
        })
    }
}

impl FrameEncoder for AlacFrameEncoder {
    fn encode_frame(&mut self, pcm: &[u8]) -> Result<Vec<u8>, AirTunesError> {
        // Worst case ALAC output is the input plus a small escape header.
        let mut out = vec![0u8; pcm.len() + 64];
        let size = self.encoder.encode(&self.input_format, pcm, &mut out);
        out.truncate(size);
        Ok(out)
    }
}

/// Shared per-quality encoding context: input buffer, encoder, RTP
/// session with the retransmit ring. Created lazily for the first device
/// session of a quality, dropped when the last one leaves.
pub struct MasterSession {
    /// The quality this master serves
    pub quality: AudioQuality,
    input_buffer: BytesMut,
    encoder: Box<dyn FrameEncoder>,
    /// RTP counters and the retransmit ring
    pub rtp: RtpSession,
    /// How many samples the receiver should buffer; sync packets report
    /// positions this far behind the stream
    pub output_buffer_samples: u32,
    sync_counter: u32,
}

impl MasterSession {
    /// Build a master session with the production ALAC encoder.
    ///
    /// # Errors
    /// Fails when no encoder exists for the quality.
    pub fn new(quality: AudioQuality, output_buffer_samples: u32) -> Result<Self, AirTunesError> {
        Ok(Self::with_encoder(
            quality,
            output_buffer_samples,
            Box::new(AlacFrameEncoder::new(quality)?),
        ))
    }

    /// Build with a caller-provided encoder.
    #[must_use]
    pub fn with_encoder(
        quality: AudioQuality,
        output_buffer_samples: u32,
        encoder: Box<dyn FrameEncoder>,
    ) -> Self {
        Self {
            quality,
            input_buffer: BytesMut::with_capacity(8192),
            encoder,
            rtp: RtpSession::new(RETRANSMIT_RING_SIZE),
            output_buffer_samples,
            sync_counter: 0,
        }
    }

    /// Buffer PCM and encode every complete packet of samples into RTP
    /// packets ready for per-session encryption and sending.
    ///
    /// # Errors
    /// Propagates encoder failures; buffered input is kept.
    pub fn write(&mut self, pcm: &[u8]) -> Result<Vec<RingPacket>, AirTunesError> {
        self.input_buffer.extend_from_slice(pcm);

        let packet_bytes = SAMPLES_PER_PACKET as usize * self.quality.bytes_per_frame();
        let mut packets = Vec::new();
        while self.input_buffer.len() >= packet_bytes {
            let frame = self.input_buffer.split_to(packet_bytes);
            let encoded = self.encoder.encode_frame(&frame)?;
            packets.push(self.rtp.next_packet(Bytes::from(encoded)));
        }
        Ok(packets)
    }

    /// Account for sent packets; true when a sync packet is due.
    pub fn sync_due(&mut self, packets_sent: usize) -> bool {
        let before = self.sync_counter;
        #[allow(clippy::cast_possible_truncation)]
        {
            self.sync_counter = self.sync_counter.wrapping_add(packets_sent as u32);
        }
        before == 0 || (before / SYNC_INTERVAL_PACKETS) != (self.sync_counter / SYNC_INTERVAL_PACKETS)
    }

    /// Drop buffered input and cached packets (FLUSH).
    pub fn flush(&mut self) {
        self.input_buffer.clear();
        self.rtp.flush();
        self.sync_counter = 0;
    }

    /// Samples currently buffered but not yet encoded.
    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.input_buffer.len() / self.quality.bytes_per_frame()
    }
}
