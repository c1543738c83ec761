use super::*;
use bytes::Bytes;
use proptest::prelude::*;

// ------------------------------------------------------------- headers

#[test]
fn audio_header_layout() {
    let header = audio_header(true, 0x1234, 0xAABB_CCDD, 0x0102_0304);
    assert_eq!(header[0], 0x80);
    assert_eq!(header[1], 0x80 | AUDIO_PAYLOAD_TYPE);
    assert_eq!(&header[2..4], &0x1234u16.to_be_bytes());
    assert_eq!(&header[4..8], &0xAABB_CCDDu32.to_be_bytes());
    assert_eq!(&header[8..12], &0x0102_0304u32.to_be_bytes());

    let later = audio_header(false, 0, 0, 0);
    assert_eq!(later[1], AUDIO_PAYLOAD_TYPE);
}

#[test]
fn sync_packet_reports_lagged_position() {
    let packet = sync_packet(true, 1000, 0x8899_AABB_CCDD_EEFF, 12000);
    assert_eq!(packet[0], 0x90);
    assert_eq!(packet[1], 0xd4);
    assert_eq!(&packet[4..8], &1000u32.to_be_bytes());
    assert_eq!(&packet[8..16], &0x8899_AABB_CCDD_EEFFu64.to_be_bytes());
    assert_eq!(&packet[16..20], &12000u32.to_be_bytes());

    assert_eq!(sync_packet(false, 0, 0, 0)[0], 0x80);
}

// ---------------------------------------------------------------- ring

fn packet(sequence: u16) -> RingPacket {
    RingPacket {
        sequence,
        timestamp: u32::from(sequence) * SAMPLES_PER_PACKET,
        first: false,
        payload: Bytes::from(sequence.to_be_bytes().to_vec()),
    }
}

#[test]
fn ring_stores_and_finds_by_sequence() {
    let mut ring = RetransmitRing::new(RETRANSMIT_RING_SIZE);
    for seq in 1000..1100u16 {
        ring.push(packet(seq));
    }
    assert_eq!(ring.len(), 100);

    let found: Vec<u16> = ring.range(1050, 3).map(|p| p.sequence).collect();
    assert_eq!(found, vec![1050, 1051, 1052]);
}

#[test]
fn ring_never_fabricates_missing_packets() {
    let mut ring = RetransmitRing::new(RETRANSMIT_RING_SIZE);
    ring.push(packet(10));
    ring.push(packet(12));

    // 11 was never stored; the range yields only what exists, in order.
    let found: Vec<u16> = ring.range(10, 3).map(|p| p.sequence).collect();
    assert_eq!(found, vec![10, 12]);
    assert!(ring.get(11).is_none());
}

#[test]
fn ring_evicts_entries_older_than_capacity() {
    let mut ring = RetransmitRing::new(10);
    for seq in 0..25u16 {
        ring.push(packet(seq));
    }
    // Only the last 10 survive.
    assert_eq!(ring.len(), 10);
    assert!(ring.get(14).is_none());
    assert!(ring.get(15).is_some());
    assert!(ring.get(24).is_some());
}

#[test]
fn ring_handles_sequence_wraparound() {
    let mut ring = RetransmitRing::new(RETRANSMIT_RING_SIZE);
    ring.push(packet(u16::MAX));
    ring.push(packet(0));

    let found: Vec<u16> = ring.range(u16::MAX, 2).map(|p| p.sequence).collect();
    assert_eq!(found, vec![u16::MAX, 0]);
}

#[test]
fn ring_clear_empties() {
    let mut ring = RetransmitRing::new(16);
    ring.push(packet(1));
    assert!(!ring.is_empty());
    ring.clear();
    assert!(ring.is_empty());
}

proptest! {
    /// Whatever was pushed last for a slot is what lookups return, and a
    /// lookup never returns a packet with a different sequence number.
    #[test]
    fn ring_lookup_is_exact(seqs in proptest::collection::vec(any::<u16>(), 1..200)) {
        let mut ring = RetransmitRing::new(64);
        for &seq in &seqs {
            ring.push(packet(seq));
        }
        for probe in seqs.iter().copied().chain(0..512) {
            if let Some(found) = ring.get(probe) {
                prop_assert_eq!(found.sequence, probe);
            }
        }
    }
}

// ------------------------------------------------------------- session

#[test]
fn session_counters_advance_monotonically() {
    let mut session = RtpSession::new(RETRANSMIT_RING_SIZE);
    let start_seq = session.next_sequence();
    let start_ts = session.next_timestamp();

    let mut sequences = Vec::new();
    for _ in 0..5 {
        let pkt = session.next_packet(Bytes::from_static(b"frame"));
        sequences.push(pkt.sequence);
    }

    let expected: Vec<u16> = (0..5).map(|i| start_seq.wrapping_add(i)).collect();
    assert_eq!(sequences, expected);
    assert_eq!(session.ring().len(), 5);
    assert_eq!(
        session.next_timestamp(),
        start_ts.wrapping_add(5 * SAMPLES_PER_PACKET)
    );
}

#[test]
fn session_marks_only_first_packet() {
    let mut session = RtpSession::new(16);
    assert!(session.next_packet(Bytes::from_static(b"a")).first);
    assert!(!session.next_packet(Bytes::from_static(b"b")).first);

    session.flush();
    assert!(session.ring().is_empty());
    assert!(session.next_packet(Bytes::from_static(b"c")).first);
}

#[test]
fn session_sync_packet_uses_buffer_offset() {
    let mut session = RtpSession::new(16);
    let current = session.next_timestamp();

    let sync = session.make_sync_packet(7, 11025);
    assert_eq!(sync[0], 0x90);
    assert_eq!(
        &sync[4..8],
        &current.wrapping_sub(11025).to_be_bytes()
    );
    assert_eq!(&sync[16..20], &current.to_be_bytes());

    // Extension bit only on the first sync.
    assert_eq!(session.make_sync_packet(8, 11025)[0], 0x80);
}

// -------------------------------------------------------------- cipher

#[test]
fn packet_cipher_roundtrip() {
    let secret = [0x11u8; 64];
    let mut cipher = PacketCipher::new(&secret).unwrap();

    let header = audio_header(false, 5, 1760, 0xDEAD_BEEF);
    let sealed = cipher.seal_packet(&header, b"alac frame bytes").unwrap();

    // header | ciphertext | tag | nonce tail
    assert_eq!(&sealed[..12], &header);
    assert_eq!(sealed.len(), 12 + 16 + crate::crypto::CHACHA_TAG_LEN + 8);
    assert_ne!(&sealed[12..28], b"alac frame bytes");

    let opened = cipher.open_packet(&sealed).unwrap();
    assert_eq!(opened, b"alac frame bytes");
    assert_eq!(cipher.packets_sealed(), 1);
}

#[test]
fn packet_cipher_uses_only_32_key_bytes() {
    // A 64-byte transient secret and its 32-byte prefix must agree.
    let secret = {
        let mut s = [0u8; 64];
        for (i, b) in s.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            {
                *b = i as u8;
            }
        }
        s
    };
    let mut long = PacketCipher::new(&secret).unwrap();
    let mut short = PacketCipher::new(&secret[..32]).unwrap();

    let header = audio_header(true, 0, 0, 0);
    assert_eq!(
        long.seal_packet(&header, b"x").unwrap(),
        short.seal_packet(&header, b"x").unwrap()
    );
}

#[test]
fn packet_cipher_binds_header_as_aad() {
    let mut cipher = PacketCipher::new(&[0x22u8; 32]).unwrap();
    let header = audio_header(false, 9, 3168, 1);
    let mut sealed = cipher.seal_packet(&header, b"payload").unwrap();

    // Flip a timestamp bit: authentication must fail.
    sealed[5] ^= 0x01;
    assert!(cipher.open_packet(&sealed).is_err());
}

#[test]
fn packet_cipher_rejects_short_key() {
    assert!(matches!(
        PacketCipher::new(&[0u8; 16]),
        Err(RtpError::BadKeyLength(16))
    ));
}
