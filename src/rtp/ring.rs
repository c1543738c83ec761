use bytes::Bytes;

/// One packet as the ring remembers it: plaintext payload plus the
/// counters it was sent with. Encryption is per session, so the ring
/// stays cipher-agnostic.
#[derive(Debug, Clone)]
pub struct RingPacket {
    /// Sequence number the packet went out with
    pub sequence: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// Marker bit state when first sent
    pub first: bool,
    /// Encoded (ALAC) payload
    pub payload: Bytes,
}

/// Fixed-capacity retransmit cache keyed by sequence number.
///
/// A slot holds the most recent packet whose sequence maps onto it, so
/// pushing naturally evicts the packet `capacity` sequence numbers older.
/// Lookups verify the stored sequence: a request older than the ring
/// reach simply misses, it never fabricates a packet.
pub struct RetransmitRing {
    slots: Vec<Option<RingPacket>>,
}

impl RetransmitRing {
    /// Ring with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Remember a packet.
    pub fn push(&mut self, packet: RingPacket) {
        let index = usize::from(packet.sequence) % self.slots.len();
        self.slots[index] = Some(packet);
    }

    /// The packet with exactly this sequence number, if still cached.
    #[must_use]
    pub fn get(&self, sequence: u16) -> Option<&RingPacket> {
        let index = usize::from(sequence) % self.slots.len();
        self.slots[index]
            .as_ref()
            .filter(|packet| packet.sequence == sequence)
    }

    /// Packets for a retransmit request, in original order. Sequence
    /// numbers that already left the ring are skipped.
    pub fn range(&self, seq_start: u16, seq_len: u16) -> impl Iterator<Item = &RingPacket> {
        (0..seq_len).filter_map(move |i| self.get(seq_start.wrapping_add(i)))
    }

    /// Number of cached packets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Drop every cached packet (after FLUSH).
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}
