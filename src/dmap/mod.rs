//! DMAP encoding for the now-playing side channel.
//!
//! `SET_PARAMETER` with `application/x-dmap-tagged` carries track text as
//! DMAP: 4-byte content code, big-endian length, payload. Receivers only
//! read the `mlit` listing item we send.

use crate::types::TrackMetadata;

/// Track title
pub const ITEM_NAME: &[u8; 4] = b"minm";
/// Artist
pub const SONG_ARTIST: &[u8; 4] = b"asar";
/// Album
pub const SONG_ALBUM: &[u8; 4] = b"asal";
/// Genre
pub const SONG_GENRE: &[u8; 4] = b"asgn";
/// Track number
pub const SONG_TRACK_NUMBER: &[u8; 4] = b"astn";
/// Disc number
pub const SONG_DISC_NUMBER: &[u8; 4] = b"asdn";
/// Duration in milliseconds
pub const SONG_TIME: &[u8; 4] = b"astm";
/// Listing item container
pub const LISTING_ITEM: &[u8; 4] = b"mlit";

/// Incremental DMAP writer.
#[derive(Default)]
pub struct DmapWriter {
    buffer: Vec<u8>,
}

impl DmapWriter {
    /// Fresh writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a string field.
    pub fn string(&mut self, code: &[u8; 4], value: &str) {
        self.raw(code, value.as_bytes());
    }

    /// Append an integer field, sized to the smallest of 1/2/4/8 bytes.
    pub fn int(&mut self, code: &[u8; 4], value: i64) {
        self.buffer.extend_from_slice(code);
        if let Ok(v) = u8::try_from(value) {
            self.buffer.extend_from_slice(&1u32.to_be_bytes());
            self.buffer.push(v);
        } else if let Ok(v) = i16::try_from(value) {
            self.buffer.extend_from_slice(&2u32.to_be_bytes());
            self.buffer.extend_from_slice(&v.to_be_bytes());
        } else if let Ok(v) = i32::try_from(value) {
            self.buffer.extend_from_slice(&4u32.to_be_bytes());
            self.buffer.extend_from_slice(&v.to_be_bytes());
        } else {
            self.buffer.extend_from_slice(&8u32.to_be_bytes());
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    /// Append raw payload bytes under a code.
    pub fn raw(&mut self, code: &[u8; 4], value: &[u8]) {
        self.buffer.extend_from_slice(code);
        #[allow(clippy::cast_possible_truncation)]
        self.buffer
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(value);
    }

    /// Take the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Encode track metadata as the `mlit`-wrapped DMAP body the `SEND_TEXT`
/// sequence ships.
#[must_use]
pub fn encode_track(track: &TrackMetadata) -> Vec<u8> {
    let mut item = DmapWriter::new();

    if let Some(ref title) = track.title {
        item.string(ITEM_NAME, title);
    }
    if let Some(ref artist) = track.artist {
        item.string(SONG_ARTIST, artist);
    }
    if let Some(ref album) = track.album {
        item.string(SONG_ALBUM, album);
    }
    if let Some(ref genre) = track.genre {
        item.string(SONG_GENRE, genre);
    }
    if let Some(n) = track.track_number {
        item.int(SONG_TRACK_NUMBER, i64::from(n));
    }
    if let Some(n) = track.disc_number {
        item.int(SONG_DISC_NUMBER, i64::from(n));
    }
    if let Some(ms) = track.duration_ms {
        item.int(SONG_TIME, i64::from(ms));
    }

    let mut out = DmapWriter::new();
    out.raw(LISTING_ITEM, &item.finish());
    out.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'a>(buf: &'a [u8], code: &[u8; 4]) -> Option<&'a [u8]> {
        let mut pos = 0;
        while pos + 8 <= buf.len() {
            let len = u32::from_be_bytes(buf[pos + 4..pos + 8].try_into().unwrap()) as usize;
            if &buf[pos..pos + 4] == code {
                return Some(&buf[pos + 8..pos + 8 + len]);
            }
            pos += 8 + len;
        }
        None
    }

    #[test]
    fn track_encodes_inside_listing_item() {
        let track = TrackMetadata {
            title: Some("Station to Station".into()),
            artist: Some("David Bowie".into()),
            duration_ms: Some(615_000),
            ..TrackMetadata::default()
        };

        let body = encode_track(&track);
        let item = field(&body, LISTING_ITEM).expect("mlit wrapper");

        assert_eq!(field(item, ITEM_NAME).unwrap(), b"Station to Station");
        assert_eq!(field(item, SONG_ARTIST).unwrap(), b"David Bowie");
        assert_eq!(
            field(item, SONG_TIME).unwrap(),
            &615_000u32.to_be_bytes()[..]
        );
        assert!(field(item, SONG_ALBUM).is_none());
    }

    #[test]
    fn int_fields_shrink() {
        let mut w = DmapWriter::new();
        w.int(SONG_TRACK_NUMBER, 7);
        let buf = w.finish();
        assert_eq!(&buf[4..8], &1u32.to_be_bytes());
        assert_eq!(buf[8], 7);

        let mut w = DmapWriter::new();
        w.int(SONG_TIME, 615_000);
        let buf = w.finish();
        assert_eq!(&buf[4..8], &4u32.to_be_bytes());
    }

    #[test]
    fn empty_track_still_wraps() {
        let body = encode_track(&TrackMetadata::default());
        assert_eq!(&body[..4], LISTING_ITEM);
        assert_eq!(&body[4..8], &0u32.to_be_bytes());
    }
}
