/// Now-playing text pushed to receivers that asked for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    /// Track title
    pub title: Option<String>,
    /// Artist
    pub artist: Option<String>,
    /// Album
    pub album: Option<String>,
    /// Genre
    pub genre: Option<String>,
    /// Track number on the album
    pub track_number: Option<u16>,
    /// Disc number
    pub disc_number: Option<u16>,
    /// Track length in milliseconds
    pub duration_ms: Option<u32>,
}

/// Playback progress in RTP time, `start/current/end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// RTP time of track start
    pub start: u32,
    /// RTP time of the current position
    pub current: u32,
    /// RTP time of track end
    pub end: u32,
}

impl Progress {
    /// Render the `text/parameters` body for `SET_PARAMETER`.
    #[must_use]
    pub fn to_body(&self) -> String {
        format!("progress: {}/{}/{}\r\n", self.start, self.current, self.end)
    }
}

/// Cover art image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkFormat {
    /// JPEG image
    Jpeg,
    /// PNG image
    Png,
}

impl ArtworkFormat {
    /// Sniff the format from magic bytes.
    #[must_use]
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            Some(Self::Png)
        } else {
            None
        }
    }

    /// MIME type used as the `SET_PARAMETER` content type.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Cover art payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    /// Raw image bytes
    pub data: Vec<u8>,
    /// Image format
    pub format: ArtworkFormat,
}

impl Artwork {
    /// Wrap image bytes, sniffing the format (JPEG when unknown).
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let format = ArtworkFormat::detect(&data).unwrap_or(ArtworkFormat::Jpeg);
        Self { data, format }
    }
}
