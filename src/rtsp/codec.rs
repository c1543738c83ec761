use super::{RtspError, RtspResponse, StatusCode};

const MAX_RESPONSE: usize = 1024 * 1024;

/// Incremental RTSP response parser.
///
/// Feed raw (already decrypted) bytes with [`feed`](Self::feed), pull out
/// complete responses with [`next_response`](Self::next_response).
#[derive(Default)]
pub struct ResponseCodec {
    buffer: Vec<u8>,
}

impl ResponseCodec {
    /// Fresh codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append stream bytes.
    ///
    /// # Errors
    /// Fails if the buffered response exceeds the size cap.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), RtspError> {
        if self.buffer.len() + bytes.len() > MAX_RESPONSE {
            return Err(RtspError::ResponseTooLarge(self.buffer.len() + bytes.len()));
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Try to pull one complete response out of the buffer.
    ///
    /// # Errors
    /// Fails on malformed status lines or headers.
    pub fn next_response(&mut self) -> Result<Option<RtspResponse>, RtspError> {
        // Head = status line + headers, terminated by the blank line.
        let Some(head_end) = find(&self.buffer, b"\r\n\r\n") else {
            return Ok(None);
        };
        let head = &self.buffer[..head_end];

        let mut lines = head.split(|&b| b == b'\n').map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        });

        let status_line = lines
            .next()
            .ok_or(RtspError::MalformedResponse("empty head"))?;
        let (status, reason) = parse_status_line(&status_line)?;

        let mut headers = Vec::new();
        let mut content_length = 0usize;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(RtspError::MalformedResponse("header without colon"))?;
            let name = name.trim().to_string();
            let value = value.trim().to_string();
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = value
                    .parse()
                    .map_err(|_| RtspError::MalformedResponse("bad content length"))?;
            }
            headers.push((name, value));
        }

        let body_start = head_end + 4;
        if self.buffer.len() < body_start + content_length {
            return Ok(None);
        }

        let body = self.buffer[body_start..body_start + content_length].to_vec();
        self.buffer.drain(..body_start + content_length);

        Ok(Some(RtspResponse {
            status,
            reason,
            headers,
            body,
        }))
    }

    /// Bytes waiting in the buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_status_line(line: &str) -> Result<(StatusCode, String), RtspError> {
    // "RTSP/1.0 200 OK"
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or(RtspError::MalformedResponse("missing version"))?;
    if !version.starts_with("RTSP/") {
        return Err(RtspError::MalformedResponse("not an RTSP status line"));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or(RtspError::MalformedResponse("bad status code"))?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok((StatusCode(status), reason))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
