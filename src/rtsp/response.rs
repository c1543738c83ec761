/// RTSP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    /// 200 OK
    pub const OK: StatusCode = StatusCode(200);
    /// 401 Unauthorized (password or pairing required)
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    /// 403 Forbidden
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    /// 470 Connection Authorization Required (PIN pairing required)
    pub const AUTH_REQUIRED: StatusCode = StatusCode(470);

    /// Numeric value.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// 2xx?
    #[must_use]
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Authentication-related status (401, 403, 470)?
    #[must_use]
    pub fn is_auth_failure(self) -> bool {
        matches!(self.0, 401 | 403 | 470)
    }
}

/// A decoded RTSP response.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    /// Status code from the status line
    pub status: StatusCode,
    /// Reason phrase
    pub reason: String,
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Body bytes
    pub body: Vec<u8>,
}

impl RtspResponse {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 2xx?
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
