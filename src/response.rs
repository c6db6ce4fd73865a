//! Response sentinels and the status/cookie value objects of spec.md
//! §3/§4.5/§6.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ConfigError;

/// `HttpStatusInformation { code, reason }` (spec.md §8 round-trip law):
/// `100 ≤ code ≤ 999` and `reason.len() ≤ 8192`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    code: u16,
    reason: String,
}

impl StatusInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Result<Self, ConfigError> {
        if !(100..=999).contains(&code) {
            return Err(ConfigError::StatusOutOfRange(code));
        }
        let reason = reason.into();
        if reason.len() > 8192 {
            return Err(ConfigError::ReasonTooLong);
        }
        Ok(StatusInfo { code, reason })
    }

    /// Builds from a bare numeric status, using the canonical reason phrase.
    pub fn from_code(code: u16) -> Result<Self, ConfigError> {
        Self::new(code, canonical_reason(code))
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Canonical reason phrases for the statuses this core emits on its own
/// behalf; anything else falls back to a generic phrase (a full reason
/// phrase table is the out-of-scope MIME/status database, spec.md §1).
pub fn canonical_reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Content Too Large",
        418 => "I'm a Teapot",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// `Set-Cookie` fields (spec.md §6). Name and value are URL-encoded.
#[derive(Debug, Clone)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        SetCookie {
            name: name.into(),
            value: value.into(),
            expires: None,
            max_age: None,
            domain: None,
            path: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    pub fn to_header_value(&self) -> String {
        let mut out = format!(
            "{}={}",
            urlencoding::encode(&self.name),
            urlencoding::encode(&self.value)
        );
        if let Some(expires) = self.expires {
            out.push_str(&format!("; Expires={}", expires.format("%a, %d %b %Y %H:%M:%S GMT")));
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={max_age}"));
        }
        if let Some(domain) = &self.domain {
            out.push_str(&format!("; Domain={domain}"));
        }
        if let Some(path) = &self.path {
            out.push_str(&format!("; Path={path}"));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = &self.same_site {
            out.push_str(&format!("; SameSite={same_site}"));
        }
        out
    }
}

/// A fully-formed, non-sentinel response.
#[derive(Debug, Clone)]
pub struct NormalResponse {
    pub status: StatusInfo,
    /// Headers in insertion order (spec.md §4.5 step 17).
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub chunked: bool,
}

impl NormalResponse {
    pub fn new(status: StatusInfo) -> Self {
        NormalResponse {
            status,
            headers: Vec::new(),
            content_type: None,
            body: Vec::new(),
            chunked: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// A response value carrying one of the five special sentinels of
/// spec.md §4.5, or a normal response.
#[derive(Debug)]
pub enum CoreResponse {
    Normal(NormalResponse),
    /// Close stream, no bytes.
    Empty,
    /// Stream already written by the handler (SSE/WebSocket); outcome
    /// `StreamClosed`. Carries the number of bytes the session flushed.
    StreamClosed { bytes_sent: u64 },
    /// Handler threw; outcome `UncaughtExceptionThrown`.
    Error(crate::error::BoxError),
    /// Close TCP silently; outcome `ClosedStream`.
    Close,
    /// Used by the trailing-slash step (spec.md §4.5 step 12).
    Redirect301 { location: String },
}

impl CoreResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        CoreResponse::Normal(NormalResponse {
            status: StatusInfo::from_code(200).expect("200 is in range"),
            headers: Vec::new(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.into(),
            chunked: false,
        })
    }

    pub fn not_found() -> Self {
        CoreResponse::Normal(NormalResponse {
            status: StatusInfo::from_code(404).expect("404 is in range"),
            headers: Vec::new(),
            content_type: Some("text/plain; charset=utf-8".to_string()),
            body: b"404 Not Found".to_vec(),
            chunked: false,
        })
    }

    pub fn forbidden(body: impl Into<Vec<u8>>) -> Self {
        CoreResponse::Normal(NormalResponse {
            status: StatusInfo::from_code(403).expect("403 is in range"),
            headers: Vec::new(),
            content_type: Some("text/plain; charset=utf-8".to_string()),
            body: body.into(),
            chunked: false,
        })
    }

    pub fn with_status(code: u16, body: impl Into<Vec<u8>>) -> Result<Self, ConfigError> {
        Ok(CoreResponse::Normal(NormalResponse {
            status: StatusInfo::from_code(code)?,
            headers: Vec::new(),
            content_type: None,
            body: body.into(),
            chunked: false,
        }))
    }

    pub fn json<T: Serialize>(data: &T, status_code: u16) -> Self {
        match serde_json::to_vec(data) {
            Ok(body) => CoreResponse::Normal(NormalResponse {
                status: StatusInfo::from_code(status_code).unwrap_or_else(|_| {
                    StatusInfo::from_code(200).expect("200 is in range")
                }),
                headers: Vec::new(),
                content_type: Some("application/json; charset=utf-8".to_string()),
                body,
                chunked: false,
            }),
            Err(_) => CoreResponse::Normal(NormalResponse {
                status: StatusInfo::from_code(500).expect("500 is in range"),
                headers: Vec::new(),
                content_type: Some("application/json; charset=utf-8".to_string()),
                body: b"{\"error\":\"Serialization failed\"}".to_vec(),
                chunked: false,
            }),
        }
    }
}

/// Maps a response sentinel onto its default outcome tag (spec.md §7
/// taxonomy). Callers that already know a more specific outcome (a
/// middleware/handler exception, a DNS failure) should pass that outcome
/// through explicitly instead of deriving it here.
pub fn outcome_for(resp: &CoreResponse) -> crate::error::DispatchOutcome {
    use crate::error::DispatchOutcome;
    match resp {
        CoreResponse::Normal(_) => DispatchOutcome::Executed,
        CoreResponse::Empty => DispatchOutcome::NoResponse,
        CoreResponse::StreamClosed { .. } => DispatchOutcome::StreamClosed,
        CoreResponse::Error(_) => DispatchOutcome::UncaughtExceptionThrown,
        CoreResponse::Close => DispatchOutcome::ClosedStream,
        CoreResponse::Redirect301 { .. } => DispatchOutcome::Executed,
    }
}

/// Builds CORS response headers for the OPTIONS preflight shortcut
/// (spec.md §4.5 step 9, §8 scenario 2).
pub fn cors_preflight_response(cors: &crate::host::CorsPolicy, request_origin: Option<&str>) -> NormalResponse {
    let mut resp = NormalResponse::new(StatusInfo::from_code(200).expect("200 is in range"));
    for (name, value) in cors.response_headers(request_origin) {
        resp = resp.with_header(name, value);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_info_round_trips() {
        let s = StatusInfo::new(299, "X").unwrap();
        assert_eq!(s.code(), 299);
        assert_eq!(s.reason(), "X");
    }

    #[test]
    fn status_info_rejects_out_of_range() {
        assert!(StatusInfo::new(99, "x").is_err());
        assert!(StatusInfo::new(1000, "x").is_err());
    }

    #[test]
    fn status_info_rejects_long_reason() {
        let reason = "a".repeat(8193);
        assert!(StatusInfo::new(200, reason).is_err());
    }

    #[test]
    fn set_cookie_url_encodes_name_and_value() {
        let c = SetCookie::new("na me", "va lue");
        assert!(c.to_header_value().starts_with("na%20me=va%20lue"));
    }

    #[test]
    fn set_cookie_includes_all_fields() {
        let mut c = SetCookie::new("sid", "abc");
        c.max_age = Some(3600);
        c.domain = Some("example.com".into());
        c.path = Some("/".into());
        c.secure = true;
        c.http_only = true;
        c.same_site = Some("Lax".into());
        let header = c.to_header_value();
        assert!(header.contains("Max-Age=3600"));
        assert!(header.contains("Domain=example.com"));
        assert!(header.contains("Secure"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Lax"));
    }
}
