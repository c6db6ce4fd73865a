//! C2 — Host Resolver, plus the `ListeningHost`/`ListeningPort`/`CorsPolicy`
//! data model of spec.md §3.

use std::sync::Arc;

use crate::error::ConfigError;
use crate::middleware::MiddlewareEntry;
use crate::pattern::dns_wildcard_match;
use crate::route::RouteTable;

/// How `Access-Control-Allow-Origin` is computed for a matched, CORS-enabled
/// route (spec.md §6).
#[derive(Debug, Clone)]
pub enum AllowOrigin {
    /// A single literal origin, including the `*` wildcard.
    Literal(String),
    /// One of several allowed origins: the response echoes back the
    /// request's `Origin` header iff it case-insensitively matches one of
    /// these.
    List(Vec<String>),
}

impl AllowOrigin {
    pub fn resolve_for(&self, request_origin: Option<&str>) -> Option<String> {
        match self {
            AllowOrigin::Literal(origin) => Some(origin.clone()),
            AllowOrigin::List(allowed) => {
                let origin = request_origin?;
                allowed
                    .iter()
                    .find(|candidate| candidate.eq_ignore_ascii_case(origin))
                    .cloned()
            }
        }
    }
}

/// A host's CORS policy (spec.md §3, §6 scenario 2).
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub allow_origin: AllowOrigin,
    pub allow_credentials: bool,
    pub expose_headers: Vec<String>,
    pub max_age: Option<u64>,
}

impl CorsPolicy {
    pub fn new(allow_origin: AllowOrigin) -> Self {
        CorsPolicy {
            allow_methods: Vec::new(),
            allow_headers: Vec::new(),
            allow_origin,
            allow_credentials: false,
            expose_headers: Vec::new(),
            max_age: None,
        }
    }

    /// Computes the headers spec.md §6 says CORS application owns, given the
    /// request's `Origin` header (if present).
    pub fn response_headers(&self, request_origin: Option<&str>) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if !self.allow_methods.is_empty() {
            headers.push(("Access-Control-Allow-Methods".to_string(), self.allow_methods.join(", ")));
        }
        if !self.allow_headers.is_empty() {
            headers.push(("Access-Control-Allow-Headers".to_string(), self.allow_headers.join(", ")));
        }
        if let Some(origin) = self.allow_origin.resolve_for(request_origin) {
            headers.push(("Access-Control-Allow-Origin".to_string(), origin));
        }
        if self.allow_credentials {
            headers.push(("Access-Control-Allow-Credentials".to_string(), "true".to_string()));
        }
        if !self.expose_headers.is_empty() {
            headers.push(("Access-Control-Expose-Headers".to_string(), self.expose_headers.join(", ")));
        }
        if let Some(max_age) = self.max_age {
            headers.push(("Access-Control-Max-Age".to_string(), max_age.to_string()));
        }
        headers
    }
}

/// A single listening endpoint: `scheme://hostname:port/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListeningPort {
    pub secure: bool,
    pub hostname_pattern: String,
    pub port: u16,
}

impl ListeningPort {
    /// Parses the port URL grammar of spec.md §6:
    /// `http|https "://" hostname ":" port "/"` — all parts required.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConfigError::MalformedPortUrl(url.to_string()))?;
        let secure = match scheme {
            "http" => false,
            "https" => true,
            _ => return Err(ConfigError::MalformedPortUrl(url.to_string())),
        };
        let rest = rest
            .strip_suffix('/')
            .ok_or_else(|| ConfigError::MalformedPortUrl(url.to_string()))?;
        let (hostname, port_str) = rest
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::MalformedPortUrl(url.to_string()))?;
        if hostname.is_empty() {
            return Err(ConfigError::MalformedPortUrl(url.to_string()));
        }
        let port: u16 = port_str
            .parse()
            .map_err(|_| ConfigError::MalformedPortUrl(url.to_string()))?;
        Ok(ListeningPort {
            secure,
            hostname_pattern: hostname.to_string(),
            port,
        })
    }

    /// Canonical string form; round-trips through [`Self::parse`].
    pub fn to_canonical_string(&self) -> String {
        format!(
            "{}://{}:{}/",
            if self.secure { "https" } else { "http" },
            self.hostname_pattern,
            self.port
        )
    }

    pub fn matches(&self, hostname: &str, port: u16) -> bool {
        self.port == port && dns_wildcard_match(&self.hostname_pattern, hostname)
    }
}

/// A bundle of ports + router + CORS policy (spec.md §3, glossary "Host").
pub struct ListeningHost {
    pub label: String,
    pub ports: Vec<ListeningPort>,
    pub cors: Option<CorsPolicy>,
    pub routes: RouteTable,
    pub global_middlewares: Vec<Arc<MiddlewareEntry>>,
    pub case_sensitive: bool,
    pub treat_head_as_get: bool,
    pub force_trailing_slash: bool,
    pub trust_x_forwarded_for: bool,
    pub trust_x_forwarded_host: bool,
    pub re_decode_headers_as_body_encoding: bool,
    pub reject_body_on_semantic_free_methods: bool,
    pub max_content_length: Option<u64>,
    pub culture: Option<String>,
}

impl PartialEq for ListeningHost {
    /// "Two hosts are equal iff their port lists are elementwise equal"
    /// (spec.md §3).
    fn eq(&self, other: &Self) -> bool {
        self.ports == other.ports
    }
}

impl ListeningHost {
    pub fn find_port(&self, hostname: &str, port: u16) -> Option<&ListeningPort> {
        self.ports.iter().find(|p| p.matches(hostname, port))
    }
}

/// C2 — resolves `(dns-safe-host, numeric-port)` to the first configured
/// host with a matching port (spec.md §4.2). When a host's
/// `trust_x_forwarded_host` flag is on, `forwarded_host` (if present)
/// replaces the dns-safe-host for matching against *that* host only —
/// the request's other host views are untouched.
pub fn resolve_host<'a>(
    hosts: &'a [ListeningHost],
    dns_safe_host: &str,
    forwarded_host: Option<&str>,
    port: u16,
) -> Option<&'a ListeningHost> {
    hosts.iter().find(|host| {
        let effective = if host.trust_x_forwarded_host {
            forwarded_host.unwrap_or(dns_safe_host)
        } else {
            dns_safe_host
        };
        host.find_port(effective, port).is_some()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_url_round_trips() {
        let p = ListeningPort::parse("https://api.example.com:8443/").unwrap();
        assert_eq!(p.to_canonical_string(), "https://api.example.com:8443/");
    }

    #[test]
    fn port_url_rejects_missing_port_or_slash() {
        assert!(ListeningPort::parse("http://example.com").is_err());
        assert!(ListeningPort::parse("http://example.com/").is_err());
        assert!(ListeningPort::parse("ftp://example.com:80/").is_err());
    }

    #[test]
    fn allow_origin_literal_vs_list() {
        let literal = AllowOrigin::Literal("*".to_string());
        assert_eq!(literal.resolve_for(None).as_deref(), Some("*"));

        let list = AllowOrigin::List(vec!["https://a.example".to_string()]);
        assert_eq!(list.resolve_for(Some("https://a.example")).as_deref(), Some("https://a.example"));
        assert_eq!(list.resolve_for(Some("https://b.example")), None);
    }

    #[test]
    fn cors_preflight_headers_match_scenario_2() {
        let mut cors = CorsPolicy::new(AllowOrigin::Literal("*".to_string()));
        cors.allow_methods = vec!["GET".to_string(), "POST".to_string()];
        cors.allow_headers = vec!["X-Auth".to_string()];
        cors.max_age = Some(3600);
        let headers = cors.response_headers(Some("https://example.com"));
        assert!(headers.contains(&("Access-Control-Allow-Methods".to_string(), "GET, POST".to_string())));
        assert!(headers.contains(&("Access-Control-Allow-Headers".to_string(), "X-Auth".to_string())));
        assert!(headers.contains(&("Access-Control-Allow-Origin".to_string(), "*".to_string())));
        assert!(headers.contains(&("Access-Control-Max-Age".to_string(), "3600".to_string())));
    }
}
