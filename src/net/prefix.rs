//! Address prefixes (`scheme://host:port/path/`).
//!
//! A prefix names where a listener binds and which request paths it owns.
//! `+` and `*` as host bind every interface.

use thiserror::Error;
use url::Url;

/// Error returned when a prefix string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    #[error("not a URL: {0}")]
    Malformed(String),

    #[error("unsupported scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("missing host")]
    MissingHost,

    #[error("query or fragment not allowed in a prefix")]
    TrailingComponents,
}

/// Host and port a listener binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindKey {
    pub host: String,
    pub port: u16,
}

impl BindKey {
    /// `host:port` form accepted by `tokio::net::lookup_host`.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for BindKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.authority())
    }
}

/// A parsed, normalised address prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    raw: String,
    secure: bool,
    host: String,
    port: u16,
    path: String,
}

impl Prefix {
    /// Parse a prefix such as `http://+:8096/emby/`.
    pub fn parse(raw: &str) -> Result<Self, PrefixError> {
        let candidate = substitute_wildcard(raw);
        let url = Url::parse(&candidate).map_err(|e| PrefixError::Malformed(e.to_string()))?;

        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(PrefixError::UnsupportedScheme(other.to_string())),
        };
        if url.query().is_some() || url.fragment().is_some() {
            return Err(PrefixError::TrailingComponents);
        }

        let host = url.host_str().ok_or(PrefixError::MissingHost)?.to_string();
        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        let mut path = url.path().to_string();
        if !path.ends_with('/') {
            path.push('/');
        }

        Ok(Self {
            raw: raw.to_string(),
            secure,
            host,
            port,
            path,
        })
    }

    /// The prefix exactly as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Where a listener for this prefix binds.
    pub fn bind_key(&self) -> BindKey {
        BindKey {
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// Whether `path` falls under this prefix (ASCII case-insensitive).
    ///
    /// `/api` matches the prefix `/api/`.
    pub fn matches_path(&self, path: &str) -> bool {
        let own = self.path.as_bytes();
        let candidate = path.as_bytes();
        if candidate.len() >= own.len() {
            return candidate[..own.len()].eq_ignore_ascii_case(own);
        }
        candidate.len() + 1 == own.len() && own[..candidate.len()].eq_ignore_ascii_case(candidate)
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Replace a `+`/`*` host with the IPv4 any-address so it parses as a URL.
fn substitute_wildcard(raw: &str) -> String {
    let Some(scheme_end) = raw.find("://") else {
        return raw.to_string();
    };
    let host_start = scheme_end + 3;
    let rest = &raw[host_start..];
    let host_len = rest.find([':', '/']).unwrap_or(rest.len());

    match &rest[..host_len] {
        "+" | "*" => format!("{}0.0.0.0{}", &raw[..host_start], &rest[host_len..]),
        _ => raw.to_string(),
    }
}
