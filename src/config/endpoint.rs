//! Endpoint URL parsing and credential redaction
//!
//! Accepted form: `redis://[user[:password]@]host[:port][/db]`. Parsing goes
//! through `redis::IntoConnectionInfo`, so percent-encoded credentials are
//! decoded and IPv6 hosts are written in brackets (`redis://[::1]:6379`).

use crate::error::{StoreError, StoreResult};
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use std::fmt;

/// Port used when the URL does not carry one
pub const DEFAULT_PORT: u16 = 6379;

/// A parsed store endpoint
#[derive(Clone)]
pub struct Endpoint {
    url: String,
    host: String,
    port: u16,
    info: ConnectionInfo,
}

impl Endpoint {
    /// Parse an endpoint URL. Only plain TCP `redis://` endpoints are accepted.
    pub fn parse(url: &str) -> StoreResult<Self> {
        let invalid = |reason: String| {
            StoreError::Configuration(format!("endpoint {}: {}", redact_url(url), reason))
        };

        let info = url
            .into_connection_info()
            .map_err(|e| invalid(e.to_string()))?;
        let (host, port) = match &info.addr {
            ConnectionAddr::Tcp(host, port) => (host.clone(), *port),
            _ => return Err(invalid("only redis:// TCP endpoints are supported".to_string())),
        };
        if host.is_empty() {
            return Err(invalid("missing host".to_string()));
        }
        if info.redis.db < 0 || info.redis.db > i64::from(u32::MAX) {
            return Err(invalid(format!("database index {} is out of range", info.redis.db)));
        }

        Ok(Endpoint {
            url: url.to_string(),
            host,
            port,
            info,
        })
    }

    /// Endpoint for a server on the local host at `port`
    pub fn local(port: u16) -> StoreResult<Self> {
        Endpoint::parse(&format!("redis://127.0.0.1:{}", port))
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Username, percent-decoded
    pub fn username(&self) -> Option<&str> {
        self.info.redis.username.as_deref()
    }

    /// Password, percent-decoded
    pub fn password(&self) -> Option<&str> {
        self.info.redis.password.as_deref()
    }

    /// Database index from the URL path; `None` for the default database
    pub fn database(&self) -> Option<u32> {
        match self.info.redis.db {
            0 => None,
            db => u32::try_from(db).ok(),
        }
    }

    /// Credentials and database used by the connection handshake
    pub(crate) fn session_info(&self) -> &RedisConnectionInfo {
        &self.info.redis
    }

    /// The URL with any password masked; the only form that may be logged
    pub fn redacted(&self) -> String {
        redact_url(&self.url)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Endpoint {}

// Debug goes through redaction so endpoints can sit inside logged structs.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.redacted())
            .field("database", &self.database())
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Mask the credential of a URL: everything between the first `:` of the
/// userinfo and the last `@` becomes `***`. The userinfo may itself contain
/// `/`, `?`, `#` or `@`, so the last `@` after the scheme ends it. URLs
/// without a credential are returned as-is.
pub fn redact_url(url: &str) -> String {
    let start = url.find("://").map(|i| i + 3).unwrap_or(0);
    let Some(at) = url[start..].rfind('@').map(|i| start + i) else {
        return url.to_string();
    };
    let Some(colon) = url[start..at].find(':').map(|i| start + i) else {
        return url.to_string();
    };
    format!("{}***{}", &url[..=colon], &url[at..])
}
