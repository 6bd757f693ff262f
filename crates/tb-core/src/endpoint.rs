//! Connection endpoints
//!
//! An endpoint names where a session connects (or where a host listens):
//!
//! - `tcp://host:port` or bare `host:port`: raw frames over TCP
//! - `ws://host:port/path`: frames carried in WebSocket binary messages
//!
//! IPv6 literals use brackets: `ws://[::1]:8080/ws`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConnectError;

/// Link type used for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    /// Raw TCP byte stream
    Tcp,
    /// WebSocket binary messages
    WebSocket,
}

/// A parsed `scheme://host:port/path` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    /// Parse an endpoint string
    pub fn parse(input: &str) -> Result<Self, ConnectError> {
        let invalid = |reason: &str| ConnectError::InvalidEndpoint {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some(("tcp", rest)) => (Scheme::Tcp, rest),
            Some(("ws", rest)) => (Scheme::WebSocket, rest),
            Some(("wss", _)) => {
                return Err(invalid("wss is not supported; terminate TLS in front of the host"))
            }
            Some((other, _)) => return Err(invalid(&format!("unknown scheme '{}'", other))),
            None => (Scheme::Tcp, trimmed),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 address"))?;
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port"))?;
            (host, port)
        } else {
            authority
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port"))?
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        // Port 0 is allowed so a host can ask for an ephemeral port
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;

        let path = match scheme {
            Scheme::Tcp if path.is_empty() || path == "/" => String::new(),
            Scheme::Tcp => return Err(invalid("tcp endpoints do not take a path")),
            Scheme::WebSocket if path.is_empty() => "/".to_string(),
            Scheme::WebSocket => path.to_string(),
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path,
        })
    }

    /// Link type
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or IP literal, without brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request path for WebSocket endpoints (empty for TCP)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port`, suitable for socket address resolution
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Tcp => write!(f, "tcp://{}", self.authority()),
            Scheme::WebSocket => write!(f, "ws://{}{}", self.authority(), self.path),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ConnectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_websocket() {
        let ep = Endpoint::parse("ws://localhost:8080/ws").unwrap();
        assert_eq!(ep.scheme(), Scheme::WebSocket);
        assert_eq!(ep.host(), "localhost");
        assert_eq!(ep.port(), 8080);
        assert_eq!(ep.path(), "/ws");
        assert_eq!(ep.to_string(), "ws://localhost:8080/ws");
    }

    #[test]
    fn test_parse_websocket_default_path() {
        let ep = Endpoint::parse("ws://example.com:80").unwrap();
        assert_eq!(ep.path(), "/");
    }

    #[test]
    fn test_parse_bare_is_tcp() {
        let ep = Endpoint::parse("10.0.0.5:7000").unwrap();
        assert_eq!(ep.scheme(), Scheme::Tcp);
        assert_eq!(ep.authority(), "10.0.0.5:7000");
        assert_eq!(ep.to_string(), "tcp://10.0.0.5:7000");
    }

    #[test]
    fn test_parse_ipv6() {
        let ep = Endpoint::parse("ws://[::1]:9000/term").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.authority(), "[::1]:9000");
        assert_eq!(ep.to_string(), "ws://[::1]:9000/term");
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "ws://localhost",
            "ws://:8080/ws",
            "tcp://host:notaport",
            "tcp://host:80/path",
            "http://host:80",
            "wss://host:443/ws",
            "ws://[::1/ws",
        ] {
            let err = Endpoint::parse(bad).unwrap_err();
            assert!(!err.is_retryable(), "{} should not be retryable", bad);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let ep = Endpoint::parse("ws://127.0.0.1:8080/ws").unwrap();
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, r#""ws://127.0.0.1:8080/ws""#);
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ep);
        assert!(serde_json::from_str::<Endpoint>(r#""nope""#).is_err());
    }
}
