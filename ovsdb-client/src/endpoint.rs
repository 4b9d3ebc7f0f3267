//! Server endpoint addressing.
//!
//! Endpoints use the ovsdb-server connection syntax:
//! `tcp:HOST[:PORT]`, `ssl:HOST[:PORT]` and `unix:PATH`.

use crate::error::ClientError;
use ovsdb_protocol::DEFAULT_PORT;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where and how to reach an OVSDB server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Ssl { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn ssl(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Ssl {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix(path.into())
    }

    /// Returns whether the endpoint requires TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, Endpoint::Ssl { .. })
    }

    /// Host name for TCP and SSL endpoints.
    pub fn host(&self) -> Option<&str> {
        match self {
            Endpoint::Tcp { host, .. } | Endpoint::Ssl { host, .. } => Some(host),
            Endpoint::Unix(_) => None,
        }
    }

    /// `host:port` suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> Option<String> {
        match self {
            Endpoint::Tcp { host, port } | Endpoint::Ssl { host, port } => {
                if host.contains(':') {
                    Some(format!("[{}]:{}", host, port))
                } else {
                    Some(format!("{}:{}", host, port))
                }
            }
            Endpoint::Unix(_) => None,
        }
    }
}

fn parse_host_port(s: &str, original: &str) -> Result<(String, u16), ClientError> {
    let invalid = || ClientError::InvalidEndpoint(original.to_string());

    // [v6-address]:port or [v6-address]
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail {
            "" => DEFAULT_PORT,
            _ => tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .ok_or_else(invalid)?,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        return Ok((host.to_string(), port));
    }

    let (host, port) = match s.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
        None => (s, DEFAULT_PORT),
    };
    if host.is_empty() || host.contains(':') {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| ClientError::InvalidEndpoint(s.to_string()))?;

        match scheme {
            "tcp" => {
                let (host, port) = parse_host_port(rest, s)?;
                Ok(Endpoint::Tcp { host, port })
            }
            "ssl" => {
                let (host, port) = parse_host_port(rest, s)?;
                Ok(Endpoint::Ssl { host, port })
            }
            "unix" if !rest.is_empty() => Ok(Endpoint::Unix(PathBuf::from(rest))),
            _ => Err(ClientError::InvalidEndpoint(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { .. } => write!(f, "tcp:{}", self.socket_addr().unwrap_or_default()),
            Endpoint::Ssl { .. } => write!(f, "ssl:{}", self.socket_addr().unwrap_or_default()),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp() {
        let endpoint: Endpoint = "tcp:127.0.0.1:6641".parse().unwrap();
        assert_eq!(endpoint, Endpoint::tcp("127.0.0.1", 6641));
        assert_eq!(endpoint.socket_addr().unwrap(), "127.0.0.1:6641");
        assert!(!endpoint.is_tls());

        let endpoint: Endpoint = "tcp:ovsdb.local".parse().unwrap();
        assert_eq!(endpoint, Endpoint::tcp("ovsdb.local", DEFAULT_PORT));
    }

    #[test]
    fn test_parse_ipv6() {
        let endpoint: Endpoint = "ssl:[::1]:6640".parse().unwrap();
        assert_eq!(endpoint, Endpoint::ssl("::1", 6640));
        assert_eq!(endpoint.socket_addr().unwrap(), "[::1]:6640");
        assert_eq!(endpoint.to_string(), "ssl:[::1]:6640");
        assert!(endpoint.is_tls());

        let endpoint: Endpoint = "tcp:[fe80::1]".parse().unwrap();
        assert_eq!(endpoint, Endpoint::tcp("fe80::1", DEFAULT_PORT));
    }

    #[test]
    fn test_parse_unix() {
        let endpoint: Endpoint = "unix:/var/run/openvswitch/db.sock".parse().unwrap();
        assert_eq!(endpoint, Endpoint::unix("/var/run/openvswitch/db.sock"));
        assert_eq!(endpoint.host(), None);
        assert_eq!(endpoint.to_string(), "unix:/var/run/openvswitch/db.sock");
    }

    #[test]
    fn test_parse_invalid() {
        for s in [
            "",
            "db.sock",
            "udp:1.2.3.4:1",
            "tcp:",
            "tcp:host:port",
            "tcp:::1:6640",
            "tcp:[::1",
            "unix:",
        ] {
            assert!(
                matches!(s.parse::<Endpoint>(), Err(ClientError::InvalidEndpoint(_))),
                "{} should be rejected",
                s
            );
        }
    }
}
