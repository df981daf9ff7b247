use std::fmt;
use std::str::FromStr;

/// The local (host, port) pair the SOCKS5 proxy listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelEndpoint {
    host: String,
    port: u16,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid endpoint (missing port): {0}")]
    MissingPort(String),
    #[error("invalid endpoint (bad IPv6 format): {0}")]
    BadIpv6(String),
    #[error("invalid endpoint (empty host): {0}")]
    EmptyHost(String),
    #[error("invalid endpoint port: {0}")]
    InvalidPort(String),
}

impl TunnelEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(value: &str) -> Result<Self, EndpointError> {
        let (host, port_str) = if let Some(rest) = value.strip_prefix('[') {
            // IPv6 bracketed: [host]:port
            rest.split_once("]:")
                .ok_or_else(|| EndpointError::BadIpv6(value.to_string()))?
        } else {
            value
                .rsplit_once(':')
                .ok_or_else(|| EndpointError::MissingPort(value.to_string()))?
        };
        if host.is_empty() {
            return Err(EndpointError::EmptyHost(value.to_string()));
        }
        let port: u16 = port_str
            .parse()
            .map_err(|_| EndpointError::InvalidPort(port_str.to_string()))?;
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, bracketing IPv6 literals so the result can be dialled.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for TunnelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

impl FromStr for TunnelEndpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let ep = TunnelEndpoint::parse("127.0.0.1:8080").unwrap();
        assert_eq!(ep.host(), "127.0.0.1");
        assert_eq!(ep.port(), 8080);
        assert_eq!(ep.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_parse_hostname() {
        let ep: TunnelEndpoint = "localhost:1080".parse().unwrap();
        assert_eq!(ep, TunnelEndpoint::new("localhost", 1080));
    }

    #[test]
    fn test_parse_ipv6_bracketed() {
        let ep = TunnelEndpoint::parse("[::1]:8080").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.address(), "[::1]:8080");
    }

    #[test]
    fn test_parse_missing_port() {
        assert_eq!(
            TunnelEndpoint::parse("localhost"),
            Err(EndpointError::MissingPort("localhost".to_string()))
        );
    }

    #[test]
    fn test_parse_invalid_port() {
        assert!(matches!(
            TunnelEndpoint::parse("localhost:99999"),
            Err(EndpointError::InvalidPort(_))
        ));
        assert!(matches!(
            TunnelEndpoint::parse("localhost:abc"),
            Err(EndpointError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_parse_empty_host() {
        assert!(matches!(
            TunnelEndpoint::parse(":8080"),
            Err(EndpointError::EmptyHost(_))
        ));
    }

    #[test]
    fn test_parse_ipv6_missing_bracket() {
        assert!(matches!(
            TunnelEndpoint::parse("[::1:8080"),
            Err(EndpointError::BadIpv6(_))
        ));
    }
}
