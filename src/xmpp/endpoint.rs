//! Messaging-host parsing.
//!
//! Converts the messaging-host argument (bare host, `host:port`, `tls://host:port`,
//! etc.) into the `XmppEndpoint` the client dials.

use std::fmt;

/// Well-known XMPP client port (STARTTLS or plain).
pub const XMPP_CLIENT_PORT: u16 = 5222;
/// Conventional direct-TLS client port.
pub const XMPPS_CLIENT_PORT: u16 = 5223;

/// Connection mode for the XMPP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Plain TCP connection (upgraded via STARTTLS when the server offers it)
    Tcp,
    /// TLS from the first byte
    DirectTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmppEndpoint {
    pub host: String,
    pub port: u16,
    pub mode: ConnectionMode,
}

impl fmt::Display for XmppEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            ConnectionMode::Tcp => write!(f, "{}:{}", self.host, self.port),
            ConnectionMode::DirectTls => write!(f, "tls://{}:{}", self.host, self.port),
        }
    }
}

/// Parse the messaging-host argument.
///
/// Supported formats:
/// - `tls://host:port` → Direct TLS connection
/// - `tls://host`      → Direct TLS on port 5223
/// - `tcp://host:port` → TCP connection
/// - `tcp://host`      → TCP on port 5222
/// - `host:port`       → Direct connection (port 5223 = TLS, otherwise TCP)
/// - `host`            → TCP on port 5222
pub fn parse_endpoint(server: &str) -> XmppEndpoint {
    let trimmed = server.trim();

    if let Some(rest) = trimmed.strip_prefix("tls://") {
        let (host, port) = split_port(rest).unwrap_or((strip_brackets(rest), XMPPS_CLIENT_PORT));
        return XmppEndpoint {
            host: host.to_string(),
            port,
            mode: ConnectionMode::DirectTls,
        };
    }

    if let Some(rest) = trimmed.strip_prefix("tcp://") {
        let (host, port) = split_port(rest).unwrap_or((strip_brackets(rest), XMPP_CLIENT_PORT));
        return XmppEndpoint {
            host: host.to_string(),
            port,
            mode: ConnectionMode::Tcp,
        };
    }

    if let Some((host, port)) = split_port(trimmed) {
        let mode = if port == XMPPS_CLIENT_PORT {
            ConnectionMode::DirectTls
        } else {
            ConnectionMode::Tcp
        };
        return XmppEndpoint {
            host: host.to_string(),
            port,
            mode,
        };
    }

    XmppEndpoint {
        host: strip_brackets(trimmed).to_string(),
        port: XMPP_CLIENT_PORT,
        mode: ConnectionMode::Tcp,
    }
}

/// Split `host:port`, using the last colon so bracketed IPv6 hosts work.
/// An unbracketed IPv6 literal has no port.
fn split_port(input: &str) -> Option<(&str, u16)> {
    let (host, port_str) = input.rsplit_once(':')?;
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return None;
    }
    let port = port_str.parse::<u16>().ok()?;
    Some((strip_brackets(host), port))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str, port: u16, mode: ConnectionMode) -> XmppEndpoint {
        XmppEndpoint {
            host: host.to_string(),
            port,
            mode,
        }
    }

    #[test]
    fn test_parse_bare_host_uses_client_port() {
        assert_eq!(
            parse_endpoint("10.0.0.5"),
            endpoint("10.0.0.5", 5222, ConnectionMode::Tcp)
        );
    }

    #[test]
    fn test_parse_host_with_port() {
        assert_eq!(
            parse_endpoint("chat.example.com:5280"),
            endpoint("chat.example.com", 5280, ConnectionMode::Tcp)
        );
    }

    #[test]
    fn test_parse_port_5223_is_direct_tls() {
        assert_eq!(
            parse_endpoint("chat.example.com:5223"),
            endpoint("chat.example.com", 5223, ConnectionMode::DirectTls)
        );
    }

    #[test]
    fn test_parse_tls_uri() {
        assert_eq!(
            parse_endpoint("tls://chat.example.com"),
            endpoint("chat.example.com", 5223, ConnectionMode::DirectTls)
        );
        assert_eq!(
            parse_endpoint("tls://chat.example.com:5270"),
            endpoint("chat.example.com", 5270, ConnectionMode::DirectTls)
        );
    }

    #[test]
    fn test_parse_tcp_uri() {
        assert_eq!(
            parse_endpoint("tcp://chat.example.com"),
            endpoint("chat.example.com", 5222, ConnectionMode::Tcp)
        );
        assert_eq!(
            parse_endpoint("tcp://chat.example.com:5223"),
            endpoint("chat.example.com", 5223, ConnectionMode::Tcp)
        );
    }

    #[test]
    fn test_parse_ipv6() {
        assert_eq!(
            parse_endpoint("[::1]:5222"),
            endpoint("::1", 5222, ConnectionMode::Tcp)
        );
        assert_eq!(parse_endpoint("::1"), endpoint("::1", 5222, ConnectionMode::Tcp));
        assert_eq!(parse_endpoint("[::1]"), endpoint("::1", 5222, ConnectionMode::Tcp));
        assert_eq!(
            parse_endpoint("tls://[::1]"),
            endpoint("::1", 5223, ConnectionMode::DirectTls)
        );
        assert_eq!(
            parse_endpoint("tcp://[::1]"),
            endpoint("::1", 5222, ConnectionMode::Tcp)
        );
        assert_eq!(
            parse_endpoint("tls://[2001:db8::5]:5270"),
            endpoint("2001:db8::5", 5270, ConnectionMode::DirectTls)
        );
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(
            parse_endpoint("  10.0.0.5  "),
            endpoint("10.0.0.5", 5222, ConnectionMode::Tcp)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(parse_endpoint("10.0.0.5").to_string(), "10.0.0.5:5222");
        assert_eq!(parse_endpoint("tls://h").to_string(), "tls://h:5223");
    }
}
