use crate::error::TransportError;

pub const DEFAULT_OPC_TCP_PORT: u16 = 4840;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointScheme {
    /// `opc.tcp://` - raw TCP binding
    OpcTcp,
    /// `opc.ws://` - WebSocket binding, plain
    OpcWs,
    /// `opc.wss://` - WebSocket binding over TLS
    OpcWss,
}

impl EndpointScheme {
    pub fn is_websocket(&self) -> bool {
        matches!(self, EndpointScheme::OpcWs | EndpointScheme::OpcWss)
    }
}

/// A parsed endpoint URL of the form `opc.tcp://host:port/path`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointUrl {
    pub scheme: EndpointScheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl EndpointUrl {
    pub fn parse(url: &str) -> Result<EndpointUrl, TransportError> {
        let (scheme, rest) = if let Some(rest) = url.strip_prefix("opc.tcp://") {
            (EndpointScheme::OpcTcp, rest)
        } else if let Some(rest) = url.strip_prefix("opc.wss://") {
            (EndpointScheme::OpcWss, rest)
        } else if let Some(rest) = url.strip_prefix("opc.ws://") {
            (EndpointScheme::OpcWs, rest)
        } else {
            return Err(TransportError::InvalidEndpointUrl(format!(
                "unsupported scheme in {:?}",
                url
            )));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(TransportError::InvalidEndpointUrl(format!(
                "missing host in {:?}",
                url
            )));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            // IP V6 literal, e.g. [::1]:4840
            let closing = bracketed.find(']').ok_or_else(|| {
                TransportError::InvalidEndpointUrl(format!("unterminated IPv6 literal in {:?}", url))
            })?;
            let host = &bracketed[..closing];
            match bracketed[closing + 1..].strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if bracketed[closing + 1..].is_empty() => (host, None),
                None => {
                    return Err(TransportError::InvalidEndpointUrl(format!(
                        "garbage after IPv6 literal in {:?}",
                        url
                    )))
                }
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };
        if host.is_empty() {
            return Err(TransportError::InvalidEndpointUrl(format!(
                "missing host in {:?}",
                url
            )));
        }

        let port = match port {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                TransportError::InvalidEndpointUrl(format!("invalid port {:?} in {:?}", raw, url))
            })?,
            None => DEFAULT_OPC_TCP_PORT,
        };

        Ok(EndpointUrl {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `host:port`, with IPv6 literals re-bracketed, as expected by socket addresses.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The URL the WebSocket library dials. `opc.wss` maps to `wss` (the library does not
    ///  recognize the `opc.` prefixed scheme).
    pub fn websocket_url(&self) -> String {
        let scheme = match self.scheme {
            EndpointScheme::OpcWss => "wss",
            _ => "ws",
        };
        format!("{}://{}{}", scheme, self.authority(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain("opc.tcp://localhost:4840/path", EndpointScheme::OpcTcp, "localhost", 4840, "/path")]
    #[case::default_port("opc.tcp://server.example", EndpointScheme::OpcTcp, "server.example", 4840, "")]
    #[case::no_path("opc.tcp://10.0.0.1:12345", EndpointScheme::OpcTcp, "10.0.0.1", 12345, "")]
    #[case::deep_path("opc.tcp://h:1/a/b/c", EndpointScheme::OpcTcp, "h", 1, "/a/b/c")]
    #[case::websocket("opc.ws://h:8080/ws", EndpointScheme::OpcWs, "h", 8080, "/ws")]
    #[case::secure_websocket("opc.wss://h:443/", EndpointScheme::OpcWss, "h", 443, "/")]
    #[case::ipv6("opc.tcp://[::1]:4840/x", EndpointScheme::OpcTcp, "::1", 4840, "/x")]
    #[case::ipv6_default_port("opc.tcp://[fe80::1]", EndpointScheme::OpcTcp, "fe80::1", 4840, "")]
    fn test_parse(
        #[case] url: &str,
        #[case] scheme: EndpointScheme,
        #[case] host: &str,
        #[case] port: u16,
        #[case] path: &str,
    ) {
        let parsed = EndpointUrl::parse(url).unwrap();
        assert_eq!(parsed.scheme, scheme);
        assert_eq!(parsed.host, host);
        assert_eq!(parsed.port, port);
        assert_eq!(parsed.path, path);
    }

    #[rstest]
    #[case::http_scheme("http://localhost:4840/")]
    #[case::no_scheme("localhost:4840")]
    #[case::empty("")]
    #[case::missing_host("opc.tcp:///path")]
    #[case::bad_port("opc.tcp://h:notaport/")]
    #[case::port_overflow("opc.tcp://h:70000/")]
    #[case::unterminated_ipv6("opc.tcp://[::1:4840/")]
    fn test_parse_rejected(#[case] url: &str) {
        assert!(matches!(
            EndpointUrl::parse(url),
            Err(TransportError::InvalidEndpointUrl(_))
        ));
    }

    #[test]
    fn test_authority_rebrackets_ipv6() {
        let parsed = EndpointUrl::parse("opc.tcp://[::1]:4840/x").unwrap();
        assert_eq!(parsed.authority(), "[::1]:4840");
    }

    #[test]
    fn test_websocket_url() {
        let parsed = EndpointUrl::parse("opc.wss://h:8443/stream").unwrap();
        assert_eq!(parsed.websocket_url(), "wss://h:8443/stream");

        let parsed = EndpointUrl::parse("opc.ws://h:8080/stream").unwrap();
        assert_eq!(parsed.websocket_url(), "ws://h:8080/stream");
    }
}
