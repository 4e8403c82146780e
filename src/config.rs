use serde::Deserialize;

/// Transport descriptor for raw TCP backends.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TcpTransportConfig {
  /// Proxy URL used to reach the backend, e.g. `socks5://127.0.0.1:1080`.
  /// Empty means no configured proxy.
  #[serde(default)]
  pub proxy: String,
  #[serde(default)]
  pub tls: Option<TlsClientConfig>,
  #[serde(default)]
  pub proxy_protocol: Option<ProxyProtocolConfig>,
}

/// Transport descriptor for application-level (HTTP) backends.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HttpTransportConfig {
  #[serde(default)]
  pub proxy: String,
  #[serde(default)]
  pub server_name: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TlsClientConfig {
  /// SNI server name. Empty means "derive from the dialed host".
  #[serde(default)]
  pub server_name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProxyProtocolConfig {
  #[serde(default = "default_proxy_protocol_version")]
  pub version: u8,
  /// Delay in milliseconds the caller should wait before tearing the
  /// connection down. Surfaced only, never scheduled by this crate.
  #[serde(default)]
  pub termination_delay_ms: Option<u64>,
}

fn default_proxy_protocol_version() -> u8 {
  2
}

/// Sticky session policy of a weighted service.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StickyConfig {
  #[serde(default)]
  pub cookie: Option<CookieConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CookieConfig {
  pub name: String,
  #[serde(default)]
  pub secure: bool,
  #[serde(default)]
  pub http_only: bool,
  /// One of "none", "lax", "strict". Anything else leaves SameSite unset.
  #[serde(default)]
  pub same_site: String,
  /// Max-Age in seconds, 0 means a session cookie.
  #[serde(default)]
  pub max_age: i64,
  pub path: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  pub fn tcp_transport_deserializes_with_defaults() {
    let transport: TcpTransportConfig = serde_json::from_str("{}").unwrap();

    assert_eq!(transport.proxy, "");
    assert_eq!(transport.tls, None);
    assert_eq!(transport.proxy_protocol, None);
  }

  #[test]
  pub fn proxy_protocol_version_defaults_to_two() {
    let transport: TcpTransportConfig =
      serde_json::from_str(r#"{ "proxy_protocol": { "termination_delay_ms": 500 } }"#).unwrap();

    let proxy_protocol = transport.proxy_protocol.unwrap();
    assert_eq!(proxy_protocol.version, 2);
    assert_eq!(proxy_protocol.termination_delay_ms, Some(500));
  }

  #[test]
  pub fn cookie_config_deserializes() {
    let sticky: StickyConfig = serde_json::from_str(
      r#"{ "cookie": { "name": "lb", "secure": true, "same_site": "lax", "max_age": 60 } }"#,
    )
    .unwrap();

    let cookie = sticky.cookie.unwrap();
    assert_eq!(cookie.name, "lb");
    assert!(cookie.secure);
    assert!(!cookie.http_only);
    assert_eq!(cookie.same_site, "lax");
    assert_eq!(cookie.max_age, 60);
    assert_eq!(cookie.path, None);
  }
}
