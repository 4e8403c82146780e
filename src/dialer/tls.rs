use super::{
  split_host_port, BoxedStream, DialContext, DialOptions, Dialer, NextDialer, ProxyFn, SKIP_TLS,
};
use crate::error::DialError;
use async_trait::async_trait;
use std::{convert::TryFrom, io, sync::Arc};
use tokio_rustls::{rustls::ServerName, TlsConnector};

/// Applied after the catch-all provider, so the handshake runs over whatever
/// tunnel the proxy layer established.
pub const TLS_PRIORITY: i32 = 100;

/// Wraps the working dialer in a TLS client handshake whenever the option set
/// carries a client config.
pub struct TlsNextDialer;

impl NextDialer for TlsNextDialer {
  fn priority(&self) -> i32 {
    TLS_PRIORITY
  }

  fn matches(&self, options: &DialOptions) -> bool {
    options.tls_config().is_some()
  }

  fn next(&self, options: &Arc<DialOptions>, inner: Box<dyn Dialer>) -> Box<dyn Dialer> {
    Box::new(TlsDialer {
      options: options.clone(),
      inner,
    })
  }

  fn proxy(&self, _options: &Arc<DialOptions>, inner: ProxyFn) -> ProxyFn {
    inner
  }
}

struct TlsDialer {
  options: Arc<DialOptions>,
  inner: Box<dyn Dialer>,
}

impl TlsDialer {
  fn server_name(&self, addr: &str) -> Result<ServerName, DialError> {
    let configured = self.options.server_name();
    let name = if configured.is_empty() {
      split_host_port(addr)?.0
    } else {
      configured.to_string()
    };
    ServerName::try_from(name.as_str())
      .map_err(|_| DialError::Config(format!("invalid tls server name {}", name)))
  }
}

#[async_trait]
impl Dialer for TlsDialer {
  async fn dial(&self, cx: &DialContext, addr: &str) -> Result<BoxedStream, DialError> {
    let stream = self.inner.dial(cx, addr).await?;
    // a handshake already performed further down the chain sets the skip flag
    if self.options.skips(SKIP_TLS) {
      return Ok(stream);
    }
    let config = match self.options.tls_config() {
      Some(config) => config.clone(),
      None => return Ok(stream),
    };
    let server_name = self.server_name(addr)?;
    let connector = TlsConnector::from(config);
    let stream = connector
      .connect(server_name, stream)
      .await
      .map_err(|e| DialError::Handshake {
        addr: addr.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
      })?;
    Ok(Box::new(stream))
  }
}
