use std::io;

use thiserror::Error;

/// Errors surfaced by the balancer and the filter chain builder.
#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("no available server")]
  NoAvailableServer,

  #[error("health check not enabled in config for this weighted service")]
  HealthCheckDisabled,

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("filter {0} does not exist")]
  UnknownFilter(String),

  #[error("recursion detected in filter chain: {0}")]
  FilterRecursion(String),
}

/// Errors surfaced by a composed dialer.
///
/// Configuration-shape problems (bad proxy URLs) never show up here: the chain
/// builder recovers those locally with a logged fallback. Cancellation is
/// tokio-native, dropping a dial future aborts the connect or handshake and
/// closes any partially established connection.
#[derive(Debug, Error)]
pub enum DialError {
  #[error("tls handshake with {addr} failed")]
  Handshake {
    addr: String,
    #[source]
    source: io::Error,
  },

  #[error("invalid dial target: {0}")]
  Config(String),

  #[error(transparent)]
  Io(#[from] io::Error),
}
