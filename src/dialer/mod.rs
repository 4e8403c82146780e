use crate::{
  config::{HttpTransportConfig, ProxyProtocolConfig, TcpTransportConfig},
  error::DialError,
};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use hyper::Uri;
use log::error;
use serde_json::Value;
use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex},
  time::Duration,
};
use tokio::{
  io::{AsyncRead, AsyncWrite},
  net::TcpStream,
};
use tokio_rustls::rustls::ClientConfig;
use url::Url;

pub mod context;
pub mod proxy;
pub mod tls;

pub use context::{ClientConn, DialContext};

/// Per-connection skip flag consumed by the TLS provider.
pub const SKIP_TLS: &str = "tls";

pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// A connection-establishing capability. Composed dialers nest arbitrarily:
/// proxy tunnels, TLS handshakes and PROXY protocol delegates all implement
/// this over some inner dialer, with a plain TCP dialer at the bottom.
///
/// Cancellation is cooperative: dropping the returned future aborts the
/// connect or handshake and releases any partially established connection.
#[async_trait]
pub trait Dialer: Send + Sync {
  async fn dial(&self, cx: &DialContext, addr: &str) -> Result<BoxedStream, DialError>;
}

/// The innermost network dialer.
#[derive(Debug, Default)]
pub struct TcpDialer;

impl TcpDialer {
  pub fn new() -> TcpDialer {
    TcpDialer
  }
}

#[async_trait]
impl Dialer for TcpDialer {
  async fn dial(&self, _cx: &DialContext, addr: &str) -> Result<BoxedStream, DialError> {
    let stream = TcpStream::connect(addr).await?;
    Ok(Box::new(stream))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
  Tcp,
  /// Application-level protocol (HTTP) transports; these resolve proxies at
  /// the HTTP layer and never tunnel through SOCKS here.
  Alp,
}

/// PROXY protocol behavior declared on an option set. The delegate performs
/// the actual header-announcing dial; the termination delay is surfaced for
/// the caller to schedule delayed teardown, this crate never schedules it.
#[derive(Clone)]
pub struct ProxyProtocol {
  pub delegate: Arc<dyn Dialer>,
  pub version: u8,
  pub termination_delay: Option<Duration>,
}

/// Declarative connection attributes driving chain composition.
///
/// Immutable after build except for the per-connection skip flags, which are
/// reset on every clone so concurrent chain resolutions never observe each
/// other's transient state.
pub struct DialOptions {
  proto: Proto,
  proxy: Option<Url>,
  server_name: String,
  tls: Option<Arc<ClientConfig>>,
  proxy_protocol: Option<ProxyProtocol>,
  plugin: HashMap<String, Value>,
  skip: Mutex<HashSet<String>>,
}

impl Clone for DialOptions {
  fn clone(&self) -> DialOptions {
    DialOptions {
      proto: self.proto,
      proxy: self.proxy.clone(),
      server_name: self.server_name.clone(),
      tls: self.tls.clone(),
      proxy_protocol: self.proxy_protocol.clone(),
      plugin: self.plugin.clone(),
      // transient per-resolution state, never carried over
      skip: Mutex::new(HashSet::new()),
    }
  }
}

impl DialOptions {
  pub fn proto(&self) -> Proto {
    self.proto
  }

  pub fn proxy(&self) -> Option<&Url> {
    self.proxy.as_ref()
  }

  pub fn server_name(&self) -> &str {
    &self.server_name
  }

  pub fn tls_config(&self) -> Option<&Arc<ClientConfig>> {
    self.tls.as_ref()
  }

  pub fn proxy_protocol(&self) -> Option<&ProxyProtocol> {
    self.proxy_protocol.as_ref()
  }

  pub fn plugin(&self, name: &str) -> Option<&Value> {
    self.plugin.get(name)
  }

  pub fn set_skip(&self, feature: &str) {
    self.skip.lock().unwrap().insert(feature.to_string());
  }

  pub fn skips(&self, feature: &str) -> bool {
    self.skip.lock().unwrap().contains(feature)
  }
}

/// Builder applying configuration fragments to an option set.
pub struct OptionsBuilder {
  options: DialOptions,
}

impl OptionsBuilder {
  pub fn new() -> OptionsBuilder {
    OptionsBuilder {
      options: DialOptions {
        proto: Proto::Tcp,
        proxy: None,
        server_name: String::new(),
        tls: None,
        proxy_protocol: None,
        plugin: HashMap::new(),
        skip: Mutex::new(HashSet::new()),
      },
    }
  }

  pub fn tcp(mut self, transport: &TcpTransportConfig) -> OptionsBuilder {
    self.options.proto = Proto::Tcp;
    self = self.proxy(&transport.proxy);
    if let Some(tls) = &transport.tls {
      self.options.server_name = tls.server_name.clone();
    }
    self
  }

  pub fn alp(mut self, transport: &HttpTransportConfig) -> OptionsBuilder {
    self.options.proto = Proto::Alp;
    self = self.proxy(&transport.proxy);
    self.options.server_name = transport.server_name.clone();
    self
  }

  /// A malformed proxy URL is logged and ignored; the chain later falls back
  /// to environment-driven proxy resolution.
  pub fn proxy(mut self, proxy: &str) -> OptionsBuilder {
    if proxy.is_empty() {
      return self;
    }
    match Url::parse(proxy) {
      Ok(url) => self.options.proxy = Some(url),
      Err(e) => error!("Error while creating transport proxy, {}", e),
    }
    self
  }

  pub fn server_name(mut self, server_name: &str) -> OptionsBuilder {
    self.options.server_name = server_name.to_string();
    self
  }

  pub fn tls(mut self, config: Arc<ClientConfig>) -> OptionsBuilder {
    self.options.tls = Some(config);
    self
  }

  pub fn proxy_protocol(mut self, delegate: Arc<dyn Dialer>, config: &ProxyProtocolConfig) -> OptionsBuilder {
    self.options.proxy_protocol = Some(ProxyProtocol {
      delegate,
      version: config.version,
      termination_delay: config.termination_delay_ms.map(Duration::from_millis),
    });
    self
  }

  pub fn plugin(mut self, name: &str, value: Value) -> OptionsBuilder {
    self.options.plugin.insert(name.to_string(), value);
    self
  }

  pub fn build(self) -> DialOptions {
    self.options
  }
}

impl Default for OptionsBuilder {
  fn default() -> OptionsBuilder {
    OptionsBuilder::new()
  }
}

/// Splits `host:port`, tolerating bracketed IPv6 literals.
pub(crate) fn split_host_port(addr: &str) -> Result<(String, u16), DialError> {
  let (host, port) = addr
    .rsplit_once(':')
    .ok_or_else(|| DialError::Config(format!("address {} has no port", addr)))?;
  let port = port
    .parse::<u16>()
    .map_err(|_| DialError::Config(format!("address {} has an invalid port", addr)))?;
  let host = host.trim_start_matches('[').trim_end_matches(']');
  if host.is_empty() {
    return Err(DialError::Config(format!("address {} has no host", addr)));
  }
  Ok((host.to_string(), port))
}

/// Resolves a proxy URL for an HTTP transport; `None` means direct.
pub type ProxyFn = Arc<dyn Fn(&Uri) -> Result<Option<Url>, DialError> + Send + Sync>;

/// A pluggable provider that conditionally wraps the working dialer (or the
/// working proxy resolver) based on the option set.
pub trait NextDialer: Send + Sync {
  /// Providers with a higher priority are applied earlier in the fold, so
  /// their dial side effects happen first on a connection attempt.
  fn priority(&self) -> i32;

  fn matches(&self, options: &DialOptions) -> bool;

  fn next(&self, options: &Arc<DialOptions>, inner: Box<dyn Dialer>) -> Box<dyn Dialer>;

  fn proxy(&self, options: &Arc<DialOptions>, inner: ProxyFn) -> ProxyFn;
}

/// Process-wide provider registry. Writes are initialization-time only;
/// afterwards the registry is shared read-only behind an `Arc`.
pub struct DialerRegistry {
  providers: Vec<Arc<dyn NextDialer>>,
}

impl DialerRegistry {
  pub fn new() -> DialerRegistry {
    DialerRegistry { providers: Vec::new() }
  }

  /// A registry preloaded with the built-in providers: the catch-all
  /// proxy/PROXY-protocol provider and the TLS provider.
  pub fn with_builtins() -> DialerRegistry {
    let mut registry = DialerRegistry::new();
    registry.provide(Arc::new(proxy::ProxyNextDialer));
    registry.provide(Arc::new(tls::TlsNextDialer));
    registry
  }

  /// Appends a provider and re-sorts descending by priority. The sort is
  /// stable, so registration order among equal priorities is preserved.
  pub fn provide(&mut self, provider: Arc<dyn NextDialer>) {
    self.providers.push(provider);
    self.providers.sort_by(|a, b| b.priority().cmp(&a.priority()));
  }

  pub fn providers(&self) -> &[Arc<dyn NextDialer>] {
    &self.providers
  }
}

impl Default for DialerRegistry {
  fn default() -> DialerRegistry {
    DialerRegistry::new()
  }
}

/// Adapter so a shared base dialer can sit at the bottom of several chains.
struct SharedDialer(Arc<dyn Dialer>);

#[async_trait]
impl Dialer for SharedDialer {
  async fn dial(&self, cx: &DialContext, addr: &str) -> Result<BoxedStream, DialError> {
    self.0.dial(cx, addr).await
  }
}

/// The chain-building dialer handed to transports. The effective chain is
/// resolved lazily on first dial and cached for the life of the option set;
/// later dials reuse it instead of re-walking the registry.
pub struct ComposedDialer {
  registry: Arc<DialerRegistry>,
  base: Arc<dyn Dialer>,
  options: DialOptions,
  chain: ArcSwapOption<Box<dyn Dialer>>,
}

impl ComposedDialer {
  pub fn new(registry: Arc<DialerRegistry>, base: Arc<dyn Dialer>, options: DialOptions) -> ComposedDialer {
    ComposedDialer {
      registry,
      base,
      options,
      chain: ArcSwapOption::const_empty(),
    }
  }

  /// Folds the matching providers over the base dialer, highest priority
  /// first with each step wrapping the previous working dialer. The fold
  /// direction is load-bearing: it makes a SOCKS tunnel come up before the
  /// TLS handshake runs over it.
  ///
  /// Concurrent first dials may build redundant, functionally equivalent
  /// chains; the last write wins and no lock is taken.
  fn resolve(&self) -> Arc<Box<dyn Dialer>> {
    if let Some(chain) = self.chain.load_full() {
      return chain;
    }

    let options = Arc::new(self.options.clone());
    let mut dialer: Box<dyn Dialer> = Box::new(SharedDialer(self.base.clone()));
    for provider in self.registry.providers() {
      if provider.matches(&options) {
        dialer = provider.next(&options, dialer);
      }
    }

    let chain = Arc::new(dialer);
    self.chain.store(Some(chain.clone()));
    chain
  }
}

#[async_trait]
impl Dialer for ComposedDialer {
  async fn dial(&self, cx: &DialContext, addr: &str) -> Result<BoxedStream, DialError> {
    self.resolve().dial(cx, addr).await
  }
}

/// Mirrors the dialer fold for HTTP transports that only need proxy-URL
/// resolution: same registry, same match predicates, same priority order,
/// but each provider's `proxy()` decorator instead of `next()`.
pub fn build_proxy_fn(registry: &DialerRegistry, options: DialOptions) -> ProxyFn {
  let options = Arc::new(options);
  let mut proxy_fn: ProxyFn = Arc::new(proxy::proxy_from_environment);
  for provider in registry.providers() {
    if provider.matches(&options) {
      proxy_fn = provider.proxy(&options, proxy_fn);
    }
  }
  proxy_fn
}

pub fn new_tcp_dialer(
  registry: Arc<DialerRegistry>,
  transport: &TcpTransportConfig,
  tls: Option<Arc<ClientConfig>>,
) -> ComposedDialer {
  let mut builder = OptionsBuilder::new().tcp(transport);
  if let Some(tls) = tls {
    builder = builder.tls(tls);
  }
  ComposedDialer::new(registry, Arc::new(TcpDialer::new()), builder.build())
}

pub fn new_http_dialer(
  registry: Arc<DialerRegistry>,
  transport: &HttpTransportConfig,
  tls: Option<Arc<ClientConfig>>,
) -> ComposedDialer {
  let mut builder = OptionsBuilder::new().alp(transport);
  if let Some(tls) = tls {
    builder = builder.tls(tls);
  }
  ComposedDialer::new(registry, Arc::new(TcpDialer::new()), builder.build())
}

pub fn new_http_proxy(registry: &DialerRegistry, transport: &HttpTransportConfig) -> ProxyFn {
  build_proxy_fn(registry, OptionsBuilder::new().alp(transport).build())
}
