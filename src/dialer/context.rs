use serde_json::Value;
use std::{
  collections::HashMap,
  net::SocketAddr,
  sync::Mutex,
};

pub const REQUEST_CLIENT_ADDR: &str = "RequestClientAddr";
pub const REQUEST_SERVER_ADDR: &str = "RequestServerAddr";
pub const PROXY_CLIENT_ADDR: &str = "ProxyClientAddr";
pub const PROXY_SERVER_ADDR: &str = "ProxyServerAddr";

/// Addresses of the inbound connection a dial happens on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConn {
  pub local_addr: SocketAddr,
  pub remote_addr: SocketAddr,
}

/// Typed per-dial side channel.
///
/// The chain never infers anything about the originating client: callers tag
/// the context explicitly (via `with_client`) before dialing, e.g. so a
/// PROXY protocol delegate can announce the original peer.
#[derive(Debug, Default)]
pub struct DialContext {
  client: Option<ClientConn>,
  vars: Mutex<HashMap<String, Value>>,
}

impl DialContext {
  pub fn new() -> DialContext {
    DialContext::default()
  }

  pub fn with_client(client: ClientConn) -> DialContext {
    DialContext {
      client: Some(client),
      vars: Mutex::new(HashMap::new()),
    }
  }

  pub fn client(&self) -> Option<ClientConn> {
    self.client
  }

  pub fn set_var(&self, key: &str, value: Value) {
    self.vars.lock().unwrap().insert(key.to_string(), value);
  }

  pub fn var(&self, key: &str) -> Option<Value> {
    self.vars.lock().unwrap().get(key).cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  pub fn vars_have_get_set_semantics() {
    let context = DialContext::new();

    assert_eq!(context.var(REQUEST_CLIENT_ADDR), None);

    context.set_var(REQUEST_CLIENT_ADDR, json!("10.0.0.1:55123"));
    assert_eq!(context.var(REQUEST_CLIENT_ADDR), Some(json!("10.0.0.1:55123")));

    context.set_var(REQUEST_CLIENT_ADDR, json!("10.0.0.2:55124"));
    assert_eq!(context.var(REQUEST_CLIENT_ADDR), Some(json!("10.0.0.2:55124")));
  }

  #[test]
  pub fn client_metadata_is_only_present_when_tagged() {
    assert_eq!(DialContext::new().client(), None);

    let client = ClientConn {
      local_addr: "127.0.0.1:443".parse().unwrap(),
      remote_addr: "192.0.2.7:51034".parse().unwrap(),
    };
    assert_eq!(DialContext::with_client(client).client(), Some(client));
  }
}
