use crate::{
  config::{CookieConfig, StickyConfig},
  error::DispatchError,
  error_response::service_unavailable,
};
use async_trait::async_trait;
use cookie::{Cookie, SameSite};
use hyper::{
  header::{Entry, HeaderValue, COOKIE, SET_COOKIE},
  Body, Request, Response,
};
use log::{debug, warn};
use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, RwLock},
};
use url::Url;

pub mod heap;

use heap::{Deadline, MinHeap};

/// Terminal dispatch target of the balancer, one per backend.
#[async_trait]
pub trait RequestHandler: Send + Sync {
  async fn handle(&self, request: Request<Body>) -> Response<Body>;
}

/// Heap entry: a backend handler with its scheduling state.
struct NamedHandler {
  name: String,
  weight: f64,
  deadline: f64,
  url: Option<Url>,
  handler: Arc<dyn RequestHandler>,
}

impl Deadline for NamedHandler {
  fn deadline(&self) -> f64 {
    self.deadline
  }
}

/// Index entry, kept per raw name and per hashed name.
#[derive(Clone)]
struct HandlerRef {
  name: String,
  handler: Arc<dyn RequestHandler>,
}

#[derive(Debug)]
struct StickyCookieConfig {
  name: String,
  secure: bool,
  http_only: bool,
  same_site: Option<SameSite>,
  max_age: i64,
  path: String,
}

fn convert_same_site(same_site: &str) -> Option<SameSite> {
  match same_site {
    "none" => Some(SameSite::None),
    "lax" => Some(SameSite::Lax),
    "strict" => Some(SameSite::Strict),
    _ => None,
  }
}

struct BalancerInner {
  handlers: MinHeap<NamedHandler>,
  handler_map: HashMap<String, HandlerRef>,
  // names of currently healthy handlers
  status: HashSet<String>,
  // names of terminating yet still serving handlers, never selected
  fenced: HashSet<String>,
  cur_deadline: f64,
}

type StatusUpdater = Arc<dyn Fn(bool) + Send + Sync>;

/// A weighted round robin load balancer based on Earliest Deadline First (EDF).
/// (https://en.wikipedia.org/wiki/Earliest_deadline_first_scheduling)
/// Each pick selects the entry with the earliest deadline; entries get
/// deadlines of `cur_deadline + 1 / weight`, which yields weighted round robin
/// behavior with floating point weights and an O(log n) pick time.
pub struct Balancer {
  sticky_cookie: Option<StickyCookieConfig>,
  wants_health_check: bool,
  inner: RwLock<BalancerInner>,
  updaters: Mutex<Vec<StatusUpdater>>,
}

impl Balancer {
  pub fn new(sticky: Option<&StickyConfig>, wants_health_check: bool) -> Balancer {
    let sticky_cookie = sticky
      .and_then(|sticky| sticky.cookie.as_ref())
      .map(|cookie| sticky_cookie_config(cookie));

    Balancer {
      sticky_cookie,
      wants_health_check,
      inner: RwLock::new(BalancerInner {
        handlers: MinHeap::new(),
        handler_map: HashMap::new(),
        status: HashSet::new(),
        fenced: HashSet::new(),
        cur_deadline: 0.0,
      }),
      updaters: Mutex::new(Vec::new()),
    }
  }

  /// Adds a handler. A handler with a non-positive weight is ignored.
  pub fn add(&self, name: &str, handler: Arc<dyn RequestHandler>, weight: Option<f64>, fenced: bool) {
    self.add_url(name, handler, weight, None, fenced);
  }

  /// Adds a handler with an informational backend URL.
  /// A handler with a non-positive weight is ignored.
  pub fn add_url(
    &self,
    name: &str,
    handler: Arc<dyn RequestHandler>,
    weight: Option<f64>,
    url: Option<Url>,
    fenced: bool,
  ) {
    let weight = weight.unwrap_or(1.0);
    if weight <= 0.0 {
      // non-positive weight is meaningless
      return;
    }

    let mut inner = self.inner.write().unwrap();
    let deadline = inner.cur_deadline + 1.0 / weight;
    inner.handlers.push(NamedHandler {
      name: name.to_string(),
      weight,
      deadline,
      url,
      handler: handler.clone(),
    });
    inner.status.insert(name.to_string());
    if fenced {
      inner.fenced.insert(name.to_string());
    }
    let handler_ref = HandlerRef {
      name: name.to_string(),
      handler,
    };
    inner.handler_map.insert(name.to_string(), handler_ref.clone());
    inner.handler_map.insert(hash(name), handler_ref);
  }

  /// Records that the given child is now up or down. When the aggregate
  /// liveness of the balancer flips, every registered status updater is
  /// invoked once with the new aggregate, so health churn among many backends
  /// debounces into a single parent-visible transition.
  pub fn set_status(&self, name: &str, up: bool) {
    let propagate = {
      let mut inner = self.inner.write().unwrap();

      // a name that was never added must not count towards liveness
      if !inner.handler_map.contains_key(name) {
        warn!("Ignoring status update for unknown handler {}", name);
        return;
      }

      let up_before = !inner.status.is_empty();
      debug!("Setting status of {} to {}", name, if up { "UP" } else { "DOWN" });
      if up {
        inner.status.insert(name.to_string());
      } else {
        inner.status.remove(name);
      }
      let up_after = !inner.status.is_empty();

      if up_before == up_after {
        debug!("Still {}, no need to propagate", if up_after { "UP" } else { "DOWN" });
        None
      } else {
        debug!("Propagating new {} status", if up_after { "UP" } else { "DOWN" });
        Some(up_after)
      }
    };

    // updaters run on the calling thread, outside the balancer lock
    if let Some(up_after) = propagate {
      let updaters = self.updaters.lock().unwrap().clone();
      for updater in updaters {
        updater(up_after);
      }
    }
  }

  /// Adds a hook that runs whenever the aggregate status of the balancer
  /// changes. Initialization-time only; not meant to race with `set_status`.
  pub fn register_status_updater<F>(&self, updater: F) -> Result<(), DispatchError>
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    if !self.wants_health_check {
      return Err(DispatchError::HealthCheckDisabled);
    }
    self.updaters.lock().unwrap().push(Arc::new(updater));
    Ok(())
  }

  /// Picks the next backend: pop the earliest deadline, advance the cursor,
  /// recompute the entry's deadline and push it back, until a healthy and
  /// unfenced handler comes up.
  pub fn next_server(&self) -> Result<(String, Arc<dyn RequestHandler>), DispatchError> {
    let mut inner = self.inner.write().unwrap();

    if inner.handlers.is_empty() || inner.status.is_empty() {
      return Err(DispatchError::NoAvailableServer);
    }
    // every healthy handler fenced means nothing is selectable
    if !inner.status.iter().any(|name| !inner.fenced.contains(name)) {
      return Err(DispatchError::NoAvailableServer);
    }

    loop {
      let mut handler = inner.handlers.pop().expect("heap cannot be empty here");

      // cur_deadline becomes the handler's deadline so that a newly added
      // entry competes fairly with the old ones.
      inner.cur_deadline = handler.deadline;
      handler.deadline += 1.0 / handler.weight;

      let name = handler.name.clone();
      let selected = handler.handler.clone();
      inner.handlers.push(handler);

      if inner.status.contains(&name) && !inner.fenced.contains(&name) {
        debug!("Service selected by WRR: {}", name);
        return Ok((name, selected));
      }
    }
  }

  /// Serves one request: sticky cookie fast path first, EDF selection
  /// otherwise. Handler dispatch happens outside the balancer lock.
  pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
    if let Some(sticky) = &self.sticky_cookie {
      if let Some(handler) = self.sticky_handler(&request, sticky) {
        return handler.handle(request).await;
      }
    }

    let (name, handler) = match self.next_server() {
      Ok(server) => server,
      Err(_) => return service_unavailable(),
    };

    let mut response = handler.handle(request).await;

    if let Some(sticky) = &self.sticky_cookie {
      let cookie_value = match HeaderValue::from_str(&build_sticky_cookie(sticky, &hash(&name)).to_string()) {
        Ok(value) => value,
        Err(e) => {
          warn!("Error while encoding sticky cookie: {}", e);
          return response;
        }
      };
      match response.headers_mut().entry(SET_COOKIE) {
        Entry::Occupied(mut entry) => {
          entry.append(cookie_value);
        }
        Entry::Vacant(entry) => {
          entry.insert(cookie_value);
        }
      }
    }

    response
  }

  /// Informational URL of a registered backend.
  pub fn server_url(&self, name: &str) -> Option<Url> {
    let inner = self.inner.read().unwrap();
    let url = inner
      .handlers
      .iter()
      .find(|handler| handler.name == name)
      .and_then(|handler| handler.url.clone());
    url
  }

  fn sticky_handler(&self, request: &Request<Body>, sticky: &StickyCookieConfig) -> Option<Arc<dyn RequestHandler>> {
    let cookie = try_parse_sticky_cookie(request, &sticky.name)?;

    let inner = self.inner.read().unwrap();
    let handler_ref = inner.handler_map.get(cookie.value())?;
    if inner.status.contains(&handler_ref.name) {
      Some(handler_ref.handler.clone())
    } else {
      None
    }
  }
}

fn sticky_cookie_config(cookie: &CookieConfig) -> StickyCookieConfig {
  StickyCookieConfig {
    name: cookie.name.clone(),
    secure: cookie.secure,
    http_only: cookie.http_only,
    same_site: convert_same_site(&cookie.same_site),
    max_age: cookie.max_age,
    path: cookie.path.clone().unwrap_or_else(|| "/".to_string()),
  }
}

fn try_parse_sticky_cookie<'a>(request: &'a Request<Body>, name: &str) -> Option<Cookie<'a>> {
  let cookie_header = request.headers().get(COOKIE)?;

  cookie_header.to_str().ok()?.split(';').find_map(|cookie_str| {
    let cookie = Cookie::parse(cookie_str.trim()).ok()?;
    if cookie.name() == name {
      Some(cookie)
    } else {
      None
    }
  })
}

fn build_sticky_cookie<'a>(sticky: &'a StickyCookieConfig, value: &'a str) -> Cookie<'a> {
  let mut builder = Cookie::build(sticky.name.as_str(), value)
    .path(sticky.path.as_str())
    .http_only(sticky.http_only)
    .secure(sticky.secure);
  if let Some(same_site) = sticky.same_site {
    builder = builder.same_site(same_site);
  }
  if sticky.max_age != 0 {
    builder = builder.max_age(cookie::time::Duration::seconds(sticky.max_age));
  }
  builder.finish()
}

/// Stable 64 bit FNV-1 hash, hex encoded. The cookie carries this instead of
/// the raw handler name so internal identifiers never leak to clients.
fn hash(input: &str) -> String {
  let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
  for byte in input.as_bytes() {
    hash = hash.wrapping_mul(0x100_0000_01b3);
    hash ^= u64::from(*byte);
  }
  format!("{:x}", hash)
}
