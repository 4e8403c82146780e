use hyper::{Body, Response, StatusCode};

pub fn service_unavailable() -> Response<Body> {
  Response::builder()
    .status(StatusCode::SERVICE_UNAVAILABLE)
    .body(Body::from("no available server"))
    .unwrap()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  pub fn service_unavailable_is_a_503() {
    let response = service_unavailable();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
  }
}
