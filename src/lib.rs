//! Traffic dispatch core: a weighted round robin balancer with sticky
//! sessions and health gating, and a composable outbound dialer chain
//! (proxy tunnels, TLS, PROXY protocol delegation).

pub mod balancer;
pub mod config;
pub mod dialer;
pub mod error;
pub mod error_response;
pub mod filter;
