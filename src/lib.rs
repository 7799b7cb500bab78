//! Hostgate - an authenticating reverse proxy that routes by hostname
//!
//! This library provides a gateway that:
//! - Requires a valid session from an allowed account domain before routing
//! - Derives the backend from the requested hostname alone:
//!   `<service>-<port>-proxy.<routing-domain>` goes to `http://<service>:<port>`
//! - Streams requests and responses through without buffering
//! - Reuses backend connections through a pooled HTTP client
//! - Exposes health, version and request counters on a separate port

pub mod admin;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod headers;
pub mod host;
pub mod proxy;
pub mod stats;
