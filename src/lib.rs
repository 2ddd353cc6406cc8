//! Arena FPS Server Library
//!
//! Authoritative session server for a browser-based arena shooter. Clients
//! connect over WebSocket and exchange JSON records; the server owns health,
//! hit resolution, deaths and respawns, and fans events out to every
//! connected player.
//!
//! # Features
//!
//! - `status_server` - HTTP status surface with JSON and Prometheus endpoints (enabled by default)

pub mod config;
pub mod util;
pub mod game;
pub mod net;
pub mod metrics;
pub mod shutdown;
