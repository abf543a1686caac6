//! Jellyfin Remote Bridge
//!
//! Bridges a Jellyfin server's playback sessions to a remote control's
//! media-player entity model.
//!
//! This library provides:
//! - Jellyfin HTTP API client with token lifecycle and single-flight re-auth
//! - Connectivity health monitoring with reconnection backoff
//! - Session discovery and entity-binding reconciliation
//! - Pure session-to-display projection (TV/movie/music metadata shaping)
//! - Command dispatch from the remote back to server sessions

pub mod bus;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod health;
pub mod host;
pub mod projector;
pub mod reconciler;
