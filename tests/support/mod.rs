//! Shared test doubles for integration tests
//!
//! A scripted [`MockSessionApi`] standing in for the Jellyfin server and a
//! [`RecordingHost`] capturing everything the reconciler pushes to the host
//! runtime.

// Each integration test binary compiles its own copy; not every binary
// uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

use jellyfin_remote_bridge::bus::{BusEvent, DisplayPayload, EntityId};
use jellyfin_remote_bridge::client::{
    ArtworkRef, AuthError, CommandError, Media, MediaKind, PlayState, PlaybackCommand,
    ServerInfo, Session, SessionApi, TransportError,
};
use jellyfin_remote_bridge::host::HostRuntime;

pub const TEST_USER: &str = "user-1";

// =============================================================================
// Session builders
// =============================================================================

/// A playing movie session with a deterministic activity timestamp offset
pub fn movie_session(session_id: &str, client: &str, user: &str, activity_secs: i64) -> Session {
    Session {
        session_id: session_id.to_string(),
        client_name: client.to_string(),
        device_name: String::new(),
        user_id: user.to_string(),
        play_state: PlayState::Playing,
        now_playing: Some(Media {
            kind: MediaKind::Movie,
            title: "Some Movie".to_string(),
            series_name: None,
            season_number: None,
            episode_number: None,
            season_name: None,
            year: Some(2020),
            artists: Vec::new(),
            album: None,
            runtime_ticks: 600 * 10_000_000,
            artwork: None,
        }),
        position_ticks: 60 * 10_000_000,
        last_activity: base_time() + ChronoDuration::seconds(activity_secs),
    }
}

pub fn idle_session(session_id: &str, client: &str, user: &str) -> Session {
    Session {
        session_id: session_id.to_string(),
        client_name: client.to_string(),
        device_name: String::new(),
        user_id: user.to_string(),
        play_state: PlayState::Idle,
        now_playing: None,
        position_ticks: 0,
        last_activity: base_time(),
    }
}

fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

// =============================================================================
// MockSessionApi
// =============================================================================

/// Scripted server double.
///
/// `list_sessions` drains one-shot scripted responses first, then falls back
/// to the current default session list. Everything it is asked to do is
/// recorded for assertions.
pub struct MockSessionApi {
    user_id: String,
    scripted: Mutex<VecDeque<Result<Vec<Session>, TransportError>>>,
    sessions: Mutex<Vec<Session>>,
    pub list_calls: AtomicUsize,
    pub sent_commands: Mutex<Vec<(String, PlaybackCommand)>>,
    pub command_ok: AtomicBool,
    pub probe_ok: AtomicBool,
    /// Simulates a stale token: probes return Unauthorized until a
    /// successful reauthenticate clears it
    pub probe_unauthorized: AtomicBool,
    pub probe_calls: AtomicUsize,
    pub reauth_calls: AtomicUsize,
    pub reauth_ok: AtomicBool,
}

impl MockSessionApi {
    pub fn new() -> Self {
        Self {
            user_id: TEST_USER.to_string(),
            scripted: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            sent_commands: Mutex::new(Vec::new()),
            command_ok: AtomicBool::new(true),
            probe_ok: AtomicBool::new(true),
            probe_unauthorized: AtomicBool::new(false),
            probe_calls: AtomicUsize::new(0),
            reauth_calls: AtomicUsize::new(0),
            reauth_ok: AtomicBool::new(true),
        }
    }

    /// Replace the default session list
    pub fn set_sessions(&self, sessions: Vec<Session>) {
        *self.sessions.lock().unwrap() = sessions;
    }

    /// Queue a one-shot response for the next list_sessions call
    pub fn push_response(&self, response: Result<Vec<Session>, TransportError>) {
        self.scripted.lock().unwrap().push_back(response);
    }

    pub fn commands(&self) -> Vec<(String, PlaybackCommand)> {
        self.sent_commands.lock().unwrap().clone()
    }
}

impl Default for MockSessionApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionApi for MockSessionApi {
    async fn list_sessions(&self) -> Result<Vec<Session>, TransportError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.scripted.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn send_command(
        &self,
        session_id: &str,
        command: &PlaybackCommand,
    ) -> Result<(), CommandError> {
        self.sent_commands
            .lock()
            .unwrap()
            .push((session_id.to_string(), command.clone()));
        if self.command_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CommandError::SessionGone)
        }
    }

    async fn probe(&self) -> Result<ServerInfo, TransportError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe_unauthorized.load(Ordering::SeqCst) {
            return Err(TransportError::Unauthorized);
        }
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(ServerInfo {
                id: "mock-server".to_string(),
                server_name: "Mock Jellyfin".to_string(),
                version: "10.9.0".to_string(),
            })
        } else {
            Err(TransportError::Unreachable("mock outage".to_string()))
        }
    }

    async fn reauthenticate(&self) -> Result<(), AuthError> {
        self.reauth_calls.fetch_add(1, Ordering::SeqCst);
        if self.reauth_ok.load(Ordering::SeqCst) {
            // Fresh token: stale-token probes succeed again
            self.probe_unauthorized.store(false, Ordering::SeqCst);
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    async fn authenticated_user_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    fn resolve_artwork_url(&self, artwork: &ArtworkRef) -> String {
        format!("http://mock/{}", artwork.item_id)
    }
}

// =============================================================================
// RecordingHost
// =============================================================================

#[derive(Debug, Clone)]
pub enum HostCall {
    Created(EntityId, String),
    Updated(EntityId, DisplayPayload),
    Retired(EntityId),
}

/// Host runtime that records every push for assertions
#[derive(Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HostCall::Created(..)))
            .count()
    }

    pub fn updated_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HostCall::Updated(..)))
            .count()
    }

    pub fn retired_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HostCall::Retired(..)))
            .count()
    }
}

#[async_trait]
impl HostRuntime for RecordingHost {
    async fn create_entity(&self, entity_id: &EntityId, display_name: &str) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(HostCall::Created(entity_id.clone(), display_name.to_string()));
        Ok(())
    }

    async fn update_entity_state(
        &self,
        entity_id: &EntityId,
        display: &DisplayPayload,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(HostCall::Updated(entity_id.clone(), display.clone()));
        Ok(())
    }

    async fn retire_entity(&self, entity_id: &EntityId) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(HostCall::Retired(entity_id.clone()));
        Ok(())
    }
}

// =============================================================================
// Bus helpers
// =============================================================================

/// Wait for a specific event type with timeout
pub async fn expect_event<F>(
    rx: &mut broadcast::Receiver<BusEvent>,
    predicate: F,
    timeout_ms: u64,
) -> Option<BusEvent>
where
    F: Fn(&BusEvent) -> bool,
{
    let deadline = Duration::from_millis(timeout_ms);
    match timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue, // Keep waiting for matching event
                Err(_) => return None,
            }
        }
    })
    .await
    {
        Ok(event) => event,
        Err(_) => None, // Timeout
    }
}
