//! Event types for the bridge's event bus.
//!
//! This module defines the shared vocabulary between the reconciliation
//! engine, the health monitor, the command dispatcher, and the host-runtime
//! boundary: stable entity identities, projected display payloads, playback
//! commands, and the bus events that carry them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// =============================================================================
// EntityId - Stable entity identifier derived from (client name, user id)
// =============================================================================

/// A stable media-player entity identifier.
///
/// The server's session id churns across client reconnects, so it is never
/// used as the entity key. Instead the id is derived deterministically from
/// the (client name, user id) pair, which survives restarts of both the
/// bridge and the playing client.
///
/// # Examples
/// ```ignore
/// let a = EntityId::derive("Jellyfin Web", "user-1");
/// let b = EntityId::derive("Jellyfin Web", "user-1");
/// assert_eq!(a, b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Derive the entity id for a (client name, user id) pair.
    ///
    /// Stable across restarts: the same pair always yields the same id.
    pub fn derive(client_name: &str, user_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(client_name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(user_id.as_bytes());
        let digest = hasher.finalize();
        Self(format!("jellyfin:{}", hex::encode(&digest[..8])))
    }

    /// Parse an entity id from a string.
    /// Returns None if the string doesn't carry the expected prefix.
    pub fn parse(s: impl AsRef<str>) -> Option<Self> {
        let s = s.as_ref();
        if s.starts_with("jellyfin:") {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    /// Get the full entity id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

// =============================================================================
// Connectivity
// =============================================================================

/// Server connectivity as observed by the health monitor.
///
/// Owned by a single writer (the health monitor); everything else reads it
/// through a watch cell or these bus events.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    #[default]
    Connected,
    /// Reachable recently, but probes have started failing
    Degraded,
    Disconnected,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

// =============================================================================
// Display payload
// =============================================================================

/// Playback state as shown on the remote entity
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The full projected display for one entity.
///
/// Produced by the projector from a raw session snapshot; compared against
/// the previous payload so unchanged ticks push nothing to the host runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DisplayPayload {
    /// Current playback state
    pub state: DisplayState,

    /// Shaped title line (series/episode, movie year, track/artist rules)
    pub title: Option<String>,

    /// Secondary line: series + episode marker for TV, joined artists for music
    pub artist: Option<String>,

    /// Tertiary line: season name for TV, album for music
    pub album: Option<String>,

    /// Resolved artwork URL (or the placeholder reference)
    pub artwork_url: Option<String>,

    /// Playback position in seconds
    pub position_secs: Option<u64>,

    /// Track/item duration in seconds
    pub duration_secs: Option<u64>,

    /// Position as a fraction of duration, clamped to [0, 1].
    /// Absent when the duration is unknown or zero.
    pub progress: Option<f64>,
}

impl DisplayPayload {
    /// The idle display: stopped, all media fields cleared
    pub fn stopped() -> Self {
        Self::default()
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Playback commands accepted from the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", content = "params")]
pub enum Command {
    /// Start or resume playback
    Play,

    /// Pause playback
    Pause,

    /// Toggle play/pause
    PlayPause,

    /// Stop playback
    Stop,

    /// Skip to next track
    Next,

    /// Skip to previous track
    Previous,

    /// Jump forward 30 seconds (sugar for Seek)
    FastForward,

    /// Jump back 30 seconds (sugar for Seek)
    Rewind,

    /// Seek to an absolute position
    Seek {
        /// Target position in seconds
        position_secs: u64,
    },

    /// Set absolute volume (0-100)
    Volume { level: u8 },

    /// Step volume up
    VolumeUp,

    /// Step volume down
    VolumeDown,

    /// Toggle mute state
    MuteToggle,
}

/// Result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    /// Entity the command was sent to
    pub entity_id: EntityId,

    /// The command that was executed
    pub command: Command,

    /// Whether the command succeeded
    pub success: bool,

    /// Error message if command failed
    pub error: Option<String>,
}

// =============================================================================
// Bus Events
// =============================================================================

/// All events that can be published on the event bus.
///
/// Events are organized into categories:
/// - Entity lifecycle: creation, display updates, retirement
/// - Connectivity: health monitor transitions
/// - Commands: incoming commands and their results
/// - System: shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    // =========================================================================
    // Entity Lifecycle Events
    // =========================================================================
    /// A new entity binding was created for a session
    EntityCreated {
        entity_id: EntityId,
        /// Human-readable name, e.g. "Jellyfin Web (Living Room)"
        display_name: String,
    },

    /// An entity's projected display changed
    EntityStateChanged {
        entity_id: EntityId,
        display: DisplayPayload,
    },

    /// An entity went idle after its session stayed absent past the grace
    /// window. The binding is kept; this is not a deletion.
    EntityRetired { entity_id: EntityId },

    // =========================================================================
    // Connectivity Events
    // =========================================================================
    /// The health monitor observed a connectivity transition
    ConnectivityChanged { state: ConnectivityState },

    // =========================================================================
    // Command Events
    // =========================================================================
    /// A command was received for an entity
    CommandReceived {
        entity_id: EntityId,
        command: Command,
    },

    /// Result of a command execution
    CommandResult { response: CommandResponse },

    // =========================================================================
    // System Events
    // =========================================================================
    /// System is shutting down
    ShuttingDown {
        /// Reason for shutdown
        reason: Option<String>,
    },
}

impl BusEvent {
    /// Get the event type as a string (for logging/filtering)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EntityCreated { .. } => "entity_created",
            Self::EntityStateChanged { .. } => "entity_state_changed",
            Self::EntityRetired { .. } => "entity_retired",
            Self::ConnectivityChanged { .. } => "connectivity_changed",
            Self::CommandReceived { .. } => "command_received",
            Self::CommandResult { .. } => "command_result",
            Self::ShuttingDown { .. } => "shutting_down",
        }
    }

    /// Check if this is an entity lifecycle event
    pub fn is_entity_event(&self) -> bool {
        matches!(
            self,
            Self::EntityCreated { .. }
                | Self::EntityStateChanged { .. }
                | Self::EntityRetired { .. }
        )
    }

    /// Check if this is a command-related event
    pub fn is_command_event(&self) -> bool {
        matches!(
            self,
            Self::CommandReceived { .. } | Self::CommandResult { .. }
        )
    }
}
