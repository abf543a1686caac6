//! Jellyfin server client
//!
//! Thin RPC wrapper over the Jellyfin HTTP API: authentication and token
//! lifecycle, session listing, playback commands, reachability probing and
//! artwork URL construction. No retry policy lives here; callers decide
//! when to retry, and the only cross-caller coordination is the
//! single-flight guard that collapses concurrent re-authentication
//! attempts into one.

pub mod error;
pub mod wire;

pub use error::{AuthError, CommandError, TransportError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::JellyfinConfig;
use wire::{AuthResponseDto, SessionDto, SystemInfoDto};

/// Jellyfin stores positions and durations as 100ns ticks
pub const TICKS_PER_SECOND: u64 = 10_000_000;

const DEVICE_ID: &str = "jellyfin-remote-bridge";
const CLIENT_NAME: &str = "Jellyfin Remote Bridge";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Session model
// =============================================================================

/// Playback state as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
    /// Session exists but nothing is loaded
    Idle,
}

/// Kind of item being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Movie,
    Episode,
    Audio,
    Other,
}

/// Jellyfin image type used in artwork URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Backdrop,
    Primary,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backdrop => "Backdrop",
            Self::Primary => "Primary",
        }
    }
}

/// Opaque artwork reference, resolvable to a URL without a network call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkRef {
    pub item_id: String,
    pub image_type: ImageType,
    pub tag: Option<String>,
}

/// Descriptor of what a session is playing. Immutable snapshot per poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub kind: MediaKind,
    pub title: String,
    pub series_name: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub season_name: Option<String>,
    pub year: Option<i32>,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub runtime_ticks: u64,
    pub artwork: Option<ArtworkRef>,
}

/// Server-side playback context. Never persisted; re-fetched each poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Server-assigned id; churns across client reconnects
    pub session_id: String,
    pub client_name: String,
    pub device_name: String,
    pub user_id: String,
    pub play_state: PlayState,
    pub now_playing: Option<Media>,
    pub position_ticks: u64,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Display name for the entity bound to this session:
    /// "Client (Device)" when the device name adds information.
    pub fn display_name(&self) -> String {
        if !self.device_name.is_empty() && self.device_name != self.client_name {
            format!("{} ({})", self.client_name, self.device_name)
        } else {
            self.client_name.clone()
        }
    }
}

/// Server identity/version from the public info endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub id: String,
    pub server_name: String,
    pub version: String,
}

/// Successful authentication outcome
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub server_name: String,
    pub user_id: String,
}

// =============================================================================
// Playback commands (wire level)
// =============================================================================

/// Command as sent to the server, after the dispatcher has resolved
/// entity-level sugar (fast-forward/rewind, clamping) into absolute terms.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Unpause,
    Pause,
    PlayPause,
    Stop,
    NextTrack,
    PreviousTrack,
    Seek { position_ticks: u64 },
    SetVolume { level: u8 },
    VolumeUp,
    VolumeDown,
    ToggleMute,
}

impl PlaybackCommand {
    /// Play-state commands go to `/Sessions/{id}/Playing/{name}`
    fn playstate_name(&self) -> Option<&'static str> {
        match self {
            Self::Unpause => Some("Unpause"),
            Self::Pause => Some("Pause"),
            Self::PlayPause => Some("PlayPause"),
            Self::Stop => Some("Stop"),
            Self::NextTrack => Some("NextTrack"),
            Self::PreviousTrack => Some("PreviousTrack"),
            Self::Seek { .. } => Some("Seek"),
            _ => None,
        }
    }

    /// General commands go to `/Sessions/{id}/Command`
    fn general_name(&self) -> Option<&'static str> {
        match self {
            Self::SetVolume { .. } => Some("SetVolume"),
            Self::VolumeUp => Some("VolumeUp"),
            Self::VolumeDown => Some("VolumeDown"),
            Self::ToggleMute => Some("ToggleMute"),
            _ => None,
        }
    }
}

// =============================================================================
// SessionApi - trait boundary for the reconciliation engine
// =============================================================================

/// The server surface the reconciler, dispatcher and health monitor consume.
///
/// Kept narrow so tests can drive the whole engine against a scripted mock.
#[async_trait]
pub trait SessionApi: Send + Sync + 'static {
    /// Fetch the current session list
    async fn list_sessions(&self) -> Result<Vec<Session>, TransportError>;

    /// Send a playback command to a session
    async fn send_command(
        &self,
        session_id: &str,
        command: &PlaybackCommand,
    ) -> Result<(), CommandError>;

    /// Reachability probe (no auth required)
    async fn probe(&self) -> Result<ServerInfo, TransportError>;

    /// Re-authenticate after an Unauthorized. Concurrent callers are
    /// collapsed into a single attempt; waiters share its outcome.
    async fn reauthenticate(&self) -> Result<(), AuthError>;

    /// Id of the authenticated user, if a login has succeeded
    async fn authenticated_user_id(&self) -> Option<String>;

    /// Build the URL for an artwork reference. Pure string construction.
    fn resolve_artwork_url(&self, artwork: &ArtworkRef) -> String;
}

// =============================================================================
// JellyfinClient
// =============================================================================

#[derive(Debug, Default)]
struct AuthState {
    token: Option<String>,
    user_id: Option<String>,
    /// Bumped on every successful login; lets waiters on the re-auth gate
    /// detect that someone else already refreshed the token
    generation: u64,
}

/// HTTP client for a single Jellyfin server
pub struct JellyfinClient {
    base_url: String,
    http: reqwest::Client,
    username: String,
    password: String,
    two_factor_code: Option<String>,
    min_server_version: String,
    artwork_max_width: u32,
    device_name: String,
    auth: RwLock<AuthState>,
    reauth_gate: Mutex<()>,
}

impl JellyfinClient {
    pub fn new(config: &JellyfinConfig) -> anyhow::Result<Self> {
        let base_url = normalize_base_url(&config.url);
        // Validate early so a malformed URL fails at startup, not mid-poll
        url::Url::parse(&base_url)?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url,
            http,
            username: config.username.clone(),
            password: config.password.clone(),
            two_factor_code: config.two_factor_code.clone(),
            min_server_version: config.min_server_version.clone(),
            artwork_max_width: config.artwork_max_width,
            device_name: gethostname::gethostname().to_string_lossy().into_owned(),
            auth: RwLock::new(AuthState::default()),
            reauth_gate: Mutex::new(()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Jellyfin's `Authorization: MediaBrowser ...` handshake header
    async fn auth_header(&self) -> String {
        let mut header = format!(
            "MediaBrowser Client=\"{}\", Device=\"{}\", DeviceId=\"{}\", Version=\"{}\"",
            CLIENT_NAME,
            self.device_name,
            DEVICE_ID,
            env!("CARGO_PKG_VERSION"),
        );
        if let Some(token) = &self.auth.read().await.token {
            header.push_str(&format!(", Token=\"{}\"", token));
        }
        header
    }

    async fn fetch_public_info(&self) -> Result<ServerInfo, TransportError> {
        let response = self
            .http
            .get(self.api_url("/System/Info/Public"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Unreachable(format!(
                "probe failed: {}",
                response.status()
            )));
        }

        let dto: SystemInfoDto = response
            .json()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        Ok(dto.normalize())
    }

    /// Authenticate against the server and store the bearer token.
    ///
    /// One-shot: an optional two-factor code is consumed here (appended to
    /// the password, the convention of the common OTP plugins); there is no
    /// resumable multi-step auth state.
    pub async fn authenticate(&self) -> Result<AuthResult, AuthError> {
        let info = self
            .fetch_public_info()
            .await
            .map_err(|e| AuthError::ServerUnreachable(e.to_string()))?;

        if !version_at_least(&info.version, &self.min_server_version) {
            return Err(AuthError::ServerTooOld {
                found: info.version,
                minimum: self.min_server_version.clone(),
            });
        }

        let mut password = self.password.clone();
        if let Some(code) = &self.two_factor_code {
            password.push_str(code);
        }

        debug!(server = %info.server_name, user = %self.username, "authenticating");

        let response = self
            .http
            .post(self.api_url("/Users/AuthenticateByName"))
            .header("Authorization", self.auth_header().await)
            .json(&serde_json::json!({
                "Username": self.username,
                "Pw": password,
            }))
            .send()
            .await
            .map_err(|e| AuthError::ServerUnreachable(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            let lower = body.to_lowercase();
            if self.two_factor_code.is_none() && (lower.contains("otp") || lower.contains("2fa")) {
                return Err(AuthError::TwoFactorRequired);
            }
            return Err(AuthError::InvalidCredentials);
        }
        if !response.status().is_success() {
            return Err(AuthError::ServerUnreachable(format!(
                "login failed: {}",
                response.status()
            )));
        }

        let dto: AuthResponseDto = response
            .json()
            .await
            .map_err(|e| AuthError::ServerUnreachable(e.to_string()))?;

        let token = dto.access_token.ok_or(AuthError::InvalidCredentials)?;
        let user_id = dto
            .user
            .map(|u| u.id)
            .ok_or(AuthError::InvalidCredentials)?;

        {
            let mut auth = self.auth.write().await;
            auth.token = Some(token);
            auth.user_id = Some(user_id.clone());
            auth.generation += 1;
        }

        info!(server = %info.server_name, "authenticated with Jellyfin server");
        Ok(AuthResult {
            server_name: info.server_name,
            user_id,
        })
    }
}

#[async_trait]
impl SessionApi for JellyfinClient {
    async fn list_sessions(&self) -> Result<Vec<Session>, TransportError> {
        if self.auth.read().await.token.is_none() {
            return Err(TransportError::Unauthorized);
        }

        let response = self
            .http
            .get(self.api_url("/Sessions"))
            .header("Authorization", self.auth_header().await)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        if !response.status().is_success() {
            return Err(TransportError::Unreachable(format!(
                "session list failed: {}",
                response.status()
            )));
        }

        let dtos: Vec<SessionDto> = response
            .json()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        Ok(dtos.into_iter().filter_map(SessionDto::normalize).collect())
    }

    async fn send_command(
        &self,
        session_id: &str,
        command: &PlaybackCommand,
    ) -> Result<(), CommandError> {
        let request = if let Some(name) = command.playstate_name() {
            let mut url = self.api_url(&format!(
                "/Sessions/{}/Playing/{}",
                urlencoding::encode(session_id),
                name
            ));
            if let PlaybackCommand::Seek { position_ticks } = command {
                url.push_str(&format!("?seekPositionTicks={}", position_ticks));
            }
            self.http.post(url)
        } else if let Some(name) = command.general_name() {
            let arguments = match command {
                PlaybackCommand::SetVolume { level } => {
                    serde_json::json!({ "Volume": level.to_string() })
                }
                _ => serde_json::json!({}),
            };
            self.http
                .post(self.api_url(&format!(
                    "/Sessions/{}/Command",
                    urlencoding::encode(session_id)
                )))
                .json(&serde_json::json!({
                    "Name": name,
                    "Arguments": arguments,
                }))
        } else {
            return Err(CommandError::Rejected("unmapped command".to_string()));
        };

        let response = request
            .header("Authorization", self.auth_header().await)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(CommandError::SessionGone),
            s => Err(CommandError::Rejected(s.to_string())),
        }
    }

    async fn probe(&self) -> Result<ServerInfo, TransportError> {
        // Probe the authenticated info endpoint: a stale token must surface
        // as Unauthorized here, not read as a healthy server
        if self.auth.read().await.token.is_none() {
            return Err(TransportError::Unauthorized);
        }

        let response = self
            .http
            .get(self.api_url("/System/Info"))
            .header("Authorization", self.auth_header().await)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        if !response.status().is_success() {
            return Err(TransportError::Unreachable(format!(
                "probe failed: {}",
                response.status()
            )));
        }

        let dto: SystemInfoDto = response
            .json()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        Ok(dto.normalize())
    }

    async fn reauthenticate(&self) -> Result<(), AuthError> {
        let observed = self.auth.read().await.generation;
        let _gate = self.reauth_gate.lock().await;

        // Someone else completed a login while we were waiting on the gate
        if self.auth.read().await.generation != observed {
            debug!("re-authentication already performed by a concurrent caller");
            return Ok(());
        }

        warn!("token rejected, re-authenticating");
        self.authenticate().await.map(|_| ())
    }

    async fn authenticated_user_id(&self) -> Option<String> {
        self.auth.read().await.user_id.clone()
    }

    fn resolve_artwork_url(&self, artwork: &ArtworkRef) -> String {
        let mut url = format!(
            "{}/Items/{}/Images/{}?maxWidth={}",
            self.base_url,
            artwork.item_id,
            artwork.image_type.as_str(),
            self.artwork_max_width
        );
        if let Some(tag) = &artwork.tag {
            url.push_str(&format!("&tag={}", tag));
        }
        url
    }
}

/// Strip a trailing slash and default to http:// when no scheme is given
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Parse a dotted version string, tolerating missing components
fn parse_version(v: &str) -> (u64, u64, u64) {
    let mut parts = v
        .split('.')
        .map(|p| p.trim().parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Minimum-version gate. An unparseable server version passes the gate so
/// pre-release builds aren't locked out.
fn version_at_least(found: &str, minimum: &str) -> bool {
    let found = parse_version(found);
    if found == (0, 0, 0) {
        return true;
    }
    found >= parse_version(minimum)
}
