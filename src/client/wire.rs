//! Wire types for the Jellyfin HTTP API.
//!
//! Raw serde mappings of the `/Sessions`, `/Users/AuthenticateByName` and
//! `/System/Info/Public` payloads, plus the normalization into the bridge's
//! own session model. The raw shapes never leave this module.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

use super::{ArtworkRef, ImageType, Media, MediaKind, PlayState, ServerInfo, Session};

/// One entry of the `/Sessions` array
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionDto {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub client: Option<String>,
    pub device_name: Option<String>,
    /// Older servers omit this field entirely; treat missing as active
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub last_activity_date: Option<String>,
    pub play_state: Option<PlayStateDto>,
    pub now_playing_item: Option<NowPlayingItemDto>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayStateDto {
    #[serde(default)]
    pub is_paused: bool,
    pub position_ticks: Option<u64>,
    pub volume_level: Option<u8>,
    #[serde(default)]
    pub is_muted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NowPlayingItemDto {
    pub id: Option<String>,
    #[serde(rename = "Type")]
    pub item_type: Option<String>,
    pub name: Option<String>,
    pub series_name: Option<String>,
    pub series_id: Option<String>,
    pub season_id: Option<String>,
    pub season_name: Option<String>,
    pub parent_index_number: Option<u32>,
    pub index_number: Option<u32>,
    pub production_year: Option<i32>,
    pub run_time_ticks: Option<u64>,
    #[serde(default)]
    pub artists: Vec<String>,
    pub album: Option<String>,
    #[serde(default)]
    pub image_tags: HashMap<String, String>,
    #[serde(default)]
    pub backdrop_image_tags: Vec<String>,
    #[serde(default)]
    pub series_backdrop_image_tags: Vec<String>,
    pub series_primary_image_tag: Option<String>,
}

/// Response of `/Users/AuthenticateByName`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthResponseDto {
    pub access_token: Option<String>,
    pub user: Option<UserDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDto {
    pub id: String,
}

/// Response of `/System/Info/Public`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfoDto {
    pub id: Option<String>,
    pub server_name: Option<String>,
    pub version: Option<String>,
}

impl SystemInfoDto {
    pub fn normalize(self) -> ServerInfo {
        ServerInfo {
            id: self.id.unwrap_or_default(),
            server_name: self.server_name.unwrap_or_else(|| "Unknown".to_string()),
            version: self.version.unwrap_or_default(),
        }
    }
}

impl SessionDto {
    /// Normalize into the bridge's session model.
    ///
    /// Returns None for entries that can't be mapped to an entity: missing
    /// session id, client name or user id, or flagged inactive by the server.
    pub fn normalize(self) -> Option<Session> {
        if !self.is_active {
            return None;
        }
        let session_id = self.id?;
        let client_name = self.client?;
        let user_id = self.user_id?;

        let play_state = match (&self.now_playing_item, &self.play_state) {
            (Some(_), Some(ps)) if ps.is_paused => PlayState::Paused,
            (Some(_), _) => PlayState::Playing,
            (None, _) => PlayState::Idle,
        };

        let position_ticks = self
            .play_state
            .as_ref()
            .and_then(|ps| ps.position_ticks)
            .unwrap_or(0);

        let last_activity = self
            .last_activity_date
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::UNIX_EPOCH);

        Some(Session {
            session_id,
            client_name,
            device_name: self.device_name.unwrap_or_default(),
            user_id,
            play_state,
            now_playing: self.now_playing_item.map(NowPlayingItemDto::normalize),
            position_ticks,
            last_activity,
        })
    }
}

impl NowPlayingItemDto {
    fn normalize(self) -> Media {
        let kind = match self.item_type.as_deref() {
            Some("Movie") => MediaKind::Movie,
            Some("Episode") => MediaKind::Episode,
            Some("Audio") => MediaKind::Audio,
            _ => MediaKind::Other,
        };
        let artwork = select_artwork(&self, kind);

        Media {
            kind,
            title: self.name.unwrap_or_default(),
            series_name: self.series_name,
            season_number: self.parent_index_number,
            episode_number: self.index_number,
            season_name: self.season_name,
            year: self.production_year,
            artists: self.artists,
            album: self.album,
            runtime_ticks: self.run_time_ticks.unwrap_or(0),
            artwork,
        }
    }
}

/// Pick the best artwork reference for an item, preferring Backdrop over
/// Primary.
///
/// Priority:
/// - Episodes: Series Backdrop > Episode Backdrop > Series Primary >
///   Season Primary > Episode Primary
/// - Movies/Other: Item Backdrop > Item Primary
fn select_artwork(item: &NowPlayingItemDto, kind: MediaKind) -> Option<ArtworkRef> {
    if kind == MediaKind::Episode {
        if let Some(series_id) = &item.series_id {
            if let Some(tag) = item.series_backdrop_image_tags.first() {
                return Some(ArtworkRef {
                    item_id: series_id.clone(),
                    image_type: ImageType::Backdrop,
                    tag: Some(tag.clone()),
                });
            }
        }
        if let (Some(id), Some(tag)) = (&item.id, item.backdrop_image_tags.first()) {
            return Some(ArtworkRef {
                item_id: id.clone(),
                image_type: ImageType::Backdrop,
                tag: Some(tag.clone()),
            });
        }
        if let (Some(series_id), Some(tag)) = (&item.series_id, &item.series_primary_image_tag) {
            return Some(ArtworkRef {
                item_id: series_id.clone(),
                image_type: ImageType::Primary,
                tag: Some(tag.clone()),
            });
        }
        if let Some(season_id) = &item.season_id {
            return Some(ArtworkRef {
                item_id: season_id.clone(),
                image_type: ImageType::Primary,
                tag: None,
            });
        }
        if let (Some(id), Some(tag)) = (&item.id, item.image_tags.get("Primary")) {
            return Some(ArtworkRef {
                item_id: id.clone(),
                image_type: ImageType::Primary,
                tag: Some(tag.clone()),
            });
        }
        return None;
    }

    let id = item.id.as_ref()?;
    if let Some(tag) = item.backdrop_image_tags.first() {
        return Some(ArtworkRef {
            item_id: id.clone(),
            image_type: ImageType::Backdrop,
            tag: Some(tag.clone()),
        });
    }
    item.image_tags.get("Primary").map(|tag| ArtworkRef {
        item_id: id.clone(),
        image_type: ImageType::Primary,
        tag: Some(tag.clone()),
    })
}
