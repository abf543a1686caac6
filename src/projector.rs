//! Entity state projection
//!
//! Pure mapping from a raw session snapshot to the entity display payload.
//! No I/O and no stored state: the reconciler feeds sessions through here
//! each tick and compares the result against the last pushed payload.

use tracing::debug;

use crate::bus::{DisplayPayload, DisplayState};
use crate::client::{ArtworkRef, Media, MediaKind, PlayState, Session, TICKS_PER_SECOND};

/// Reference pushed when an item has artwork that fails to resolve.
/// The host runtime maps this to its bundled placeholder image.
pub const ARTWORK_PLACEHOLDER: &str = "static://artwork-placeholder.png";

/// Project a session into its entity display.
///
/// `resolve_artwork` turns an artwork reference into a URL; a `None` return
/// degrades to the placeholder rather than failing the projection.
pub fn project<F>(session: &Session, resolve_artwork: F) -> DisplayPayload
where
    F: Fn(&ArtworkRef) -> Option<String>,
{
    match session.play_state {
        // Nothing playing: clear everything
        PlayState::Stopped | PlayState::Idle => DisplayPayload::stopped(),

        PlayState::Playing | PlayState::Paused => {
            let state = if session.play_state == PlayState::Playing {
                DisplayState::Playing
            } else {
                DisplayState::Paused
            };

            let Some(media) = &session.now_playing else {
                // Mid-transition sessions report a play state without an item
                return DisplayPayload {
                    state,
                    title: Some("Unknown".to_string()),
                    ..Default::default()
                };
            };

            let artwork_url = media.artwork.as_ref().map(|art| {
                resolve_artwork(art).unwrap_or_else(|| {
                    debug!(item = %art.item_id, "artwork resolution failed, using placeholder");
                    ARTWORK_PLACEHOLDER.to_string()
                })
            });

            let position_secs = session.position_ticks / TICKS_PER_SECOND;
            let duration_secs = (media.runtime_ticks > 0)
                .then(|| media.runtime_ticks / TICKS_PER_SECOND);

            DisplayPayload {
                state,
                title: Some(shape_title(media)),
                artist: artist_line(media),
                album: album_line(media),
                artwork_url,
                position_secs: Some(position_secs),
                duration_secs,
                progress: progress(session.position_ticks, media.runtime_ticks),
            }
        }
    }
}

/// Title shaping rules, by media kind
fn shape_title(media: &Media) -> String {
    match media.kind {
        MediaKind::Episode => {
            match (&media.series_name, media.season_number, media.episode_number) {
                (Some(series), Some(season), Some(episode)) => {
                    format!(
                        "{} - S{:02}E{:02} - {}",
                        series, season, episode, media.title
                    )
                }
                _ => media.title.clone(),
            }
        }
        MediaKind::Movie => match media.year {
            Some(year) => format!("{} ({})", media.title, year),
            None => media.title.clone(),
        },
        MediaKind::Audio => {
            if media.artists.is_empty() {
                media.title.clone()
            } else {
                format!("{} - {}", media.title, media.artists.join(", "))
            }
        }
        MediaKind::Other => media.title.clone(),
    }
}

/// Secondary line: series + episode marker for TV, joined artists for music
fn artist_line(media: &Media) -> Option<String> {
    match media.kind {
        MediaKind::Episode => {
            let marker = match (media.season_number, media.episode_number) {
                (Some(s), Some(e)) => Some(format!("S{}E{}", s, e)),
                _ => None,
            };
            match (&media.series_name, marker) {
                (Some(series), Some(marker)) => Some(format!("{} - {}", series, marker)),
                (Some(series), None) => Some(series.clone()),
                (None, _) => Some("TV Show".to_string()),
            }
        }
        _ => {
            if media.artists.is_empty() {
                None
            } else {
                Some(media.artists.join(", "))
            }
        }
    }
}

/// Tertiary line: season name for TV, album otherwise
fn album_line(media: &Media) -> Option<String> {
    match media.kind {
        MediaKind::Episode => media.season_name.clone().or_else(|| media.album.clone()),
        _ => media.album.clone(),
    }
}

/// Position as a fraction of runtime, clamped to [0, 1].
/// A zero runtime yields no value rather than a division.
fn progress(position_ticks: u64, runtime_ticks: u64) -> Option<f64> {
    if runtime_ticks == 0 {
        return None;
    }
    Some((position_ticks as f64 / runtime_ticks as f64).clamp(0.0, 1.0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn media(kind: MediaKind) -> Media {
        Media {
            kind,
            title: "Y".to_string(),
            series_name: None,
            season_number: None,
            episode_number: None,
            season_name: None,
            year: None,
            artists: Vec::new(),
            album: None,
            runtime_ticks: 18_000_000_000,
            artwork: None,
        }
    }

    fn session(play_state: PlayState, now_playing: Option<Media>) -> Session {
        Session {
            session_id: "s".to_string(),
            client_name: "Jellyfin Web".to_string(),
            device_name: String::new(),
            user_id: "u".to_string(),
            play_state,
            now_playing,
            position_ticks: 0,
            last_activity: DateTime::UNIX_EPOCH,
        }
    }

    fn no_artwork(_: &ArtworkRef) -> Option<String> {
        None
    }

    #[test]
    fn test_episode_title_shape() {
        let mut m = media(MediaKind::Episode);
        m.series_name = Some("X".to_string());
        m.season_number = Some(2);
        m.episode_number = Some(5);

        let display = project(&session(PlayState::Playing, Some(m)), no_artwork);
        assert_eq!(display.title.as_deref(), Some("X - S02E05 - Y"));
        assert_eq!(display.artist.as_deref(), Some("X - S2E5"));
    }

    #[test]
    fn test_episode_title_falls_back_without_numbers() {
        let mut m = media(MediaKind::Episode);
        m.series_name = Some("X".to_string());

        let display = project(&session(PlayState::Playing, Some(m)), no_artwork);
        assert_eq!(display.title.as_deref(), Some("Y"));
        assert_eq!(display.artist.as_deref(), Some("X"));
    }

    #[test]
    fn test_movie_title_shape() {
        let mut m = media(MediaKind::Movie);
        m.title = "Z".to_string();
        m.year = Some(2020);

        let display = project(&session(PlayState::Playing, Some(m)), no_artwork);
        assert_eq!(display.title.as_deref(), Some("Z (2020)"));
    }

    #[test]
    fn test_movie_title_without_year() {
        let mut m = media(MediaKind::Movie);
        m.title = "Z".to_string();

        let display = project(&session(PlayState::Playing, Some(m)), no_artwork);
        assert_eq!(display.title.as_deref(), Some("Z"));
    }

    #[test]
    fn test_audio_title_shape() {
        let mut m = media(MediaKind::Audio);
        m.artists = vec!["A".to_string(), "B".to_string()];

        let display = project(&session(PlayState::Paused, Some(m)), no_artwork);
        assert_eq!(display.state, DisplayState::Paused);
        assert_eq!(display.title.as_deref(), Some("Y - A, B"));
        assert_eq!(display.artist.as_deref(), Some("A, B"));
    }

    #[test]
    fn test_stopped_clears_everything() {
        let display = project(&session(PlayState::Idle, Some(media(MediaKind::Movie))), no_artwork);
        assert_eq!(display, DisplayPayload::stopped());
        assert!(display.title.is_none());
        assert!(display.artwork_url.is_none());
        assert!(display.progress.is_none());
    }

    #[test]
    fn test_playing_without_item_is_unknown() {
        let display = project(&session(PlayState::Playing, None), no_artwork);
        assert_eq!(display.state, DisplayState::Playing);
        assert_eq!(display.title.as_deref(), Some("Unknown"));
        assert!(display.artwork_url.is_none());
    }

    #[test]
    fn test_progress_clamped() {
        let mut s = session(PlayState::Playing, Some(media(MediaKind::Movie)));
        // Position past the end of the item
        s.position_ticks = 20_000_000_000;
        let display = project(&s, no_artwork);
        assert_eq!(display.progress, Some(1.0));
    }

    #[test]
    fn test_zero_runtime_has_no_progress() {
        let mut m = media(MediaKind::Movie);
        m.runtime_ticks = 0;
        let mut s = session(PlayState::Playing, Some(m));
        s.position_ticks = 600_000_000;

        let display = project(&s, no_artwork);
        assert!(display.progress.is_none());
        assert!(display.duration_secs.is_none());
        assert_eq!(display.position_secs, Some(60));
    }

    #[test]
    fn test_artwork_placeholder_on_resolution_failure() {
        let mut m = media(MediaKind::Movie);
        m.artwork = Some(ArtworkRef {
            item_id: "item-1".to_string(),
            image_type: crate::client::ImageType::Primary,
            tag: None,
        });

        let display = project(&session(PlayState::Playing, Some(m)), no_artwork);
        assert_eq!(display.artwork_url.as_deref(), Some(ARTWORK_PLACEHOLDER));
    }

    #[test]
    fn test_artwork_resolved() {
        let mut m = media(MediaKind::Movie);
        m.artwork = Some(ArtworkRef {
            item_id: "item-1".to_string(),
            image_type: crate::client::ImageType::Backdrop,
            tag: None,
        });

        let display = project(&session(PlayState::Playing, Some(m)), |art| {
            Some(format!("http://jf.local/{}", art.item_id))
        });
        assert_eq!(
            display.artwork_url.as_deref(),
            Some("http://jf.local/item-1")
        );
    }
}
