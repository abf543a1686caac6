//! Command dispatcher
//!
//! Routes remote-originated commands to the server session behind an entity.
//! Holds no state of its own: entity resolution goes through read access to
//! the reconciler's binding table, and commands are fire-and-forget: the
//! result is reported immediately, but the authoritative playback state
//! arrives with the next reconciliation tick.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, Command, CommandResponse, EntityId, SharedBus};
use crate::client::{CommandError, PlaybackCommand, SessionApi, TICKS_PER_SECOND};
use crate::reconciler::BindingTable;

/// Fast-forward/rewind step
const SKIP_SECS: i64 = 30;

pub struct CommandDispatcher<A> {
    api: Arc<A>,
    bindings: BindingTable,
    bus: SharedBus,
}

impl<A: SessionApi> CommandDispatcher<A> {
    pub fn new(api: Arc<A>, bindings: BindingTable, bus: SharedBus) -> Self {
        Self { api, bindings, bus }
    }

    /// Dispatch one command to the session mapped to `entity_id`.
    ///
    /// An idle/retired entity yields `NoActiveSession`, surfaced to the host
    /// runtime as a failed command rather than a crash.
    pub async fn dispatch(
        &self,
        entity_id: &EntityId,
        command: &Command,
    ) -> Result<(), CommandError> {
        let (session_id, position, duration) = {
            let table = self.bindings.read().await;
            let binding = table
                .get(entity_id)
                .ok_or(CommandError::NoActiveSession)?;
            if binding.retired {
                return Err(CommandError::NoActiveSession);
            }
            let session_id = binding
                .last_known_session_id
                .clone()
                .ok_or(CommandError::NoActiveSession)?;
            (
                session_id,
                binding.display.position_secs,
                binding.display.duration_secs,
            )
        };

        let playback = translate(command, position, duration);
        debug!(entity = %entity_id, session = %session_id, ?playback, "dispatching command");
        self.api.send_command(&session_id, &playback).await
    }

    /// Consume CommandReceived bus events until cancelled, publishing a
    /// CommandResult for each.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("command dispatcher started");
        let mut rx = self.bus.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                event = rx.recv() => {
                    let Ok(event) = event else { break };
                    match event {
                        BusEvent::CommandReceived { entity_id, command } => {
                            let result = self.dispatch(&entity_id, &command).await;
                            if let Err(ref e) = result {
                                warn!(entity = %entity_id, "command failed: {}", e);
                            }
                            self.bus.publish(BusEvent::CommandResult {
                                response: CommandResponse {
                                    entity_id,
                                    command,
                                    success: result.is_ok(),
                                    error: result.err().map(|e| e.to_string()),
                                },
                            });
                        }
                        BusEvent::ShuttingDown { .. } => break,
                        _ => {}
                    }
                }
            }
        }

        info!("command dispatcher stopped");
    }
}

/// Resolve entity-level sugar into an absolute server command
fn translate(command: &Command, position_secs: Option<u64>, duration_secs: Option<u64>) -> PlaybackCommand {
    match command {
        Command::Play => PlaybackCommand::Unpause,
        Command::Pause => PlaybackCommand::Pause,
        Command::PlayPause => PlaybackCommand::PlayPause,
        Command::Stop => PlaybackCommand::Stop,
        Command::Next => PlaybackCommand::NextTrack,
        Command::Previous => PlaybackCommand::PreviousTrack,
        Command::Seek { position_secs } => PlaybackCommand::Seek {
            position_ticks: position_secs * TICKS_PER_SECOND,
        },
        Command::FastForward => PlaybackCommand::Seek {
            position_ticks: skip_target(position_secs, duration_secs, SKIP_SECS)
                * TICKS_PER_SECOND,
        },
        Command::Rewind => PlaybackCommand::Seek {
            position_ticks: skip_target(position_secs, duration_secs, -SKIP_SECS)
                * TICKS_PER_SECOND,
        },
        Command::Volume { level } => PlaybackCommand::SetVolume {
            level: (*level).min(100),
        },
        Command::VolumeUp => PlaybackCommand::VolumeUp,
        Command::VolumeDown => PlaybackCommand::VolumeDown,
        Command::MuteToggle => PlaybackCommand::ToggleMute,
    }
}

/// Skip target in seconds, clamped to [0, duration].
///
/// Position and duration come from the last projected display, so they can
/// be a tick stale; a skip that overshoots the end just stops playback on
/// the next poll.
fn skip_target(position_secs: Option<u64>, duration_secs: Option<u64>, delta: i64) -> u64 {
    let position = position_secs.unwrap_or(0) as i64;
    let target = (position + delta).max(0) as u64;
    match duration_secs {
        Some(duration) => target.min(duration),
        None => target,
    }
}
