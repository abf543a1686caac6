//! Session reconciliation engine
//!
//! The poll loop at the center of the bridge. Each tick fetches the session
//! list, filters it to the authenticated user, deduplicates by
//! (client name, user id), diffs against the entity binding table, projects
//! display payloads and pushes the resulting changes to the host runtime.
//!
//! Tick contract: a tick either fully applies or is a no-op. The next table
//! is built as a snapshot and swapped in whole, so readers (the command
//! dispatcher, status paths) never observe a table mid-update, and transport
//! failures leave the previous state untouched. Bindings whose session
//! vanished are not dropped immediately: a grace window absorbs the
//! momentary gaps that client reconnects produce, trading a little
//! real-time accuracy for far fewer entity create/retire cycles in the
//! host runtime.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{ConnectivityState, DisplayPayload, EntityId};
use crate::client::{Session, SessionApi, TransportError};
use crate::health::HealthMonitor;
use crate::host::HostRuntime;
use crate::projector;

/// Reconciliation tuning
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Poll cadence while connected
    pub poll_interval: Duration,
    /// How long a binding survives its session's absence before going idle
    pub grace: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            grace: Duration::from_secs(90),
        }
    }
}

/// Durable mapping from an entity identity to its session and display.
///
/// The entity id is the key; `last_known_session_id` is just a pointer that
/// is rewritten as the server's session ids churn.
#[derive(Debug, Clone)]
pub struct EntityBinding {
    pub entity_id: EntityId,
    pub display_name: String,
    pub last_known_session_id: Option<String>,
    /// Last display pushed to the host runtime
    pub display: DisplayPayload,
    pub created_at: DateTime<Utc>,
    /// When the session first went missing from the poll (grace timer)
    pub missing_since: Option<Instant>,
    /// Idle after the grace window elapsed; binding kept, not deleted
    pub retired: bool,
}

/// Binding table: written only by the reconciler, read by everyone else
pub type BindingTable = Arc<RwLock<HashMap<EntityId, EntityBinding>>>;

/// Host-runtime pushes collected during a tick, emitted after the swap
enum Emit {
    Created(EntityId, String),
    Updated(EntityId, DisplayPayload),
    Retired(EntityId),
}

pub struct SessionReconciler<A, H> {
    api: Arc<A>,
    host: Arc<H>,
    health: HealthMonitor,
    connectivity: watch::Receiver<ConnectivityState>,
    bindings: BindingTable,
    config: ReconcilerConfig,
}

impl<A: SessionApi, H: HostRuntime> SessionReconciler<A, H> {
    pub fn new(
        api: Arc<A>,
        host: Arc<H>,
        health: HealthMonitor,
        connectivity: watch::Receiver<ConnectivityState>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            api,
            host,
            health,
            connectivity,
            bindings: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Shared handle to the binding table (read-only by convention:
    /// only the reconciliation loop writes)
    pub fn bindings(&self) -> BindingTable {
        self.bindings.clone()
    }

    /// Run the poll loop until cancelled.
    ///
    /// Polling pauses while the health monitor reports Disconnected and a
    /// return to Connected forces an immediate full pass instead of waiting
    /// out the current tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("session reconciler started");

        let mut connectivity = self.connectivity.clone();
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *connectivity.borrow_and_update();
                    if state == ConnectivityState::Connected {
                        info!("connectivity restored, forcing immediate reconciliation");
                        self.run_tick().await;
                        ticker.reset();
                    }
                }

                _ = ticker.tick() => {
                    if *connectivity.borrow() == ConnectivityState::Disconnected {
                        debug!("disconnected, skipping poll tick");
                        continue;
                    }
                    self.run_tick().await;
                }
            }
        }

        info!("session reconciler stopped");
    }

    /// One reconciliation pass. Public so tests can drive single ticks.
    pub async fn run_tick(&self) {
        let sessions = match self.api.list_sessions().await {
            Ok(sessions) => sessions,
            Err(TransportError::Unauthorized) => {
                warn!("session list unauthorized, attempting re-authentication");
                // One attempt per detection; the single-flight guard in the
                // client collapses concurrent detections
                if let Err(e) = self.api.reauthenticate().await {
                    error!("re-authentication failed: {}", e);
                    self.health.record_failure();
                }
                return;
            }
            Err(e) => {
                warn!("session list failed: {}", e);
                self.health.record_failure();
                return;
            }
        };

        let Some(user_id) = self.api.authenticated_user_id().await else {
            debug!("no authenticated user yet, skipping reconciliation");
            return;
        };

        self.reconcile(sessions, &user_id).await;
    }

    async fn reconcile(&self, sessions: Vec<Session>, user_id: &str) {
        // Sessions of other users never create bindings
        let mine = sessions.into_iter().filter(|s| s.user_id == user_id);

        // Deduplicate by entity identity. During client reconnects the
        // server briefly reports two sessions for the same client; the one
        // with the freshest activity wins this tick.
        let mut survivors: HashMap<EntityId, Session> = HashMap::new();
        for session in mine {
            let entity_id = EntityId::derive(&session.client_name, &session.user_id);
            match survivors.get(&entity_id) {
                Some(kept) if kept.last_activity >= session.last_activity => {
                    debug!(
                        entity = %entity_id,
                        dropped = %session.session_id,
                        "dropping duplicate session with older activity"
                    );
                }
                _ => {
                    survivors.insert(entity_id, session);
                }
            }
        }

        let mut next = self.bindings.read().await.clone();
        let now = Instant::now();
        let mut emits: Vec<Emit> = Vec::new();

        for (entity_id, session) in &survivors {
            let display = projector::project(session, |art| {
                Some(self.api.resolve_artwork_url(art))
            });

            match next.get_mut(entity_id) {
                Some(binding) => {
                    binding.last_known_session_id = Some(session.session_id.clone());
                    binding.display_name = session.display_name();
                    binding.missing_since = None;
                    binding.retired = false;
                    if binding.display != display {
                        binding.display = display.clone();
                        emits.push(Emit::Updated(entity_id.clone(), display));
                    }
                }
                None => {
                    let display_name = session.display_name();
                    info!(entity = %entity_id, name = %display_name, "entity created");
                    next.insert(
                        entity_id.clone(),
                        EntityBinding {
                            entity_id: entity_id.clone(),
                            display_name: display_name.clone(),
                            last_known_session_id: Some(session.session_id.clone()),
                            display: display.clone(),
                            created_at: Utc::now(),
                            missing_since: None,
                            retired: false,
                        },
                    );
                    emits.push(Emit::Created(entity_id.clone(), display_name));
                    emits.push(Emit::Updated(entity_id.clone(), display));
                }
            }
        }

        // Grace handling for bindings whose session vanished this tick
        for (entity_id, binding) in next.iter_mut() {
            if survivors.contains_key(entity_id) {
                continue;
            }
            match binding.missing_since {
                None => {
                    debug!(entity = %entity_id, "session missing, grace timer started");
                    binding.missing_since = Some(now);
                }
                Some(since)
                    if !binding.retired && now.duration_since(since) >= self.config.grace =>
                {
                    info!(entity = %entity_id, "grace window elapsed, retiring entity");
                    binding.retired = true;
                    binding.last_known_session_id = None;
                    if binding.display != DisplayPayload::stopped() {
                        binding.display = DisplayPayload::stopped();
                        emits.push(Emit::Updated(entity_id.clone(), DisplayPayload::stopped()));
                    }
                    emits.push(Emit::Retired(entity_id.clone()));
                }
                Some(_) => {}
            }
        }

        // Swap the snapshot in whole, then push to the host runtime
        *self.bindings.write().await = next;

        for emit in emits {
            let result = match &emit {
                Emit::Created(id, name) => self.host.create_entity(id, name).await,
                Emit::Updated(id, display) => self.host.update_entity_state(id, display).await,
                Emit::Retired(id) => self.host.retire_entity(id).await,
            };
            if let Err(e) = result {
                warn!("host runtime push failed: {}", e);
            }
        }
    }
}
