//! Host runtime boundary
//!
//! The remote-control host runtime (the thing that actually renders
//! entities and forwards button presses) sits behind this trait. The
//! reconciler only ever talks to it through these three calls; tests swap
//! in a recording implementation.

use anyhow::Result;
use async_trait::async_trait;

use crate::bus::{BusEvent, DisplayPayload, EntityId, SharedBus};

/// Entity lifecycle surface exposed to the host runtime
#[async_trait]
pub trait HostRuntime: Send + Sync + 'static {
    /// Announce a new media-player entity
    async fn create_entity(&self, entity_id: &EntityId, display_name: &str) -> Result<()>;

    /// Push an updated display payload for an entity
    async fn update_entity_state(&self, entity_id: &EntityId, display: &DisplayPayload)
        -> Result<()>;

    /// Mark an entity idle after prolonged session absence.
    /// Not a deletion: the entity may resume when its session reappears.
    async fn retire_entity(&self, entity_id: &EntityId) -> Result<()>;
}

/// Host runtime that relays entity lifecycle onto the event bus, where the
/// embedding integration layer picks it up.
pub struct BusHostRuntime {
    bus: SharedBus,
}

impl BusHostRuntime {
    pub fn new(bus: SharedBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl HostRuntime for BusHostRuntime {
    async fn create_entity(&self, entity_id: &EntityId, display_name: &str) -> Result<()> {
        self.bus.publish(BusEvent::EntityCreated {
            entity_id: entity_id.clone(),
            display_name: display_name.to_string(),
        });
        Ok(())
    }

    async fn update_entity_state(
        &self,
        entity_id: &EntityId,
        display: &DisplayPayload,
    ) -> Result<()> {
        self.bus.publish(BusEvent::EntityStateChanged {
            entity_id: entity_id.clone(),
            display: display.clone(),
        });
        Ok(())
    }

    async fn retire_entity(&self, entity_id: &EntityId) -> Result<()> {
        self.bus.publish(BusEvent::EntityRetired {
            entity_id: entity_id.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::create_bus;

    #[tokio::test]
    async fn test_bus_host_relays_lifecycle() {
        let bus = create_bus();
        let mut rx = bus.subscribe();
        let host = BusHostRuntime::new(bus);

        let id = EntityId::derive("Jellyfin Web", "user-1");
        host.create_entity(&id, "Jellyfin Web").await.unwrap();
        host.update_entity_state(&id, &DisplayPayload::stopped())
            .await
            .unwrap();
        host.retire_entity(&id).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            BusEvent::EntityCreated { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            BusEvent::EntityStateChanged { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            BusEvent::EntityRetired { .. }
        ));
    }
}
