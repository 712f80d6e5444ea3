//! Persistence sink
//!
//! Subscribes to the durable event types and writes them through the
//! storage layer. Writes are best-effort: a failure logs a warning
//! and never blocks the bus.

use futures_util::FutureExt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::models::{Event, EventPayload, EventType, OrderStatus};
use crate::storage::Storage;

pub struct PersistenceService {
    storage: Arc<Storage>,
}

impl PersistenceService {
    pub fn new(storage: Arc<Storage>) -> Arc<Self> {
        Arc::new(Self { storage })
    }

    pub fn start(self: Arc<Self>, bus: &Arc<EventBus>) {
        info!("persistence service started");

        for (event_type, name) in [
            (EventType::OrderRequest, "persistence.on_order_request"),
            (EventType::OrderUpdate, "persistence.on_order_update"),
            (EventType::Fill, "persistence.on_fill"),
            (EventType::PositionUpdate, "persistence.on_position_update"),
        ] {
            let sink = Arc::clone(&self);
            bus.subscribe(event_type, name, move |event| {
                let sink = Arc::clone(&sink);
                async move { sink.on_event(event).await }.boxed()
            });
        }
    }

    pub fn stop(&self, bus: &EventBus) {
        bus.unsubscribe(EventType::OrderRequest, "persistence.on_order_request");
        bus.unsubscribe(EventType::OrderUpdate, "persistence.on_order_update");
        bus.unsubscribe(EventType::Fill, "persistence.on_fill");
        bus.unsubscribe(EventType::PositionUpdate, "persistence.on_position_update");
    }

    async fn on_event(&self, event: Event) -> anyhow::Result<()> {
        let result = match &event.payload {
            EventPayload::OrderRequest(order) => self.storage.upsert_order(order).await,
            EventPayload::OrderUpdate(update) => {
                self.storage
                    .update_order_status(update.order_id, update.status)
                    .await
            }
            EventPayload::Fill(fill) => {
                let inserted = self.storage.insert_fill(fill).await;
                if inserted.is_ok() {
                    self.storage
                        .update_order_status(fill.order_id, OrderStatus::Filled)
                        .await
                } else {
                    inserted
                }
            }
            EventPayload::Position(position) => self.storage.upsert_position(position).await,
            _ => Ok(()),
        };

        if let Err(err) = result {
            warn!(
                event_type = %event.event_type,
                error = %err,
                "failed to persist event"
            );
        }
        Ok(())
    }
}
