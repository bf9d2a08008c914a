use crate::entities::{AdjustmentKind, AdjustmentReason};
use crate::errors::ServiceError;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

pub mod outbox;

/// One event on its way to the handlers. `ack` reports whether every
/// handler succeeded.
#[derive(Debug)]
pub struct Delivery {
    pub event_id: Uuid,
    pub event: Event,
    ack: oneshot::Sender<Result<(), String>>,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Delivery>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Delivery>) -> Self {
        Self { sender }
    }

    /// Hands `event` to the dispatcher and waits until all handlers are done.
    /// Returns an error if the channel is closed or any handler failed.
    pub async fn deliver(&self, event_id: Uuid, event: Event) -> Result<(), ServiceError> {
        let (ack, outcome) = oneshot::channel();
        self.sender
            .send(Delivery {
                event_id,
                event,
                ack,
            })
            .await
            .map_err(|_| ServiceError::EventError("Failed to send event: channel closed".to_string()))?;

        match outcome.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ServiceError::EventError(message)),
            Err(_) => Err(ServiceError::EventError(
                "Event dispatcher stopped before acknowledging".to_string(),
            )),
        }
    }
}

/// Creates a bounded in-process event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Delivery>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender::new(tx), rx)
}

/// Domain events raised by the ledger, the catalog and the order coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A ledger mutation moved a product's stock to a different value.
    StockChanged {
        product_id: i32,
        product_name: String,
        previous_stock: i32,
        new_stock: i32,
        kind: AdjustmentKind,
        reason: AdjustmentReason,
    },
    /// Catalog fields other than stock changed.
    ProductUpdated {
        product_id: i32,
        product_name: String,
        changes: Vec<String>,
    },
    OrderCreated(i32),
    OrderUpdated(i32),
    OrderDeleted(i32),
    OrdersImported(Vec<i32>),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StockChanged { .. } => "StockChanged",
            Event::ProductUpdated { .. } => "ProductUpdated",
            Event::OrderCreated(_) => "OrderCreated",
            Event::OrderUpdated(_) => "OrderUpdated",
            Event::OrderDeleted(_) => "OrderDeleted",
            Event::OrdersImported(_) => "OrdersImported",
        }
    }

    /// Aggregate type and id the event is recorded against in the outbox.
    pub fn aggregate(&self) -> (&'static str, Option<i32>) {
        match self {
            Event::StockChanged { product_id, .. } | Event::ProductUpdated { product_id, .. } => {
                ("product", Some(*product_id))
            }
            Event::OrderCreated(id) | Event::OrderUpdated(id) | Event::OrderDeleted(id) => {
                ("order", Some(*id))
            }
            Event::OrdersImported(_) => ("order", None),
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Handles one event. `event_id` is stable across redeliveries of the
    /// same event, so side effects keyed by it stay idempotent.
    async fn handle_event(&self, event_id: Uuid, event: &Event) -> Result<(), ServiceError>;
}

/// Receives deliveries until every sender is dropped and hands each one to
/// all registered handlers. Handler failures are logged and reported back
/// through the delivery's acknowledgement so the outbox can retry.
pub async fn process_events(
    mut rx: mpsc::Receiver<Delivery>,
    handlers: Vec<Arc<dyn EventHandler>>,
) {
    info!(handlers = handlers.len(), "Starting event processing loop");

    while let Some(delivery) = rx.recv().await {
        let Delivery {
            event_id,
            event,
            ack,
        } = delivery;
        debug!(%event_id, event_type = event.event_type(), "Received event");

        let results = join_all(handlers.iter().map(|h| h.handle_event(event_id, &event))).await;
        let mut failures = Vec::new();
        for (handler, result) in handlers.iter().zip(results) {
            if let Err(e) = result {
                error!(
                    handler = handler.name(),
                    %event_id,
                    event_type = event.event_type(),
                    error = %e,
                    "Event handler failed"
                );
                failures.push(format!("{}: {}", handler.name(), e));
            }
        }

        let outcome = if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        };
        if ack.send(outcome).is_err() {
            debug!(%event_id, "Delivery no longer awaited");
        }
    }

    info!("Event channel closed; event processing loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<Event>>);

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle_event(&self, _event_id: Uuid, event: &Event) -> Result<(), ServiceError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle_event(&self, _event_id: Uuid, _event: &Event) -> Result<(), ServiceError> {
            Err(ServiceError::InternalError("boom".into()))
        }
    }

    #[tokio::test]
    async fn every_handler_sees_every_event() {
        let (sender, rx) = channel(8);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![recorder.clone()];
        let task = tokio::spawn(process_events(rx, handlers));

        sender.deliver(Uuid::new_v4(), Event::OrderCreated(1)).await.unwrap();
        sender.deliver(Uuid::new_v4(), Event::OrderDeleted(1)).await.unwrap();
        drop(sender);
        task.await.unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert_eq!(seen, vec![Event::OrderCreated(1), Event::OrderDeleted(1)]);
    }

    #[tokio::test]
    async fn handler_failure_is_reported_to_the_sender() {
        let (sender, rx) = channel(8);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(Failing), recorder.clone()];
        let task = tokio::spawn(process_events(rx, handlers));

        let err = sender
            .deliver(Uuid::new_v4(), Event::OrderCreated(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EventError(ref msg) if msg.contains("failing")));
        // Other handlers still ran.
        assert_eq!(recorder.0.lock().unwrap().len(), 1);

        drop(sender);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_fails_delivery() {
        let (sender, rx) = channel(1);
        drop(rx);
        assert!(sender
            .deliver(Uuid::new_v4(), Event::OrderUpdated(3))
            .await
            .is_err());
    }

    #[test]
    fn stock_changed_serializes_with_snake_case_enums() {
        let event = Event::StockChanged {
            product_id: 7,
            product_name: "Lab Gown".into(),
            previous_stock: 3,
            new_stock: 10,
            kind: AdjustmentKind::Add,
            reason: AdjustmentReason::Purchase,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["StockChanged"]["kind"], "add");
        assert_eq!(json["StockChanged"]["reason"], "purchase");
        assert_eq!(event.aggregate(), ("product", Some(7)));
    }
}
