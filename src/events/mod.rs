use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capacity of the domain event channel created by the server binary.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    ///
    /// Events are notifications after the fact; losing one never undoes the
    /// state change that produced it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "domain event dropped");
        }
    }
}

/// Domain events emitted by the storefront.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_number: String,
        grand_total: Decimal,
    },
    OrderPaid {
        order_number: String,
        payment_intent_id: String,
    },
    OrderPaymentFailed {
        order_number: String,
        payment_intent_id: String,
    },
    CartCleared {
        session_id: String,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_number,
                grand_total,
            } => {
                info!(%order_number, %grand_total, "order created");
            }
            Event::OrderPaid {
                order_number,
                payment_intent_id,
            } => {
                info!(%order_number, %payment_intent_id, "order paid");
            }
            Event::OrderPaymentFailed {
                order_number,
                payment_intent_id,
            } => {
                warn!(%order_number, %payment_intent_id, "order payment failed");
            }
            Event::CartCleared { session_id } => {
                info!(%session_id, "cart cleared");
            }
        }
    }

    info!("Event processing loop stopped");
}
