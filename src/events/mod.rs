use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{OrderStatus, PaymentMethod};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort send. Never blocks and never fails the caller.
    pub fn send_or_log(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event = event.name(), "event channel full; dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(event = event.name(), "event channel closed; dropping event");
            }
        }
    }
}

/// Domain events emitted by the cart and order pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CartMerged {
        user_id: Uuid,
        lines_merged: usize,
        lines_skipped: usize,
    },
    CartCleared {
        user_id: Uuid,
        order_id: Option<Uuid>,
    },
    CheckoutSessionCreated {
        user_id: Uuid,
        session_id: String,
        snapshot_id: Uuid,
    },
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        payment_method: PaymentMethod,
        total_amount_minor: i64,
        placed_at: DateTime<Utc>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartMerged { .. } => "cart_merged",
            Event::CartCleared { .. } => "cart_cleared",
            Event::CheckoutSessionCreated { .. } => "checkout_session_created",
            Event::OrderPlaced { .. } => "order_placed",
            Event::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                user_id,
                payment_method,
                total_amount_minor,
                ..
            } => info!(
                %order_id,
                %user_id,
                %payment_method,
                total_amount_minor,
                "order placed"
            ),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "order status changed"),
            other => info!(event = other.name(), payload = ?other, "event received"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let user_id = Uuid::new_v4();

        sender.send_or_log(Event::CartCleared {
            user_id,
            order_id: None,
        });
        sender.send_or_log(Event::CartCleared {
            user_id,
            order_id: Some(Uuid::new_v4()),
        });

        assert_eq!(
            rx.recv().await,
            Some(Event::CartCleared {
                user_id,
                order_id: None
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_or_log_survives_closed_channel() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.send_or_log(Event::CartMerged {
            user_id: Uuid::new_v4(),
            lines_merged: 1,
            lines_skipped: 0,
        });
        assert!(sender
            .send(Event::CartCleared {
                user_id: Uuid::new_v4(),
                order_id: None
            })
            .await
            .is_err());
    }
}
