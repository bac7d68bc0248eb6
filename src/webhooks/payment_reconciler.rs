use crate::{
    entities::order::{self, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::commerce::payment_gateway::to_minor_units,
    webhooks::signature::WebhookVerifier,
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Envelope of a gateway webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: GatewayEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEventData {
    pub object: GatewayObject,
}

/// The payment intent the event is about.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayObject {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

/// State change requested by an event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    MarkPaid,
    MarkPaymentFailed,
}

impl Transition {
    pub fn target(self) -> PaymentStatus {
        match self {
            Transition::MarkPaid => PaymentStatus::Paid,
            Transition::MarkPaymentFailed => PaymentStatus::PaymentFailed,
        }
    }
}

type EventHandler = fn(&GatewayObject) -> Option<Transition>;

fn on_payment_succeeded(_intent: &GatewayObject) -> Option<Transition> {
    Some(Transition::MarkPaid)
}

fn on_payment_failed(_intent: &GatewayObject) -> Option<Transition> {
    Some(Transition::MarkPaymentFailed)
}

/// Event type to handler. Anything else is acknowledged untouched.
const EVENT_HANDLERS: &[(&str, EventHandler)] = &[
    ("payment_intent.succeeded", on_payment_succeeded),
    ("payment_intent.payment_failed", on_payment_failed),
];

fn handler_for(event_type: &str) -> Option<EventHandler> {
    EVENT_HANDLERS
        .iter()
        .find(|(name, _)| *name == event_type)
        .map(|(_, handler)| *handler)
}

/// What a delivery did. Every variant is acknowledged to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied {
        order_number: String,
        payment_status: PaymentStatus,
    },
    /// The order had already left `created`; nothing changed.
    Duplicate {
        order_number: String,
        payment_status: PaymentStatus,
    },
    /// No order carries this intent id.
    Orphan { payment_intent_id: String },
    /// The event's amount differs from the order total; the order is left as is.
    AmountMismatch {
        order_number: String,
        expected_minor: i64,
        received_minor: Option<i64>,
    },
    Ignored { event_type: String },
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Applied { .. } => "applied",
            ReconcileOutcome::Duplicate { .. } => "duplicate",
            ReconcileOutcome::Orphan { .. } => "orphan",
            ReconcileOutcome::AmountMismatch { .. } => "amount_mismatch",
            ReconcileOutcome::Ignored { .. } => "ignored",
        }
    }
}

/// Applies verified gateway events to local orders.
///
/// Orders move `created -> paid` or `created -> payment_failed` and stop
/// there. Transitions are conditional updates, so duplicated or concurrent
/// deliveries change an order at most once and emit at most one event.
#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    verifier: Option<WebhookVerifier>,
}

impl PaymentReconciler {
    /// Without a verifier every delivery is rejected.
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        verifier: Option<WebhookVerifier>,
    ) -> Self {
        Self {
            db,
            event_sender,
            verifier,
        }
    }

    /// Verifies, parses and applies one delivery.
    #[instrument(skip_all)]
    pub async fn handle_delivery(
        &self,
        signature_header: Option<&str>,
        payload: &[u8],
    ) -> Result<ReconcileOutcome, ServiceError> {
        let Some(verifier) = &self.verifier else {
            error!("webhook received but no signing secret is configured");
            counter!("storefront_webhook_events_total", 1, "outcome" => "invalid_signature");
            return Err(ServiceError::InvalidSignature);
        };
        if let Err(e) = verifier.verify(signature_header, payload) {
            warn!("webhook signature verification failed");
            counter!("storefront_webhook_events_total", 1, "outcome" => "invalid_signature");
            return Err(e);
        }

        let event = parse_event(payload).map_err(|e| {
            counter!("storefront_webhook_events_total", 1, "outcome" => "invalid_payload");
            e
        })?;

        let outcome = self.reconcile(&event).await?;
        counter!("storefront_webhook_events_total", 1, "outcome" => outcome.label());
        Ok(outcome)
    }

    /// Dispatches an already verified event.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, payment_intent_id = %event.data.object.id))]
    pub async fn reconcile(&self, event: &GatewayEvent) -> Result<ReconcileOutcome, ServiceError> {
        let Some(handler) = handler_for(&event.event_type) else {
            info!("unhandled webhook event type acknowledged");
            return Ok(ReconcileOutcome::Ignored {
                event_type: event.event_type.clone(),
            });
        };
        let Some(transition) = handler(&event.data.object) else {
            return Ok(ReconcileOutcome::Ignored {
                event_type: event.event_type.clone(),
            });
        };

        match self.apply(&event.data.object, transition).await {
            Err(ServiceError::ReconciliationOrphan(payment_intent_id)) => {
                warn!(
                    %payment_intent_id,
                    event_id = event.id.as_deref().unwrap_or(""),
                    "verified payment event matches no order; needs operator attention"
                );
                Ok(ReconcileOutcome::Orphan { payment_intent_id })
            }
            other => other,
        }
    }

    async fn apply(
        &self,
        intent: &GatewayObject,
        transition: Transition,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let payment_intent_id = intent.id.as_str();
        let order = order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::ReconciliationOrphan(payment_intent_id.to_string()))?;

        let expected_minor = to_minor_units(order.grand_total)?;
        if intent.amount != Some(expected_minor) {
            error!(
                order_number = %order.order_number,
                expected_minor,
                received_minor = ?intent.amount,
                "payment event amount does not match the order; needs operator attention"
            );
            return Ok(ReconcileOutcome::AmountMismatch {
                order_number: order.order_number,
                expected_minor,
                received_minor: intent.amount,
            });
        }

        let target = transition.target();
        let result = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(target.to_value()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Created.to_value()))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let current = order::Entity::find_by_id(order.id)
                .one(&*self.db)
                .await?
                .map(|latest| latest.payment_status)
                .unwrap_or(order.payment_status);
            info!(
                order_number = %order.order_number,
                payment_status = ?current,
                "duplicate or late payment event; order unchanged"
            );
            return Ok(ReconcileOutcome::Duplicate {
                order_number: order.order_number,
                payment_status: current,
            });
        }

        let event = match transition {
            Transition::MarkPaid => Event::OrderPaid {
                order_number: order.order_number.clone(),
                payment_intent_id: payment_intent_id.to_string(),
            },
            Transition::MarkPaymentFailed => Event::OrderPaymentFailed {
                order_number: order.order_number.clone(),
                payment_intent_id: payment_intent_id.to_string(),
            },
        };
        self.event_sender.send_or_log(event).await;

        info!(order_number = %order.order_number, payment_status = ?target, "payment status updated");
        Ok(ReconcileOutcome::Applied {
            order_number: order.order_number,
            payment_status: target,
        })
    }
}

/// Parses a delivery body; structural problems are `InvalidPayload`.
pub fn parse_event(payload: &[u8]) -> Result<GatewayEvent, ServiceError> {
    let event: GatewayEvent = serde_json::from_slice(payload)
        .map_err(|e| ServiceError::InvalidPayload(e.to_string()))?;
    if event.event_type.trim().is_empty() {
        return Err(ServiceError::InvalidPayload("event type is empty".into()));
    }
    if event.data.object.id.trim().is_empty() {
        return Err(ServiceError::InvalidPayload(
            "event object has no id".into(),
        ));
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn dispatch_table_covers_payment_intent_outcomes() {
        let intent = GatewayObject {
            id: "pi_1".into(),
            amount: Some(3300),
            status: None,
        };
        assert_eq!(
            handler_for("payment_intent.succeeded").and_then(|h| h(&intent)),
            Some(Transition::MarkPaid)
        );
        assert_eq!(
            handler_for("payment_intent.payment_failed").and_then(|h| h(&intent)),
            Some(Transition::MarkPaymentFailed)
        );
        assert!(handler_for("charge.refunded").is_none());
    }

    #[test]
    fn parse_rejects_malformed_payloads() {
        assert_matches!(parse_event(b"not json"), Err(ServiceError::InvalidPayload(_)));
        assert_matches!(
            parse_event(br#"{"type":"payment_intent.succeeded"}"#),
            Err(ServiceError::InvalidPayload(_))
        );
        assert_matches!(
            parse_event(br#"{"type":"payment_intent.succeeded","data":{"object":{"id":""}}}"#),
            Err(ServiceError::InvalidPayload(_))
        );
        assert_matches!(
            parse_event(br#"{"type":"","data":{"object":{"id":"pi_1"}}}"#),
            Err(ServiceError::InvalidPayload(_))
        );
    }

    #[test]
    fn parse_accepts_gateway_shape() {
        let event = parse_event(
            br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","object":"payment_intent","amount":3300}}}"#,
        )
        .unwrap();
        assert_eq!(event.id.as_deref(), Some("evt_1"));
        assert_eq!(event.data.object.id, "pi_1");
        assert_eq!(event.data.object.amount, Some(3300));
    }
}
