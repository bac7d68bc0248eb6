//! Inbound payment gateway webhooks: signature checks and order reconciliation.

pub mod payment_reconciler;
pub mod signature;

pub use payment_reconciler::{GatewayEvent, PaymentReconciler, ReconcileOutcome, Transition};
pub use signature::{sign_payload, WebhookVerifier, SIGNATURE_HEADER};
