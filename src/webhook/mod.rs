//! Webhook Signer/Verifier (C8) and Webhook Deliverer (C9).

pub mod deliverer;
pub mod schemas;
pub mod signer;

pub use deliverer::{ReqwestTransport, WebhookDeliverer, MAX_ATTEMPTS, RETRY_SCHEDULE_MINUTES};
pub use signer::{sign, verify, HmacSigner, REPLAY_TOLERANCE_SECS};
