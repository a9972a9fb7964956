//! Signed webhook fan-out
//!
//! Third parties register subscriptions (owner, target URL, event set) and
//! receive `POST {event, data}` envelopes signed with a shared secret:
//!
//! ```text
//! State change -> EventKind -> matching subscriptions
//!                                   |
//!                          [serialize envelope once]
//!                                   |
//!                          [HMAC-SHA256 -> X-Signature]
//!                                   |
//!                 +--------- concurrent fan-out ----------+
//!                 v                 v                      v
//!           SSRF check        SSRF check             SSRF check
//!           POST + timeout    skipped (loopback)     POST + timeout
//! ```
//!
//! Delivery is fire-and-forget and at-most-once per call: per-target
//! failures are logged and reported in the outcome list, never retried here
//! and never allowed to abort sibling deliveries. The outbox worker owns
//! whatever retry budget the deployment wants.

pub mod dispatcher;
pub mod registry;
pub mod signature;

pub use dispatcher::{
    DeliveryOutcome, DeliveryResult, DispatcherConfig, EventEnvelope, SignedDispatcher,
};
pub use registry::{EventKind, NewSubscription, Subscription, SubscriptionRegistry};
pub use signature::{compute_signature, verify_signature, SIGNATURE_HEADER};
