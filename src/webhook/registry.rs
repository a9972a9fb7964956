//! Webhook subscription registry

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::SubscriptionStore;

/// Event kinds subscribers can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A settling transaction reached `Completed`
    #[serde(rename = "payment.completed")]
    PaymentCompleted,

    /// A dispute was resolved
    #[serde(rename = "dispute.resolved")]
    DisputeResolved,

    /// A marketplace service was booked
    #[serde(rename = "service.booked")]
    ServiceBooked,
}

impl EventKind {
    /// The wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentCompleted => "payment.completed",
            Self::DisputeResolved => "dispute.resolved",
            Self::ServiceBooked => "service.booked",
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "payment.completed" => Ok(Self::PaymentCompleted),
            "dispute.resolved" => Ok(Self::DisputeResolved),
            "service.booked" => Ok(Self::ServiceBooked),
            other => Err(Error::validation(format!("unknown event kind: {other}"))),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered webhook subscription. Read-only after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription identity
    pub id: Uuid,
    /// Owning user
    pub owner_id: String,
    /// Delivery target
    pub target_url: String,
    /// Events this subscription wants
    pub events: HashSet<EventKind>,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

/// Registration input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    /// Owning user
    pub owner_id: String,
    /// Delivery target; must be an absolute http(s) URL
    pub target_url: String,
    /// Events to subscribe to; duplicates collapse
    pub events: Vec<EventKind>,
}

/// Registration and matching over webhook subscriptions
pub struct SubscriptionRegistry {
    store: Arc<dyn SubscriptionStore>,
}

impl SubscriptionRegistry {
    /// Create a registry over the given store
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    /// Register a subscription.
    ///
    /// The target URL must parse as absolute http or https; deeper safety
    /// checks (loopback resolution) happen at delivery time, because DNS
    /// answers can change between registration and dispatch.
    pub async fn register(&self, input: NewSubscription) -> Result<Subscription> {
        if input.owner_id.trim().is_empty() {
            return Err(Error::validation("owner_id cannot be empty"));
        }
        if input.events.is_empty() {
            return Err(Error::validation("events cannot be empty"));
        }
        let parsed = Url::parse(&input.target_url)
            .map_err(|e| Error::validation(format!("invalid target_url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "target_url must be http or https, got {}",
                parsed.scheme()
            )));
        }

        let subscription = Subscription {
            id: Uuid::new_v4(),
            owner_id: input.owner_id,
            target_url: input.target_url,
            events: input.events.into_iter().collect(),
            created_at: Utc::now(),
        };
        let subscription = self.store.insert(subscription).await?;
        info!(
            subscription_id = %subscription.id,
            target_url = %subscription.target_url,
            "Webhook subscription registered"
        );
        Ok(subscription)
    }

    /// All subscriptions, oldest first.
    pub async fn list(&self) -> Result<Vec<Subscription>> {
        self.store.list().await
    }

    /// Subscriptions whose event set contains `event`.
    pub async fn matching(&self, event: EventKind) -> Result<Vec<Subscription>> {
        self.store.matching(event).await
    }
}
