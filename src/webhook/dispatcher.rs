//! Signed, concurrent webhook delivery

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use url::{Host, Url};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::store::SubscriptionStore;
use crate::webhook::registry::{EventKind, Subscription};
use crate::webhook::signature::{compute_signature, SIGNATURE_HEADER};

/// The envelope delivered to every subscriber
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Event kind, wire-named (e.g. `payment.completed`)
    pub event: EventKind,
    /// Event payload
    pub data: serde_json::Value,
}

/// Dispatcher tunables, derived from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Shared signing secret; validated non-empty at construction
    pub signing_secret: String,
    /// Per-target delivery timeout
    pub delivery_timeout: Duration,
    /// Disable the loopback/unspecified guard. Local testing only.
    pub allow_loopback: bool,
}

impl From<&AppConfig> for DispatcherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            signing_secret: config.signing_secret.clone(),
            delivery_timeout: config.delivery_timeout,
            allow_loopback: config.allow_loopback_webhooks,
        }
    }
}

/// Outcome of one attempted delivery
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    /// The subscription that was targeted
    pub subscription_id: Uuid,
    /// Its delivery URL
    pub target_url: String,
    /// What happened
    pub result: DeliveryResult,
}

/// Per-target delivery result
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    /// Target acknowledged with a 2xx
    Delivered {
        /// HTTP status code returned
        code: u16,
    },
    /// Target failed the SSRF guard; no request was issued
    SkippedUnsafe {
        /// Why the target was rejected
        reason: String,
    },
    /// Network error, timeout or non-2xx response
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Whether the target acknowledged the delivery
    pub fn is_delivered(&self) -> bool {
        matches!(self.result, DeliveryResult::Delivered { .. })
    }
}

/// Computes the payload MAC once and fans it out concurrently to every
/// matching, safety-checked subscription.
pub struct SignedDispatcher {
    config: DispatcherConfig,
    subscriptions: Arc<dyn SubscriptionStore>,
    client: reqwest::Client,
}

impl std::fmt::Debug for SignedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SignedDispatcher {
    /// Create a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the signing secret is empty.
    /// [`AppConfig`] already enforces this at startup; the check here keeps
    /// the dispatcher safe to construct in isolation.
    pub fn new(config: DispatcherConfig, subscriptions: Arc<dyn SubscriptionStore>) -> Result<Self> {
        if config.signing_secret.is_empty() {
            return Err(Error::configuration(
                "webhook signing secret is not configured",
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            subscriptions,
            client,
        })
    }

    /// Deliver `data` as an `event` envelope to all matching subscriptions.
    ///
    /// The body is serialized exactly once; every target receives identical
    /// bytes and a signature computed over them. Targets are contacted
    /// concurrently, each bounded by the configured timeout. Per-target
    /// failures land in the outcome list, never in the error channel.
    #[instrument(skip(self, data), fields(event = %event))]
    pub async fn deliver(
        &self,
        event: EventKind,
        data: serde_json::Value,
    ) -> Result<Vec<DeliveryOutcome>> {
        let subscriptions = self.subscriptions.matching(event).await?;
        if subscriptions.is_empty() {
            debug!("No subscriptions match event");
            return Ok(vec![]);
        }

        let envelope = EventEnvelope { event, data };
        let body = serde_json::to_vec(&envelope)?;
        let signature = compute_signature(&self.config.signing_secret, &body);

        let deliveries = subscriptions.into_iter().map(|subscription| {
            self.deliver_one(subscription, body.clone(), signature.clone())
        });
        Ok(futures::future::join_all(deliveries).await)
    }

    async fn deliver_one(
        &self,
        subscription: Subscription,
        body: Vec<u8>,
        signature: String,
    ) -> DeliveryOutcome {
        let target_url = subscription.target_url.clone();

        let url = match Url::parse(&target_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(subscription_id = %subscription.id, target_url = %target_url, error = %e, "Webhook target URL unparseable");
                return DeliveryOutcome {
                    subscription_id: subscription.id,
                    target_url,
                    result: DeliveryResult::Failed {
                        reason: format!("invalid URL: {e}"),
                    },
                };
            }
        };

        match check_target(&url, self.config.allow_loopback).await {
            TargetCheck::Safe => {}
            TargetCheck::Unsafe(reason) => {
                warn!(
                    subscription_id = %subscription.id,
                    target_url = %target_url,
                    reason = %reason,
                    "Skipping unsafe webhook target"
                );
                return DeliveryOutcome {
                    subscription_id: subscription.id,
                    target_url,
                    result: DeliveryResult::SkippedUnsafe { reason },
                };
            }
            TargetCheck::Unresolvable(reason) => {
                warn!(
                    subscription_id = %subscription.id,
                    target_url = %target_url,
                    reason = %reason,
                    "Webhook target did not resolve"
                );
                return DeliveryOutcome {
                    subscription_id: subscription.id,
                    target_url,
                    result: DeliveryResult::Failed { reason },
                };
            }
        }

        let response = self
            .client
            .post(url)
            .header(SIGNATURE_HEADER, &signature)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.config.delivery_timeout)
            .body(body)
            .send()
            .await;

        let result = match response {
            Ok(response) if response.status().is_success() => DeliveryResult::Delivered {
                code: response.status().as_u16(),
            },
            Ok(response) => {
                warn!(
                    subscription_id = %subscription.id,
                    target_url = %target_url,
                    code = response.status().as_u16(),
                    "Webhook target returned non-success status"
                );
                DeliveryResult::Failed {
                    reason: format!("non-success status: {}", response.status()),
                }
            }
            Err(e) => {
                warn!(
                    subscription_id = %subscription.id,
                    target_url = %target_url,
                    error = %e,
                    "Webhook delivery failed"
                );
                DeliveryResult::Failed {
                    reason: e.to_string(),
                }
            }
        };

        DeliveryOutcome {
            subscription_id: subscription.id,
            target_url,
            result,
        }
    }
}

enum TargetCheck {
    Safe,
    Unsafe(String),
    Unresolvable(String),
}

/// Resolve the target's host and reject loopback or unspecified addresses.
///
/// The check runs at delivery time rather than registration time: DNS
/// answers for a hostname can change between the two.
async fn check_target(url: &Url, allow_loopback: bool) -> TargetCheck {
    let Some(host) = url.host() else {
        return TargetCheck::Unresolvable("URL has no host".to_string());
    };
    let port = url.port_or_known_default().unwrap_or(80);

    let addrs: Vec<IpAddr> = match host {
        Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
        Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
        Host::Domain(domain) => match tokio::net::lookup_host((domain, port)).await {
            Ok(resolved) => resolved.map(|addr| addr.ip()).collect(),
            Err(e) => {
                return TargetCheck::Unresolvable(format!("host resolution failed: {e}"));
            }
        },
    };

    if addrs.is_empty() {
        return TargetCheck::Unresolvable("host resolved to no addresses".to_string());
    }
    if allow_loopback {
        return TargetCheck::Safe;
    }
    for ip in &addrs {
        if ip.is_loopback() {
            return TargetCheck::Unsafe(format!("{ip} is a loopback address"));
        }
        if ip.is_unspecified() {
            return TargetCheck::Unsafe(format!("{ip} is an unspecified address"));
        }
    }
    TargetCheck::Safe
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::webhook::registry::{NewSubscription, SubscriptionRegistry};

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            signing_secret: "test-signing-secret-for-unit-tests".to_string(),
            delivery_timeout: Duration::from_millis(500),
            allow_loopback: false,
        }
    }

    async fn check(raw: &str, allow_loopback: bool) -> TargetCheck {
        check_target(&Url::parse(raw).unwrap(), allow_loopback).await
    }

    #[tokio::test]
    async fn test_loopback_literal_is_unsafe() {
        assert!(matches!(
            check("http://127.0.0.1:9000/hook", false).await,
            TargetCheck::Unsafe(_)
        ));
        assert!(matches!(
            check("http://[::1]/hook", false).await,
            TargetCheck::Unsafe(_)
        ));
    }

    #[tokio::test]
    async fn test_unspecified_literal_is_unsafe() {
        assert!(matches!(
            check("http://0.0.0.0/hook", false).await,
            TargetCheck::Unsafe(_)
        ));
    }

    #[tokio::test]
    async fn test_public_literal_is_safe() {
        assert!(matches!(
            check("https://93.184.216.34/hook", false).await,
            TargetCheck::Safe
        ));
    }

    #[tokio::test]
    async fn test_loopback_override_for_local_testing() {
        assert!(matches!(
            check("http://127.0.0.1:9000/hook", true).await,
            TargetCheck::Safe
        ));
    }

    #[tokio::test]
    async fn test_localhost_hostname_resolves_to_loopback() {
        assert!(matches!(
            check("http://localhost:9000/hook", false).await,
            TargetCheck::Unsafe(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_secret_rejected() {
        let mut config = test_config();
        config.signing_secret = String::new();
        let err = SignedDispatcher::new(config, Arc::new(InMemoryStore::new())).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_no_matching_subscriptions_is_noop() {
        let dispatcher =
            SignedDispatcher::new(test_config(), Arc::new(InMemoryStore::new())).unwrap();
        let outcomes = dispatcher
            .deliver(EventKind::PaymentCompleted, serde_json::json!({"ok": true}))
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_target_receives_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let registry = SubscriptionRegistry::new(store.clone());
        registry
            .register(NewSubscription {
                owner_id: "u-1".to_string(),
                target_url: "http://127.0.0.1:1/hook".to_string(),
                events: vec![EventKind::PaymentCompleted],
            })
            .await
            .unwrap();

        let dispatcher = SignedDispatcher::new(test_config(), store).unwrap();
        let outcomes = dispatcher
            .deliver(EventKind::PaymentCompleted, serde_json::json!({"ok": true}))
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].result,
            DeliveryResult::SkippedUnsafe { .. }
        ));
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = EventEnvelope {
            event: EventKind::PaymentCompleted,
            data: serde_json::json!({"amount": "100"}),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"], "payment.completed");
        assert_eq!(json["data"]["amount"], "100");
    }
}
