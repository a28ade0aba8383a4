// src/infra/webhooks.rs — Outbound webhook delivery of billing updates
//
// POSTs billed/terminated outcomes to a configured URL. Non-blocking: each
// delivery runs in its own tokio task and failures are only logged.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::billing::BillingOutcome;
use crate::core::notifier::BillingNotifier;
use crate::infra::config::NotifierConfig;

/// JSON payload sent to the webhook URL.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: String,
    pub session_id: String,
    pub timestamp: String,
    pub data: serde_json::Value,
}

pub struct WebhookNotifier {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// `None` when no webhook URL is configured.
    pub fn from_config(config: &NotifierConfig) -> Option<Self> {
        config
            .webhook_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| Self::new(u.trim(), Duration::from_secs(config.timeout_secs)))
    }
}

#[async_trait]
impl BillingNotifier for WebhookNotifier {
    async fn notify(&self, session_id: &str, outcome: &BillingOutcome) {
        let Some(payload) = build_payload(session_id, outcome) else {
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            if let Err(e) = send_webhook(&client, &url, &payload, timeout).await {
                tracing::warn!("Webhook delivery to {} failed: {}", url, e);
            }
        });
    }
}

/// Event name and body for an outcome, or `None` if observers don't get it.
pub fn build_payload(session_id: &str, outcome: &BillingOutcome) -> Option<WebhookPayload> {
    let event = match outcome {
        BillingOutcome::Billed { .. } => "billing.update",
        BillingOutcome::Terminated { .. } => "session.terminated",
        _ => return None,
    };
    Some(WebhookPayload {
        event: event.to_string(),
        session_id: session_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        data: serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null),
    })
}

async fn send_webhook(
    client: &reqwest::Client,
    url: &str,
    payload: &WebhookPayload,
    timeout: Duration,
) -> anyhow::Result<()> {
    let resp = client
        .post(url)
        .header("content-type", "application/json")
        .header("user-agent", format!("gpurent/{}", env!("CARGO_PKG_VERSION")))
        .json(payload)
        .timeout(timeout)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(
            "Webhook returned HTTP {}: {}",
            status.as_u16(),
            truncate(&body, 200)
        );
    } else {
        tracing::debug!("Webhook delivered to {} (HTTP {})", url, status.as_u16());
    }

    Ok(())
}

/// Truncate a string for logging without splitting a character.
fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Money;

    #[test]
    fn test_payload_event_names() {
        let billed = BillingOutcome::Billed {
            cost: Money::from_cents(200),
            minutes: 60,
            total_cost: Money::from_cents(200),
            duration_minutes: 60,
            consumer_balance: Money::from_cents(800),
            provider_balance: Money::from_cents(200),
            final_settlement: false,
        };
        let p = build_payload("s-1", &billed).unwrap();
        assert_eq!(p.event, "billing.update");
        assert_eq!(p.session_id, "s-1");
        assert_eq!(p.data["kind"], "billed");

        let terminated = BillingOutcome::Terminated {
            reason: "insufficient funds".into(),
            required: Money::from_cents(200),
            available: Money::from_cents(100),
        };
        assert_eq!(
            build_payload("s-1", &terminated).unwrap().event,
            "session.terminated"
        );
    }

    #[test]
    fn test_quiet_outcomes_have_no_payload() {
        assert!(build_payload("s-1", &BillingOutcome::AlreadyBilled).is_none());
        assert!(build_payload("s-1", &BillingOutcome::NotDue { minutes_until_due: 5 }).is_none());
    }

    #[test]
    fn test_from_config_requires_url() {
        let mut cfg = NotifierConfig::default();
        assert!(WebhookNotifier::from_config(&cfg).is_none());
        cfg.webhook_url = Some("  ".into());
        assert!(WebhookNotifier::from_config(&cfg).is_none());
        cfg.webhook_url = Some("http://localhost:9/hook".into());
        assert!(WebhookNotifier::from_config(&cfg).is_some());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
