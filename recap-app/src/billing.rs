//! Billing webhook payload extraction.
//!
//! The billing provider wraps everything in `meta` (event name, custom
//! checkout metadata) and `data` (the subscription resource). Only a
//! bounded field set is carried into the queue.

use crate::model::BillingFields;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct BillingEnvelope {
    #[serde(default)]
    meta: BillingMeta,
    #[serde(default)]
    data: Option<BillingData>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingMeta {
    #[serde(default)]
    event_name: String,
    #[serde(default)]
    custom_data: Option<BillingCustomData>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingCustomData {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    attributes: Option<BillingAttributes>,
}

#[derive(Debug, Default, Deserialize)]
struct BillingAttributes {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    variant_name: Option<String>,
    #[serde(default)]
    renews_at: Option<String>,
    #[serde(default)]
    customer_id: Option<serde_json::Value>,
}

/// Extract the event name and subscription fields from a verified
/// billing payload. `None` means the payload does not reference a
/// subscription and is dropped after ack.
pub fn extract_billing_event(payload: &serde_json::Value) -> Option<(String, BillingFields)> {
    let envelope: BillingEnvelope = serde_json::from_value(payload.clone()).ok()?;
    let event_name = envelope.meta.event_name.trim().to_string();
    if event_name.is_empty() {
        return None;
    }
    let data = envelope.data?;
    if data.id.trim().is_empty() {
        return None;
    }

    let attributes = data.attributes.unwrap_or_default();
    let customer_id = attributes.customer_id.map(|v| match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    });

    Some((
        event_name,
        BillingFields {
            subscription_id: data.id.trim().to_string(),
            status: attributes.status,
            plan: attributes.variant_name,
            renews_at: attributes.renews_at,
            customer_id,
            user_id: envelope
                .meta
                .custom_data
                .and_then(|c| c.user_id)
                .filter(|s| !s.trim().is_empty()),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_subscription_fields_and_correlation() {
        let payload = json!({
            "meta": {
                "event_name": "subscription_created",
                "custom_data": {"user_id": "15551230001"}
            },
            "data": {
                "id": "sub_42",
                "attributes": {
                    "status": "active",
                    "variant_name": "monthly",
                    "renews_at": "2026-09-01T00:00:00Z",
                    "customer_id": 778899
                }
            }
        });

        let (name, fields) = extract_billing_event(&payload).unwrap();
        assert_eq!(name, "subscription_created");
        assert_eq!(fields.subscription_id, "sub_42");
        assert_eq!(fields.status.as_deref(), Some("active"));
        assert_eq!(fields.plan.as_deref(), Some("monthly"));
        assert_eq!(fields.customer_id.as_deref(), Some("778899"));
        assert_eq!(fields.user_id.as_deref(), Some("15551230001"));
    }

    #[test]
    fn drops_payloads_without_event_or_subscription() {
        assert!(extract_billing_event(&json!({})).is_none());
        assert!(extract_billing_event(&json!({"meta": {"event_name": "x"}})).is_none());
        assert!(
            extract_billing_event(&json!({
                "meta": {"event_name": "subscription_created"},
                "data": {"id": ""}
            }))
            .is_none()
        );
    }

    #[test]
    fn missing_custom_data_is_tolerated() {
        let payload = json!({
            "meta": {"event_name": "subscription_cancelled"},
            "data": {"id": "sub_42", "attributes": {"status": "cancelled"}}
        });
        let (name, fields) = extract_billing_event(&payload).unwrap();
        assert_eq!(name, "subscription_cancelled");
        assert!(fields.user_id.is_none());
        assert_eq!(fields.status.as_deref(), Some("cancelled"));
    }
}
