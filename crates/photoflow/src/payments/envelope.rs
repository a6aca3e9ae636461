use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::assets::is_valid_owner_id;

pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    Succeeded(PaymentSucceeded),
    Other { event_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSucceeded {
    pub payment_id: String,
    pub metadata: Option<PaymentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentMetadata {
    pub user_id: String,
    #[serde(deserialize_with = "int_or_string")]
    pub amount_cents: i64,
    #[serde(deserialize_with = "int_or_string")]
    pub credits: i64,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct RawSucceededData {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payment_id: Option<String>,
    #[serde(default)]
    metadata: Option<PaymentMetadata>,
}

/// Provider dashboards send metadata values as strings.
fn int_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }
    match IntOrString::deserialize(d)? {
        IntOrString::Int(n) => Ok(n),
        IntOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Parse a webhook body. Unknown event types parse as [`PaymentEvent::Other`];
/// a `payment.succeeded` event must carry a payment id.
pub fn parse_event(body: &[u8]) -> Result<PaymentEvent, String> {
    let raw: RawEnvelope =
        serde_json::from_slice(body).map_err(|e| format!("invalid envelope: {e}"))?;

    if raw.event_type != PAYMENT_SUCCEEDED {
        return Ok(PaymentEvent::Other {
            event_type: raw.event_type,
        });
    }

    let data = raw.data.ok_or_else(|| "missing data".to_string())?;
    let data: RawSucceededData =
        serde_json::from_value(data).map_err(|e| format!("invalid data: {e}"))?;

    let payment_id = data
        .payment_id
        .or(data.id)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing payment id".to_string())?;

    let metadata = match data.metadata {
        Some(mut meta) => {
            // Stored as the account key, so it must be an id a caller can present.
            meta.user_id = meta.user_id.trim().to_string();
            if !is_valid_owner_id(&meta.user_id) {
                return Err(format!("metadata.user_id {:?} is not a valid user id", meta.user_id));
            }
            if meta.credits <= 0 || meta.amount_cents < 0 {
                return Err("metadata amounts out of range".to_string());
            }
            Some(meta)
        }
        None => None,
    };

    Ok(PaymentEvent::Succeeded(PaymentSucceeded {
        payment_id,
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Result<PaymentEvent, String> {
        parse_event(&serde_json::to_vec(&v).unwrap())
    }

    #[test]
    fn succeeded_with_string_metadata() {
        let ev = parse(json!({
            "type": "payment.succeeded",
            "data": {
                "payment_id": "pay_1",
                "metadata": { "user_id": "alice", "amount_cents": "500", "credits": 10 }
            }
        }))
        .unwrap();
        assert_eq!(
            ev,
            PaymentEvent::Succeeded(PaymentSucceeded {
                payment_id: "pay_1".into(),
                metadata: Some(PaymentMetadata {
                    user_id: "alice".into(),
                    amount_cents: 500,
                    credits: 10,
                }),
            })
        );
    }

    #[test]
    fn user_id_is_trimmed_and_must_be_usable() {
        let ev = parse(json!({
            "type": "payment.succeeded",
            "data": {
                "id": "pay_3",
                "metadata": { "user_id": "  alice ", "amount_cents": 1, "credits": 1 }
            }
        }))
        .unwrap();
        assert!(matches!(
            ev,
            PaymentEvent::Succeeded(PaymentSucceeded { metadata: Some(ref m), .. }) if m.user_id == "alice"
        ));

        for bad in ["a/b", "   ", "../alice", "bob smith"] {
            assert!(
                parse(json!({
                    "type": "payment.succeeded",
                    "data": {
                        "id": "pay_4",
                        "metadata": { "user_id": bad, "amount_cents": 1, "credits": 1 }
                    }
                }))
                .is_err(),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn falls_back_to_data_id() {
        let ev = parse(json!({ "type": "payment.succeeded", "data": { "id": "pay_2" } })).unwrap();
        assert!(matches!(ev, PaymentEvent::Succeeded(p) if p.payment_id == "pay_2" && p.metadata.is_none()));
    }

    #[test]
    fn other_types_pass_through() {
        let ev = parse(json!({ "type": "refund.created", "data": {} })).unwrap();
        assert_eq!(
            ev,
            PaymentEvent::Other {
                event_type: "refund.created".into()
            }
        );
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        assert!(parse_event(b"not json").is_err());
        assert!(parse(json!({ "data": {} })).is_err());
        assert!(parse(json!({ "type": "payment.succeeded", "data": {} })).is_err());
        assert!(parse(json!({
            "type": "payment.succeeded",
            "data": { "id": "p", "metadata": { "user_id": "u", "amount_cents": 1, "credits": "lots" } }
        }))
        .is_err());
        assert!(parse(json!({
            "type": "payment.succeeded",
            "data": { "id": "p", "metadata": { "user_id": "u", "amount_cents": 1, "credits": 0 } }
        }))
        .is_err());
    }
}
