//! Per-email step context.
//!
//! A fixed schema of the fields the warranty flow cares about, plus one
//! JSON extension map for everything else a step wants to remember.
//! Merging is additive: empty values never clobber what an earlier step set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata keys that can never be written by a step.
const PROTECTED_KEYS: &[&str] = &["subject", "body", "sender", "from"];

/// Result of a warranty lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarrantyInfo {
    /// Coverage status as reported by the warranty service ("active", "expired", ...).
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
    /// Any other fields the service returned.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl WarrantyInfo {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            expiration: None,
            coverage: None,
            extra: BTreeMap::new(),
        }
    }

    /// Accept either a full record or a bare status string.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self::new(s.trim())),
            Value::Object(_) => serde_json::from_value::<Self>(value.clone())
                .ok()
                .filter(|w| !w.status.trim().is_empty()),
            _ => None,
        }
    }
}

/// Everything learned so far about one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    subject: String,
    body: String,
    sender: String,
    serial_number: Option<String>,
    warranty: Option<WarrantyInfo>,
    ticket_id: Option<String>,
    extra: BTreeMap<String, Value>,
}

impl StepContext {
    pub fn new(
        subject: impl Into<String>,
        body: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            sender: sender.into(),
            serial_number: None,
            warranty: None,
            ticket_id: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn warranty(&self) -> Option<&WarrantyInfo> {
        self.warranty.as_ref()
    }

    pub fn ticket_id(&self) -> Option<&str> {
        self.ticket_id.as_deref()
    }

    /// Auxiliary field set by a step.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Auxiliary field as a string, if it is one.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    /// Return a new context with `updates` applied, plus the keys that took effect.
    ///
    /// Known keys go to their typed field; everything else lands in the
    /// extension map. Null and empty values are skipped.
    pub fn merged(&self, updates: &Map<String, Value>) -> (StepContext, Vec<String>) {
        let mut next = self.clone();
        let mut applied = Vec::new();

        for (key, value) in updates {
            if is_empty_value(value) {
                continue;
            }
            if PROTECTED_KEYS.contains(&key.as_str()) {
                tracing::debug!(key = %key, "Ignoring step write to identifying field");
                continue;
            }

            let took = match key.as_str() {
                "serial" | "serial_number" => match value_as_text(value) {
                    Some(serial) => {
                        next.serial_number = Some(serial);
                        true
                    }
                    None => false,
                },
                "ticket_id" => match value_as_text(value) {
                    Some(id) => {
                        next.ticket_id = Some(id);
                        true
                    }
                    None => false,
                },
                "warranty" => match WarrantyInfo::from_value(value) {
                    Some(info) => {
                        next.warranty = Some(info);
                        true
                    }
                    None => false,
                },
                _ => {
                    next.extra.insert(key.clone(), value.clone());
                    true
                }
            };

            if took {
                applied.push(key.clone());
            } else {
                tracing::debug!(key = %key, "Skipping metadata value with unusable shape");
            }
        }

        (next, applied)
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn base() -> StepContext {
        StepContext::new(
            "Device warranty check",
            "My serial is C074AD3D3102",
            "customer@example.com",
        )
    }

    fn updates(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn new_context_has_no_extracted_fields() {
        let ctx = base();
        assert_eq!(ctx.subject(), "Device warranty check");
        assert_eq!(ctx.sender(), "customer@example.com");
        assert!(ctx.serial_number().is_none());
        assert!(ctx.warranty().is_none());
        assert!(ctx.ticket_id().is_none());
        assert!(ctx.extra().is_empty());
    }

    #[test]
    fn merge_maps_known_keys() {
        let (ctx, applied) = base().merged(&updates(json!({
            "serial": "C074AD3D3102",
            "ticket_id": 4711,
            "warranty": {"status": "active", "expiration": "2027-01-31", "region": "EU"},
            "customer_tier": "gold"
        })));
        assert_eq!(ctx.serial_number(), Some("C074AD3D3102"));
        assert_eq!(ctx.ticket_id(), Some("4711"));
        let warranty = ctx.warranty().unwrap();
        assert_eq!(warranty.status, "active");
        assert_eq!(warranty.expiration.as_deref(), Some("2027-01-31"));
        assert_eq!(warranty.extra["region"], "EU");
        assert_eq!(ctx.get_str("customer_tier"), Some("gold"));
        assert_eq!(applied.len(), 4);
    }

    #[test]
    fn merge_does_not_mutate_original() {
        let original = base();
        let (next, _) = original.merged(&updates(json!({"serial": "ABC123"})));
        assert!(original.serial_number().is_none());
        assert_eq!(next.serial_number(), Some("ABC123"));
    }

    #[test]
    fn empty_values_never_overwrite() {
        let ctx = base().with_serial_number("C074AD3D3102");
        let (ctx, applied) = ctx.merged(&updates(json!({
            "serial": "",
            "serial_number": null,
            "warranty": {},
            "notes": []
        })));
        assert_eq!(ctx.serial_number(), Some("C074AD3D3102"));
        assert!(ctx.warranty().is_none());
        assert!(ctx.get("notes").is_none());
        assert!(applied.is_empty());
    }

    #[test]
    fn explicit_replacement_is_allowed() {
        let ctx = base().with_serial_number("OLD000000001");
        let (ctx, _) = ctx.merged(&updates(json!({"serial_number": "NEW000000002"})));
        assert_eq!(ctx.serial_number(), Some("NEW000000002"));
    }

    #[test]
    fn identifying_fields_are_protected() {
        let (ctx, applied) = base().merged(&updates(json!({
            "subject": "hijacked",
            "from": "attacker@example.com"
        })));
        assert_eq!(ctx.subject(), "Device warranty check");
        assert_eq!(ctx.sender(), "customer@example.com");
        assert!(applied.is_empty());
    }

    #[test]
    fn warranty_accepts_bare_status() {
        let (ctx, _) = base().merged(&updates(json!({"warranty": "expired"})));
        assert_eq!(ctx.warranty().unwrap().status, "expired");
    }

    #[test]
    fn malformed_warranty_is_skipped() {
        let (ctx, applied) = base().merged(&updates(json!({"warranty": {"expiration": "2020"}})));
        assert!(ctx.warranty().is_none());
        assert!(applied.is_empty());
    }
}
