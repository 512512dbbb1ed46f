//! The broker assertion, already validated upstream and treated as opaque
//! structured input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::non_blank;

/// Value of a raw attribute. Brokers send plain strings, string lists, or
/// occasionally other JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multiple(Vec<String>),
    Other(serde_json::Value),
}

impl AttributeValue {
    /// All non-blank values in upstream order.
    pub fn values(&self) -> Vec<String> {
        let raw: Vec<String> = match self {
            AttributeValue::Single(v) => vec![v.clone()],
            AttributeValue::Multiple(vs) => vs.clone(),
            AttributeValue::Other(serde_json::Value::Array(items)) => {
                items.iter().filter_map(scalar_to_string).collect()
            }
            AttributeValue::Other(other) => scalar_to_string(other).into_iter().collect(),
        };
        raw.into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// Values joined with commas, `None` when there is nothing to join.
    pub fn joined(&self) -> Option<String> {
        let values = self.values();
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Single(value.to_string())
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(values: Vec<&str>) -> Self {
        AttributeValue::Multiple(values.into_iter().map(str::to_string).collect())
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Raw attribute bag (OpenID claims).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAttributes {
    /// Subject identifier (`sub`). Never persisted as-is.
    #[serde(rename = "sub", default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// Authentication method reference.
    #[serde(rename = "amr", default, skip_serializing_if = "Option::is_none")]
    pub auth_method_ref: Option<AttributeValue>,
    #[serde(flatten)]
    pub claims: BTreeMap<String, AttributeValue>,
}

impl RawAttributes {
    pub fn with_subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }

    /// Builder-style claim insertion.
    pub fn claim(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    /// Builder-style AMR.
    pub fn amr(mut self, value: impl Into<AttributeValue>) -> Self {
        self.auth_method_ref = Some(value.into());
        self
    }

    /// Claim value with multi-valued entries joined by commas.
    pub fn get(&self, key: &str) -> Option<String> {
        self.claims.get(key).and_then(AttributeValue::joined)
    }

    /// First claim present among `keys`.
    pub fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn subject(&self) -> Option<&str> {
        non_blank(self.subject_id.as_deref())
    }
}

/// Profile block of the assertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Identity assertion handed over by the broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub external_uid: Option<String>,
    #[serde(default)]
    pub info: AssertionInfo,
    #[serde(default)]
    pub raw_attributes: RawAttributes,
}

impl Assertion {
    pub fn new(
        provider: impl Into<String>,
        external_uid: impl Into<String>,
        raw_attributes: RawAttributes,
    ) -> Self {
        Self {
            provider: provider.into(),
            external_uid: Some(external_uid.into()),
            info: AssertionInfo::default(),
            raw_attributes,
        }
    }

    /// True when the broker handed over nothing usable at all.
    pub fn is_empty(&self) -> bool {
        self.provider.trim().is_empty()
            && self.external_uid.is_none()
            && self.info == AssertionInfo::default()
    }

    pub fn uid(&self) -> Option<&str> {
        non_blank(self.external_uid.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_valued_claims_join_in_order() {
        let raw = RawAttributes::with_subject("s").claim("given_name", vec!["Marja", "Mirja"]);
        assert_eq!(raw.get("given_name").as_deref(), Some("Marja,Mirja"));
    }

    #[test]
    fn deserializes_broker_payload() {
        let payload = serde_json::json!({
            "provider": "tunnistamo",
            "externalUid": "abc",
            "info": { "email": "marja@example.org", "avatarUrl": null },
            "rawAttributes": {
                "sub": "abc",
                "amr": ["suomi_fi", "mfa"],
                "given_name": "Marja",
                "loa": 3
            }
        });
        let assertion: Assertion = serde_json::from_value(payload).unwrap();
        assert_eq!(assertion.uid(), Some("abc"));
        assert_eq!(assertion.raw_attributes.subject(), Some("abc"));
        assert_eq!(
            assertion.raw_attributes.auth_method_ref.as_ref().and_then(AttributeValue::joined),
            Some("suomi_fi,mfa".to_string())
        );
        assert_eq!(assertion.raw_attributes.get("loa").as_deref(), Some("3"));
        assert_eq!(assertion.info.email.as_deref(), Some("marja@example.org"));
    }

    #[test]
    fn blank_values_are_dropped() {
        let value = AttributeValue::Multiple(vec![" ".into(), "".into()]);
        assert_eq!(value.joined(), None);
    }

    #[test]
    fn empty_assertion_is_detected() {
        assert!(Assertion::default().is_empty());
        assert!(!Assertion::new("tunnistamo", "uid", RawAttributes::default()).is_empty());
    }
}
