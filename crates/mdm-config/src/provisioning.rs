//! Provisioning documents.

use std::collections::BTreeMap;

use mdm_errors::ValidationError;
use serde_json::Value;

/// Flat string-to-string document supplied by the backend.
///
/// Construction validates the whole document, so a set that exists is
/// always safe to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningSet {
    entries: BTreeMap<String, String>,
}

impl ProvisioningSet {
    /// Validate a JSON document.
    ///
    /// # Errors
    ///
    /// [`ValidationError::WrongType`] naming the first offending key when any
    /// value is not a string, or when the document is not an object.
    pub fn from_json(document: &Value) -> Result<Self, ValidationError> {
        let object = document
            .as_object()
            .ok_or_else(|| ValidationError::wrong_type("<provisioning>", "object"))?;
        let entries = object
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => Ok((key.clone(), s.clone())),
                _ => Err(ValidationError::wrong_type(key.as_str(), "string")),
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self { entries })
    }

    /// Value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ProvisioningSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rejects_non_string_value() {
        let err = ProvisioningSet::from_json(&json!({"a": "x", "port": 1883}));
        assert_eq!(err, Err(ValidationError::wrong_type("port", "string")));
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(ProvisioningSet::from_json(&json!(["a"])).is_err());
    }
}
