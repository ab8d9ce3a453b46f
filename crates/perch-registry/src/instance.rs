//! Registration payload stored at each service key
//!
//! The payload is a JSON object with `network`, `address`, `weight` and
//! `tags`. Empty tags are written as `{}`. Decoding accepts `"tags": null`
//! and missing fields, which older writers produce.

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One registered instance as stored in the coordination store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Transport network (e.g. `tcp`)
    pub network: String,
    /// Address in host:port form
    pub address: String,
    /// Load-balancing weight; values <= 0 are replaced at resolve time
    #[serde(default)]
    pub weight: i64,
    /// Free-form metadata
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: BTreeMap<String, String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl InstanceRecord {
    pub fn new(
        network: impl Into<String>,
        address: impl Into<String>,
        weight: i64,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            weight,
            tags,
        }
    }

    /// Serialize to store value bytes
    pub fn encode(&self) -> RegistryResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| RegistryError::Encode {
            address: self.address.clone(),
            reason: e.to_string(),
        })
    }

    /// Deserialize store value bytes read from `key`
    pub fn decode(key: &str, value: &[u8]) -> RegistryResult<Self> {
        serde_json::from_slice(value).map_err(|e| RegistryError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        for record in [
            InstanceRecord::new("tcp", "10.0.0.1:8888", 66, tags(&[("hello", "world")])),
            InstanceRecord::new("tcp", "[::1]:9000", 0, BTreeMap::new()),
            InstanceRecord::new("unix", "/tmp/sock:0", -3, tags(&[("a", ""), ("b", "c")])),
        ] {
            let bytes = record.encode().unwrap();
            assert_eq!(InstanceRecord::decode("k", &bytes).unwrap(), record);
        }
    }

    #[test]
    fn test_empty_tags_encoded_explicitly() {
        let record = InstanceRecord::new("tcp", "10.0.0.1:8888", 10, BTreeMap::new());
        let json: serde_json::Value = serde_json::from_slice(&record.encode().unwrap()).unwrap();
        assert_eq!(json["tags"], serde_json::json!({}));
        assert_eq!(json["weight"], 10);
        assert_eq!(json["network"], "tcp");
        assert_eq!(json["address"], "10.0.0.1:8888");
    }

    #[test]
    fn test_decode_null_tags_and_missing_weight() {
        let raw = br#"{"network":"tcp","address":"10.0.0.1:8888","tags":null}"#;
        let record = InstanceRecord::decode("k", raw).unwrap();
        assert!(record.tags.is_empty());
        assert_eq!(record.weight, 0);
    }

    #[test]
    fn test_decode_malformed() {
        let err = InstanceRecord::decode("perch/registry/svc/x", b"not json").unwrap_err();
        match err {
            RegistryError::Decode { key, .. } => assert_eq!(key, "perch/registry/svc/x"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
