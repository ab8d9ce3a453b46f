//! Store key layout
//!
//! Keys have the shape `prefix/service/address`. The prefix defaults to
//! [`KEY_PREFIX_DEFAULT`] when none is configured.

use perch_core::constants::{KEY_PREFIX_DEFAULT, KEY_SEPARATOR};

/// Maps service names and addresses to store keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new(None)
    }
}

impl KeySchema {
    /// Create a schema with an optional custom prefix
    ///
    /// An empty custom prefix counts as unset.
    pub fn new(prefix: Option<&str>) -> Self {
        let prefix = match prefix {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => KEY_PREFIX_DEFAULT.to_string(),
        };
        Self { prefix }
    }

    /// The base prefix shared by all services
    pub fn base_prefix(&self) -> &str {
        &self.prefix
    }

    /// `prefix/service`, the scan prefix for listing one service
    pub fn service_prefix(&self, service_name: &str) -> String {
        format!("{}{}{}", self.prefix, KEY_SEPARATOR, service_name)
    }

    /// `prefix/service/address`, the key of one registration
    pub fn service_key(&self, service_name: &str, address: &str) -> String {
        format!(
            "{}{}{}",
            self.service_prefix(service_name),
            KEY_SEPARATOR,
            address
        )
    }

    /// Address segment of `key` if it belongs to `service_name`
    ///
    /// A prefix scan for `svc` also returns keys of `svc-2`; only keys that
    /// continue with a separator and a non-empty address are members.
    pub fn address_of<'k>(&self, service_name: &str, key: &'k str) -> Option<&'k str> {
        let rest = key.strip_prefix(&self.service_prefix(service_name))?;
        let address = rest.strip_prefix(KEY_SEPARATOR)?;
        if address.is_empty() {
            None
        } else {
            Some(address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_prefix() {
        assert_eq!(
            KeySchema::default().service_prefix("serviceName"),
            "perch/registry/serviceName"
        );
        assert_eq!(
            KeySchema::new(Some("tmp")).service_prefix("serviceName"),
            "tmp/serviceName"
        );
        assert_eq!(
            KeySchema::new(Some("")).service_prefix("serviceName"),
            "perch/registry/serviceName"
        );
    }

    #[test]
    fn test_service_key() {
        assert_eq!(
            KeySchema::default().service_key("serviceName", "addr"),
            "perch/registry/serviceName/addr"
        );
        assert_eq!(
            KeySchema::new(Some("tmp")).service_key("serviceName", "addr"),
            "tmp/serviceName/addr"
        );
    }

    #[test]
    fn test_key_contains_prefix() {
        for prefix in [None, Some("tmp"), Some("a/b")] {
            let schema = KeySchema::new(prefix);
            for (service, address) in [("svc", "10.0.0.1:80"), ("svc-2", "[::1]:9000")] {
                let key = schema.service_key(service, address);
                let service_prefix = schema.service_prefix(service);
                assert!(key.starts_with(&service_prefix));
                assert!(service_prefix.starts_with(schema.base_prefix()));
            }
        }
    }

    #[test]
    fn test_address_of_respects_boundary() {
        let schema = KeySchema::default();
        let own = schema.service_key("svc", "10.0.0.1:80");
        let sibling = schema.service_key("svc-2", "10.0.0.2:80");

        assert_eq!(schema.address_of("svc", &own), Some("10.0.0.1:80"));
        assert_eq!(schema.address_of("svc", &sibling), None);
        assert_eq!(schema.address_of("svc", "perch/registry/svc/"), None);
        assert_eq!(schema.address_of("svc", "perch/registry/svc"), None);
        assert_eq!(schema.address_of("svc-2", &sibling), Some("10.0.0.2:80"));
    }
}
