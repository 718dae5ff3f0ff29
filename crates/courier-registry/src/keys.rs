//! Store key schema
//!
//! ```text
//! {ns}available_services            SET    instance IDs eligible for new bindings
//! {ns}service_address:{instance}    STRING connection URI
//! {ns}service_heartbeat:{instance}  STRING last-seen unix ms, TTL
//! {ns}user_service:{user}           STRING bound instance ID
//! {ns}service_users:{instance}      SET    users bound to the instance
//! ```
//!
//! `{ns}` is the configured namespace, empty by default.

use crate::instance::{InstanceId, UserId};

const AVAILABLE_SET: &str = "available_services";
const ADDRESS_PREFIX: &str = "service_address:";
const HEARTBEAT_PREFIX: &str = "service_heartbeat:";
const ASSIGNMENT_PREFIX: &str = "user_service:";
const REVERSE_INDEX_PREFIX: &str = "service_users:";

/// Result of parsing an ID out of a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey<T> {
    /// Key belongs to this family and carries a valid ID
    Valid(T),
    /// Key belongs to this family but the ID is malformed
    Malformed(String),
    /// Key belongs to another family or namespace
    Foreign,
}

/// Builds and parses every key the registry touches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySchema {
    namespace: String,
}

impl KeySchema {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn available_set(&self) -> String {
        format!("{}{}", self.namespace, AVAILABLE_SET)
    }

    pub fn address(&self, instance_id: &InstanceId) -> String {
        format!("{}{}{}", self.namespace, ADDRESS_PREFIX, instance_id)
    }

    pub fn heartbeat(&self, instance_id: &InstanceId) -> String {
        format!("{}{}{}", self.namespace, HEARTBEAT_PREFIX, instance_id)
    }

    pub fn assignment(&self, user_id: &UserId) -> String {
        format!("{}{}{}", self.namespace, ASSIGNMENT_PREFIX, user_id)
    }

    pub fn reverse_index(&self, instance_id: &InstanceId) -> String {
        format!("{}{}{}", self.namespace, REVERSE_INDEX_PREFIX, instance_id)
    }

    pub fn assignment_prefix(&self) -> String {
        format!("{}{}", self.namespace, ASSIGNMENT_PREFIX)
    }

    pub fn reverse_index_prefix(&self) -> String {
        format!("{}{}", self.namespace, REVERSE_INDEX_PREFIX)
    }

    pub fn parse_heartbeat(&self, key: &str) -> ParsedKey<InstanceId> {
        match self.strip(key, HEARTBEAT_PREFIX) {
            Some(raw) => InstanceId::new(raw)
                .map(ParsedKey::Valid)
                .unwrap_or_else(|_| ParsedKey::Malformed(raw.to_string())),
            None => ParsedKey::Foreign,
        }
    }

    pub fn parse_assignment(&self, key: &str) -> ParsedKey<UserId> {
        match self.strip(key, ASSIGNMENT_PREFIX) {
            Some(raw) => UserId::new(raw)
                .map(ParsedKey::Valid)
                .unwrap_or_else(|_| ParsedKey::Malformed(raw.to_string())),
            None => ParsedKey::Foreign,
        }
    }

    pub fn parse_reverse_index(&self, key: &str) -> ParsedKey<InstanceId> {
        match self.strip(key, REVERSE_INDEX_PREFIX) {
            Some(raw) => InstanceId::new(raw)
                .map(ParsedKey::Valid)
                .unwrap_or_else(|_| ParsedKey::Malformed(raw.to_string())),
            None => ParsedKey::Foreign,
        }
    }

    fn strip<'a>(&self, key: &'a str, family: &str) -> Option<&'a str> {
        key.strip_prefix(self.namespace.as_str())?
            .strip_prefix(family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys_match_schema() {
        let keys = KeySchema::default();
        let instance = InstanceId::new("a").unwrap();
        let user = UserId::new("u1").unwrap();

        assert_eq!(keys.available_set(), "available_services");
        assert_eq!(keys.address(&instance), "service_address:a");
        assert_eq!(keys.heartbeat(&instance), "service_heartbeat:a");
        assert_eq!(keys.assignment(&user), "user_service:u1");
        assert_eq!(keys.reverse_index(&instance), "service_users:a");
    }

    #[test]
    fn test_namespaced_keys() {
        let keys = KeySchema::new("courier:");
        let instance = InstanceId::new("a").unwrap();
        assert_eq!(keys.heartbeat(&instance), "courier:service_heartbeat:a");
        assert_eq!(
            keys.parse_heartbeat("courier:service_heartbeat:a"),
            ParsedKey::Valid(instance)
        );
        // Same family, other namespace
        assert_eq!(keys.parse_heartbeat("service_heartbeat:a"), ParsedKey::Foreign);
    }

    #[test]
    fn test_parse_heartbeat() {
        let keys = KeySchema::default();
        assert_eq!(
            keys.parse_heartbeat("service_heartbeat:node-7"),
            ParsedKey::Valid(InstanceId::new("node-7").unwrap())
        );
        assert_eq!(
            keys.parse_heartbeat("service_heartbeat:"),
            ParsedKey::Malformed(String::new())
        );
        assert_eq!(
            keys.parse_heartbeat("service_heartbeat:bad id"),
            ParsedKey::Malformed("bad id".into())
        );
        assert_eq!(keys.parse_heartbeat("user_service:u1"), ParsedKey::Foreign);
        assert_eq!(keys.parse_heartbeat("session:xyz"), ParsedKey::Foreign);
    }

    #[test]
    fn test_parse_assignment_and_reverse() {
        let keys = KeySchema::default();
        assert_eq!(
            keys.parse_assignment("user_service:u1"),
            ParsedKey::Valid(UserId::new("u1").unwrap())
        );
        assert_eq!(
            keys.parse_reverse_index("service_users:a"),
            ParsedKey::Valid(InstanceId::new("a").unwrap())
        );
    }
}
