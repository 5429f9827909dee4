//! Paired devices and the addresses they were paired from.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use taskbridge_protocol::crypto::parse_public_key;
use taskbridge_protocol::{DeviceRecord, ProtocolError};

/// Capability recorded when a pairing request advertises none.
pub const DEFAULT_CAPABILITY: &str = "weekly_report";

type DeviceKey = (String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedDevice {
    pub record: DeviceRecord,
    /// Transport address the pairing request came from.
    pub address: String,
}

/// In-memory directory of `(user, device)` to key, capabilities and
/// address. Record and address are written under one lock.
#[derive(Debug, Default)]
pub struct PairingRegistry {
    devices: Mutex<HashMap<DeviceKey, PairedDevice>>,
}

impl PairingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record for `(user_id, device_id)`. The public
    /// key must be exactly 64 hex characters.
    pub fn pair(
        &self,
        user_id: &str,
        device_id: &str,
        public_key_hex: &str,
        capabilities: &[String],
        address: &str,
    ) -> Result<DeviceRecord, ProtocolError> {
        if user_id.trim().is_empty() || device_id.trim().is_empty() {
            return Err(ProtocolError::InvalidPayload(
                "user_id and device_id are required".into(),
            ));
        }
        parse_public_key(public_key_hex)?;

        let mut capabilities: BTreeSet<String> = capabilities
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if capabilities.is_empty() {
            capabilities.insert(DEFAULT_CAPABILITY.to_string());
        }

        let record = DeviceRecord {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            public_key: public_key_hex.trim().to_ascii_lowercase(),
            capabilities,
            paired_at: Utc::now(),
        };
        self.lock().insert(
            (user_id.to_string(), device_id.to_string()),
            PairedDevice {
                record: record.clone(),
                address: address.to_string(),
            },
        );
        Ok(record)
    }

    pub fn unpair(&self, user_id: &str, device_id: &str) -> bool {
        self.lock()
            .remove(&(user_id.to_string(), device_id.to_string()))
            .is_some()
    }

    pub fn get(&self, user_id: &str, device_id: &str) -> Option<DeviceRecord> {
        self.resolve(user_id, device_id).map(|d| d.record)
    }

    pub fn resolve(&self, user_id: &str, device_id: &str) -> Option<PairedDevice> {
        self.lock()
            .get(&(user_id.to_string(), device_id.to_string()))
            .cloned()
    }

    pub fn address_of(&self, user_id: &str, device_id: &str) -> Option<String> {
        self.resolve(user_id, device_id).map(|d| d.address)
    }

    /// Records for `user_id`, ordered by device id.
    pub fn devices_for_user(&self, user_id: &str) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self
            .lock()
            .values()
            .filter(|d| d.record.user_id == user_id)
            .map(|d| d.record.clone())
            .collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        records
    }

    /// Every record, ordered by user then device.
    pub fn all_devices(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> =
            self.lock().values().map(|d| d.record.clone()).collect();
        records.sort_by(|a, b| {
            (a.user_id.as_str(), a.device_id.as_str()).cmp(&(b.user_id.as_str(), b.device_id.as_str()))
        });
        records
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DeviceKey, PairedDevice>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbridge_protocol::crypto::{generate_keypair, public_key_hex};

    fn key() -> String {
        public_key_hex(&generate_keypair())
    }

    #[test]
    fn pair_and_get() {
        let registry = PairingRegistry::new();
        let pk = key();
        let record = registry
            .pair("alice", "laptop", &pk, &["weekly_report".into()], "/tmp/laptop.sock")
            .unwrap();
        assert_eq!(record.public_key, pk);
        assert_eq!(registry.get("alice", "laptop"), Some(record));
        assert_eq!(
            registry.address_of("alice", "laptop").as_deref(),
            Some("/tmp/laptop.sock")
        );
    }

    #[test]
    fn repairing_overwrites_record_and_address() {
        let registry = PairingRegistry::new();
        registry
            .pair("alice", "laptop", &key(), &["a".into(), "b".into()], "/old")
            .unwrap();
        let new_key = key();
        registry
            .pair("alice", "laptop", &new_key, &["c".into()], "/new")
            .unwrap();

        let device = registry.resolve("alice", "laptop").unwrap();
        assert_eq!(device.record.public_key, new_key);
        assert_eq!(
            device.record.capabilities.iter().collect::<Vec<_>>(),
            vec!["c"]
        );
        assert_eq!(device.address, "/new");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn bad_keys_are_refused() {
        let registry = PairingRegistry::new();
        assert!(registry.pair("alice", "laptop", "abc", &[], "/a").is_err());
        assert!(registry
            .pair("alice", "laptop", &"z".repeat(64), &[], "/a")
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_capabilities_get_default() {
        let registry = PairingRegistry::new();
        let record = registry.pair("alice", "laptop", &key(), &[], "/a").unwrap();
        assert!(record.capabilities.contains(DEFAULT_CAPABILITY));
    }

    #[test]
    fn unpair_reports_presence() {
        let registry = PairingRegistry::new();
        registry.pair("alice", "laptop", &key(), &[], "/a").unwrap();
        assert!(registry.unpair("alice", "laptop"));
        assert!(!registry.unpair("alice", "laptop"));
        assert_eq!(registry.get("alice", "laptop"), None);
        assert_eq!(registry.address_of("alice", "laptop"), None);
    }

    #[test]
    fn listing_is_scoped_and_ordered() {
        let registry = PairingRegistry::new();
        registry.pair("bob", "tower", &key(), &[], "/b").unwrap();
        registry.pair("alice", "phone", &key(), &[], "/p").unwrap();
        registry.pair("alice", "laptop", &key(), &[], "/l").unwrap();

        let alice: Vec<String> = registry
            .devices_for_user("alice")
            .into_iter()
            .map(|d| d.device_id)
            .collect();
        assert_eq!(alice, vec!["laptop", "phone"]);
        assert_eq!(registry.all_devices().len(), 3);
        assert_eq!(registry.all_devices()[2].user_id, "bob");
        assert!(registry.devices_for_user("carol").is_empty());
    }
}
