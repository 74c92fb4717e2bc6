//! Store key layout and record payload
//!
//! Keys follow the SkyDNS convention: the labels of the lease name are
//! reversed under the namespace root, and the lease id is the leaf.
//!
//! ```text
//! name "a.b.c", address 10.0.0.1, prefix "/skydns/lan/"
//!   -> /skydns/lan/c/b/a/0a000001
//! ```

use crate::lease::Lease;
use serde::{Deserialize, Serialize};

/// TTL announced for every record, in seconds
pub const RECORD_TTL: u32 = 60;

/// Build the key of `lease` under `prefix`
///
/// A trailing `/` on the prefix is ignored, so `/skydns` and `/skydns/`
/// produce the same key.
pub fn build_key(lease: &Lease, prefix: &str) -> String {
    let mut key = prefix.trim_end_matches('/').to_string();

    for label in lease.name().rsplit('.') {
        key.push('/');
        key.push_str(label);
    }

    key.push('/');
    key.push_str(&lease.id());
    key
}

/// DNS answer payload stored under the record key
///
/// The field names are the schema read by the resolver's etcd plugin and
/// must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    /// Textual address
    pub host: String,
    /// Lease name
    pub group: String,
    /// Record TTL in seconds
    pub ttl: u32,
}

impl HostEntry {
    /// Build the payload for `lease`
    pub fn for_lease(lease: &Lease) -> Self {
        Self {
            host: lease.address().to_string(),
            group: lease.name().to_string(),
            ttl: RECORD_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_reversed() {
        let lease = Lease::for_test("a.b.c", "10.0.0.1");
        let key = build_key(&lease, "/skydns/lan/");

        let segments: Vec<_> = key
            .strip_prefix("/skydns/lan/")
            .unwrap()
            .split('/')
            .collect();
        assert_eq!(segments, vec!["c", "b", "a", "0a000001"]);
    }

    #[test]
    fn test_trailing_slash_is_optional() {
        let lease = Lease::for_test("host", "10.0.0.1");
        assert_eq!(
            build_key(&lease, "/skydns/lan"),
            build_key(&lease, "/skydns/lan/")
        );
    }

    #[test]
    fn test_same_name_different_address() {
        let a = Lease::for_test("test3", "1.1.1.3");
        let b = Lease::for_test("test3", "1.1.2.3");
        assert_ne!(build_key(&a, "/skydns"), build_key(&b, "/skydns"));
    }

    #[test]
    fn test_record_and_heartbeat_keys_share_suffix() {
        let lease = Lease::for_test("host.lan", "2001:db8::2");
        let record = build_key(&lease, "/skydns/");
        let heartbeat = build_key(&lease, "/dhcpd/");

        assert_eq!(heartbeat.replacen("/dhcpd", "/skydns", 1), record);
        assert_eq!(
            record,
            "/skydns/lan/host/20010db8000000000000000000000002"
        );
    }

    #[test]
    fn test_host_entry_json() {
        let lease = Lease::for_test("test1", "1.1.1.1");
        let json = serde_json::to_value(HostEntry::for_lease(&lease)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "host": "1.1.1.1", "group": "test1", "ttl": 60 })
        );
    }
}
