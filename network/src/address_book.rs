// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of hosts heard on the discovery channel

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A host's most recent presence announcement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeerAnnouncement {
    /// Address the announcement came from
    pub address: IpAddr,
    /// Name the host advertises
    pub display_name: String,
}

impl PeerAnnouncement {
    /// Create an announcement record
    pub fn new(address: IpAddr, display_name: impl Into<String>) -> Self {
        Self {
            address,
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for PeerAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.address)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    announcement: PeerAnnouncement,
    last_seen: Instant,
}

/// Thread-safe map of discovered hosts, one entry per address.
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    entries: Arc<RwLock<BTreeMap<IpAddr, Entry>>>,
}

impl AddressBook {
    /// Create an empty address book
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `announcement` for `address`, replacing any previous entry.
    ///
    /// Returns true when the address had no entry before.
    pub fn upsert(&self, address: IpAddr, announcement: PeerAnnouncement) -> bool {
        let entry = Entry {
            announcement,
            last_seen: Instant::now(),
        };
        self.entries.write().insert(address, entry).is_none()
    }

    /// Copy of every entry, ordered by address
    pub fn snapshot(&self) -> Vec<PeerAnnouncement> {
        self.entries
            .read()
            .values()
            .map(|e| e.announcement.clone())
            .collect()
    }

    /// Time since the last announcement from `address`
    pub fn age_of(&self, address: &IpAddr) -> Option<Duration> {
        self.entries
            .read()
            .get(address)
            .map(|e| e.last_seen.elapsed())
    }

    /// Number of known hosts
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no host has been heard yet
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_upsert_overwrites() {
        let book = AddressBook::new();
        assert!(book.upsert(ip(2), PeerAnnouncement::new(ip(2), "First")));
        assert!(!book.upsert(ip(2), PeerAnnouncement::new(ip(2), "Second")));

        let peers = book.snapshot();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].display_name, "Second");
        assert!(book.age_of(&ip(2)).is_some());
        assert!(book.age_of(&ip(3)).is_none());
    }

    #[test]
    fn test_snapshot_is_ordered_copy() {
        let book = AddressBook::new();
        book.upsert(ip(9), PeerAnnouncement::new(ip(9), "Nine"));
        book.upsert(ip(1), PeerAnnouncement::new(ip(1), "One"));

        let snapshot = book.snapshot();
        book.clear();

        assert!(book.is_empty());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].address, ip(1));
        assert_eq!(snapshot[1].address, ip(9));
    }

    #[test]
    fn test_display_label() {
        let peer = PeerAnnouncement::new(ip(7), "MyLevel");
        assert_eq!(peer.to_string(), "MyLevel (192.168.1.7)");
    }

    #[test]
    fn test_concurrent_upserts_and_snapshots() {
        let book = AddressBook::new();
        let writers: Vec<_> = (0..4u8)
            .map(|t| {
                let book = book.clone();
                std::thread::spawn(move || {
                    for i in 0..200u8 {
                        let addr = ip(i % 50);
                        book.upsert(addr, PeerAnnouncement::new(addr, format!("w{}-{}", t, i)));
                    }
                })
            })
            .collect();

        for _ in 0..100 {
            for peer in book.snapshot() {
                assert!(peer.display_name.starts_with('w'));
            }
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(book.len(), 50);
    }

    proptest! {
        #[test]
        fn snapshot_keeps_last_write_per_address(
            writes in proptest::collection::vec((0u8..8, "[a-z]{1,6}"), 0..64)
        ) {
            let book = AddressBook::new();
            let mut expected = HashMap::new();
            for (last, name) in &writes {
                book.upsert(ip(*last), PeerAnnouncement::new(ip(*last), name.clone()));
                expected.insert(ip(*last), name.clone());
            }

            let snapshot = book.snapshot();
            prop_assert_eq!(snapshot.len(), expected.len());
            for peer in snapshot {
                prop_assert_eq!(Some(&peer.display_name), expected.get(&peer.address));
            }
        }
    }
}
