//! Peer addresses and the initial address book handed to each node.

use flotilla_core::{FlotillaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a hex-encoded node id.
pub const NODE_ID_HEX_LEN: usize = 40;

/// A peer in `id@host:port` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl FromStr for PeerAddress {
    type Err = FlotillaError;

    fn from_str(s: &str) -> Result<Self> {
        let (id, endpoint) = s
            .split_once('@')
            .ok_or_else(|| FlotillaError::config(format!("peer address {} has no node id", s)))?;
        if id.len() != NODE_ID_HEX_LEN || hex::decode(id).is_err() {
            return Err(FlotillaError::config(format!(
                "peer address {} has an invalid node id",
                s
            )));
        }
        let (host, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| FlotillaError::config(format!("peer address {} has no port", s)))?;
        if host.is_empty() {
            return Err(FlotillaError::config(format!("peer address {} has no host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| FlotillaError::config(format!("peer address {}: {}", s, e)))?;

        Ok(Self {
            id: id.to_lowercase(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

/// How the initial peer list of each genesis node is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressBookStrategy {
    /// Every node knows every other node.
    #[default]
    FullMesh,
    /// Each node knows the next `k` nodes on a ring, which keeps the graph
    /// connected while bounding the book to `k` entries.
    BoundedFanout(usize),
}

impl AddressBookStrategy {
    /// Peers for the node at `index` out of `addresses`, never including
    /// `addresses[index]` itself.
    pub fn peers_for(&self, index: usize, addresses: &[String]) -> Vec<String> {
        let n = addresses.len();
        if index >= n {
            return Vec::new();
        }
        match *self {
            AddressBookStrategy::FullMesh => addresses
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, a)| a.clone())
                .collect(),
            AddressBookStrategy::BoundedFanout(k) => {
                let fanout = k.min(n.saturating_sub(1));
                (1..=fanout)
                    .map(|offset| addresses[(index + offset) % n].clone())
                    .collect()
            }
        }
    }
}

/// Builds one peer list per address, in the same order.
pub fn build_address_books(strategy: AddressBookStrategy, addresses: &[String]) -> Vec<Vec<String>> {
    (0..addresses.len())
        .map(|i| strategy.peers_for(i, addresses))
        .collect()
}

/// A known address entry in `addrbook.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownAddress {
    pub addr: PeerAddress,
    pub src: PeerAddress,
    pub attempts: u32,
    pub bucket_type: u8,
}

/// The `addrbook.json` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBook {
    pub key: String,
    pub addrs: Vec<KnownAddress>,
}

impl AddressBook {
    /// Parses every peer; the first malformed entry is an error.
    pub fn from_peers(peers: &[String]) -> Result<Self> {
        let mut addrs = Vec::with_capacity(peers.len());
        for peer in peers {
            let addr: PeerAddress = peer.parse()?;
            addrs.push(KnownAddress {
                src: addr.clone(),
                addr,
                attempts: 0,
                bucket_type: 1,
            });
        }
        let key = hex::encode(rand::random::<[u8; 12]>());
        Ok(Self { key, addrs })
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn address(i: usize) -> String {
        format!("{:040x}@10.0.0.{}:26656", i + 1, i + 1)
    }

    #[test]
    fn test_peer_address_parsing() {
        let peer: PeerAddress = "ABCDEF0123456789ABCDEF0123456789ABCDEF01@10.1.2.3:26656"
            .parse()
            .unwrap();
        assert_eq!(peer.id, "abcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(peer.host, "10.1.2.3");
        assert_eq!(peer.port, 26656);
        assert_eq!(
            peer.to_string(),
            "abcdef0123456789abcdef0123456789abcdef01@10.1.2.3:26656"
        );

        assert!("10.1.2.3:26656".parse::<PeerAddress>().is_err());
        assert!("abc@10.1.2.3:26656".parse::<PeerAddress>().is_err());
        assert!(format!("{:040x}@10.1.2.3", 1).parse::<PeerAddress>().is_err());
        assert!(format!("{:040x}@:26656", 1).parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_full_mesh_excludes_self() {
        let addresses: Vec<String> = (0..4).map(address).collect();
        let books = build_address_books(AddressBookStrategy::FullMesh, &addresses);

        assert_eq!(books.len(), 4);
        for (i, book) in books.iter().enumerate() {
            assert_eq!(book.len(), 3);
            assert!(!book.contains(&addresses[i]));
        }
    }

    #[test]
    fn test_single_node_has_empty_book() {
        let addresses = vec![address(0)];
        assert!(AddressBookStrategy::FullMesh.peers_for(0, &addresses).is_empty());
        assert!(AddressBookStrategy::BoundedFanout(3)
            .peers_for(0, &addresses)
            .is_empty());
    }

    #[test]
    fn test_address_book_rejects_malformed_peer() {
        let peers = vec![address(0), "garbage".to_string()];
        assert!(AddressBook::from_peers(&peers).is_err());

        let book = AddressBook::from_peers(&[address(0), address(1)]).unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(book.addrs[0].addr, book.addrs[0].src);
    }

    proptest! {
        #[test]
        fn prop_bounded_fanout_respects_bound(n in 1usize..40, k in 0usize..10) {
            let addresses: Vec<String> = (0..n).map(address).collect();
            let books = build_address_books(AddressBookStrategy::BoundedFanout(k), &addresses);
            for (i, book) in books.iter().enumerate() {
                prop_assert_eq!(book.len(), k.min(n - 1));
                prop_assert!(!book.contains(&addresses[i]));
            }
        }
    }
}
