//! Durable `ident -> tun_port` mapping, backed by a crash-safe embedded
//! key-value database (`sled`).
//!
//! The store is deliberately small: `get`/`put`/`sync`/`iter_values`/`items`,
//! nothing more. Port allocation itself (ascending scan over the configured
//! range, skipping whatever is already in use) lives in [`allocate`], on top
//! of that contract.

pub mod range;

pub use range::{PortRange, PortRangeParseError};

use std::{collections::HashSet, fmt, path::Path};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

#[derive(Debug)]
pub enum Error {
    Open(sled::Error),
    Io(sled::Error),
    Corrupt(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "failed to open identity store: {e}"),
            Self::Io(e) => write!(f, "identity store io error: {e}"),
            Self::Corrupt(key) => write!(f, "identity store holds a non-u16 value for {key}"),
        }
    }
}

/// Durable `ident -> tun_port` map.
///
/// The key used on disk is the URL-safe, unpadded base64 encoding of the raw
/// `ident` bytes, so the store is printable and diffable even though `ident`
/// itself is opaque.
pub struct IdentityStore {
    db: sled::Db,
}

impl IdentityStore {
    /// Opens (creating if absent) the identity store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let db = sled::open(path).map_err(Error::Open)?;
        Ok(Self { db })
    }

    fn encode_key(ident: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(ident)
    }

    fn decode_port(key: &str, bytes: &sled::IVec) -> Result<u16, Error> {
        let raw: [u8; 2] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| Error::Corrupt(key.to_string()))?;
        Ok(u16::from_be_bytes(raw))
    }

    /// Looks up the port currently assigned to `ident`, if any.
    pub fn get(&self, ident: &[u8]) -> Result<Option<u16>, Error> {
        let key = Self::encode_key(ident);
        match self.db.get(key.as_bytes()).map_err(Error::Io)? {
            Some(bytes) => Ok(Some(Self::decode_port(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Assigns `port` to `ident` and flushes the database to stable storage.
    ///
    /// The flush happens before this call returns, so a crash immediately
    /// after `put` still leaves the binding durable.
    pub fn put(&self, ident: &[u8], port: u16) -> Result<(), Error> {
        let key = Self::encode_key(ident);
        self.db
            .insert(key.as_bytes(), &port.to_be_bytes())
            .map_err(Error::Io)?;
        self.db.flush().map_err(Error::Io)?;
        Ok(())
    }

    /// Returns every port currently assigned to some identity.
    pub fn iter_values(&self) -> Result<Vec<u16>, Error> {
        self.items().map(|items| items.into_iter().map(|(_, port)| port).collect())
    }

    /// Returns every `(ident-base64, port)` pair in the store.
    pub fn items(&self) -> Result<Vec<(String, u16)>, Error> {
        let mut out = Vec::new();
        for entry in self.db.iter() {
            let (key, value) = entry.map_err(Error::Io)?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let port = Self::decode_port(&key, &value)?;
            out.push((key, port));
        }
        Ok(out)
    }
}

/// Resolves the tunnel port for `ident` under `range`, allocating a fresh one
/// if needed.
///
/// - If `ident` already maps to a port inside `range`, that port is reused
///   unchanged.
/// - If `ident` is new, or its stored port now falls outside `range` (the
///   range was reconfigured smaller), a fresh port is drawn: the lowest port
///   in `range` not currently held by any identity, and the mapping is
///   overwritten.
/// - If every port in `range` is in use, returns `Ok(None)` — the caller is
///   expected to drop the request silently, per the protocol's "don't leak
///   exhaustion to unauthenticated senders" policy.
pub fn allocate(store: &IdentityStore, ident: &[u8], range: PortRange) -> Result<Option<u16>, Error> {
    if let Some(port) = store.get(ident)? {
        if range.contains(port) {
            return Ok(Some(port));
        }
    }

    let in_use: HashSet<u16> = store.iter_values()?.into_iter().collect();
    for port in range.start()..=range.end() {
        if !in_use.contains(&port) {
            store.put(ident, port)?;
            return Ok(Some(port));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempDir, IdentityStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn first_contact_allocates_lowest_free_port() {
        let (_dir, store) = open_tmp();
        let range = PortRange::new(22000, 22002).unwrap();

        let port = allocate(&store, b"node-a", range).unwrap();
        assert_eq!(port, Some(22000));
        assert_eq!(store.get(b"node-a").unwrap(), Some(22000));
    }

    #[test]
    fn stable_reassignment_reuses_existing_port() {
        let (_dir, store) = open_tmp();
        let range = PortRange::new(22000, 22002).unwrap();

        store.put(b"node-a", 22001).unwrap();
        let port = allocate(&store, b"node-a", range).unwrap();
        assert_eq!(port, Some(22001));
    }

    #[test]
    fn range_shrink_forces_reallocation() {
        let (_dir, store) = open_tmp();
        let range = PortRange::new(22000, 22002).unwrap();

        store.put(b"node-a", 22050).unwrap();
        let port = allocate(&store, b"node-a", range).unwrap();
        assert_eq!(port, Some(22000));
        assert_eq!(store.get(b"node-a").unwrap(), Some(22000));
    }

    #[test]
    fn exhausted_range_yields_none_without_mutation() {
        let (_dir, store) = open_tmp();
        let range = PortRange::new(22000, 22001).unwrap();

        store.put(b"node-a", 22000).unwrap();
        store.put(b"node-b", 22001).unwrap();

        let port = allocate(&store, b"node-c", range).unwrap();
        assert_eq!(port, None);
        assert_eq!(store.get(b"node-c").unwrap(), None);
    }

    #[test]
    fn two_identities_never_collide() {
        let (_dir, store) = open_tmp();
        let range = PortRange::new(22000, 22010).unwrap();

        let mut seen = HashSet::new();
        for i in 0..5 {
            let ident = format!("node-{i}");
            let port = allocate(&store, ident.as_bytes(), range).unwrap().unwrap();
            assert!(seen.insert(port), "port {port} allocated twice");
        }
    }

    #[test]
    fn put_then_reopen_preserves_the_binding() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = IdentityStore::open(dir.path()).unwrap();
            store.put(b"node-a", 22000).unwrap();
        }

        let store = IdentityStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"node-a").unwrap(), Some(22000));
    }

    #[test]
    fn items_lists_every_stored_mapping() {
        let (_dir, store) = open_tmp();
        store.put(b"node-a", 22000).unwrap();
        store.put(b"node-b", 22001).unwrap();

        let mut items = store.items().unwrap();
        items.sort_by_key(|(_, port)| *port);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].1, 22000);
        assert_eq!(items[1].1, 22001);
    }
}
