//! Peer registry
//!
//! This module tracks the mesh peers a node currently knows about: at
//! most one root (the member with upstream connectivity) and an ordered
//! list of sub-nodes reached through it. The topology protocol is the
//! only writer; readers get a consistent root-first view.

use crate::error::{MeshError, Result};
use crate::wire::MacAddr;
use serde::{Deserialize, Serialize};

/// A known mesh peer: fixed identity plus a last-seen timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Physical address
    pub addr: MacAddr,
    /// Last-seen time (monotonic milliseconds, caller-supplied)
    last_seen: u64,
}

impl PeerRecord {
    /// Create a record seen at `now`
    pub fn new(addr: MacAddr, now: u64) -> Self {
        Self {
            addr,
            last_seen: now,
        }
    }

    /// Last-seen time in milliseconds
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Age relative to `now` in milliseconds
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_seen)
    }

    /// Check if the record is older than `threshold` at `now`
    pub fn is_stale(&self, now: u64, threshold: u64) -> bool {
        self.age(now) > threshold
    }
}

/// Registry of known peers: one optional root plus ordered sub-nodes.
///
/// Invariants, enforced by every mutator:
/// - no sub-node address equals the root address
/// - the sub-node list holds no duplicates and preserves insertion order
/// - no root means no sub-nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRegistry {
    root: Option<PeerRecord>,
    sub_nodes: Vec<PeerRecord>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the root.
    ///
    /// Setting the root already on record is a no-op (its timestamp is
    /// untouched). Proposing a different root releases the whole
    /// sub-node list first: topology recorded under the old root is
    /// meaningless under the new one.
    pub fn set_root(&mut self, addr: MacAddr, now: u64) {
        match &self.root {
            Some(record) if record.addr == addr => {}
            Some(_) => {
                self.sub_nodes.clear();
                self.root = Some(PeerRecord::new(addr, now));
            }
            None => {
                self.root = Some(PeerRecord::new(addr, now));
            }
        }
    }

    /// The current root record, if any
    pub fn root(&self) -> Option<&PeerRecord> {
        self.root.as_ref()
    }

    /// Check if `addr` is the root or any sub-node
    pub fn contains(&self, addr: &MacAddr) -> bool {
        if let Some(root) = &self.root {
            if root.addr == *addr {
                return true;
            }
        }
        self.sub_nodes.iter().any(|r| r.addr == *addr)
    }

    /// Append the addresses not already present to the sub-node list,
    /// preserving input order. Requires a root on record. Returns the
    /// number of records actually appended.
    pub fn add(&mut self, addrs: &[MacAddr], now: u64) -> Result<usize> {
        if addrs.is_empty() {
            return Err(MeshError::InvalidArgument("empty address list".into()));
        }
        if self.root.is_none() {
            return Err(MeshError::NoRoot);
        }
        let mut appended = 0;
        for addr in addrs {
            if !self.contains(addr) {
                self.sub_nodes.push(PeerRecord::new(*addr, now));
                appended += 1;
            }
        }
        Ok(appended)
    }

    /// Remove each present address. Removing the root releases the
    /// entire registry. Returns the number of records removed.
    pub fn remove(&mut self, addrs: &[MacAddr]) -> Result<usize> {
        if addrs.is_empty() {
            return Err(MeshError::InvalidArgument("empty address list".into()));
        }
        let mut removed = 0;
        for addr in addrs {
            if let Some(root) = &self.root {
                if root.addr == *addr {
                    removed += self.len();
                    self.clear();
                    break;
                }
            }
            if let Some(pos) = self.sub_nodes.iter().position(|r| r.addr == *addr) {
                self.sub_nodes.remove(pos);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Refresh the last-seen time of each present address; absent
    /// addresses are silently skipped. Never changes membership.
    pub fn touch(&mut self, addrs: &[MacAddr], now: u64) -> Result<usize> {
        if addrs.is_empty() {
            return Err(MeshError::InvalidArgument("empty address list".into()));
        }
        let mut touched = 0;
        for addr in addrs {
            if let Some(root) = &mut self.root {
                if root.addr == *addr {
                    root.last_seen = now;
                    touched += 1;
                    continue;
                }
            }
            if let Some(record) = self.sub_nodes.iter_mut().find(|r| r.addr == *addr) {
                record.last_seen = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    /// Drop every record older than `threshold` at the single snapshot
    /// time `now`. A stale root releases the entire registry. Returns
    /// the number of records dropped.
    pub fn prune_stale(&mut self, now: u64, threshold: u64) -> usize {
        if let Some(root) = &self.root {
            if root.is_stale(now, threshold) {
                let dropped = self.len();
                self.clear();
                return dropped;
            }
        }
        let before = self.sub_nodes.len();
        self.sub_nodes.retain(|r| !r.is_stale(now, threshold));
        before - self.sub_nodes.len()
    }

    /// Sub-node records in insertion order
    pub fn sub_nodes(&self) -> &[PeerRecord] {
        &self.sub_nodes
    }

    /// All records, root first
    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.root.iter().chain(self.sub_nodes.iter())
    }

    /// Entry count: `1 + sub_nodes` once a root exists, `0` otherwise
    pub fn len(&self) -> usize {
        match self.root {
            Some(_) => 1 + self.sub_nodes.len(),
            None => 0,
        }
    }

    /// Check if no peers are on record
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Reset to the pristine empty state; safe to call repeatedly
    pub fn clear(&mut self) {
        self.root = None;
        self.sub_nodes.clear();
    }
}
