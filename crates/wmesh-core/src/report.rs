//! Point-in-time node status report

use crate::dispatch::DispatchStats;
use crate::node::NodeStats;
use crate::registry::NodeRegistry;
use crate::topology::TopologyStats;
use crate::wire::MacAddr;
use serde::{Deserialize, Serialize};

/// One registry entry as it appears in a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    pub addr: MacAddr,
    pub is_root: bool,
    /// Milliseconds since the peer was last seen
    pub age_ms: u64,
}

/// Vital signs of a mesh node at a single instant.
///
/// Built by `MeshNode::report`; serializes cleanly for the CLI's JSON
/// output mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub addr: MacAddr,
    pub state: String,
    pub is_root: bool,
    /// Milliseconds since `initiate`, zero while idle
    pub uptime_ms: u64,
    pub peer_count: usize,
    pub peers: Vec<PeerSummary>,
    pub node: NodeStats,
    pub topology: TopologyStats,
    pub dispatch: DispatchStats,
}

impl NodeReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Flatten a registry into report rows, root first
pub(crate) fn peer_summaries(registry: &NodeRegistry, now: u64) -> Vec<PeerSummary> {
    let mut peers = Vec::with_capacity(registry.len());
    if let Some(root) = registry.root() {
        peers.push(PeerSummary {
            addr: root.addr,
            is_root: true,
            age_ms: root.age(now),
        });
    }
    for sub in registry.sub_nodes() {
        peers.push(PeerSummary {
            addr: sub.addr,
            is_root: false,
            age_ms: sub.age(now),
        });
    }
    peers
}
