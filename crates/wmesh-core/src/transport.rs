//! Mesh transport interface
//!
//! The radio/WiFi mesh stack is an external collaborator. The control
//! plane reaches it only through the [`Transport`] trait: enable and
//! connect requests are accept/reject calls whose completion arrives
//! later as lifecycle events, queries are synchronous, and `send` hands
//! a finished envelope to the mesh for delivery.
//!
//! [`SimTransport`] is the deterministic in-memory implementation used
//! by the tests and the CLI driver.

use crate::error::{MeshError, Result};
use crate::wire::MacAddr;
use serde::{Deserialize, Serialize};

/// Connectivity state reported by the mesh transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Mesh participation disabled
    Disabled,
    /// Associating with the carrier WiFi network
    WifiConnecting,
    /// Carrier network up, mesh negotiation in progress
    NetConnecting,
    /// Member of a local mesh (no external uplink)
    LocalAvailable,
    /// Member of a mesh with external uplink
    OnlineAvailable,
}

impl LinkStatus {
    /// Check if the node is in a stable, queryable mesh state
    pub fn is_available(&self) -> bool {
        matches!(self, LinkStatus::LocalAvailable | LinkStatus::OnlineAvailable)
    }
}

/// Selector for [`Transport::node_table`] queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeScope {
    /// Every associated node, root-of-record first
    All,
    /// The upstream parent only
    Parent,
    /// Directly attached children only
    Children,
}

/// Contract the control plane depends on from the mesh stack.
///
/// `enable` and `connect` are requests: `Ok` means accepted, with the
/// outcome delivered later as an event. Nothing here blocks.
pub trait Transport {
    /// This node's own physical address
    fn local_addr(&self) -> MacAddr;

    /// Current connectivity state
    fn status(&self) -> LinkStatus;

    /// Check if this node is currently the mesh root
    fn is_root(&self) -> bool;

    /// Request mesh participation
    fn enable(&mut self) -> Result<()>;

    /// Request mesh shutdown
    fn disable(&mut self) -> Result<()>;

    /// Request upstream channel establishment
    fn connect(&mut self) -> Result<()>;

    /// Query associated nodes. On the root with [`NodeScope::All`] the
    /// first entry is the root-of-record, the rest are sub-nodes.
    fn node_table(&self, scope: NodeScope) -> Result<Vec<MacAddr>>;

    /// Hand an envelope to the mesh for delivery
    fn send(&mut self, frame: &[u8]) -> Result<()>;
}

/// Scripted in-memory transport for tests and simulation
#[derive(Debug, Clone)]
pub struct SimTransport {
    local: MacAddr,
    status: LinkStatus,
    root: bool,
    rows: Vec<MacAddr>,
    enable_ok: bool,
    connect_ok: bool,
    send_ok: bool,
    sent: Vec<Vec<u8>>,
    enable_calls: u32,
    disable_calls: u32,
}

impl SimTransport {
    /// Create a transport for a node with the given address
    pub fn new(local: MacAddr) -> Self {
        Self {
            local,
            status: LinkStatus::Disabled,
            root: false,
            rows: Vec::new(),
            enable_ok: true,
            connect_ok: true,
            send_ok: true,
            sent: Vec::new(),
            enable_calls: 0,
            disable_calls: 0,
        }
    }

    /// Script the reported connectivity state
    pub fn with_status(mut self, status: LinkStatus) -> Self {
        self.status = status;
        self
    }

    /// Script the root role
    pub fn with_root(mut self, root: bool) -> Self {
        self.root = root;
        self
    }

    /// Script the node-table rows returned for [`NodeScope::All`]
    pub fn with_rows(mut self, rows: Vec<MacAddr>) -> Self {
        self.rows = rows;
        self
    }

    /// Change the reported connectivity state
    pub fn set_status(&mut self, status: LinkStatus) {
        self.status = status;
    }

    /// Change the root role
    pub fn set_root(&mut self, root: bool) {
        self.root = root;
    }

    /// Replace the scripted node-table rows
    pub fn set_rows(&mut self, rows: Vec<MacAddr>) {
        self.rows = rows;
    }

    /// Make the next enable requests accepted or rejected
    pub fn set_enable_ok(&mut self, ok: bool) {
        self.enable_ok = ok;
    }

    /// Make the next connect requests accepted or rejected
    pub fn set_connect_ok(&mut self, ok: bool) {
        self.connect_ok = ok;
    }

    /// Make the next send calls accepted or rejected
    pub fn set_send_ok(&mut self, ok: bool) {
        self.send_ok = ok;
    }

    /// Frames handed to `send`, oldest first
    pub fn sent_frames(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Forget recorded frames
    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Number of enable requests observed
    pub fn enable_calls(&self) -> u32 {
        self.enable_calls
    }

    /// Number of disable requests observed
    pub fn disable_calls(&self) -> u32 {
        self.disable_calls
    }
}

impl Transport for SimTransport {
    fn local_addr(&self) -> MacAddr {
        self.local
    }

    fn status(&self) -> LinkStatus {
        self.status
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn enable(&mut self) -> Result<()> {
        self.enable_calls += 1;
        if self.enable_ok {
            self.status = LinkStatus::WifiConnecting;
            Ok(())
        } else {
            Err(MeshError::Transport("enable rejected".into()))
        }
    }

    fn disable(&mut self) -> Result<()> {
        self.disable_calls += 1;
        self.status = LinkStatus::Disabled;
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        if self.connect_ok {
            Ok(())
        } else {
            Err(MeshError::Transport("connect rejected".into()))
        }
    }

    fn node_table(&self, scope: NodeScope) -> Result<Vec<MacAddr>> {
        match scope {
            NodeScope::All => Ok(self.rows.clone()),
            NodeScope::Parent => Ok(self.rows.first().copied().into_iter().collect()),
            NodeScope::Children => Ok(self.rows.iter().skip(1).copied().collect()),
        }
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if self.send_ok {
            self.sent.push(frame.to_vec());
            Ok(())
        } else {
            Err(MeshError::Transport("send rejected".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> MacAddr {
        MacAddr::from_bytes([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_link_status_availability() {
        assert!(!LinkStatus::Disabled.is_available());
        assert!(!LinkStatus::WifiConnecting.is_available());
        assert!(!LinkStatus::NetConnecting.is_available());
        assert!(LinkStatus::LocalAvailable.is_available());
        assert!(LinkStatus::OnlineAvailable.is_available());
    }

    #[test]
    fn test_sim_transport_scripting() {
        let mut t = SimTransport::new(addr(1))
            .with_root(true)
            .with_status(LinkStatus::OnlineAvailable)
            .with_rows(vec![addr(1), addr(2), addr(3)]);

        assert!(t.is_root());
        assert!(t.status().is_available());
        assert_eq!(t.node_table(NodeScope::All).unwrap().len(), 3);
        assert_eq!(t.node_table(NodeScope::Parent).unwrap(), vec![addr(1)]);
        assert_eq!(
            t.node_table(NodeScope::Children).unwrap(),
            vec![addr(2), addr(3)]
        );

        t.send(&[1, 2, 3]).unwrap();
        assert_eq!(t.sent_frames().len(), 1);
        t.clear_sent();
        assert!(t.sent_frames().is_empty());
    }

    #[test]
    fn test_sim_transport_enable_disable() {
        let mut t = SimTransport::new(addr(1));
        t.enable().unwrap();
        assert_eq!(t.status(), LinkStatus::WifiConnecting);
        assert_eq!(t.enable_calls(), 1);

        t.set_enable_ok(false);
        assert!(t.enable().is_err());
        assert_eq!(t.enable_calls(), 2);

        t.disable().unwrap();
        assert_eq!(t.status(), LinkStatus::Disabled);
        assert_eq!(t.disable_calls(), 1);
    }

    #[test]
    fn test_sim_transport_send_rejection() {
        let mut t = SimTransport::new(addr(1));
        t.set_send_ok(false);
        assert!(t.send(&[0]).is_err());
        assert!(t.sent_frames().is_empty());
    }
}
