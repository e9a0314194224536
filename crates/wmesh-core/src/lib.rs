//! # Wireless Mesh Control Plane
//!
//! This crate provides the control-plane logic of a self-organizing
//! wireless mesh node. It supervises the node's membership lifecycle,
//! maintains a registry of known mesh peers, runs a periodic
//! topology-discovery protocol and dispatches inbound mesh messages to
//! protocol handlers, all over a pluggable transport.
//!
//! ## Overview
//!
//! - **Node Registry**: root and sub-node peer records keyed by 6-byte
//!   address, with staleness pruning
//! - **Topology Protocol**: the root syncs from the transport's node
//!   table, everyone else broadcasts discovery probes and consumes the
//!   asynchronous responses
//! - **Message Dispatcher**: protocol-id routing of inbound envelopes
//!   to exactly one handler
//! - **Lifecycle Controller**: provisioning, bounded mesh-enable
//!   retries, a connection-loss watchdog and orderly teardown
//! - **Mesh Node**: the facade owning all of the above plus the
//!   transport and provisioner collaborators
//!
//! ## Control Flow
//!
//! ```text
//! Idle → Provisioning → Enabling(n) → Connected → Disabling → Idle
//!                            ↑                │
//!                            └── rebuild or ──┘
//!                                enable failure, n ≤ attempt limit
//! ```
//!
//! Everything is single-threaded and event-driven: the embedding
//! runtime calls `tick` on a cadence, `on_receive` per inbound frame,
//! and `handle_event` per external completion. Nothing blocks.
//!
//! ## Example
//!
//! ```rust
//! use wmesh_core::{MacAddr, MeshConfig, MeshEvent, MeshNode, SimProvisioner, SimTransport};
//!
//! let addr = MacAddr::from_bytes([0x18, 0xfe, 0x34, 0x00, 0x00, 0x01]);
//! let transport = SimTransport::new(addr);
//! let mut node = MeshNode::new(MeshConfig::default(), transport, SimProvisioner::new());
//!
//! // Join: provisioning completes on the first poll, then the
//! // transport reports the enable done
//! node.initiate(0);
//! node.tick(500);
//! node.handle_event(MeshEvent::EnableFinished { ok: true }, 600);
//!
//! assert!(node.registry().is_some());
//! println!("{}", node.report_json(600).unwrap());
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod node;
pub mod provision;
pub mod registry;
pub mod report;
pub mod topology;
pub mod transport;
pub mod wire;

// Re-export main types
pub use config::MeshConfig;
pub use dispatch::{DispatchOutcome, DispatchStats, Dispatcher, DropReason, HandlerKind};
pub use error::{MeshError, Result};
pub use lifecycle::{Directive, LifecycleController, MeshEvent, MeshState};
pub use node::{MeshNode, NodeStats};
pub use provision::{ProvisionStatus, Provisioner, SimProvisioner};
pub use registry::{NodeRegistry, PeerRecord};
pub use report::{NodeReport, PeerSummary};
pub use topology::{topology_response_frame, TopologyAgent, TopologyStats};
pub use transport::{LinkStatus, NodeScope, SimTransport, Transport};
pub use wire::{Envelope, EnvelopeBuilder, MacAddr, OptionKind, ProtocolId};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::MeshConfig;
    pub use crate::lifecycle::{MeshEvent, MeshState};
    pub use crate::node::MeshNode;
    pub use crate::provision::{Provisioner, SimProvisioner};
    pub use crate::registry::NodeRegistry;
    pub use crate::transport::{LinkStatus, SimTransport, Transport};
    pub use crate::wire::MacAddr;
}
