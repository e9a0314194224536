//! Topology discovery protocol
//!
//! Runs on a fixed period while the node is connected. The root learns
//! its peers by querying the transport's node table directly; every
//! other node broadcasts a discovery request and consumes the answer
//! asynchronously through the dispatcher. Both paths feed the peer
//! registry and finish with a staleness prune over a single snapshot
//! time, so a pass never prunes an entry it just refreshed.

use crate::error::{MeshError, Result};
use crate::registry::NodeRegistry;
use crate::transport::{NodeScope, Transport};
use crate::wire::{Envelope, EnvelopeBuilder, MacAddr, OptionKind, ProtocolId};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Addresses per topology-response option, bounded by the one-byte
/// option length field
pub const ADDRS_PER_OPTION: usize = EnvelopeBuilder::MAX_OPTION_VALUE / MacAddr::LEN;

/// Topology protocol counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TopologyStats {
    /// Discovery passes executed
    pub passes: u64,
    /// Discovery requests broadcast
    pub probes_sent: u64,
    /// Passes skipped because the link was not stable
    pub skipped_unstable: u64,
    /// Responses accepted into the registry
    pub responses_handled: u64,
    /// Responses rejected before any registry mutation
    pub responses_rejected: u64,
    /// Peers appended across all passes
    pub peers_added: u64,
    /// Peers dropped by staleness pruning
    pub peers_pruned: u64,
}

/// Periodic topology discovery over the peer registry.
///
/// The registry lives only while the agent runs: `start` creates it,
/// `stop` releases it, and operations in between that find it absent
/// fail with [`MeshError::NotInitialized`].
#[derive(Debug, Clone)]
pub struct TopologyAgent {
    interval_ms: u64,
    stale_threshold_ms: u64,
    registry: Option<NodeRegistry>,
    next_run: Option<u64>,
    stats: TopologyStats,
}

impl TopologyAgent {
    /// Create an agent with the given period and staleness threshold
    pub fn new(interval_ms: u64, stale_threshold_ms: u64) -> Self {
        Self {
            interval_ms,
            stale_threshold_ms,
            registry: None,
            next_run: None,
            stats: TopologyStats::default(),
        }
    }

    /// Initialize a fresh registry and arm the periodic deadline
    pub fn start(&mut self, now: u64) {
        self.registry = Some(NodeRegistry::new());
        self.next_run = Some(now + self.interval_ms);
    }

    /// Release the registry and disarm the deadline; safe to repeat
    pub fn stop(&mut self) {
        self.registry = None;
        self.next_run = None;
    }

    /// Check if the agent is between `start` and `stop`
    pub fn is_running(&self) -> bool {
        self.registry.is_some()
    }

    /// Read access to the current registry
    pub fn registry(&self) -> Option<&NodeRegistry> {
        self.registry.as_ref()
    }

    /// Protocol counters
    pub fn stats(&self) -> &TopologyStats {
        &self.stats
    }

    /// Run a discovery pass if the deadline has expired
    pub fn tick<T: Transport>(&mut self, now: u64, transport: &mut T) {
        match self.next_run {
            Some(due) if now >= due => {}
            _ => return,
        }
        self.next_run = Some(now + self.interval_ms);
        self.stats.passes += 1;

        if transport.is_root() {
            self.root_pass(now, transport);
        } else {
            self.send_probe(now, transport);
        }
    }

    /// Root path: read the transport's own view of the mesh
    fn root_pass<T: Transport>(&mut self, now: u64, transport: &mut T) {
        let rows = match transport.node_table(NodeScope::All) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(%err, "topology pass: node table query failed");
                return;
            }
        };
        if rows.is_empty() {
            warn!("topology pass: transport returned an empty node table");
            return;
        }

        let threshold = self.stale_threshold_ms;
        let mut added = 0;
        let pruned;
        {
            let registry = match self.registry.as_mut() {
                Some(reg) => reg,
                None => {
                    warn!("topology pass: registry not initialized");
                    return;
                }
            };

            // First row is the root-of-record, the rest are sub-nodes
            registry.set_root(rows[0], now);
            if rows.len() > 1 {
                match registry.add(&rows[1..], now) {
                    Ok(n) => added = n,
                    Err(err) => {
                        warn!(%err, "topology pass: sub-node insert failed");
                        return;
                    }
                }
            }
            if let Err(err) = registry.touch(&rows, now) {
                warn!(%err, "topology pass: timestamp refresh failed");
            }
            pruned = registry.prune_stale(now, threshold);
        }

        self.stats.peers_added += added as u64;
        self.stats.peers_pruned += pruned as u64;
        self.dump(now);
    }

    /// Non-root path: broadcast a discovery request, answer comes later
    fn send_probe<T: Transport>(&mut self, _now: u64, transport: &mut T) {
        let status = transport.status();
        if !status.is_available() {
            debug!(?status, "topology pass skipped: link not in a stable state");
            self.stats.skipped_unstable += 1;
            return;
        }

        let frame = EnvelopeBuilder::new(MacAddr::BROADCAST, transport.local_addr())
            .protocol(ProtocolId::Control)
            .ack_request(true)
            .option(OptionKind::TopologyRequest, &[])
            .build();

        match transport.send(&frame) {
            Ok(()) => {
                self.stats.probes_sent += 1;
                trace!("topology probe broadcast");
            }
            Err(err) => warn!(%err, "topology probe send failed"),
        }
    }

    /// Consume a discovery response delivered by the dispatcher.
    ///
    /// The source address becomes the root-of-record; each
    /// topology-response option contributes a run of 6-byte sub-node
    /// addresses. Rejects before touching the registry when the
    /// registry is absent, the payload is empty, or any option value
    /// has a bad length. A response without address options still sets
    /// the root.
    pub fn handle_response(&mut self, envelope: &Envelope<'_>, payload: &[u8], now: u64) -> Result<()> {
        if payload.is_empty() {
            self.stats.responses_rejected += 1;
            warn!("topology response rejected: empty payload");
            return Err(MeshError::MalformedFrame("empty payload".into()));
        }

        // Decode and validate every option before any mutation
        let mut addrs = Vec::new();
        for opt in envelope.options() {
            if !opt.is(OptionKind::TopologyResponse) {
                continue;
            }
            if opt.value.is_empty() || opt.value.len() % MacAddr::LEN != 0 {
                self.stats.responses_rejected += 1;
                warn!(
                    len = opt.value.len(),
                    "topology response rejected: option is not a run of addresses"
                );
                return Err(MeshError::MalformedFrame(
                    "address option length not a multiple of 6".into(),
                ));
            }
            for chunk in opt.value.chunks(MacAddr::LEN) {
                if let Some(addr) = MacAddr::from_slice(chunk) {
                    addrs.push(addr);
                }
            }
        }

        let src = envelope.src();
        let threshold = self.stale_threshold_ms;
        let mut added = 0;
        let pruned;
        {
            let registry = match self.registry.as_mut() {
                Some(reg) => reg,
                None => {
                    self.stats.responses_rejected += 1;
                    warn!("topology response rejected: registry not initialized");
                    return Err(MeshError::NotInitialized);
                }
            };

            registry.set_root(src, now);
            registry.touch(&[src], now)?;
            if !addrs.is_empty() {
                added = registry.add(&addrs, now)?;
                registry.touch(&addrs, now)?;
            }
            pruned = registry.prune_stale(now, threshold);
        }

        self.stats.responses_handled += 1;
        self.stats.peers_added += added as u64;
        self.stats.peers_pruned += pruned as u64;
        self.dump(now);
        Ok(())
    }

    /// Log the registry after a pass
    fn dump(&self, now: u64) {
        if let Some(registry) = &self.registry {
            debug!(entries = registry.len(), "registry after topology pass");
            for record in registry.iter() {
                trace!(addr = %record.addr, age_ms = record.age(now), "known peer");
            }
        }
    }
}

/// Build a topology discovery response: a control envelope whose
/// address options carry `addrs` in runs of [`ADDRS_PER_OPTION`].
/// The responding root is the envelope source.
pub fn topology_response_frame(dst: MacAddr, root: MacAddr, addrs: &[MacAddr]) -> Vec<u8> {
    let mut builder = EnvelopeBuilder::new(dst, root).protocol(ProtocolId::Control);
    for run in addrs.chunks(ADDRS_PER_OPTION) {
        let mut value = Vec::with_capacity(run.len() * MacAddr::LEN);
        for addr in run {
            value.extend_from_slice(addr.as_bytes());
        }
        builder = builder.option(OptionKind::TopologyResponse, &value);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LinkStatus, SimTransport};

    fn addr(last: u8) -> MacAddr {
        MacAddr::from_bytes([0x18, 0xfe, 0x34, 0x00, 0x00, last])
    }

    fn running_agent(now: u64) -> TopologyAgent {
        let mut agent = TopologyAgent::new(15_000, 30_000);
        agent.start(now);
        agent
    }

    #[test]
    fn test_start_and_stop() {
        let mut agent = TopologyAgent::new(15_000, 30_000);
        assert!(!agent.is_running());
        assert!(agent.registry().is_none());

        agent.start(0);
        assert!(agent.is_running());
        assert_eq!(agent.registry().unwrap().len(), 0);

        agent.stop();
        assert!(!agent.is_running());
        agent.stop();
        assert!(!agent.is_running());
    }

    #[test]
    fn test_tick_before_deadline_is_inert() {
        let mut agent = running_agent(0);
        let mut transport = SimTransport::new(addr(1))
            .with_root(true)
            .with_rows(vec![addr(1), addr(2)]);

        agent.tick(14_999, &mut transport);
        assert_eq!(agent.stats().passes, 0);
        assert_eq!(agent.registry().unwrap().len(), 0);
    }

    #[test]
    fn test_root_pass_builds_registry() {
        let mut agent = running_agent(0);
        let mut transport = SimTransport::new(addr(1))
            .with_root(true)
            .with_status(LinkStatus::OnlineAvailable)
            .with_rows(vec![addr(1), addr(2), addr(3)]);

        agent.tick(15_000, &mut transport);

        let registry = agent.registry().unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.root().unwrap().addr, addr(1));
        let subs: Vec<_> = registry.sub_nodes().iter().map(|r| r.addr).collect();
        assert_eq!(subs, vec![addr(2), addr(3)]);
        assert!(registry.iter().all(|r| r.last_seen() == 15_000));
        assert_eq!(agent.stats().passes, 1);
        assert_eq!(agent.stats().peers_added, 2);
    }

    #[test]
    fn test_root_pass_prunes_unreported_peers() {
        let mut agent = running_agent(0);
        let mut transport = SimTransport::new(addr(1))
            .with_root(true)
            .with_rows(vec![addr(1), addr(2), addr(3)]);

        agent.tick(15_000, &mut transport);
        assert_eq!(agent.registry().unwrap().len(), 3);

        // addr(3) drops out of the transport's view; once its record
        // ages past the threshold the prune removes it
        transport.set_rows(vec![addr(1), addr(2)]);
        agent.tick(50_000, &mut transport);

        let registry = agent.registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&addr(2)));
        assert!(!registry.contains(&addr(3)));
        assert_eq!(agent.stats().peers_pruned, 1);
    }

    #[test]
    fn test_root_pass_rejects_empty_table() {
        let mut agent = running_agent(0);
        let mut transport = SimTransport::new(addr(1)).with_root(true);

        agent.tick(15_000, &mut transport);
        assert_eq!(agent.registry().unwrap().len(), 0);
    }

    #[test]
    fn test_probe_broadcast_when_available() {
        let mut agent = running_agent(0);
        let mut transport = SimTransport::new(addr(1)).with_status(LinkStatus::LocalAvailable);

        agent.tick(15_000, &mut transport);
        assert_eq!(agent.stats().probes_sent, 1);

        let frames = transport.sent_frames();
        assert_eq!(frames.len(), 1);
        let env = Envelope::parse(&frames[0]).unwrap();
        assert!(env.dst().is_broadcast());
        assert_eq!(env.src(), addr(1));
        assert_eq!(env.protocol(), Some(ProtocolId::Control));
        assert!(env.flags().ack_request());
        assert!(!env.flags().direct());
        assert_eq!(env.user_data(), None);
        let req = env.option(OptionKind::TopologyRequest, 0).unwrap();
        assert!(req.value.is_empty());
    }

    #[test]
    fn test_probe_skipped_while_connecting() {
        let mut agent = running_agent(0);
        let mut transport = SimTransport::new(addr(1)).with_status(LinkStatus::WifiConnecting);

        agent.tick(15_000, &mut transport);
        assert!(transport.sent_frames().is_empty());
        assert_eq!(agent.stats().skipped_unstable, 1);
        assert_eq!(agent.stats().probes_sent, 0);
    }

    #[test]
    fn test_handle_response_populates_registry() {
        let mut agent = running_agent(0);
        let frame = topology_response_frame(addr(9), addr(0xa), &[addr(0xd), addr(0xe)]);
        let env = Envelope::parse(&frame).unwrap();

        agent.handle_response(&env, &frame, 1_000).unwrap();

        let registry = agent.registry().unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.root().unwrap().addr, addr(0xa));
        assert!(registry.contains(&addr(0xd)));
        assert!(registry.contains(&addr(0xe)));
        assert!(registry.iter().all(|r| r.last_seen() == 1_000));
        assert_eq!(agent.stats().responses_handled, 1);
    }

    #[test]
    fn test_handle_response_without_options_sets_root_only() {
        let mut agent = running_agent(0);
        let frame = topology_response_frame(addr(9), addr(0xa), &[]);
        let env = Envelope::parse(&frame).unwrap();

        agent.handle_response(&env, &frame, 1_000).unwrap();
        assert_eq!(agent.registry().unwrap().len(), 1);
        assert_eq!(agent.registry().unwrap().root().unwrap().addr, addr(0xa));
    }

    #[test]
    fn test_handle_response_new_root_resets_topology() {
        let mut agent = running_agent(0);

        let first = topology_response_frame(addr(9), addr(0xa), &[addr(0xd)]);
        let env = Envelope::parse(&first).unwrap();
        agent.handle_response(&env, &first, 1_000).unwrap();
        assert_eq!(agent.registry().unwrap().len(), 2);

        let second = topology_response_frame(addr(9), addr(0xb), &[addr(0xe)]);
        let env = Envelope::parse(&second).unwrap();
        agent.handle_response(&env, &second, 2_000).unwrap();

        let registry = agent.registry().unwrap();
        assert_eq!(registry.root().unwrap().addr, addr(0xb));
        assert!(!registry.contains(&addr(0xd)));
        assert!(registry.contains(&addr(0xe)));
    }

    #[test]
    fn test_handle_response_bad_option_length_rejected() {
        let mut agent = running_agent(0);
        let seed = topology_response_frame(addr(9), addr(0xa), &[addr(0xd)]);
        let env = Envelope::parse(&seed).unwrap();
        agent.handle_response(&env, &seed, 1_000).unwrap();

        // Seven-byte value cannot be a run of 6-byte addresses
        let bad = EnvelopeBuilder::new(addr(9), addr(0xb))
            .protocol(ProtocolId::Control)
            .option(OptionKind::TopologyResponse, &[0u8; 7])
            .build();
        let env = Envelope::parse(&bad).unwrap();
        let err = agent.handle_response(&env, &bad, 2_000).unwrap_err();
        assert!(matches!(err, MeshError::MalformedFrame(_)));

        // Prior state survives untouched
        let registry = agent.registry().unwrap();
        assert_eq!(registry.root().unwrap().addr, addr(0xa));
        assert_eq!(registry.len(), 2);
        assert_eq!(agent.stats().responses_rejected, 1);
    }

    #[test]
    fn test_handle_response_empty_payload_rejected() {
        let mut agent = running_agent(0);
        let frame = topology_response_frame(addr(9), addr(0xa), &[]);
        let env = Envelope::parse(&frame).unwrap();

        let err = agent.handle_response(&env, &[], 1_000).unwrap_err();
        assert!(matches!(err, MeshError::MalformedFrame(_)));
        assert_eq!(agent.registry().unwrap().len(), 0);
    }

    #[test]
    fn test_handle_response_requires_running_agent() {
        let mut agent = TopologyAgent::new(15_000, 30_000);
        let frame = topology_response_frame(addr(9), addr(0xa), &[addr(0xd)]);
        let env = Envelope::parse(&frame).unwrap();

        let err = agent.handle_response(&env, &frame, 1_000).unwrap_err();
        assert_eq!(err, MeshError::NotInitialized);
    }

    #[test]
    fn test_response_frame_chunks_large_meshes() {
        let addrs: Vec<_> = (0..100u8).map(|i| addr(i.wrapping_add(1))).collect();
        let frame = topology_response_frame(addr(9), addr(0xa), &addrs);
        let env = Envelope::parse(&frame).unwrap();

        let options: Vec<_> = env
            .options()
            .filter(|o| o.is(OptionKind::TopologyResponse))
            .collect();
        assert_eq!(options.len(), 3); // 42 + 42 + 16
        let total: usize = options.iter().map(|o| o.value.len()).sum();
        assert_eq!(total, 100 * MacAddr::LEN);
    }
}
