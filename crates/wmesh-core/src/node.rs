//! Mesh node facade
//!
//! `MeshNode` owns the lifecycle controller, dispatcher and topology
//! agent together with the transport and provisioner collaborators,
//! and exposes the entry points the embedding runtime drives:
//! `initiate`, `teardown`, `handle_event`, `tick` and `on_receive`.
//! Calls are serial; nothing blocks. Directives returned by the
//! lifecycle machine are acted on here, and a side effect that fails
//! feeds its failure straight back in as the next event.

use crate::config::MeshConfig;
use crate::dispatch::{DispatchOutcome, DispatchStats, Dispatcher, HandlerKind};
use crate::lifecycle::{Directive, LifecycleController, MeshEvent, MeshState};
use crate::provision::{ProvisionStatus, Provisioner};
use crate::registry::NodeRegistry;
use crate::report::{peer_summaries, NodeReport};
use crate::topology::{topology_response_frame, TopologyAgent, TopologyStats};
use crate::transport::{LinkStatus, Transport};
use crate::wire::{MacAddr, OptionKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Node-level counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeStats {
    /// Frames handed to `on_receive`
    pub frames_received: u64,
    /// Frames that reached a protocol handler
    pub frames_dispatched: u64,
    /// Frames dropped before or by a handler
    pub frames_dropped: u64,
    /// Mesh enable requests issued
    pub enable_attempts: u64,
    /// Rebuild-failure notifications received
    pub rebuild_failures: u64,
    /// Teardowns performed
    pub teardowns: u64,
    /// Heartbeat lines emitted while connected
    pub heartbeats: u64,
    /// Peer-joined notifications received
    pub peers_joined: u64,
}

/// Inter-node channel marker; present exactly while the receive path
/// is armed
#[derive(Debug, Clone)]
struct Channel {
    port: u16,
}

/// A complete mesh control plane over a transport and a provisioner
pub struct MeshNode<T: Transport, P: Provisioner> {
    config: MeshConfig,
    transport: T,
    provisioner: P,
    lifecycle: LifecycleController,
    dispatcher: Dispatcher,
    topology: TopologyAgent,
    channel: Option<Channel>,
    heartbeat_at: Option<u64>,
    initiated_at: Option<u64>,
    stats: NodeStats,
}

impl<T: Transport, P: Provisioner> MeshNode<T, P> {
    pub fn new(config: MeshConfig, transport: T, provisioner: P) -> Self {
        let lifecycle = LifecycleController::new(
            config.enable_attempt_limit,
            config.watchdog_ms,
            config.provision_poll_ms,
        );
        let topology = TopologyAgent::new(config.topology_interval_ms, config.stale_threshold_ms);
        Self {
            config,
            transport,
            provisioner,
            lifecycle,
            dispatcher: Dispatcher::new(),
            topology,
            channel: None,
            heartbeat_at: None,
            initiated_at: None,
            stats: NodeStats::default(),
        }
    }

    /// Ask the node to join a mesh; a no-op unless idle
    pub fn initiate(&mut self, now: u64) {
        self.handle_event(MeshEvent::Initiate, now);
    }

    /// Release every mesh resource and return to idle
    pub fn teardown(&mut self, now: u64) {
        self.handle_event(MeshEvent::Teardown, now);
    }

    /// Feed one external event through the lifecycle machine and run
    /// the resulting side effect
    pub fn handle_event(&mut self, event: MeshEvent, now: u64) {
        match event {
            MeshEvent::PeerJoined(_) => self.stats.peers_joined += 1,
            MeshEvent::RebuildFailed => self.stats.rebuild_failures += 1,
            _ => {}
        }
        let directive = self.lifecycle.handle(event, now);
        self.apply(directive, now);
    }

    /// Advance every deadline the node owns. Call on a coarse cadence;
    /// each deadline fires at most once per call.
    pub fn tick(&mut self, now: u64) {
        if self.lifecycle.provision_poll_due(now) {
            let status = self.provisioner.poll();
            if status.is_terminal() {
                let ok = status == ProvisionStatus::Succeeded;
                self.provisioner.stop();
                self.handle_event(MeshEvent::ProvisioningFinished { ok }, now);
            }
        }

        if self.lifecycle.watchdog_due(now) {
            let status = self.transport.status();
            if status == LinkStatus::WifiConnecting {
                warn!("watchdog: link stuck mid-connection");
                self.handle_event(MeshEvent::ConnectionLost, now);
            } else {
                debug!(?status, "watchdog: link healthy");
            }
        }

        self.topology.tick(now, &mut self.transport);

        if self.lifecycle.state() == MeshState::Connected {
            if let Some(due) = self.heartbeat_at {
                if now >= due {
                    self.heartbeat_at = Some(now + self.config.heartbeat_ms);
                    self.stats.heartbeats += 1;
                    let peers = self.topology.registry().map(NodeRegistry::len).unwrap_or(0);
                    info!(uptime_ms = self.uptime_ms(now), peers, "mesh node alive");
                }
            }
        }
    }

    /// Deliver one inbound frame to its protocol handler
    pub fn on_receive(&mut self, frame: &[u8], now: u64) {
        self.stats.frames_received += 1;
        if self.channel.is_none() {
            debug!("frame ignored: channel closed");
            self.stats.frames_dropped += 1;
            return;
        }

        match self.dispatcher.classify(frame) {
            DispatchOutcome::Deliver {
                handler: HandlerKind::Topology,
                envelope,
                payload,
            } => {
                // A request option marks a discovery probe, which must
                // not be fed to the response handler
                if envelope.option(OptionKind::TopologyRequest, 0).is_some() {
                    self.stats.frames_dispatched += 1;
                    self.answer_probe(envelope.src());
                } else {
                    match self.topology.handle_response(&envelope, payload, now) {
                        Ok(()) => self.stats.frames_dispatched += 1,
                        Err(err) => {
                            debug!(%err, "topology handler rejected the frame");
                            self.stats.frames_dropped += 1;
                        }
                    }
                }
            }
            DispatchOutcome::Drop(_) => self.stats.frames_dropped += 1,
        }
    }

    /// Current lifecycle phase
    pub fn state(&self) -> MeshState {
        self.lifecycle.state()
    }

    /// The peer registry, present while topology discovery runs
    pub fn registry(&self) -> Option<&NodeRegistry> {
        self.topology.registry()
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn topology_stats(&self) -> &TopologyStats {
        self.topology.stats()
    }

    pub fn dispatch_stats(&self) -> &DispatchStats {
        self.dispatcher.stats()
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn local_addr(&self) -> MacAddr {
        self.transport.local_addr()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable collaborator access, for harnesses that script it
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Snapshot of the node's vital signs
    pub fn report(&self, now: u64) -> NodeReport {
        let peers = self
            .topology
            .registry()
            .map(|reg| peer_summaries(reg, now))
            .unwrap_or_default();
        NodeReport {
            addr: self.transport.local_addr(),
            state: self.lifecycle.state().to_string(),
            is_root: self.transport.is_root(),
            uptime_ms: self.uptime_ms(now),
            peer_count: peers.len(),
            peers,
            node: self.stats,
            topology: *self.topology.stats(),
            dispatch: *self.dispatcher.stats(),
        }
    }

    pub fn report_json(&self, now: u64) -> serde_json::Result<String> {
        self.report(now).to_json()
    }

    fn uptime_ms(&self, now: u64) -> u64 {
        self.initiated_at
            .map(|at| now.saturating_sub(at))
            .unwrap_or(0)
    }

    fn apply(&mut self, directive: Directive, now: u64) {
        match directive {
            Directive::None => {}
            Directive::StartProvisioning => {
                self.initiated_at = Some(now);
                info!("starting credential provisioning");
                if let Err(err) = self.provisioner.start() {
                    warn!(%err, "provisioner refused to start");
                    self.handle_event(MeshEvent::ProvisioningFinished { ok: false }, now);
                }
            }
            Directive::Enable { attempt } => {
                self.stats.enable_attempts += 1;
                info!(
                    attempt,
                    limit = self.lifecycle.attempt_limit(),
                    "requesting mesh enable"
                );
                if let Err(err) = self.transport.enable() {
                    warn!(%err, "mesh enable rejected");
                    self.handle_event(MeshEvent::EnableFinished { ok: false }, now);
                }
            }
            Directive::BringUp => self.bring_up(now),
            Directive::TearDown => self.tear_down(now),
        }
    }

    /// Entering Connected: channel first, then upstream, then topology
    fn bring_up(&mut self, now: u64) {
        self.channel = Some(Channel {
            port: self.config.channel_port,
        });
        debug!(port = self.config.channel_port, "mesh channel open, receive path armed");

        if let Err(err) = self.transport.connect() {
            warn!(%err, "upstream connect rejected, tearing down");
            self.handle_event(MeshEvent::Teardown, now);
            return;
        }

        self.topology.start(now);
        self.heartbeat_at = Some(now + self.config.heartbeat_ms);
        info!("mesh connected, topology discovery armed");
    }

    /// Release everything, in the reverse order of bring-up. Safe to
    /// run from any state, including with nothing allocated.
    fn tear_down(&mut self, now: u64) {
        self.stats.teardowns += 1;
        info!(uptime_ms = self.uptime_ms(now), "tearing down mesh resources");

        self.topology.stop();
        if let Some(channel) = self.channel.take() {
            debug!(port = channel.port, "mesh channel closed");
        }
        self.provisioner.stop();
        if let Err(err) = self.transport.disable() {
            warn!(%err, "transport disable rejected");
        }
        self.heartbeat_at = None;
        self.initiated_at = None;
        self.lifecycle.teardown_complete();
    }

    /// A connected root answers a discovery probe with its sub-node
    /// list; everyone else stays quiet
    fn answer_probe(&mut self, dst: MacAddr) {
        if !self.transport.is_root() {
            debug!(%dst, "discovery probe ignored: not the root");
            return;
        }
        let subs: Vec<MacAddr> = match self.topology.registry() {
            Some(reg) => reg.sub_nodes().iter().map(|rec| rec.addr).collect(),
            None => {
                debug!(%dst, "discovery probe ignored: topology not running");
                return;
            }
        };
        let frame = topology_response_frame(dst, self.transport.local_addr(), &subs);
        match self.transport.send(&frame) {
            Ok(()) => debug!(%dst, subs = subs.len(), "answered discovery probe"),
            Err(err) => warn!(%err, "probe answer send failed"),
        }
    }
}
