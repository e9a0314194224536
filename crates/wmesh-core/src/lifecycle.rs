//! Mesh membership lifecycle
//!
//! A single state machine drives the node from provisioning through
//! mesh enable and into the connected/rebuild loop, and back down to
//! idle on teardown. Every external completion arrives as a
//! [`MeshEvent`]; the machine answers with the one [`Directive`] the
//! caller must perform. Side effects never happen inside the machine
//! itself, so the state is always consistent before anything external
//! runs.

use crate::wire::MacAddr;
use std::fmt;
use tracing::{debug, warn};

/// Lifecycle phase. `Enabling` carries the current attempt number,
/// starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshState {
    Idle,
    Provisioning,
    Enabling { attempt: u32 },
    Connected,
    Disabling,
}

impl fmt::Display for MeshState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshState::Idle => write!(f, "idle"),
            MeshState::Provisioning => write!(f, "provisioning"),
            MeshState::Enabling { attempt } => write!(f, "enabling({attempt})"),
            MeshState::Connected => write!(f, "connected"),
            MeshState::Disabling => write!(f, "disabling"),
        }
    }
}

/// External happenings the lifecycle reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshEvent {
    /// Operator asked the node to join a mesh
    Initiate,
    /// Credential provisioning reached a terminal status
    ProvisioningFinished { ok: bool },
    /// The transport finished (or gave up on) an enable request
    EnableFinished { ok: bool },
    /// A connected node failed to rebuild its mesh resources
    RebuildFailed,
    /// The watchdog found the link stuck mid-connection
    ConnectionLost,
    /// The transport reported a new station joining
    PeerJoined(MacAddr),
    /// Operator or internal fault asked for a full stop
    Teardown,
}

/// The one side effect the caller performs after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Nothing to do
    None,
    /// Start the provisioning collaborator
    StartProvisioning,
    /// Ask the transport to enable the mesh, attempt `attempt` of the limit
    Enable { attempt: u32 },
    /// Open the channel, connect upstream, start topology discovery
    BringUp,
    /// Release every mesh resource, then call `teardown_complete`
    TearDown,
}

/// State machine for mesh membership.
///
/// Owns the provision-poll and watchdog deadlines. The embedding node
/// polls [`provision_poll_due`](Self::provision_poll_due) and
/// [`watchdog_due`](Self::watchdog_due) from its tick and synthesizes
/// the resulting events back into [`handle`](Self::handle).
#[derive(Debug, Clone)]
pub struct LifecycleController {
    state: MeshState,
    attempt_limit: u32,
    watchdog_ms: u64,
    provision_poll_ms: u64,
    watchdog_at: Option<u64>,
    provision_poll_at: Option<u64>,
}

impl LifecycleController {
    pub fn new(attempt_limit: u32, watchdog_ms: u64, provision_poll_ms: u64) -> Self {
        Self {
            state: MeshState::Idle,
            attempt_limit: attempt_limit.max(1),
            watchdog_ms,
            provision_poll_ms,
            watchdog_at: None,
            provision_poll_at: None,
        }
    }

    /// Current lifecycle phase
    pub fn state(&self) -> MeshState {
        self.state
    }

    /// Consecutive enable attempts allowed before giving up
    pub fn attempt_limit(&self) -> u32 {
        self.attempt_limit
    }

    /// Feed one event through the machine and get the side effect to run
    pub fn handle(&mut self, event: MeshEvent, now: u64) -> Directive {
        let state = self.state;
        let directive = match (state, event) {
            // Teardown wins from every state
            (_, MeshEvent::Teardown) => self.enter_disabling(),

            (_, MeshEvent::PeerJoined(addr)) => {
                debug!(%addr, "station joined the mesh");
                Directive::None
            }

            (MeshState::Idle, MeshEvent::Initiate) => {
                self.state = MeshState::Provisioning;
                self.provision_poll_at = Some(now + self.provision_poll_ms);
                Directive::StartProvisioning
            }

            (MeshState::Provisioning, MeshEvent::ProvisioningFinished { ok: true }) => {
                self.enter_enabling(1, now)
            }
            (MeshState::Provisioning, MeshEvent::ProvisioningFinished { ok: false }) => {
                warn!("provisioning failed, tearing down");
                self.enter_disabling()
            }

            (MeshState::Enabling { .. }, MeshEvent::EnableFinished { ok: true }) => {
                self.state = MeshState::Connected;
                self.watchdog_at = Some(now + self.watchdog_ms);
                Directive::BringUp
            }
            (MeshState::Enabling { attempt }, MeshEvent::EnableFinished { ok: false }) => {
                if attempt < self.attempt_limit {
                    self.enter_enabling(attempt + 1, now)
                } else {
                    warn!(
                        attempts = attempt,
                        "mesh enable gave up after the attempt limit"
                    );
                    self.enter_disabling()
                }
            }

            // A failed rebuild counts exactly as a failed enable after
            // a successful one, so the retry counter restarts at 2
            (MeshState::Connected, MeshEvent::RebuildFailed) => self.enter_enabling(2, now),

            // The watchdog raises this for a hung enable too
            (
                MeshState::Connected | MeshState::Enabling { .. },
                MeshEvent::ConnectionLost,
            ) => {
                warn!("mesh connection lost, tearing down");
                self.enter_disabling()
            }

            (state, event) => {
                warn!(%state, ?event, "event ignored in this state");
                Directive::None
            }
        };
        if self.state != state {
            debug!(from = %state, to = %self.state, "lifecycle transition");
        }
        directive
    }

    /// The node calls this once its teardown work is done; the machine
    /// returns to `Idle`, ready for a fresh `Initiate`
    pub fn teardown_complete(&mut self) {
        self.state = MeshState::Idle;
        self.watchdog_at = None;
        self.provision_poll_at = None;
        debug!("lifecycle back to idle");
    }

    /// True once per elapsed poll period while provisioning; re-arms
    pub fn provision_poll_due(&mut self, now: u64) -> bool {
        if self.state != MeshState::Provisioning {
            return false;
        }
        match self.provision_poll_at {
            Some(due) if now >= due => {
                self.provision_poll_at = Some(now + self.provision_poll_ms);
                true
            }
            _ => false,
        }
    }

    /// True once per elapsed watchdog period from enabling onward; re-arms
    pub fn watchdog_due(&mut self, now: u64) -> bool {
        match self.watchdog_at {
            Some(due) if now >= due => {
                self.watchdog_at = Some(now + self.watchdog_ms);
                true
            }
            _ => false,
        }
    }

    fn enter_enabling(&mut self, attempt: u32, now: u64) -> Directive {
        self.state = MeshState::Enabling { attempt };
        self.provision_poll_at = None;
        self.watchdog_at = Some(now + self.watchdog_ms);
        Directive::Enable { attempt }
    }

    fn enter_disabling(&mut self) -> Directive {
        self.state = MeshState::Disabling;
        self.watchdog_at = None;
        self.provision_poll_at = None;
        Directive::TearDown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> LifecycleController {
        LifecycleController::new(3, 300_000, 500)
    }

    fn connected_controller(now: u64) -> LifecycleController {
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, now);
        ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, now);
        ctl.handle(MeshEvent::EnableFinished { ok: true }, now);
        assert_eq!(ctl.state(), MeshState::Connected);
        ctl
    }

    #[test]
    fn test_initiate_starts_provisioning() {
        let mut ctl = controller();
        assert_eq!(ctl.state(), MeshState::Idle);

        let d = ctl.handle(MeshEvent::Initiate, 0);
        assert_eq!(d, Directive::StartProvisioning);
        assert_eq!(ctl.state(), MeshState::Provisioning);
    }

    #[test]
    fn test_provision_success_starts_first_attempt() {
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);

        let d = ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, 100);
        assert_eq!(d, Directive::Enable { attempt: 1 });
        assert_eq!(ctl.state(), MeshState::Enabling { attempt: 1 });
    }

    #[test]
    fn test_provision_failure_tears_down() {
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);

        let d = ctl.handle(MeshEvent::ProvisioningFinished { ok: false }, 100);
        assert_eq!(d, Directive::TearDown);
        assert_eq!(ctl.state(), MeshState::Disabling);
    }

    #[test]
    fn test_enable_success_brings_up() {
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);
        ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, 100);

        let d = ctl.handle(MeshEvent::EnableFinished { ok: true }, 200);
        assert_eq!(d, Directive::BringUp);
        assert_eq!(ctl.state(), MeshState::Connected);
    }

    #[test]
    fn test_enable_failures_retry_then_give_up() {
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);
        ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, 0);

        let d = ctl.handle(MeshEvent::EnableFinished { ok: false }, 100);
        assert_eq!(d, Directive::Enable { attempt: 2 });
        assert_eq!(ctl.state(), MeshState::Enabling { attempt: 2 });

        let d = ctl.handle(MeshEvent::EnableFinished { ok: false }, 200);
        assert_eq!(d, Directive::Enable { attempt: 3 });
        assert_eq!(ctl.state(), MeshState::Enabling { attempt: 3 });

        // Third consecutive failure exhausts the limit of 3
        let d = ctl.handle(MeshEvent::EnableFinished { ok: false }, 300);
        assert_eq!(d, Directive::TearDown);
        assert_eq!(ctl.state(), MeshState::Disabling);

        ctl.teardown_complete();
        assert_eq!(ctl.state(), MeshState::Idle);
    }

    #[test]
    fn test_success_resets_attempt_counter() {
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);
        ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, 0);
        ctl.handle(MeshEvent::EnableFinished { ok: false }, 100);
        ctl.handle(MeshEvent::EnableFinished { ok: true }, 200);
        assert_eq!(ctl.state(), MeshState::Connected);

        // Next trouble starts from attempt 2, not from the old count
        let d = ctl.handle(MeshEvent::RebuildFailed, 300);
        assert_eq!(d, Directive::Enable { attempt: 2 });
    }

    #[test]
    fn test_rebuild_failure_is_an_enable_failure() {
        let mut ctl = connected_controller(0);

        let d = ctl.handle(MeshEvent::RebuildFailed, 1_000);
        assert_eq!(d, Directive::Enable { attempt: 2 });
        assert_eq!(ctl.state(), MeshState::Enabling { attempt: 2 });
    }

    #[test]
    fn test_connection_lost_tears_down() {
        let mut ctl = connected_controller(0);

        let d = ctl.handle(MeshEvent::ConnectionLost, 1_000);
        assert_eq!(d, Directive::TearDown);
        assert_eq!(ctl.state(), MeshState::Disabling);
    }

    #[test]
    fn test_connection_lost_during_hung_enable_tears_down() {
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);
        ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, 0);
        assert_eq!(ctl.state(), MeshState::Enabling { attempt: 1 });

        // The enable never completed; the watchdog noticed
        let d = ctl.handle(MeshEvent::ConnectionLost, 300_000);
        assert_eq!(d, Directive::TearDown);
        assert_eq!(ctl.state(), MeshState::Disabling);
    }

    #[test]
    fn test_teardown_reachable_from_every_state() {
        // Idle
        let mut ctl = controller();
        assert_eq!(ctl.handle(MeshEvent::Teardown, 0), Directive::TearDown);
        assert_eq!(ctl.state(), MeshState::Disabling);
        ctl.teardown_complete();
        assert_eq!(ctl.state(), MeshState::Idle);

        // Provisioning
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);
        assert_eq!(ctl.handle(MeshEvent::Teardown, 0), Directive::TearDown);

        // Enabling
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);
        ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, 0);
        assert_eq!(ctl.handle(MeshEvent::Teardown, 0), Directive::TearDown);

        // Connected
        let mut ctl = connected_controller(0);
        assert_eq!(ctl.handle(MeshEvent::Teardown, 0), Directive::TearDown);

        // Disabling again is still safe
        assert_eq!(ctl.handle(MeshEvent::Teardown, 0), Directive::TearDown);
        assert_eq!(ctl.state(), MeshState::Disabling);
    }

    #[test]
    fn test_unexpected_event_is_ignored() {
        let mut ctl = controller();

        let d = ctl.handle(MeshEvent::EnableFinished { ok: true }, 0);
        assert_eq!(d, Directive::None);
        assert_eq!(ctl.state(), MeshState::Idle);

        let d = ctl.handle(MeshEvent::ConnectionLost, 0);
        assert_eq!(d, Directive::None);
        assert_eq!(ctl.state(), MeshState::Idle);
    }

    #[test]
    fn test_peer_joined_changes_nothing() {
        let addr = MacAddr::from_bytes([1, 2, 3, 4, 5, 6]);
        let mut ctl = connected_controller(0);

        let d = ctl.handle(MeshEvent::PeerJoined(addr), 1_000);
        assert_eq!(d, Directive::None);
        assert_eq!(ctl.state(), MeshState::Connected);
    }

    #[test]
    fn test_provision_poll_deadline() {
        let mut ctl = controller();
        assert!(!ctl.provision_poll_due(10_000));

        ctl.handle(MeshEvent::Initiate, 0);
        assert!(!ctl.provision_poll_due(499));
        assert!(ctl.provision_poll_due(500));
        // Re-armed relative to the expiry check
        assert!(!ctl.provision_poll_due(600));
        assert!(ctl.provision_poll_due(1_000));

        // Leaves with the state
        ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, 1_000);
        assert!(!ctl.provision_poll_due(10_000));
    }

    #[test]
    fn test_watchdog_deadline() {
        let mut ctl = controller();
        ctl.handle(MeshEvent::Initiate, 0);
        assert!(!ctl.watchdog_due(1_000_000));

        ctl.handle(MeshEvent::ProvisioningFinished { ok: true }, 0);
        assert!(!ctl.watchdog_due(299_999));
        assert!(ctl.watchdog_due(300_000));
        assert!(!ctl.watchdog_due(300_001));

        // Stays armed while connected
        ctl.handle(MeshEvent::EnableFinished { ok: true }, 400_000);
        assert!(ctl.watchdog_due(700_000));

        // Disarmed by teardown
        ctl.handle(MeshEvent::Teardown, 700_000);
        ctl.teardown_complete();
        assert!(!ctl.watchdog_due(2_000_000));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(MeshState::Idle.to_string(), "idle");
        assert_eq!(MeshState::Enabling { attempt: 2 }.to_string(), "enabling(2)");
        assert_eq!(MeshState::Connected.to_string(), "connected");
    }
}
