//! Provisioning interface
//!
//! Credential acquisition (smart-configuration) is an external
//! collaborator. The lifecycle controller starts it, then polls for a
//! terminal verdict on its provision-poll deadline; the exchange itself
//! happens elsewhere.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Provisioning collaborator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisionStatus {
    /// Not started
    Idle,
    /// Credential exchange in progress
    Running,
    /// Credentials acquired
    Succeeded,
    /// Exchange gave up
    Failed,
}

impl ProvisionStatus {
    /// Check if the exchange is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self, ProvisionStatus::Running)
    }

    /// Check if a verdict has been reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisionStatus::Succeeded | ProvisionStatus::Failed)
    }
}

/// Contract the control plane depends on from the provisioning
/// collaborator
pub trait Provisioner {
    /// Begin the credential exchange
    fn start(&mut self) -> Result<()>;

    /// Report the current state; called on every provision-poll tick
    fn poll(&mut self) -> ProvisionStatus;

    /// Abandon the exchange and return to [`ProvisionStatus::Idle`]
    fn stop(&mut self);
}

/// Scripted provisioner for tests and simulation: reaches its verdict
/// after a configurable number of polls
#[derive(Debug, Clone)]
pub struct SimProvisioner {
    status: ProvisionStatus,
    polls_to_finish: u32,
    remaining: u32,
    succeed: bool,
}

impl SimProvisioner {
    /// Create a provisioner that succeeds on the first poll
    pub fn new() -> Self {
        Self {
            status: ProvisionStatus::Idle,
            polls_to_finish: 1,
            remaining: 0,
            succeed: true,
        }
    }

    /// Require `polls` poll calls before the verdict
    pub fn with_polls(mut self, polls: u32) -> Self {
        self.polls_to_finish = polls.max(1);
        self
    }

    /// Script a failed exchange
    pub fn failing(mut self) -> Self {
        self.succeed = false;
        self
    }
}

impl Default for SimProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Provisioner for SimProvisioner {
    fn start(&mut self) -> Result<()> {
        self.status = ProvisionStatus::Running;
        self.remaining = self.polls_to_finish;
        Ok(())
    }

    fn poll(&mut self) -> ProvisionStatus {
        if self.status == ProvisionStatus::Running {
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.status = if self.succeed {
                    ProvisionStatus::Succeeded
                } else {
                    ProvisionStatus::Failed
                };
            }
        }
        self.status
    }

    fn stop(&mut self) {
        self.status = ProvisionStatus::Idle;
        self.remaining = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_before_start() {
        let mut p = SimProvisioner::new();
        assert_eq!(p.poll(), ProvisionStatus::Idle);
    }

    #[test]
    fn test_success_after_polls() {
        let mut p = SimProvisioner::new().with_polls(3);
        p.start().unwrap();
        assert_eq!(p.poll(), ProvisionStatus::Running);
        assert_eq!(p.poll(), ProvisionStatus::Running);
        assert_eq!(p.poll(), ProvisionStatus::Succeeded);
        assert!(p.poll().is_terminal());
    }

    #[test]
    fn test_failure_verdict() {
        let mut p = SimProvisioner::new().failing();
        p.start().unwrap();
        assert_eq!(p.poll(), ProvisionStatus::Failed);
    }

    #[test]
    fn test_stop_resets() {
        let mut p = SimProvisioner::new().with_polls(5);
        p.start().unwrap();
        p.poll();
        p.stop();
        assert_eq!(p.poll(), ProvisionStatus::Idle);
    }
}
