//! Inbound message dispatch
//!
//! Every frame the transport delivers passes through here once. The
//! dispatcher resolves the envelope's protocol identifier, extracts the
//! logical payload, and scans a read-only table for the one handler
//! registered for that protocol. Anything unresolvable is dropped with
//! a diagnostic; a bad frame never disturbs the node.

use crate::wire::{Envelope, ProtocolId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Handlers a dispatch table can route to. The control configuration
/// registers exactly one: the topology-response handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Topology discovery response processing
    Topology,
}

/// One row of the dispatch table. `handler: None` marks a protocol
/// that is recognized but has no implementation wired in.
#[derive(Debug, Clone, Copy)]
pub struct DispatchEntry {
    /// Protocol this row matches
    pub protocol: ProtocolId,
    /// Handler to invoke, if any
    pub handler: Option<HandlerKind>,
}

/// Why a frame was dropped instead of delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Envelope bytes did not parse; no protocol could be resolved
    Malformed,
    /// Protocol identifier matches no table row
    Unsupported(u8),
    /// Protocol is registered but its handler slot is empty
    Unimplemented(u8),
}

/// Dispatch decision for one inbound frame
#[derive(Debug, Clone, Copy)]
pub enum DispatchOutcome<'a> {
    /// Invoke `handler` exactly once with the envelope and payload
    Deliver {
        /// Selected handler
        handler: HandlerKind,
        /// Parsed envelope view
        envelope: Envelope<'a>,
        /// Logical payload: the user-data region, or the whole raw
        /// envelope for pure control messages
        payload: &'a [u8],
    },
    /// Frame dropped; nothing may be invoked
    Drop(DropReason),
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Frames handed to a handler
    pub delivered: u64,
    /// Frames dropped because the envelope did not parse
    pub dropped_malformed: u64,
    /// Frames dropped for an unregistered protocol
    pub dropped_unsupported: u64,
    /// Frames dropped for a registered protocol with no handler
    pub dropped_unimplemented: u64,
}

/// Protocol-id router over a read-only dispatch table
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Vec<DispatchEntry>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher with the control configuration's table:
    /// the control protocol routed to the topology handler.
    pub fn new() -> Self {
        Self::with_table(vec![DispatchEntry {
            protocol: ProtocolId::Control,
            handler: Some(HandlerKind::Topology),
        }])
    }

    /// Create a dispatcher over a custom table. The table is fixed for
    /// the dispatcher's lifetime.
    pub fn with_table(table: Vec<DispatchEntry>) -> Self {
        Self {
            table,
            stats: DispatchStats::default(),
        }
    }

    /// Classify one inbound frame.
    ///
    /// The caller invokes the selected handler exactly once on
    /// [`DispatchOutcome::Deliver`] and does nothing on
    /// [`DispatchOutcome::Drop`].
    pub fn classify<'a>(&mut self, raw: &'a [u8]) -> DispatchOutcome<'a> {
        let envelope = match Envelope::parse(raw) {
            Some(env) => env,
            None => {
                warn!(len = raw.len(), "dropping frame with unreadable envelope");
                self.stats.dropped_malformed += 1;
                return DispatchOutcome::Drop(DropReason::Malformed);
            }
        };

        // Pure control messages carry no user-data region; the raw
        // envelope stands in as the payload.
        let payload = envelope.user_data().unwrap_or(raw);
        let protocol = envelope.protocol_raw();

        for entry in &self.table {
            if entry.protocol.as_byte() == protocol {
                return match entry.handler {
                    Some(handler) => {
                        self.stats.delivered += 1;
                        DispatchOutcome::Deliver {
                            handler,
                            envelope,
                            payload,
                        }
                    }
                    None => {
                        warn!(protocol, "dropping frame: protocol registered without handler");
                        self.stats.dropped_unimplemented += 1;
                        DispatchOutcome::Drop(DropReason::Unimplemented(protocol))
                    }
                };
            }
        }

        warn!(protocol, "dropping frame: protocol not supported");
        self.stats.dropped_unsupported += 1;
        DispatchOutcome::Drop(DropReason::Unsupported(protocol))
    }

    /// Dispatch counters
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{EnvelopeBuilder, MacAddr, OptionKind};

    fn addr(last: u8) -> MacAddr {
        MacAddr::from_bytes([0, 0, 0, 0, 0, last])
    }

    fn control_frame() -> Vec<u8> {
        EnvelopeBuilder::new(MacAddr::BROADCAST, addr(1))
            .protocol(ProtocolId::Control)
            .option(OptionKind::TopologyRequest, &[])
            .build()
    }

    #[test]
    fn test_control_frame_routed_to_topology() {
        let mut dispatcher = Dispatcher::new();
        let frame = control_frame();

        match dispatcher.classify(&frame) {
            DispatchOutcome::Deliver {
                handler, payload, ..
            } => {
                assert_eq!(handler, HandlerKind::Topology);
                // No user-data region: the raw envelope is the payload
                assert_eq!(payload, &frame[..]);
            }
            other => panic!("expected delivery, got {:?}", other),
        }
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[test]
    fn test_user_data_extracted_as_payload() {
        let mut dispatcher = Dispatcher::with_table(vec![DispatchEntry {
            protocol: ProtocolId::Json,
            handler: Some(HandlerKind::Topology),
        }]);
        let frame = EnvelopeBuilder::new(addr(2), addr(1))
            .protocol(ProtocolId::Json)
            .user_data(b"payload")
            .build();

        match dispatcher.classify(&frame) {
            DispatchOutcome::Deliver { payload, .. } => assert_eq!(payload, b"payload"),
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_protocol_dropped() {
        let mut dispatcher = Dispatcher::new();
        let frame = EnvelopeBuilder::new(addr(2), addr(1))
            .protocol(ProtocolId::Http)
            .user_data(b"GET /")
            .build();

        match dispatcher.classify(&frame) {
            DispatchOutcome::Drop(DropReason::Unsupported(p)) => {
                assert_eq!(p, ProtocolId::Http.as_byte());
            }
            other => panic!("expected unsupported drop, got {:?}", other),
        }
        assert_eq!(dispatcher.stats().dropped_unsupported, 1);
        assert_eq!(dispatcher.stats().delivered, 0);
    }

    #[test]
    fn test_registered_protocol_without_handler_dropped() {
        let mut dispatcher = Dispatcher::with_table(vec![DispatchEntry {
            protocol: ProtocolId::Control,
            handler: None,
        }]);
        let frame = control_frame();

        match dispatcher.classify(&frame) {
            DispatchOutcome::Drop(DropReason::Unimplemented(p)) => {
                assert_eq!(p, ProtocolId::Control.as_byte());
            }
            other => panic!("expected unimplemented drop, got {:?}", other),
        }
        assert_eq!(dispatcher.stats().dropped_unimplemented, 1);
    }

    #[test]
    fn test_unreadable_envelope_dropped() {
        let mut dispatcher = Dispatcher::new();
        match dispatcher.classify(&[0x00, 0x01, 0x02]) {
            DispatchOutcome::Drop(DropReason::Malformed) => {}
            other => panic!("expected malformed drop, got {:?}", other),
        }
        assert_eq!(dispatcher.stats().dropped_malformed, 1);
    }

    #[test]
    fn test_first_matching_row_wins() {
        // Two rows for the same protocol: only the first is consulted
        let mut dispatcher = Dispatcher::with_table(vec![
            DispatchEntry {
                protocol: ProtocolId::Control,
                handler: None,
            },
            DispatchEntry {
                protocol: ProtocolId::Control,
                handler: Some(HandlerKind::Topology),
            },
        ]);

        match dispatcher.classify(&control_frame()) {
            DispatchOutcome::Drop(DropReason::Unimplemented(_)) => {}
            other => panic!("expected unimplemented drop, got {:?}", other),
        }
    }
}
