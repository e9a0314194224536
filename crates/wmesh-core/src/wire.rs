//! Mesh envelope framing
//!
//! This module defines the wire representation of control-plane messages.
//! An envelope is a typed view over a byte buffer; nothing outside this
//! module touches raw offsets.
//!
//! ## Envelope Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Envelope                                 │
//! ├───────────────┬──────────────────┬───────────────────────────────┤
//! │  Header (18B) │  Options region  │  User-data region             │
//! └───────────────┴──────────────────┴───────────────────────────────┘
//!
//! Header:
//! ┌───────────┬───────────┬───────────┬──────────┬──────────┬──────────┐
//! │ Dest (6B) │ Src (6B)  │ Flags(1B) │ Proto(1B)│ OptLen   │ DataLen  │
//! │           │           │           │          │ (2B LE)  │ (2B LE)  │
//! └───────────┴───────────┴───────────┴──────────┴──────────┴──────────┘
//!
//! Option:
//! ┌───────────┬───────────┬──────────────┐
//! │ Kind (1B) │ Len (1B)  │ Value (Len B)│
//! └───────────┴───────────┴──────────────┘
//! ```
//!
//! An all-zero destination address is a broadcast. Pure control messages
//! carry options but no user data.

use crate::error::MeshError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Envelope header size in bytes
pub const ENVELOPE_HEADER_LEN: usize = 18;

/// Physical node address - 6-byte MAC-style identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Broadcast address (all zero)
    pub const BROADCAST: MacAddr = MacAddr([0x00; 6]);

    /// Address length in bytes
    pub const LEN: usize = 6;

    /// Create a new address from 6 bytes
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }

    /// Create an address from a slice, if it holds exactly 6 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 6] = bytes.try_into().ok()?;
        Some(MacAddr(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({})", self)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = MeshError;

    /// Parse `aa:bb:cc:dd:ee:ff`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || MeshError::InvalidArgument(format!("bad address: {s}"));
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for slot in &mut bytes {
            let part = parts.next().ok_or_else(bad)?;
            if part.is_empty() || part.len() > 2 {
                return Err(bad());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| bad())?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(MacAddr(bytes))
    }
}

// Addresses cross the JSON boundary in their display form, not as
// byte arrays
impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Envelope flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeFlags(u8);

impl EnvelopeFlags {
    /// Empty flags
    pub const NONE: EnvelopeFlags = EnvelopeFlags(0);

    /// Bit positions
    const DIRECT_BIT: u8 = 0; // Point-to-point delivery, no mesh fan-out
    const ACK_REQUEST_BIT: u8 = 1; // Request transport-level delivery accounting

    /// Create new flags
    pub fn new() -> Self {
        EnvelopeFlags(0)
    }

    /// Check if point-to-point delivery is requested
    pub fn direct(&self) -> bool {
        (self.0 & (1 << Self::DIRECT_BIT)) != 0
    }

    /// Set the direct flag
    pub fn set_direct(&mut self, value: bool) {
        if value {
            self.0 |= 1 << Self::DIRECT_BIT;
        } else {
            self.0 &= !(1 << Self::DIRECT_BIT);
        }
    }

    /// Check if delivery accounting is requested
    pub fn ack_request(&self) -> bool {
        (self.0 & (1 << Self::ACK_REQUEST_BIT)) != 0
    }

    /// Set the ack_request flag
    pub fn set_ack_request(&mut self, value: bool) {
        if value {
            self.0 |= 1 << Self::ACK_REQUEST_BIT;
        } else {
            self.0 &= !(1 << Self::ACK_REQUEST_BIT);
        }
    }

    /// Get the raw byte value
    pub fn as_byte(&self) -> u8 {
        self.0
    }

    /// Create from raw byte
    pub fn from_byte(byte: u8) -> Self {
        EnvelopeFlags(byte)
    }
}

impl Default for EnvelopeFlags {
    fn default() -> Self {
        EnvelopeFlags::NONE
    }
}

/// Protocol identifiers carried in the envelope header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolId {
    /// Pure control traffic (topology discovery and the like)
    Control = 0x00,
    /// HTTP-framed user data
    Http = 0x01,
    /// JSON-framed user data
    Json = 0x02,
    /// MQTT-framed user data
    Mqtt = 0x03,
    /// Raw binary user data
    Bin = 0x04,
}

impl ProtocolId {
    /// Create from byte value
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ProtocolId::Control),
            0x01 => Some(ProtocolId::Http),
            0x02 => Some(ProtocolId::Json),
            0x03 => Some(ProtocolId::Mqtt),
            0x04 => Some(ProtocolId::Bin),
            _ => None,
        }
    }

    /// Get the raw byte value
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

/// Option kinds carried in the options region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OptionKind {
    /// Congestion query
    CongestRequest = 0x00,
    /// Congestion answer
    CongestResponse = 0x01,
    /// Topology discovery query (empty value)
    TopologyRequest = 0x02,
    /// Topology answer: value is a run of 6-byte addresses
    TopologyResponse = 0x03,
}

impl OptionKind {
    /// Create from byte value
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(OptionKind::CongestRequest),
            0x01 => Some(OptionKind::CongestResponse),
            0x02 => Some(OptionKind::TopologyRequest),
            0x03 => Some(OptionKind::TopologyResponse),
            _ => None,
        }
    }

    /// Get the raw byte value
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }
}

/// A single decoded option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshOption<'a> {
    /// Raw option kind byte
    pub kind: u8,
    /// Option value bytes
    pub value: &'a [u8],
}

impl<'a> MeshOption<'a> {
    /// Check the option kind
    pub fn is(&self, kind: OptionKind) -> bool {
        self.kind == kind.as_byte()
    }
}

/// Typed read-only view over an envelope byte buffer
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    buf: &'a [u8],
    opts_len: usize,
    data_len: usize,
}

impl<'a> Envelope<'a> {
    /// Parse an envelope from raw bytes.
    ///
    /// Returns `None` when the buffer is shorter than the header or the
    /// declared option/data regions run past the end of the buffer.
    /// Trailing bytes beyond the declared regions are tolerated.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < ENVELOPE_HEADER_LEN {
            return None;
        }
        let opts_len = u16::from_le_bytes([buf[14], buf[15]]) as usize;
        let data_len = u16::from_le_bytes([buf[16], buf[17]]) as usize;
        if ENVELOPE_HEADER_LEN + opts_len + data_len > buf.len() {
            return None;
        }
        Some(Self {
            buf,
            opts_len,
            data_len,
        })
    }

    /// Destination address
    pub fn dst(&self) -> MacAddr {
        MacAddr::from_slice(&self.buf[0..6]).unwrap_or(MacAddr::BROADCAST)
    }

    /// Source address
    pub fn src(&self) -> MacAddr {
        MacAddr::from_slice(&self.buf[6..12]).unwrap_or(MacAddr::BROADCAST)
    }

    /// Envelope flags
    pub fn flags(&self) -> EnvelopeFlags {
        EnvelopeFlags::from_byte(self.buf[12])
    }

    /// Raw protocol identifier byte
    pub fn protocol_raw(&self) -> u8 {
        self.buf[13]
    }

    /// Protocol identifier, if the byte value is a known protocol
    pub fn protocol(&self) -> Option<ProtocolId> {
        ProtocolId::from_byte(self.protocol_raw())
    }

    /// Iterate over the options region
    pub fn options(&self) -> OptionIter<'a> {
        let start = ENVELOPE_HEADER_LEN;
        OptionIter {
            region: &self.buf[start..start + self.opts_len],
        }
    }

    /// Get the `index`-th option of the given kind, if present
    pub fn option(&self, kind: OptionKind, index: usize) -> Option<MeshOption<'a>> {
        self.options().filter(|o| o.is(kind)).nth(index)
    }

    /// User-data region, or `None` when the envelope carries no data
    /// section (pure control messages)
    pub fn user_data(&self) -> Option<&'a [u8]> {
        if self.data_len == 0 {
            return None;
        }
        let start = ENVELOPE_HEADER_LEN + self.opts_len;
        Some(&self.buf[start..start + self.data_len])
    }

    /// The complete envelope bytes, header included
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    /// Total envelope length in bytes (declared regions only)
    pub fn len(&self) -> usize {
        ENVELOPE_HEADER_LEN + self.opts_len + self.data_len
    }

    /// An envelope is never empty; the header alone is 18 bytes
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Iterator over the options region of an envelope
#[derive(Debug, Clone)]
pub struct OptionIter<'a> {
    region: &'a [u8],
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = MeshOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // Stop cleanly at a truncated trailing option
        if self.region.len() < 2 {
            return None;
        }
        let kind = self.region[0];
        let len = self.region[1] as usize;
        if self.region.len() < 2 + len {
            self.region = &[];
            return None;
        }
        let value = &self.region[2..2 + len];
        self.region = &self.region[2 + len..];
        Some(MeshOption { kind, value })
    }
}

/// Builder for envelope byte buffers
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    dst: MacAddr,
    src: MacAddr,
    flags: EnvelopeFlags,
    protocol: u8,
    options: Vec<(u8, Vec<u8>)>,
    user_data: Vec<u8>,
}

impl EnvelopeBuilder {
    /// Maximum length of a single option value in bytes
    pub const MAX_OPTION_VALUE: usize = 255;

    /// Create a builder for a message from `src` to `dst`
    pub fn new(dst: MacAddr, src: MacAddr) -> Self {
        Self {
            dst,
            src,
            flags: EnvelopeFlags::new(),
            protocol: ProtocolId::Control.as_byte(),
            options: Vec::new(),
            user_data: Vec::new(),
        }
    }

    /// Set the protocol identifier
    pub fn protocol(mut self, protocol: ProtocolId) -> Self {
        self.protocol = protocol.as_byte();
        self
    }

    /// Set the envelope flags
    pub fn flags(mut self, flags: EnvelopeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Request point-to-point delivery
    pub fn direct(mut self, value: bool) -> Self {
        self.flags.set_direct(value);
        self
    }

    /// Request transport-level delivery accounting
    pub fn ack_request(mut self, value: bool) -> Self {
        self.flags.set_ack_request(value);
        self
    }

    /// Append an option. Values longer than [`Self::MAX_OPTION_VALUE`]
    /// are truncated to fit the one-byte length field.
    pub fn option(mut self, kind: OptionKind, value: &[u8]) -> Self {
        let take = value.len().min(Self::MAX_OPTION_VALUE);
        self.options.push((kind.as_byte(), value[..take].to_vec()));
        self
    }

    /// Set the user-data region
    pub fn user_data(mut self, data: &[u8]) -> Self {
        self.user_data = data.to_vec();
        self
    }

    /// Serialize to a byte buffer. Always produces a parseable envelope.
    pub fn build(&self) -> Vec<u8> {
        let opts_len: usize = self.options.iter().map(|(_, v)| 2 + v.len()).sum();
        let mut bytes = Vec::with_capacity(ENVELOPE_HEADER_LEN + opts_len + self.user_data.len());
        bytes.extend_from_slice(self.dst.as_bytes());
        bytes.extend_from_slice(self.src.as_bytes());
        bytes.push(self.flags.as_byte());
        bytes.push(self.protocol);
        bytes.extend_from_slice(&(opts_len as u16).to_le_bytes());
        bytes.extend_from_slice(&(self.user_data.len() as u16).to_le_bytes());
        for (kind, value) in &self.options {
            bytes.push(*kind);
            bytes.push(value.len() as u8);
            bytes.extend_from_slice(value);
        }
        bytes.extend_from_slice(&self.user_data);
        bytes
    }
}
