//! Fault taxonomy for register-space access and request dispatch.

use thiserror::Error;

/// Stable one-byte fault codes carried inside error-sentinel responses.
///
/// The dispatch boundary never propagates an internal fault to the peer;
/// it answers with one of these codes instead, so the peer's reply read
/// can never stall on a request that failed server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum FaultCode {
    /// Request touched an address outside the provisioned window.
    #[error("address outside the provisioned register window")]
    AddressOutOfRange = 0x01,
    /// Request frame carried an opcode outside the dispatch table.
    #[error("unknown request opcode")]
    UnknownOpcode = 0x02,
    /// Request frame body failed to decode or exceeded block limits.
    #[error("malformed request")]
    MalformedRequest = 0x03,
    /// Data request arrived before the controller was instantiated.
    #[error("no memory controller instantiated on the server")]
    NoController = 0x04,
    /// Any other fault raised while servicing the request.
    #[error("internal fault while servicing the request")]
    Internal = 0x05,
}

impl FaultCode {
    /// Converts a fault code to its stable wire byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable wire byte back into a fault code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::AddressOutOfRange),
            0x02 => Some(Self::UnknownOpcode),
            0x03 => Some(Self::MalformedRequest),
            0x04 => Some(Self::NoController),
            0x05 => Some(Self::Internal),
            _ => None,
        }
    }
}

/// Faults raised by register-space and controller primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// Address lies outside the provisioned register window.
    #[error("address {addr:#010x} is outside the register window")]
    AddressOutOfRange {
        /// Offending absolute address.
        addr: u32,
    },
    /// A command-word field value does not fit its bit width.
    #[error("{field} value {value} does not fit {bits} bits")]
    FieldRange {
        /// Field name as spelled in the command-word layout.
        field: &'static str,
        /// Rejected value.
        value: u32,
        /// Width of the field in bits.
        bits: u8,
    },
    /// Block operation asked for more words than a reply frame can carry.
    #[error("block of {count} words exceeds the reply frame budget")]
    BlockTooLarge {
        /// Requested word count.
        count: u32,
    },
    /// The ingress channel was torn down while an operation waited on it.
    #[error("ingress channel is closed")]
    ChannelClosed,
}

impl Fault {
    /// Maps an internal fault to the stable code sent in the sentinel reply.
    #[must_use]
    pub const fn code(self) -> FaultCode {
        match self {
            Self::AddressOutOfRange { .. } => FaultCode::AddressOutOfRange,
            Self::FieldRange { .. } | Self::BlockTooLarge { .. } => FaultCode::MalformedRequest,
            Self::ChannelClosed => FaultCode::Internal,
        }
    }
}
