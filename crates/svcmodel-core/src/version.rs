//! Envelope and addressing versions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants;

/// SOAP envelope version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeVersion {
    /// No envelope (plain payloads)
    None,
    /// SOAP 1.1
    Soap11,
    /// SOAP 1.2
    Soap12,
}

impl EnvelopeVersion {
    /// Envelope namespace, empty for [`EnvelopeVersion::None`]
    pub fn namespace(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Soap11 => constants::SOAP11_NAMESPACE,
            Self::Soap12 => constants::SOAP12_NAMESPACE,
        }
    }

    /// Local name of the fault code blaming the sender
    pub fn sender_fault_name(self) -> &'static str {
        match self {
            Self::Soap11 => "Client",
            _ => "Sender",
        }
    }

    /// Local name of the fault code blaming the receiver
    pub fn receiver_fault_name(self) -> &'static str {
        match self {
            Self::Soap11 => "Server",
            _ => "Receiver",
        }
    }
}

/// WS-Addressing version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressingVersion {
    /// No addressing headers are written
    None,
    /// WS-Addressing August 2004 submission
    WsAddressingAugust2004,
    /// WS-Addressing 1.0
    WsAddressing10,
}

impl AddressingVersion {
    /// Addressing namespace, empty for [`AddressingVersion::None`]
    pub fn namespace(self) -> &'static str {
        match self {
            Self::None => "",
            Self::WsAddressingAugust2004 => constants::WSA_AUGUST2004_NAMESPACE,
            Self::WsAddressing10 => constants::WSA10_NAMESPACE,
        }
    }

    /// Anonymous reply address
    pub fn anonymous_uri(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::WsAddressingAugust2004 => Some(constants::WSA_AUGUST2004_ANONYMOUS),
            Self::WsAddressing10 => Some(constants::WSA10_ANONYMOUS),
        }
    }

    /// Action used on faults that have no contract-specific action
    pub fn default_fault_action(self) -> &'static str {
        match self {
            Self::None | Self::WsAddressing10 => constants::WSA10_FAULT_ACTION,
            Self::WsAddressingAugust2004 => constants::WSA_AUGUST2004_FAULT_ACTION,
        }
    }
}

/// Combination of envelope and addressing versions used by a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageVersion {
    /// Envelope version
    pub envelope: EnvelopeVersion,
    /// Addressing version
    pub addressing: AddressingVersion,
}

impl MessageVersion {
    /// No envelope, no addressing
    pub const NONE: Self = Self::new(EnvelopeVersion::None, AddressingVersion::None);
    /// SOAP 1.1 without addressing (basic HTTP)
    pub const SOAP11: Self = Self::new(EnvelopeVersion::Soap11, AddressingVersion::None);
    /// SOAP 1.2 without addressing
    pub const SOAP12: Self = Self::new(EnvelopeVersion::Soap12, AddressingVersion::None);
    /// SOAP 1.1 with WS-Addressing 1.0
    pub const SOAP11_WSADDRESSING10: Self =
        Self::new(EnvelopeVersion::Soap11, AddressingVersion::WsAddressing10);
    /// SOAP 1.2 with WS-Addressing 1.0
    pub const SOAP12_WSADDRESSING10: Self =
        Self::new(EnvelopeVersion::Soap12, AddressingVersion::WsAddressing10);
    /// SOAP 1.2 with WS-Addressing August 2004
    pub const SOAP12_WSADDRESSING_AUGUST2004: Self =
        Self::new(EnvelopeVersion::Soap12, AddressingVersion::WsAddressingAugust2004);

    /// Combine an envelope and an addressing version
    pub const fn new(envelope: EnvelopeVersion, addressing: AddressingVersion) -> Self {
        Self {
            envelope,
            addressing,
        }
    }

    /// Whether addressing headers (`To`, `MessageID`, `ReplyTo`) are written
    pub fn has_addressing(self) -> bool {
        self.addressing != AddressingVersion::None
    }
}

impl Default for MessageVersion {
    fn default() -> Self {
        Self::SOAP12_WSADDRESSING10
    }
}

impl fmt::Display for MessageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?}", self.envelope, self.addressing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_code_names_follow_envelope() {
        assert_eq!(EnvelopeVersion::Soap11.sender_fault_name(), "Client");
        assert_eq!(EnvelopeVersion::Soap12.sender_fault_name(), "Sender");
        assert_eq!(EnvelopeVersion::Soap11.receiver_fault_name(), "Server");
        assert_eq!(EnvelopeVersion::Soap12.receiver_fault_name(), "Receiver");
    }

    #[test]
    fn addressing_presence() {
        assert!(!MessageVersion::SOAP11.has_addressing());
        assert!(MessageVersion::default().has_addressing());
        assert_eq!(
            MessageVersion::SOAP12_WSADDRESSING10.addressing.anonymous_uri(),
            Some(constants::WSA10_ANONYMOUS)
        );
    }
}
