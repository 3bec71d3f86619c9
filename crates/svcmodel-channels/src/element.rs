//! Binding elements: one value per protocol layer.
//!
//! A binding is an ordered list of these, outermost first:
//!
//! ```text
//! [reliable session] → [security] → encoding → [stream upgrade] → transport
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use svcmodel_core::{Error, MessageVersion, Result, constants};

use crate::encoder::{BinaryMessageEncoder, MessageEncoder, MtomMessageEncoder, TextMessageEncoder};
use crate::transport::TransportFactoryProvider;

/// One protocol layer.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingElement {
    /// Message-level security
    Security(SecurityBindingElement),
    /// WS-ReliableMessaging session
    ReliableSession(ReliableSessionBindingElement),
    /// Message encoding
    Encoding(MessageEncodingBindingElement),
    /// Stream security upgrade below the encoder
    StreamUpgrade(StreamUpgradeBindingElement),
    /// Transport, always last
    Transport(TransportBindingElement),
}

impl BindingElement {
    /// Short layer name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Security(_) => "security",
            Self::ReliableSession(_) => "reliable-session",
            Self::Encoding(_) => "encoding",
            Self::StreamUpgrade(_) => "stream-upgrade",
            Self::Transport(_) => "transport",
        }
    }
}

/// Message security flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityElementKind {
    /// Both sides sign with X.509 certificates
    MutualCertificate,
    /// Client certificate inside an already secured transport
    CertificateOverTransport,
    /// User name token inside an already secured transport
    UserNameOverTransport,
    /// User name token protected with the service certificate
    UserNameForCertificate,
    /// Anonymous client, service certificate
    AnonymousForCertificate,
    /// SPNEGO negotiated Windows credentials
    SspiNegotiation,
}

/// Kind of token a security layer needs from the client credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    /// User name and password
    UserName,
    /// X.509 certificate
    Certificate,
    /// Windows identity
    Windows,
}

/// Message-level security layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityBindingElement {
    /// Flavour
    pub kind: SecurityElementKind,
    /// Whether a timestamp accompanies the token
    pub include_timestamp: bool,
}

impl SecurityBindingElement {
    /// Layer of `kind` with a timestamp
    pub fn new(kind: SecurityElementKind) -> Self {
        Self {
            kind,
            include_timestamp: true,
        }
    }

    /// Token the client must present, `None` for anonymous clients
    pub fn required_token(&self) -> Option<TokenKind> {
        match self.kind {
            SecurityElementKind::MutualCertificate
            | SecurityElementKind::CertificateOverTransport => Some(TokenKind::Certificate),
            SecurityElementKind::UserNameOverTransport
            | SecurityElementKind::UserNameForCertificate => Some(TokenKind::UserName),
            SecurityElementKind::SspiNegotiation => Some(TokenKind::Windows),
            SecurityElementKind::AnonymousForCertificate => None,
        }
    }
}

/// Reliable session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableSessionBindingElement {
    /// In-order delivery
    pub ordered: bool,
    /// Session inactivity timeout
    pub inactivity_timeout: std::time::Duration,
}

/// Limits applied while reading message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderQuotas {
    /// Maximum nesting depth
    pub max_depth: usize,
    /// Maximum length of a single string
    pub max_string_content_length: usize,
    /// Maximum number of items in an array
    pub max_array_length: usize,
}

impl Default for ReaderQuotas {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_string_content_length: 8192,
            max_array_length: 16384,
        }
    }
}

impl ReaderQuotas {
    /// No limits
    pub fn unlimited() -> Self {
        Self {
            max_depth: usize::MAX,
            max_string_content_length: usize::MAX,
            max_array_length: usize::MAX,
        }
    }

    /// Check a decoded value against the quotas
    pub fn check(&self, value: &serde_json::Value) -> Result<()> {
        self.check_at(value, 1)
    }

    fn check_at(&self, value: &serde_json::Value, depth: usize) -> Result<()> {
        use serde_json::Value;

        if depth > self.max_depth {
            return Err(Error::QuotaExceeded {
                what: "Nesting depth",
                size: depth,
                max: self.max_depth,
            });
        }
        match value {
            Value::String(s) if s.len() > self.max_string_content_length => {
                Err(Error::QuotaExceeded {
                    what: "String content",
                    size: s.len(),
                    max: self.max_string_content_length,
                })
            }
            Value::Array(items) => {
                if items.len() > self.max_array_length {
                    return Err(Error::QuotaExceeded {
                        what: "Array length",
                        size: items.len(),
                        max: self.max_array_length,
                    });
                }
                items.iter().try_for_each(|v| self.check_at(v, depth + 1))
            }
            Value::Object(map) => map.values().try_for_each(|v| self.check_at(v, depth + 1)),
            _ => Ok(()),
        }
    }
}

/// Encoding format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodingKind {
    /// Text envelope
    Text,
    /// MTOM multipart envelope
    Mtom,
    /// Compact binary envelope
    Binary,
}

/// Message encoding layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEncodingBindingElement {
    /// Format
    pub kind: EncodingKind,
    /// Envelope and addressing versions written by the encoder
    pub message_version: MessageVersion,
    /// Reader quotas
    pub reader_quotas: ReaderQuotas,
}

impl MessageEncodingBindingElement {
    /// Text encoding for `version`
    pub fn text(message_version: MessageVersion) -> Self {
        Self {
            kind: EncodingKind::Text,
            message_version,
            reader_quotas: ReaderQuotas::default(),
        }
    }

    /// MTOM encoding for `version`
    pub fn mtom(message_version: MessageVersion) -> Self {
        Self {
            kind: EncodingKind::Mtom,
            message_version,
            reader_quotas: ReaderQuotas::default(),
        }
    }

    /// Binary encoding for `version`
    pub fn binary(message_version: MessageVersion) -> Self {
        Self {
            kind: EncodingKind::Binary,
            message_version,
            reader_quotas: ReaderQuotas::default(),
        }
    }

    /// Set the reader quotas
    pub fn with_reader_quotas(mut self, reader_quotas: ReaderQuotas) -> Self {
        self.reader_quotas = reader_quotas;
        self
    }

    /// Build the encoder for this layer
    pub fn create_encoder(&self) -> Arc<dyn MessageEncoder> {
        match self.kind {
            EncodingKind::Text => Arc::new(TextMessageEncoder::new(
                self.message_version,
                self.reader_quotas,
            )),
            EncodingKind::Mtom => Arc::new(MtomMessageEncoder::new(
                self.message_version,
                self.reader_quotas,
            )),
            EncodingKind::Binary => Arc::new(BinaryMessageEncoder::new(
                self.message_version,
                self.reader_quotas,
            )),
        }
    }
}

impl Default for MessageEncodingBindingElement {
    fn default() -> Self {
        Self::text(MessageVersion::default())
    }
}

/// Stream security applied beneath the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamUpgradeBindingElement {
    /// SPNEGO over the stream
    WindowsStreamSecurity,
    /// TLS over the stream
    SslStreamSecurity {
        /// Whether the client must present a certificate
        require_client_certificate: bool,
    },
}

/// HTTP authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthenticationScheme {
    /// No authentication
    Anonymous,
    /// RFC 7617 basic
    Basic,
    /// RFC 7616 digest
    Digest,
    /// NTLM
    Ntlm,
    /// SPNEGO (Kerberos or NTLM)
    Negotiate,
}

/// Buffered or streamed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferMode {
    /// Whole messages are buffered
    #[default]
    Buffered,
    /// Both directions are streamed
    Streamed,
    /// Requests are streamed
    StreamedRequest,
    /// Responses are streamed
    StreamedResponse,
}

/// Limits shared by every connection-oriented transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportQuotas {
    /// Largest message accepted
    pub max_received_message_size: usize,
    /// Largest buffered message
    pub max_buffer_size: usize,
    /// Size of the buffer pool
    pub max_buffer_pool_size: usize,
}

impl Default for TransportQuotas {
    fn default() -> Self {
        Self {
            max_received_message_size: constants::DEFAULT_MAX_RECEIVED_MESSAGE_SIZE,
            max_buffer_size: constants::DEFAULT_MAX_RECEIVED_MESSAGE_SIZE,
            max_buffer_pool_size: constants::DEFAULT_MAX_BUFFER_POOL_SIZE,
        }
    }
}

impl TransportQuotas {
    /// Fail if `size` exceeds the received-message quota
    pub fn check_received(&self, size: usize) -> Result<()> {
        if size > self.max_received_message_size {
            return Err(Error::QuotaExceeded {
                what: "Received message",
                size,
                max: self.max_received_message_size,
            });
        }
        Ok(())
    }
}

/// HTTP transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpTransportBindingElement {
    /// Authentication scheme
    pub authentication_scheme: AuthenticationScheme,
    /// Realm for basic and digest
    pub realm: String,
    /// Quotas
    pub quotas: TransportQuotas,
    /// Transfer mode
    pub transfer_mode: TransferMode,
    /// Keep connections alive between requests
    pub keep_alive_enabled: bool,
    /// Keep cookies between requests
    pub allow_cookies: bool,
    /// Bypass the proxy for local addresses
    pub bypass_proxy_on_local: bool,
    /// Use the system proxy
    pub use_default_web_proxy: bool,
}

impl Default for HttpTransportBindingElement {
    fn default() -> Self {
        Self {
            authentication_scheme: AuthenticationScheme::Anonymous,
            realm: String::new(),
            quotas: TransportQuotas::default(),
            transfer_mode: TransferMode::Buffered,
            keep_alive_enabled: true,
            allow_cookies: false,
            bypass_proxy_on_local: false,
            use_default_web_proxy: true,
        }
    }
}

/// HTTPS transport layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpsTransportBindingElement {
    /// Shared HTTP settings
    pub http: HttpTransportBindingElement,
    /// Whether a client certificate is presented
    pub require_client_certificate: bool,
}

/// TCP transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpTransportBindingElement {
    /// Quotas
    pub quotas: TransportQuotas,
    /// Transfer mode
    pub transfer_mode: TransferMode,
    /// Share the port with other listeners
    pub port_sharing_enabled: bool,
    /// Pending-connection backlog
    pub listen_backlog: u32,
    /// Pooled connections per endpoint
    pub max_pending_connections: u32,
}

impl Default for TcpTransportBindingElement {
    fn default() -> Self {
        Self {
            quotas: TransportQuotas::default(),
            transfer_mode: TransferMode::Buffered,
            port_sharing_enabled: false,
            listen_backlog: 10,
            max_pending_connections: 10,
        }
    }
}

/// In-process transport layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemoryTransportBindingElement {
    /// Quotas
    pub quotas: TransportQuotas,
}

/// Transport supplied by the application.
#[derive(Clone)]
pub struct CustomTransportBindingElement {
    /// Scheme served by the provider
    pub scheme: String,
    /// Factory source
    pub provider: Arc<dyn TransportFactoryProvider>,
}

impl fmt::Debug for CustomTransportBindingElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomTransportBindingElement")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomTransportBindingElement {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme && Arc::ptr_eq(&self.provider, &other.provider)
    }
}

/// Transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportBindingElement {
    /// `http`
    Http(HttpTransportBindingElement),
    /// `https`
    Https(HttpsTransportBindingElement),
    /// `net.tcp`
    Tcp(TcpTransportBindingElement),
    /// `memory`
    Memory(MemoryTransportBindingElement),
    /// Application supplied
    Custom(CustomTransportBindingElement),
}

impl TransportBindingElement {
    /// URI scheme this transport serves
    pub fn scheme(&self) -> &str {
        match self {
            Self::Http(_) => "http",
            Self::Https(_) => "https",
            Self::Tcp(_) => "net.tcp",
            Self::Memory(_) => "memory",
            Self::Custom(c) => &c.scheme,
        }
    }

    /// Received-message quotas, when the transport has them
    pub fn quotas(&self) -> TransportQuotas {
        match self {
            Self::Http(h) => h.quotas,
            Self::Https(h) => h.http.quotas,
            Self::Tcp(t) => t.quotas,
            Self::Memory(m) => m.quotas,
            Self::Custom(_) => TransportQuotas::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reader_quotas_depth_and_strings() {
        let quotas = ReaderQuotas {
            max_depth: 3,
            max_string_content_length: 4,
            max_array_length: 2,
        };
        assert!(quotas.check(&json!({"a": {"b": 1}})).is_ok());
        assert!(matches!(
            quotas.check(&json!({"a": {"b": {"c": 1}}})),
            Err(Error::QuotaExceeded {
                what: "Nesting depth",
                ..
            })
        ));
        assert!(quotas.check(&json!("abcde")).is_err());
        assert!(quotas.check(&json!([1, 2, 3])).is_err());
        assert!(ReaderQuotas::unlimited().check(&json!([1, 2, 3])).is_ok());
    }

    #[test]
    fn token_requirements() {
        assert_eq!(
            SecurityBindingElement::new(SecurityElementKind::CertificateOverTransport)
                .required_token(),
            Some(TokenKind::Certificate)
        );
        assert_eq!(
            SecurityBindingElement::new(SecurityElementKind::AnonymousForCertificate)
                .required_token(),
            None
        );
    }

    #[test]
    fn transport_schemes() {
        assert_eq!(
            TransportBindingElement::Https(HttpsTransportBindingElement::default()).scheme(),
            "https"
        );
        assert_eq!(
            TransportBindingElement::Tcp(TcpTransportBindingElement::default()).scheme(),
            "net.tcp"
        );
    }

    #[test]
    fn received_size_quota() {
        let quotas = TransportQuotas {
            max_received_message_size: 10,
            ..TransportQuotas::default()
        };
        assert!(quotas.check_received(10).is_ok());
        assert!(quotas.check_received(11).is_err());
    }
}
