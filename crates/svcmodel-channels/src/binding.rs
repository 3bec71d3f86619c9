//! Bindings: named recipes for a binding element stack.
//!
//! Each binding turns its property bag into an ordered list of
//! [`BindingElement`]s, outermost first. The list is rebuilt on every call to
//! [`Binding::create_binding_elements`] and never mutated afterwards.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use svcmodel_core::{Error, MessageVersion, Result, Timeouts, constants};

use crate::channel::InnerChannelFactory;
use crate::element::{
    AuthenticationScheme, BindingElement, EncodingKind, HttpTransportBindingElement,
    HttpsTransportBindingElement, MessageEncodingBindingElement, ReaderQuotas,
    ReliableSessionBindingElement, SecurityBindingElement, SecurityElementKind,
    StreamUpgradeBindingElement, TcpTransportBindingElement, TransferMode, TransportBindingElement,
    TransportQuotas,
};
use crate::stack::{BindingParameters, build_channel_factory, validate_elements};

/// A named binding element stack.
pub trait Binding: Send + Sync + Debug {
    /// Binding name
    fn name(&self) -> &str;

    /// Binding namespace
    fn namespace(&self) -> &str {
        constants::DEFAULT_NAMESPACE
    }

    /// URI scheme of the transport
    fn scheme(&self) -> &str;

    /// Envelope and addressing versions produced by the stack
    fn message_version(&self) -> MessageVersion;

    /// Open, close, send and receive timeouts
    fn timeouts(&self) -> Timeouts;

    /// The ordered layers of this binding, outermost first
    fn create_binding_elements(&self) -> Result<Vec<BindingElement>>;

    /// Assemble the channel factory for this binding
    fn build_channel_factory(
        &self,
        parameters: &BindingParameters,
    ) -> Result<Arc<dyn InnerChannelFactory>> {
        build_channel_factory(self.create_binding_elements()?, parameters, self.timeouts())
    }
}

/// Security mode of a [`BasicHttpBinding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BasicHttpSecurityMode {
    /// No security
    #[default]
    None,
    /// HTTPS
    Transport,
    /// SOAP message security over plain HTTP
    Message,
    /// HTTPS with client credentials in the message
    TransportWithMessageCredential,
    /// HTTP authentication without confidentiality
    TransportCredentialOnly,
}

/// Client credential presented to an HTTP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HttpClientCredentialType {
    /// Anonymous
    #[default]
    None,
    /// Basic
    Basic,
    /// Digest
    Digest,
    /// NTLM
    Ntlm,
    /// Negotiate
    Windows,
    /// TLS client certificate
    Certificate,
}

impl HttpClientCredentialType {
    /// Transport authentication scheme and client certificate flag for this credential
    pub fn authentication(self) -> (AuthenticationScheme, bool) {
        match self {
            Self::None => (AuthenticationScheme::Anonymous, false),
            Self::Basic => (AuthenticationScheme::Basic, false),
            Self::Digest => (AuthenticationScheme::Digest, false),
            Self::Ntlm => (AuthenticationScheme::Ntlm, false),
            Self::Windows => (AuthenticationScheme::Negotiate, false),
            Self::Certificate => (AuthenticationScheme::Anonymous, true),
        }
    }
}

/// Client credential carried in SOAP messages of a [`BasicHttpBinding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BasicHttpMessageCredentialType {
    /// User name and password
    #[default]
    UserName,
    /// X.509 certificate
    Certificate,
}

/// Encoding of a [`BasicHttpBinding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WsMessageEncoding {
    /// Text envelopes
    #[default]
    Text,
    /// MTOM envelopes
    Mtom,
}

/// Security settings of a [`BasicHttpBinding`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicHttpSecurity {
    /// Mode
    pub mode: BasicHttpSecurityMode,
    /// Credential for `Transport` and `TransportCredentialOnly`
    pub transport_credential: HttpClientCredentialType,
    /// Realm for basic and digest authentication
    pub realm: String,
    /// Credential for `Message` and `TransportWithMessageCredential`
    pub message_credential: BasicHttpMessageCredentialType,
}

/// Interoperable SOAP 1.1 binding over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicHttpBinding {
    /// Name
    pub name: String,
    /// Security settings
    pub security: BasicHttpSecurity,
    /// Text or MTOM
    pub message_encoding: WsMessageEncoding,
    /// Size limits for the transport
    pub quotas: TransportQuotas,
    /// Reader quotas for the encoder
    pub reader_quotas: ReaderQuotas,
    /// Buffered or streamed transfer
    pub transfer_mode: TransferMode,
    /// Keep HTTP connections alive
    pub keep_alive_enabled: bool,
    /// Keep cookies between requests
    pub allow_cookies: bool,
    /// Bypass the proxy for local addresses
    pub bypass_proxy_on_local: bool,
    /// Use the system proxy
    pub use_default_web_proxy: bool,
    /// Timeouts
    pub timeouts: Timeouts,
}

impl Default for BasicHttpBinding {
    fn default() -> Self {
        Self {
            name: "BasicHttpBinding".to_string(),
            security: BasicHttpSecurity::default(),
            message_encoding: WsMessageEncoding::Text,
            quotas: TransportQuotas::default(),
            reader_quotas: ReaderQuotas::default(),
            transfer_mode: TransferMode::Buffered,
            keep_alive_enabled: true,
            allow_cookies: false,
            bypass_proxy_on_local: false,
            use_default_web_proxy: true,
            timeouts: Timeouts::default(),
        }
    }
}

impl BasicHttpBinding {
    /// Binding with the given security mode and default properties
    pub fn new(mode: BasicHttpSecurityMode) -> Self {
        let mut binding = Self::default();
        binding.security.mode = mode;
        binding
    }

    /// Set the transport credential type
    pub fn with_transport_credential(mut self, credential: HttpClientCredentialType) -> Self {
        self.security.transport_credential = credential;
        self
    }

    /// Set the message credential type
    pub fn with_message_credential(mut self, credential: BasicHttpMessageCredentialType) -> Self {
        self.security.message_credential = credential;
        self
    }

    fn http_element(&self, scheme: AuthenticationScheme) -> HttpTransportBindingElement {
        HttpTransportBindingElement {
            authentication_scheme: scheme,
            realm: self.security.realm.clone(),
            quotas: self.quotas,
            transfer_mode: self.transfer_mode,
            keep_alive_enabled: self.keep_alive_enabled,
            allow_cookies: self.allow_cookies,
            bypass_proxy_on_local: self.bypass_proxy_on_local,
            use_default_web_proxy: self.use_default_web_proxy,
        }
    }

    fn message_security(&self, kind: SecurityElementKind) -> Result<BindingElement> {
        if self.security.message_credential != BasicHttpMessageCredentialType::Certificate {
            return Err(Error::invalid_operation(format!(
                "{:?} security mode of BasicHttpBinding requires the Certificate message credential type, got {:?}",
                self.security.mode, self.security.message_credential
            )));
        }
        Ok(BindingElement::Security(SecurityBindingElement::new(kind)))
    }
}

impl Binding for BasicHttpBinding {
    fn name(&self) -> &str {
        &self.name
    }

    fn scheme(&self) -> &str {
        match self.security.mode {
            BasicHttpSecurityMode::Transport
            | BasicHttpSecurityMode::TransportWithMessageCredential => "https",
            _ => "http",
        }
    }

    fn message_version(&self) -> MessageVersion {
        MessageVersion::SOAP11
    }

    fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    fn create_binding_elements(&self) -> Result<Vec<BindingElement>> {
        let mut elements = Vec::with_capacity(3);

        match self.security.mode {
            BasicHttpSecurityMode::Message => {
                elements.push(self.message_security(SecurityElementKind::MutualCertificate)?);
            }
            BasicHttpSecurityMode::TransportWithMessageCredential => {
                elements.push(
                    self.message_security(SecurityElementKind::CertificateOverTransport)?,
                );
            }
            _ => {}
        }

        let encoding = match self.message_encoding {
            WsMessageEncoding::Text => MessageEncodingBindingElement::text(self.message_version()),
            WsMessageEncoding::Mtom => MessageEncodingBindingElement::mtom(self.message_version()),
        };
        elements.push(BindingElement::Encoding(
            encoding.with_reader_quotas(self.reader_quotas),
        ));

        let transport = match self.security.mode {
            BasicHttpSecurityMode::None | BasicHttpSecurityMode::Message => {
                TransportBindingElement::Http(self.http_element(AuthenticationScheme::Anonymous))
            }
            BasicHttpSecurityMode::Transport => {
                let (scheme, require_client_certificate) =
                    self.security.transport_credential.authentication();
                TransportBindingElement::Https(HttpsTransportBindingElement {
                    http: self.http_element(scheme),
                    require_client_certificate,
                })
            }
            BasicHttpSecurityMode::TransportWithMessageCredential => {
                TransportBindingElement::Https(HttpsTransportBindingElement {
                    http: self.http_element(AuthenticationScheme::Anonymous),
                    require_client_certificate: false,
                })
            }
            BasicHttpSecurityMode::TransportCredentialOnly => {
                let (scheme, require_client_certificate) =
                    self.security.transport_credential.authentication();
                if require_client_certificate {
                    return Err(Error::invalid_operation(
                        "the Certificate credential type cannot be used with TransportCredentialOnly security",
                    ));
                }
                TransportBindingElement::Http(self.http_element(scheme))
            }
        };
        elements.push(BindingElement::Transport(transport));

        tracing::trace!(binding = %self.name, layers = elements.len(), "binding elements created");
        Ok(elements)
    }
}

/// Security mode of a [`NetTcpBinding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    /// No security
    None,
    /// Stream security on the connection
    #[default]
    Transport,
    /// SOAP message security
    Message,
    /// Stream security plus client credentials in the message
    TransportWithMessageCredential,
}

/// Client credential for `net.tcp` stream security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TcpClientCredentialType {
    /// Server authenticated only
    None,
    /// SPNEGO
    #[default]
    Windows,
    /// TLS client certificate
    Certificate,
}

/// Client credential carried in SOAP messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MessageCredentialType {
    /// Anonymous client
    None,
    /// Windows identity
    #[default]
    Windows,
    /// User name and password
    UserName,
    /// X.509 certificate
    Certificate,
    /// Token issued by a third party
    IssuedToken,
}

/// Security settings of a [`NetTcpBinding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetTcpSecurity {
    /// Mode
    pub mode: SecurityMode,
    /// Credential for stream security
    pub transport_credential: TcpClientCredentialType,
    /// Credential for message security
    pub message_credential: MessageCredentialType,
}

/// Reliable session toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalReliableSession {
    /// Whether the session layer is present
    pub enabled: bool,
    /// In-order delivery
    pub ordered: bool,
    /// Inactivity timeout
    pub inactivity_timeout: Duration,
}

impl Default for OptionalReliableSession {
    fn default() -> Self {
        Self {
            enabled: false,
            ordered: true,
            inactivity_timeout: Duration::from_secs(600),
        }
    }
}

/// Binary SOAP 1.2 binding over TCP.
#[derive(Debug, Clone, PartialEq)]
pub struct NetTcpBinding {
    /// Name
    pub name: String,
    /// Security settings
    pub security: NetTcpSecurity,
    /// Reliable session
    pub reliable_session: OptionalReliableSession,
    /// Size limits for the transport
    pub quotas: TransportQuotas,
    /// Reader quotas for the encoder
    pub reader_quotas: ReaderQuotas,
    /// Buffered or streamed transfer
    pub transfer_mode: TransferMode,
    /// Share the port with other listeners
    pub port_sharing_enabled: bool,
    /// Pending-connection backlog
    pub listen_backlog: u32,
    /// Pooled connections per endpoint
    pub max_connections: u32,
    /// Timeouts
    pub timeouts: Timeouts,
}

impl Default for NetTcpBinding {
    fn default() -> Self {
        Self {
            name: "NetTcpBinding".to_string(),
            security: NetTcpSecurity::default(),
            reliable_session: OptionalReliableSession::default(),
            quotas: TransportQuotas::default(),
            reader_quotas: ReaderQuotas::default(),
            transfer_mode: TransferMode::Buffered,
            port_sharing_enabled: false,
            listen_backlog: 10,
            max_connections: 10,
            timeouts: Timeouts::default(),
        }
    }
}

impl NetTcpBinding {
    /// Binding with the given security mode and default properties
    pub fn new(mode: SecurityMode) -> Self {
        let mut binding = Self::default();
        binding.security.mode = mode;
        binding
    }

    fn message_security(&self) -> Result<Option<SecurityBindingElement>> {
        let kind = match (self.security.mode, self.security.message_credential) {
            (SecurityMode::Message, MessageCredentialType::Windows) => {
                SecurityElementKind::SspiNegotiation
            }
            (SecurityMode::Message, MessageCredentialType::UserName) => {
                SecurityElementKind::UserNameForCertificate
            }
            (SecurityMode::Message, MessageCredentialType::Certificate) => {
                SecurityElementKind::MutualCertificate
            }
            (SecurityMode::Message, MessageCredentialType::None) => {
                SecurityElementKind::AnonymousForCertificate
            }
            (SecurityMode::Message, MessageCredentialType::IssuedToken) => {
                return Err(Error::not_implemented("issued token message security"));
            }
            (SecurityMode::TransportWithMessageCredential, MessageCredentialType::Certificate) => {
                SecurityElementKind::CertificateOverTransport
            }
            (SecurityMode::TransportWithMessageCredential, other) => {
                return Err(Error::invalid_operation(format!(
                    "TransportWithMessageCredential security requires the Certificate message credential type, got {:?}",
                    other
                )));
            }
            _ => return Ok(None),
        };
        Ok(Some(SecurityBindingElement::new(kind)))
    }

    fn stream_upgrade(&self) -> Option<StreamUpgradeBindingElement> {
        match self.security.mode {
            SecurityMode::Transport => Some(match self.security.transport_credential {
                TcpClientCredentialType::Windows => {
                    StreamUpgradeBindingElement::WindowsStreamSecurity
                }
                TcpClientCredentialType::Certificate => {
                    StreamUpgradeBindingElement::SslStreamSecurity {
                        require_client_certificate: true,
                    }
                }
                TcpClientCredentialType::None => StreamUpgradeBindingElement::SslStreamSecurity {
                    require_client_certificate: false,
                },
            }),
            SecurityMode::TransportWithMessageCredential => {
                Some(StreamUpgradeBindingElement::SslStreamSecurity {
                    require_client_certificate: false,
                })
            }
            SecurityMode::None | SecurityMode::Message => None,
        }
    }
}

impl Binding for NetTcpBinding {
    fn name(&self) -> &str {
        &self.name
    }

    fn scheme(&self) -> &str {
        "net.tcp"
    }

    fn message_version(&self) -> MessageVersion {
        MessageVersion::SOAP12_WSADDRESSING10
    }

    fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    fn create_binding_elements(&self) -> Result<Vec<BindingElement>> {
        let mut elements = Vec::with_capacity(5);
        if self.reliable_session.enabled {
            elements.push(BindingElement::ReliableSession(
                ReliableSessionBindingElement {
                    ordered: self.reliable_session.ordered,
                    inactivity_timeout: self.reliable_session.inactivity_timeout,
                },
            ));
        }
        if let Some(security) = self.message_security()? {
            elements.push(BindingElement::Security(security));
        }
        elements.push(BindingElement::Encoding(
            MessageEncodingBindingElement::binary(self.message_version())
                .with_reader_quotas(self.reader_quotas),
        ));
        if let Some(upgrade) = self.stream_upgrade() {
            elements.push(BindingElement::StreamUpgrade(upgrade));
        }
        elements.push(BindingElement::Transport(TransportBindingElement::Tcp(
            TcpTransportBindingElement {
                quotas: self.quotas,
                transfer_mode: self.transfer_mode,
                port_sharing_enabled: self.port_sharing_enabled,
                listen_backlog: self.listen_backlog,
                max_pending_connections: self.max_connections,
            },
        )));
        Ok(elements)
    }
}

/// Binding over an explicit element list.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomBinding {
    /// Name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Elements, outermost first
    pub elements: Vec<BindingElement>,
    /// Timeouts
    pub timeouts: Timeouts,
}

impl CustomBinding {
    /// Binding over `elements`
    pub fn new(elements: Vec<BindingElement>) -> Self {
        Self {
            name: "CustomBinding".to_string(),
            namespace: constants::DEFAULT_NAMESPACE.to_string(),
            elements,
            timeouts: Timeouts::default(),
        }
    }

    /// Snapshot of another binding's elements and timeouts
    pub fn from_binding(binding: &dyn Binding) -> Result<Self> {
        Ok(Self {
            name: binding.name().to_string(),
            namespace: binding.namespace().to_string(),
            elements: binding.create_binding_elements()?,
            timeouts: binding.timeouts(),
        })
    }

    /// Same binding with different timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    fn encoding(&self) -> Option<&MessageEncodingBindingElement> {
        self.elements.iter().find_map(|e| match e {
            BindingElement::Encoding(encoding) => Some(encoding),
            _ => None,
        })
    }

    fn transport(&self) -> Option<&TransportBindingElement> {
        self.elements.iter().find_map(|e| match e {
            BindingElement::Transport(transport) => Some(transport),
            _ => None,
        })
    }
}

impl Binding for CustomBinding {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn scheme(&self) -> &str {
        self.transport().map_or("", TransportBindingElement::scheme)
    }

    fn message_version(&self) -> MessageVersion {
        self.encoding()
            .map_or_else(MessageVersion::default, |e| e.message_version)
    }

    fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    fn create_binding_elements(&self) -> Result<Vec<BindingElement>> {
        validate_elements(&self.elements)?;
        let mut elements = self.elements.clone();
        if self.encoding().is_none() {
            // text encoding sits just above the transport (and any stream upgrade)
            let at = elements
                .iter()
                .position(|e| {
                    matches!(e, BindingElement::StreamUpgrade(_) | BindingElement::Transport(_))
                })
                .unwrap_or(elements.len());
            elements.insert(
                at,
                BindingElement::Encoding(MessageEncodingBindingElement::default()),
            );
        }
        Ok(elements)
    }
}

/// Encoding kind of the first encoding element, if any.
pub fn encoding_kind(elements: &[BindingElement]) -> Option<EncodingKind> {
    elements.iter().find_map(|e| match e {
        BindingElement::Encoding(encoding) => Some(encoding.kind),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::MemoryTransportBindingElement;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn transport(elements: &[BindingElement]) -> &TransportBindingElement {
        match elements.last() {
            Some(BindingElement::Transport(t)) => t,
            other => panic!("last element is not a transport: {:?}", other),
        }
    }

    #[test]
    fn transport_security_with_basic_auth() {
        let binding = BasicHttpBinding::new(BasicHttpSecurityMode::Transport)
            .with_transport_credential(HttpClientCredentialType::Basic);
        let elements = binding.create_binding_elements().unwrap();

        assert_eq!(elements.len(), 2);
        assert_eq!(
            elements[0],
            BindingElement::Encoding(MessageEncodingBindingElement::text(MessageVersion::SOAP11))
        );
        match &elements[1] {
            BindingElement::Transport(TransportBindingElement::Https(https)) => {
                assert_eq!(https.http.authentication_scheme, AuthenticationScheme::Basic);
                assert!(!https.require_client_certificate);
            }
            other => panic!("expected an HTTPS transport, got {:?}", other),
        }
    }

    #[test]
    fn default_basic_http_is_text_over_http() {
        let elements = BasicHttpBinding::default().create_binding_elements().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(encoding_kind(&elements), Some(EncodingKind::Text));
        assert_eq!(transport(&elements).scheme(), "http");
    }

    #[test]
    fn certificate_transport_credential_sets_client_certificate_flag() {
        let elements = BasicHttpBinding::new(BasicHttpSecurityMode::Transport)
            .with_transport_credential(HttpClientCredentialType::Certificate)
            .create_binding_elements()
            .unwrap();
        match transport(&elements) {
            TransportBindingElement::Https(https) => {
                assert!(https.require_client_certificate);
                assert_eq!(https.http.authentication_scheme, AuthenticationScheme::Anonymous);
            }
            other => panic!("expected an HTTPS transport, got {:?}", other),
        }
    }

    #[test]
    fn message_security_requires_certificate() {
        let binding = BasicHttpBinding::new(BasicHttpSecurityMode::Message);
        assert!(matches!(
            binding.create_binding_elements(),
            Err(Error::InvalidOperation(_))
        ));

        let elements = binding
            .with_message_credential(BasicHttpMessageCredentialType::Certificate)
            .create_binding_elements()
            .unwrap();
        assert_eq!(elements.len(), 3);
        assert_eq!(
            elements[0],
            BindingElement::Security(SecurityBindingElement::new(
                SecurityElementKind::MutualCertificate
            ))
        );
    }

    #[test]
    fn mtom_and_quotas_propagate() {
        let mut binding = BasicHttpBinding {
            message_encoding: WsMessageEncoding::Mtom,
            keep_alive_enabled: false,
            ..BasicHttpBinding::default()
        };
        binding.quotas.max_received_message_size = 1 << 20;
        let elements = binding.create_binding_elements().unwrap();
        assert_eq!(encoding_kind(&elements), Some(EncodingKind::Mtom));
        match transport(&elements) {
            TransportBindingElement::Http(http) => {
                assert_eq!(http.quotas.max_received_message_size, 1 << 20);
                assert!(!http.keep_alive_enabled);
            }
            other => panic!("expected an HTTP transport, got {:?}", other),
        }
    }

    #[test]
    fn net_tcp_layer_order() {
        let binding = NetTcpBinding {
            security: NetTcpSecurity {
                mode: SecurityMode::TransportWithMessageCredential,
                transport_credential: TcpClientCredentialType::Windows,
                message_credential: MessageCredentialType::Certificate,
            },
            reliable_session: OptionalReliableSession {
                enabled: true,
                ..OptionalReliableSession::default()
            },
            ..NetTcpBinding::default()
        };
        let kinds: Vec<_> = binding
            .create_binding_elements()
            .unwrap()
            .iter()
            .map(BindingElement::kind)
            .collect();
        assert_eq!(
            kinds,
            vec!["reliable-session", "security", "encoding", "stream-upgrade", "transport"]
        );
    }

    #[test]
    fn net_tcp_transport_security_upgrades() {
        let windows = NetTcpBinding::default().create_binding_elements().unwrap();
        assert!(windows.contains(&BindingElement::StreamUpgrade(
            StreamUpgradeBindingElement::WindowsStreamSecurity
        )));

        let mut binding = NetTcpBinding::default();
        binding.security.transport_credential = TcpClientCredentialType::Certificate;
        assert!(binding.create_binding_elements().unwrap().contains(
            &BindingElement::StreamUpgrade(StreamUpgradeBindingElement::SslStreamSecurity {
                require_client_certificate: true
            })
        ));

        let none = NetTcpBinding::new(SecurityMode::None).create_binding_elements().unwrap();
        assert_eq!(none.len(), 2);
        assert_eq!(encoding_kind(&none), Some(EncodingKind::Binary));
    }

    #[test]
    fn net_tcp_message_credentials() {
        let mut binding = NetTcpBinding::new(SecurityMode::Message);
        binding.security.message_credential = MessageCredentialType::UserName;
        let elements = binding.create_binding_elements().unwrap();
        assert_eq!(
            elements[0],
            BindingElement::Security(SecurityBindingElement::new(
                SecurityElementKind::UserNameForCertificate
            ))
        );

        binding.security.mode = SecurityMode::TransportWithMessageCredential;
        assert!(matches!(
            binding.create_binding_elements(),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn custom_binding_defaults_text_encoding() {
        let binding = CustomBinding::new(vec![BindingElement::Transport(
            TransportBindingElement::Memory(MemoryTransportBindingElement::default()),
        )]);
        let elements = binding.create_binding_elements().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(encoding_kind(&elements), Some(EncodingKind::Text));
        assert_eq!(binding.scheme(), "memory");
        assert_eq!(binding.message_version(), MessageVersion::default());
    }

    #[test]
    fn custom_binding_validates_order() {
        let binding = CustomBinding::new(vec![
            BindingElement::Transport(TransportBindingElement::Memory(
                MemoryTransportBindingElement::default(),
            )),
            BindingElement::Encoding(MessageEncodingBindingElement::default()),
        ]);
        assert!(binding.create_binding_elements().is_err());
    }

    #[test]
    fn custom_binding_snapshots_another_binding() {
        let tcp = NetTcpBinding::new(SecurityMode::None);
        let custom = CustomBinding::from_binding(&tcp).unwrap();
        assert_eq!(custom.create_binding_elements().unwrap(), tcp.create_binding_elements().unwrap());
        assert_eq!(custom.message_version(), MessageVersion::SOAP12_WSADDRESSING10);
        assert_eq!(custom.scheme(), "net.tcp");
    }

    fn security_mode() -> impl Strategy<Value = BasicHttpSecurityMode> {
        prop_oneof![
            Just(BasicHttpSecurityMode::None),
            Just(BasicHttpSecurityMode::Transport),
            Just(BasicHttpSecurityMode::Message),
            Just(BasicHttpSecurityMode::TransportWithMessageCredential),
            Just(BasicHttpSecurityMode::TransportCredentialOnly),
        ]
    }

    fn transport_credential() -> impl Strategy<Value = HttpClientCredentialType> {
        prop_oneof![
            Just(HttpClientCredentialType::None),
            Just(HttpClientCredentialType::Basic),
            Just(HttpClientCredentialType::Digest),
            Just(HttpClientCredentialType::Ntlm),
            Just(HttpClientCredentialType::Windows),
            Just(HttpClientCredentialType::Certificate),
        ]
    }

    fn message_credential() -> impl Strategy<Value = BasicHttpMessageCredentialType> {
        prop_oneof![
            Just(BasicHttpMessageCredentialType::UserName),
            Just(BasicHttpMessageCredentialType::Certificate),
        ]
    }

    proptest! {
        #[test]
        fn basic_http_matrix(
            mode in security_mode(),
            transport_cred in transport_credential(),
            message_cred in message_credential(),
        ) {
            let binding = BasicHttpBinding::new(mode)
                .with_transport_credential(transport_cred)
                .with_message_credential(message_cred);
            let result = binding.create_binding_elements();

            let needs_certificate_message = matches!(
                mode,
                BasicHttpSecurityMode::Message | BasicHttpSecurityMode::TransportWithMessageCredential
            );
            let invalid = (needs_certificate_message
                && message_cred != BasicHttpMessageCredentialType::Certificate)
                || (mode == BasicHttpSecurityMode::TransportCredentialOnly
                    && transport_cred == HttpClientCredentialType::Certificate);

            if invalid {
                prop_assert!(matches!(result, Err(Error::InvalidOperation(_))));
                return Ok(());
            }
            let elements = result.unwrap();
            prop_assert_eq!(encoding_kind(&elements), Some(EncodingKind::Text));
            prop_assert!(validate_elements(&elements).is_ok());
            prop_assert_eq!(transport(&elements).scheme(), binding.scheme());

            let http = match transport(&elements) {
                TransportBindingElement::Http(http) => http,
                TransportBindingElement::Https(https) => &https.http,
                other => panic!("unexpected transport {:?}", other),
            };
            let expected = match mode {
                BasicHttpSecurityMode::Transport | BasicHttpSecurityMode::TransportCredentialOnly => {
                    transport_cred.authentication().0
                }
                _ => AuthenticationScheme::Anonymous,
            };
            prop_assert_eq!(http.authentication_scheme, expected);
        }
    }
}
