//! Message security layer.
//!
//! Token negotiation is out of scope: a [`SecurityTokenProvider`] supplies a
//! ready token and this layer stamps it, with an optional timestamp, into a
//! `Security` header on every outgoing message.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use url::Url;

use svcmodel_core::{
    CommunicationObject, EndpointAddress, Error, Lifecycle, Message, MessageHeader,
    MessageVersion, Result, constants,
};

use crate::channel::{
    Channel, ChannelShape, DuplexChannel, InnerChannelFactory, InputChannel, OutputChannel,
    RequestChannel,
};
use crate::element::{SecurityBindingElement, TokenKind};

/// Lifetime of the timestamp attached to secured messages.
const TIMESTAMP_VALIDITY: Duration = Duration::from_secs(300);

/// Credential presented to the service.
#[derive(Clone, PartialEq, Eq)]
pub enum SecurityToken {
    /// User name and password
    UserName {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// X.509 certificate reference
    Certificate {
        /// Subject name
        subject: String,
        /// SHA-1 thumbprint, hex
        thumbprint: String,
    },
    /// Windows identity
    Windows {
        /// Principal name
        principal: String,
    },
}

impl SecurityToken {
    /// Kind of this token
    pub fn kind(&self) -> TokenKind {
        match self {
            Self::UserName { .. } => TokenKind::UserName,
            Self::Certificate { .. } => TokenKind::Certificate,
            Self::Windows { .. } => TokenKind::Windows,
        }
    }

    fn to_header_value(&self) -> serde_json::Value {
        match self {
            Self::UserName { username, password } => json!({
                "UsernameToken": {"Username": username, "Password": password}
            }),
            Self::Certificate {
                subject,
                thumbprint,
            } => json!({
                "BinarySecurityToken": {"Subject": subject, "Thumbprint": thumbprint}
            }),
            Self::Windows { principal } => json!({
                "SpnegoToken": {"Principal": principal}
            }),
        }
    }
}

impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Certificate {
                subject,
                thumbprint,
            } => f
                .debug_struct("Certificate")
                .field("subject", subject)
                .field("thumbprint", thumbprint)
                .finish(),
            Self::Windows { principal } => f
                .debug_struct("Windows")
                .field("principal", principal)
                .finish(),
        }
    }
}

/// Supplies tokens to the security layer and to authenticating transports.
#[async_trait]
pub trait SecurityTokenProvider: Send + Sync + fmt::Debug {
    /// Produce a token of `kind`
    async fn token(&self, kind: TokenKind, timeout: Duration) -> Result<SecurityToken>;
}

/// Per-channel security state.
#[derive(Debug)]
struct SecurityState {
    element: SecurityBindingElement,
    provider: Option<Arc<dyn SecurityTokenProvider>>,
    token: Mutex<Option<SecurityToken>>,
}

impl SecurityState {
    async fn acquire(&self, timeout: Duration) -> Result<()> {
        let Some(kind) = self.element.required_token() else {
            return Ok(());
        };
        let provider = self.provider.as_ref().ok_or_else(|| {
            Error::invalid_operation(format!(
                "{:?} security requires client credentials supplying a {:?} token",
                self.element.kind, kind
            ))
        })?;
        let token = provider.token(kind, timeout).await?;
        if token.kind() != kind {
            return Err(Error::Security(format!(
                "expected a {:?} token, the credentials supplied {:?}",
                kind,
                token.kind()
            )));
        }
        *self.token.lock() = Some(token);
        Ok(())
    }

    fn secure(&self, message: &mut Message) -> Result<()> {
        let mut value = serde_json::Map::new();
        if self.element.required_token().is_some() {
            let token = self.token.lock().clone().ok_or_else(|| {
                Error::invalid_operation("security token has not been acquired; open the channel")
            })?;
            value.insert("token".into(), token.to_header_value());
        }
        if self.element.include_timestamp {
            let created = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            value.insert(
                "timestamp".into(),
                json!({"created": created, "expires": created + TIMESTAMP_VALIDITY.as_secs()}),
            );
        }
        let mut header = MessageHeader::new(
            "Security",
            constants::WSSE_NAMESPACE,
            serde_json::Value::Object(value),
        );
        header.must_understand = true;
        message.headers_mut().insert(header);
        Ok(())
    }
}

/// Wraps the channels of an inner factory with message security.
pub struct SecurityChannelFactory {
    inner: Arc<dyn InnerChannelFactory>,
    element: SecurityBindingElement,
    provider: Option<Arc<dyn SecurityTokenProvider>>,
    lifecycle: Lifecycle,
}

impl SecurityChannelFactory {
    /// Wrap `inner`. Fails when the element needs a token and no provider is given.
    pub fn new(
        inner: Arc<dyn InnerChannelFactory>,
        element: SecurityBindingElement,
        provider: Option<Arc<dyn SecurityTokenProvider>>,
    ) -> Result<Self> {
        if let Some(kind) = element.required_token()
            && provider.is_none()
        {
            return Err(Error::invalid_operation(format!(
                "{:?} security requires client credentials supplying a {:?} token",
                element.kind, kind
            )));
        }
        Ok(Self {
            inner,
            element,
            provider,
            lifecycle: Lifecycle::new("SecurityChannelFactory"),
        })
    }

    fn state(&self) -> Arc<SecurityState> {
        Arc::new(SecurityState {
            element: self.element.clone(),
            provider: self.provider.clone(),
            token: Mutex::new(None),
        })
    }
}

impl fmt::Debug for SecurityChannelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityChannelFactory")
            .field("element", &self.element)
            .field("inner", &self.inner)
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for SecurityChannelFactory {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, timeout: Duration) -> Result<()> {
        self.inner.open_with_timeout(timeout).await
    }

    async fn on_close(&self, timeout: Duration) -> Result<()> {
        self.inner.close_with_timeout(timeout).await
    }

    async fn on_abort(&self) {
        self.inner.abort().await;
    }
}

impl InnerChannelFactory for SecurityChannelFactory {
    fn message_version(&self) -> MessageVersion {
        self.inner.message_version()
    }

    fn shapes(&self) -> &[ChannelShape] {
        self.inner.shapes()
    }

    fn create_request_channel(
        &self,
        address: &EndpointAddress,
        via: &Url,
    ) -> Result<Arc<dyn RequestChannel>> {
        self.lifecycle.ensure_opened()?;
        let inner = self.inner.create_request_channel(address, via)?;
        Ok(Arc::new(SecuredRequestChannel {
            lifecycle: Lifecycle::new(format!("SecuredRequestChannel({})", via)),
            inner,
            security: self.state(),
        }))
    }

    fn create_duplex_channel(
        &self,
        address: &EndpointAddress,
        via: &Url,
    ) -> Result<Arc<dyn DuplexChannel>> {
        self.lifecycle.ensure_opened()?;
        let inner = self.inner.create_duplex_channel(address, via)?;
        Ok(Arc::new(SecuredDuplexChannel {
            lifecycle: Lifecycle::new(format!("SecuredDuplexChannel({})", via)),
            inner,
            security: self.state(),
        }))
    }
}

#[derive(Debug)]
struct SecuredRequestChannel {
    lifecycle: Lifecycle,
    inner: Arc<dyn RequestChannel>,
    security: Arc<SecurityState>,
}

#[async_trait]
impl CommunicationObject for SecuredRequestChannel {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, timeout: Duration) -> Result<()> {
        self.security.acquire(timeout).await?;
        self.inner.open_with_timeout(timeout).await
    }

    async fn on_close(&self, timeout: Duration) -> Result<()> {
        self.inner.close_with_timeout(timeout).await
    }

    async fn on_abort(&self) {
        self.inner.abort().await;
    }
}

impl Channel for SecuredRequestChannel {
    fn remote_address(&self) -> &EndpointAddress {
        self.inner.remote_address()
    }

    fn via(&self) -> &Url {
        self.inner.via()
    }

    fn message_version(&self) -> MessageVersion {
        self.inner.message_version()
    }
}

#[async_trait]
impl RequestChannel for SecuredRequestChannel {
    async fn request(&self, mut message: Message, timeout: Duration) -> Result<Message> {
        self.lifecycle.ensure_opened()?;
        self.security.secure(&mut message)?;
        self.inner.request(message, timeout).await
    }

    async fn send_one_way(&self, mut message: Message, timeout: Duration) -> Result<()> {
        self.lifecycle.ensure_opened()?;
        self.security.secure(&mut message)?;
        self.inner.send_one_way(message, timeout).await
    }
}

#[derive(Debug)]
struct SecuredDuplexChannel {
    lifecycle: Lifecycle,
    inner: Arc<dyn DuplexChannel>,
    security: Arc<SecurityState>,
}

#[async_trait]
impl CommunicationObject for SecuredDuplexChannel {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, timeout: Duration) -> Result<()> {
        self.security.acquire(timeout).await?;
        self.inner.open_with_timeout(timeout).await
    }

    async fn on_close(&self, timeout: Duration) -> Result<()> {
        self.inner.close_with_timeout(timeout).await
    }

    async fn on_abort(&self) {
        self.inner.abort().await;
    }
}

impl Channel for SecuredDuplexChannel {
    fn remote_address(&self) -> &EndpointAddress {
        self.inner.remote_address()
    }

    fn via(&self) -> &Url {
        self.inner.via()
    }

    fn message_version(&self) -> MessageVersion {
        self.inner.message_version()
    }
}

#[async_trait]
impl OutputChannel for SecuredDuplexChannel {
    async fn send(&self, mut message: Message, timeout: Duration) -> Result<()> {
        self.lifecycle.ensure_opened()?;
        self.security.secure(&mut message)?;
        self.inner.send(message, timeout).await
    }
}

#[async_trait]
impl InputChannel for SecuredDuplexChannel {
    async fn try_receive(&self, timeout: Duration) -> Result<Option<Message>> {
        self.lifecycle.ensure_opened()?;
        self.inner.try_receive(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::SecurityElementKind;

    #[derive(Debug)]
    struct StaticProvider(SecurityToken);

    #[async_trait]
    impl SecurityTokenProvider for StaticProvider {
        async fn token(&self, _kind: TokenKind, _timeout: Duration) -> Result<SecurityToken> {
            Ok(self.0.clone())
        }
    }

    fn state(kind: SecurityElementKind, token: SecurityToken) -> SecurityState {
        SecurityState {
            element: SecurityBindingElement::new(kind),
            provider: Some(Arc::new(StaticProvider(token))),
            token: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn stamps_security_header() {
        let security = state(
            SecurityElementKind::UserNameOverTransport,
            SecurityToken::UserName {
                username: "alice".into(),
                password: "s3cret".into(),
            },
        );
        security.acquire(Duration::from_secs(1)).await.unwrap();

        let mut msg = Message::create_empty(MessageVersion::default(), "urn:a");
        security.secure(&mut msg).unwrap();
        let header = msg
            .headers()
            .find("Security", constants::WSSE_NAMESPACE)
            .unwrap();
        assert!(header.must_understand);
        assert_eq!(header.value["token"]["UsernameToken"]["Username"], "alice");
        assert!(header.value["timestamp"]["expires"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn wrong_token_kind_is_rejected() {
        let security = state(
            SecurityElementKind::MutualCertificate,
            SecurityToken::Windows {
                principal: "DOMAIN\\bob".into(),
            },
        );
        let err = security.acquire(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Security(_)));
    }

    #[test]
    fn secure_before_acquire_fails() {
        let security = state(
            SecurityElementKind::MutualCertificate,
            SecurityToken::Certificate {
                subject: "CN=client".into(),
                thumbprint: "ab".into(),
            },
        );
        let mut msg = Message::create_empty(MessageVersion::default(), "urn:a");
        assert!(security.secure(&mut msg).is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let token = SecurityToken::UserName {
            username: "alice".into(),
            password: "s3cret".into(),
        };
        let text = format!("{:?}", token);
        assert!(text.contains("alice"));
        assert!(!text.contains("s3cret"));
    }
}
