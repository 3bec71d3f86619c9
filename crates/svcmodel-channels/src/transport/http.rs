//! HTTP and HTTPS request transport.
//!
//! Each request is a POST of the encoded envelope to the channel's `via`.
//! SOAP 1.1 carries the action in a `SOAPAction` header, SOAP 1.2 in the
//! `action` parameter of the content type. A `500` response carries a fault
//! in its body; `202 Accepted` or an empty body completes a one-way send.
//! Reply bodies are read in chunks against the received-message quota.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use url::Url;

use svcmodel_core::{
    CommunicationObject, EndpointAddress, EnvelopeVersion, Error, Lifecycle, Message,
    MessageVersion, Result,
};

use crate::channel::{Channel, ChannelShape, InnerChannelFactory, RequestChannel};
use crate::element::{AuthenticationScheme, HttpTransportBindingElement, TokenKind};
use crate::encoder::MessageEncoder;
use crate::security::{SecurityToken, SecurityTokenProvider};
use crate::transport::TransportContext;

/// Factory for `http` and `https` request channels.
pub struct HttpChannelFactory {
    element: HttpTransportBindingElement,
    secure: bool,
    encoder: Arc<dyn MessageEncoder>,
    token_provider: Option<Arc<dyn SecurityTokenProvider>>,
    client: RwLock<Option<reqwest::Client>>,
    lifecycle: Lifecycle,
}

impl HttpChannelFactory {
    /// Factory for `element`; `secure` selects `https`.
    pub fn new(
        element: HttpTransportBindingElement,
        secure: bool,
        context: TransportContext,
    ) -> Result<Self> {
        if context.stream_upgrade.is_some() {
            return Err(Error::invalid_operation(
                "HTTP transports do not support stream upgrades",
            ));
        }
        match element.authentication_scheme {
            AuthenticationScheme::Anonymous | AuthenticationScheme::Basic => {}
            other => {
                return Err(Error::not_implemented(format!(
                    "{:?} HTTP authentication",
                    other
                )));
            }
        }
        if element.authentication_scheme == AuthenticationScheme::Basic
            && context.parameters.token_provider.is_none()
        {
            return Err(Error::invalid_operation(
                "basic authentication requires client credentials with a user name",
            ));
        }
        Ok(Self {
            element,
            secure,
            encoder: context.encoder,
            token_provider: context.parameters.token_provider,
            client: RwLock::new(None),
            lifecycle: Lifecycle::new(if secure {
                "HttpsChannelFactory"
            } else {
                "HttpChannelFactory"
            }),
        })
    }

    fn scheme(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }
}

impl fmt::Debug for HttpChannelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpChannelFactory")
            .field("scheme", &self.scheme())
            .field("auth", &self.element.authentication_scheme)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for HttpChannelFactory {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, _timeout: Duration) -> Result<()> {
        let mut builder = reqwest::Client::builder();
        if !self.element.keep_alive_enabled {
            builder = builder.pool_max_idle_per_host(0);
        }
        if !self.element.use_default_web_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| Error::communication(format!("failed to build HTTP client: {}", e)))?;
        *self.client.write() = Some(client);
        Ok(())
    }

    async fn on_close(&self, _timeout: Duration) -> Result<()> {
        self.client.write().take();
        Ok(())
    }

    async fn on_abort(&self) {
        self.client.write().take();
    }
}

impl InnerChannelFactory for HttpChannelFactory {
    fn message_version(&self) -> MessageVersion {
        self.encoder.message_version()
    }

    fn shapes(&self) -> &[ChannelShape] {
        &[ChannelShape::Request]
    }

    fn create_request_channel(
        &self,
        address: &EndpointAddress,
        via: &Url,
    ) -> Result<Arc<dyn RequestChannel>> {
        self.lifecycle.ensure_opened()?;
        if via.scheme() != self.scheme() {
            return Err(Error::invalid_operation(format!(
                "the provided URI scheme '{}' is invalid; expected '{}'",
                via.scheme(),
                self.scheme()
            )));
        }
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| Error::ObjectDisposed("HttpChannelFactory".into()))?;
        Ok(Arc::new(HttpRequestChannel {
            lifecycle: Lifecycle::new(format!("HttpRequestChannel({})", via)),
            address: address.clone(),
            via: via.clone(),
            client,
            encoder: self.encoder.clone(),
            element: self.element.clone(),
            token_provider: self.token_provider.clone(),
            credentials: RwLock::new(None),
        }))
    }
}

struct HttpRequestChannel {
    lifecycle: Lifecycle,
    address: EndpointAddress,
    via: Url,
    client: reqwest::Client,
    encoder: Arc<dyn MessageEncoder>,
    element: HttpTransportBindingElement,
    token_provider: Option<Arc<dyn SecurityTokenProvider>>,
    credentials: RwLock<Option<(String, String)>>,
}

impl fmt::Debug for HttpRequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequestChannel")
            .field("via", &self.via.as_str())
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl HttpRequestChannel {
    fn headers(&self, action: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let version = self.encoder.message_version();
        let content_type = match (version.envelope, action) {
            (EnvelopeVersion::Soap12, Some(action)) => {
                format!("{}; action=\"{}\"", self.encoder.content_type(), action)
            }
            _ => self.encoder.content_type().to_string(),
        };
        headers.insert(CONTENT_TYPE, header_value(&content_type)?);
        if version.envelope == EnvelopeVersion::Soap11 {
            let soap_action = format!("\"{}\"", action.unwrap_or_default());
            headers.insert("SOAPAction", header_value(&soap_action)?);
        }
        Ok(headers)
    }

    async fn post(&self, message: Message, timeout: Duration) -> Result<reqwest::Response> {
        self.lifecycle.ensure_opened()?;
        let headers = self.headers(message.action())?;
        let body = self.encoder.encode(message)?;
        tracing::trace!(via = %self.via, bytes = body.len(), "HTTP POST");

        let mut request = self
            .client
            .post(self.via.as_str())
            .headers(headers)
            .timeout(timeout)
            .body(body);
        if let Some((user, password)) = self.credentials.read().clone() {
            request = request.basic_auth(user, Some(password));
        }
        request.send().await.map_err(|e| self.map_send_error(e, timeout))
    }

    fn map_send_error(&self, err: reqwest::Error, timeout: Duration) -> Error {
        if err.is_timeout() {
            Error::timeout(format!("HTTP request to {}", self.via), timeout)
        } else if err.is_connect() {
            Error::EndpointNotFound(format!(
                "there was no endpoint listening at {}: {}",
                self.via, err
            ))
        } else {
            Error::communication(err.to_string())
        }
    }

    async fn read_reply(&self, response: reqwest::Response) -> Result<Option<Message>> {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                return Err(Error::EndpointNotFound(format!(
                    "there was no endpoint listening at {}",
                    self.via
                )));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::Security(format!(
                    "the HTTP request was rejected with status {}",
                    status
                )));
            }
            _ => {}
        }
        if !status.is_success() && status != StatusCode::INTERNAL_SERVER_ERROR {
            return Err(Error::communication(format!(
                "the remote server returned an unexpected response: {}",
                status
            )));
        }

        let bytes = self.read_body(response).await?;
        if status == StatusCode::ACCEPTED || bytes.is_empty() {
            return Ok(None);
        }
        let message = self.encoder.decode(&bytes)?;
        if status == StatusCode::INTERNAL_SERVER_ERROR && !message.is_fault() {
            return Err(Error::protocol(
                "the server returned status 500 without a fault body",
            ));
        }
        Ok(Some(message))
    }

    /// Read the body, failing as soon as it outgrows the received-message quota.
    async fn read_body(&self, mut response: reqwest::Response) -> Result<Bytes> {
        let quotas = &self.element.quotas;
        if let Some(length) = response.content_length() {
            quotas.check_received(usize::try_from(length).unwrap_or(usize::MAX))?;
        }
        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::communication(e.to_string()))?
        {
            quotas.check_received(body.len() + chunk.len())?;
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::protocol(format!("invalid header value '{}': {}", value, e)))
}

#[async_trait]
impl CommunicationObject for HttpRequestChannel {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, timeout: Duration) -> Result<()> {
        if self.element.authentication_scheme != AuthenticationScheme::Basic {
            return Ok(());
        }
        let provider = self.token_provider.as_ref().ok_or_else(|| {
            Error::invalid_operation("basic authentication requires client credentials")
        })?;
        match provider.token(TokenKind::UserName, timeout).await? {
            SecurityToken::UserName { username, password } => {
                *self.credentials.write() = Some((username, password));
                Ok(())
            }
            other => Err(Error::Security(format!(
                "basic authentication needs a user name token, got {:?}",
                other.kind()
            ))),
        }
    }

    async fn on_close(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn on_abort(&self) {}
}

impl Channel for HttpRequestChannel {
    fn remote_address(&self) -> &EndpointAddress {
        &self.address
    }

    fn via(&self) -> &Url {
        &self.via
    }

    fn message_version(&self) -> MessageVersion {
        self.encoder.message_version()
    }
}

#[async_trait]
impl RequestChannel for HttpRequestChannel {
    async fn request(&self, message: Message, timeout: Duration) -> Result<Message> {
        let response = self.post(message, timeout).await?;
        self.read_reply(response).await?.ok_or_else(|| {
            Error::protocol("the HTTP response contained no reply message")
        })
    }

    async fn send_one_way(&self, message: Message, timeout: Duration) -> Result<()> {
        let response = self.post(message, timeout).await?;
        match self.read_reply(response).await? {
            Some(reply) if reply.is_fault() => Err(Error::protocol(
                "the service returned a fault for a one-way message",
            )),
            _ => Ok(()),
        }
    }
}
