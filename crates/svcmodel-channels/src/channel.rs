//! Channel shapes and the factories that create them.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use svcmodel_core::{
    CommunicationObject, EndpointAddress, Error, Lifecycle, Message, MessageVersion, Result,
};

/// Message exchange pattern of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelShape {
    /// Send a message and wait for the correlated reply
    Request,
    /// Send messages, no replies
    Output,
    /// Receive messages
    Input,
    /// Send and receive independently over one session
    Duplex,
}

/// Common surface of every channel.
pub trait Channel: CommunicationObject + Debug {
    /// Logical destination
    fn remote_address(&self) -> &EndpointAddress;

    /// Physical destination
    fn via(&self) -> &Url;

    /// Version of the messages this channel carries
    fn message_version(&self) -> MessageVersion;
}

/// Request/reply channel.
#[async_trait]
pub trait RequestChannel: Channel {
    /// Send `message` and return the reply.
    async fn request(&self, message: Message, timeout: Duration) -> Result<Message>;

    /// Send `message` without waiting for a reply payload.
    async fn send_one_way(&self, message: Message, timeout: Duration) -> Result<()>;
}

/// Send-only channel.
#[async_trait]
pub trait OutputChannel: Channel {
    /// Send `message`.
    async fn send(&self, message: Message, timeout: Duration) -> Result<()>;
}

/// Receive-only channel.
#[async_trait]
pub trait InputChannel: Channel {
    /// Wait up to `timeout` for a message. `Ok(None)` means nothing arrived.
    ///
    /// A session closed by the remote side is reported as an error.
    async fn try_receive(&self, timeout: Duration) -> Result<Option<Message>>;

    /// Wait up to `timeout` for a message, failing on timeout.
    async fn receive(&self, timeout: Duration) -> Result<Message> {
        match self.try_receive(timeout).await? {
            Some(message) => Ok(message),
            None => Err(Error::timeout("receive", timeout)),
        }
    }
}

/// Bidirectional session channel.
pub trait DuplexChannel: InputChannel + OutputChannel {}

impl<T: InputChannel + OutputChannel> DuplexChannel for T {}

/// Creates channels for one binding stack.
///
/// The stack builder returns the outermost factory; each layer (security,
/// transport) implements this trait and delegates inward.
pub trait InnerChannelFactory: CommunicationObject + Debug {
    /// Message version produced by the encoding layer
    fn message_version(&self) -> MessageVersion;

    /// Shapes the factory can create
    fn shapes(&self) -> &[ChannelShape];

    /// Whether `shape` is supported
    fn supports(&self, shape: ChannelShape) -> bool {
        self.shapes().contains(&shape)
    }

    /// New request channel
    fn create_request_channel(
        &self,
        address: &EndpointAddress,
        via: &Url,
    ) -> Result<Arc<dyn RequestChannel>> {
        let _ = (address, via);
        Err(unsupported_shape(ChannelShape::Request))
    }

    /// New duplex channel
    fn create_duplex_channel(
        &self,
        address: &EndpointAddress,
        via: &Url,
    ) -> Result<Arc<dyn DuplexChannel>> {
        let _ = (address, via);
        Err(unsupported_shape(ChannelShape::Duplex))
    }
}

pub(crate) fn unsupported_shape(shape: ChannelShape) -> Error {
    Error::invalid_operation(format!(
        "the channel stack does not support the {:?} channel shape",
        shape
    ))
}

/// Request/reply over a duplex session.
///
/// Requests are single-flight: the next request is not sent until the
/// previous reply arrived or timed out, so the next inbound message is the reply.
pub struct RequestOverDuplex {
    inner: Arc<dyn DuplexChannel>,
    lifecycle: Lifecycle,
    in_flight: tokio::sync::Mutex<()>,
}

impl RequestOverDuplex {
    /// Wrap a duplex channel
    pub fn new(inner: Arc<dyn DuplexChannel>) -> Self {
        Self {
            lifecycle: Lifecycle::new(format!("RequestChannel({})", inner.via())),
            inner,
            in_flight: tokio::sync::Mutex::new(()),
        }
    }
}

impl Debug for RequestOverDuplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOverDuplex")
            .field("inner", &self.inner)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for RequestOverDuplex {
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

impl Channel for RequestOverDuplex {
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
impl RequestChannel for RequestOverDuplex {
    async fn request(&self, message: Message, timeout: Duration) -> Result<Message> {
        self.lifecycle.ensure_opened()?;
        let deadline = tokio::time::Instant::now() + timeout;
        let _guard = tokio::time::timeout_at(deadline, self.in_flight.lock())
            .await
            .map_err(|_| Error::timeout("waiting for in-flight request", timeout))?;

        let message_id = message.headers().message_id.clone();
        self.inner.send(message, timeout).await?;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout("request", timeout));
            }
            let Some(reply) = self.inner.try_receive(remaining).await? else {
                continue;
            };
            // a late reply to an earlier, timed-out request
            if let (Some(sent), Some(relates)) = (&message_id, &reply.headers().relates_to)
                && sent != relates
            {
                tracing::warn!(relates_to = %relates, "dropping reply for an earlier request");
                continue;
            }
            return Ok(reply);
        }
    }

    async fn send_one_way(&self, message: Message, timeout: Duration) -> Result<()> {
        self.lifecycle.ensure_opened()?;
        let _guard = tokio::time::timeout(timeout, self.in_flight.lock())
            .await
            .map_err(|_| Error::timeout("waiting for in-flight request", timeout))?;
        self.inner.send(message, timeout).await
    }
}
