//! In-process transport (`memory://`).
//!
//! A [`MemoryHub`] maps addresses to listeners. Connecting creates a pair of
//! bounded frame queues; the listener side is handed out as a
//! [`MemorySession`] so tests and in-process services can answer requests.

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use svcmodel_core::{
    CommunicationObject, CommunicationState, EndpointAddress, Error, Lifecycle, Message,
    MessageVersion, Result,
};

use crate::channel::{
    Channel, ChannelShape, DuplexChannel, InnerChannelFactory, InputChannel, OutputChannel,
    RequestChannel, RequestOverDuplex,
};
use crate::element::{MemoryTransportBindingElement, TransportQuotas};
use crate::encoder::MessageEncoder;
use crate::transport::TransportContext;

const QUEUE_DEPTH: usize = 64;

static GLOBAL_HUB: LazyLock<MemoryHub> = LazyLock::new(MemoryHub::new);

/// One encoded message in flight.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Content type reported by the sender's encoder
    pub content_type: String,
    /// Encoded message
    pub payload: Bytes,
}

/// One end of an in-process session.
#[derive(Debug)]
struct Pipe {
    tx: mpsc::Sender<Frame>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Frame>>,
}

impl Pipe {
    fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(QUEUE_DEPTH);
        let (b_tx, a_rx) = mpsc::channel(QUEUE_DEPTH);
        (
            Self {
                tx: a_tx,
                rx: tokio::sync::Mutex::new(a_rx),
            },
            Self {
                tx: b_tx,
                rx: tokio::sync::Mutex::new(b_rx),
            },
        )
    }

    async fn send(&self, frame: Frame, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::communication("the in-process session was closed by the remote side")),
            Err(_) => Err(Error::timeout("memory send", timeout)),
        }
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<Frame>> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(Error::communication("the in-process session was closed by the remote side")),
            Err(_) => Ok(None),
        }
    }
}

fn hub_key(uri: &Url) -> String {
    let mut uri = uri.clone();
    uri.set_query(None);
    uri.set_fragment(None);
    uri.as_str().trim_end_matches('/').to_string()
}

/// Registry of in-process listeners.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    listeners: Arc<DashMap<String, mpsc::UnboundedSender<Pipe>>>,
}

impl MemoryHub {
    /// Empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide hub used by the `memory` transport
    pub fn global() -> &'static MemoryHub {
        &GLOBAL_HUB
    }

    /// Listen at `uri`, decoding with `encoder`
    pub fn listen(&self, uri: &Url, encoder: Arc<dyn MessageEncoder>) -> Result<MemoryListener> {
        let key = hub_key(uri);
        let (tx, rx) = mpsc::unbounded_channel();
        match self.listeners.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(Error::invalid_operation(format!(
                    "a listener is already registered at {}",
                    key
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        tracing::debug!(address = %key, "memory listener registered");
        Ok(MemoryListener {
            key,
            listeners: self.listeners.clone(),
            incoming: tokio::sync::Mutex::new(rx),
            encoder,
        })
    }

    fn connect(&self, uri: &Url) -> Result<Pipe> {
        let key = hub_key(uri);
        let listener = self
            .listeners
            .get(&key)
            .ok_or_else(|| Error::EndpointNotFound(format!("no listener at {}", key)))?;
        let (client, server) = Pipe::pair();
        listener
            .send(server)
            .map_err(|_| Error::EndpointNotFound(format!("listener at {} is shutting down", key)))?;
        Ok(client)
    }
}

/// Accepts in-process sessions at one address.
pub struct MemoryListener {
    key: String,
    listeners: Arc<DashMap<String, mpsc::UnboundedSender<Pipe>>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Pipe>>,
    encoder: Arc<dyn MessageEncoder>,
}

impl MemoryListener {
    /// Wait for the next session; `None` once the listener is unregistered
    pub async fn accept(&self) -> Option<MemorySession> {
        let pipe = self.incoming.lock().await.recv().await?;
        Some(MemorySession {
            pipe,
            encoder: self.encoder.clone(),
        })
    }
}

impl fmt::Debug for MemoryListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryListener")
            .field("address", &self.key)
            .finish()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.listeners.remove(&self.key);
        tracing::debug!(address = %self.key, "memory listener removed");
    }
}

/// Listener side of an in-process session.
#[derive(Debug)]
pub struct MemorySession {
    pipe: Pipe,
    encoder: Arc<dyn MessageEncoder>,
}

impl MemorySession {
    /// Next message from the client; `None` once the client hung up
    pub async fn receive(&self) -> Result<Option<Message>> {
        let mut rx = self.pipe.rx.lock().await;
        match rx.recv().await {
            Some(frame) => self.encoder.decode(&frame.payload).map(Some),
            None => Ok(None),
        }
    }

    /// Send a message to the client
    pub async fn send(&self, message: Message) -> Result<()> {
        let frame = Frame {
            content_type: self.encoder.content_type().to_string(),
            payload: self.encoder.encode(message)?,
        };
        self.pipe.send(frame, Duration::from_secs(60)).await
    }
}

/// Client factory for `memory://` addresses.
pub struct MemoryChannelFactory {
    element: MemoryTransportBindingElement,
    encoder: Arc<dyn MessageEncoder>,
    hub: MemoryHub,
    lifecycle: Lifecycle,
}

impl MemoryChannelFactory {
    /// Factory on the global hub
    pub fn new(element: MemoryTransportBindingElement, context: TransportContext) -> Self {
        Self::with_hub(element, context, MemoryHub::global().clone())
    }

    /// Factory on a private hub
    pub fn with_hub(
        element: MemoryTransportBindingElement,
        context: TransportContext,
        hub: MemoryHub,
    ) -> Self {
        Self {
            element,
            encoder: context.encoder,
            hub,
            lifecycle: Lifecycle::new("MemoryChannelFactory"),
        }
    }

    fn duplex(&self, address: &EndpointAddress, via: &Url) -> Result<MemoryDuplexChannel> {
        self.lifecycle.ensure_opened()?;
        if via.scheme() != "memory" {
            return Err(Error::invalid_operation(format!(
                "the provided URI scheme '{}' is invalid; expected 'memory'",
                via.scheme()
            )));
        }
        Ok(MemoryDuplexChannel {
            lifecycle: Lifecycle::new(format!("MemoryDuplexChannel({})", via)),
            address: address.clone(),
            via: via.clone(),
            encoder: self.encoder.clone(),
            quotas: self.element.quotas,
            hub: self.hub.clone(),
            pipe: Mutex::new(None),
        })
    }
}

impl fmt::Debug for MemoryChannelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannelFactory")
            .field("encoder", &self.encoder)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for MemoryChannelFactory {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn on_close(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn on_abort(&self) {}
}

impl InnerChannelFactory for MemoryChannelFactory {
    fn message_version(&self) -> MessageVersion {
        self.encoder.message_version()
    }

    fn shapes(&self) -> &[ChannelShape] {
        &[ChannelShape::Request, ChannelShape::Duplex]
    }

    fn create_request_channel(
        &self,
        address: &EndpointAddress,
        via: &Url,
    ) -> Result<Arc<dyn RequestChannel>> {
        let duplex: Arc<dyn DuplexChannel> = Arc::new(self.duplex(address, via)?);
        Ok(Arc::new(RequestOverDuplex::new(duplex)))
    }

    fn create_duplex_channel(
        &self,
        address: &EndpointAddress,
        via: &Url,
    ) -> Result<Arc<dyn DuplexChannel>> {
        Ok(Arc::new(self.duplex(address, via)?))
    }
}

/// Client side of an in-process session.
struct MemoryDuplexChannel {
    lifecycle: Lifecycle,
    address: EndpointAddress,
    via: Url,
    encoder: Arc<dyn MessageEncoder>,
    quotas: TransportQuotas,
    hub: MemoryHub,
    pipe: Mutex<Option<Arc<Pipe>>>,
}

impl MemoryDuplexChannel {
    fn pipe(&self) -> Result<Arc<Pipe>> {
        self.lifecycle.ensure_opened()?;
        self.pipe
            .lock()
            .clone()
            .ok_or_else(|| Error::ObjectDisposed(self.lifecycle.name().to_string()))
    }
}

impl fmt::Debug for MemoryDuplexChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDuplexChannel")
            .field("via", &self.via.as_str())
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for MemoryDuplexChannel {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, _timeout: Duration) -> Result<()> {
        let pipe = self.hub.connect(&self.via)?;
        *self.pipe.lock() = Some(Arc::new(pipe));
        Ok(())
    }

    async fn on_close(&self, _timeout: Duration) -> Result<()> {
        self.pipe.lock().take();
        Ok(())
    }

    async fn on_abort(&self) {
        self.pipe.lock().take();
    }
}

impl Channel for MemoryDuplexChannel {
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
impl OutputChannel for MemoryDuplexChannel {
    async fn send(&self, message: Message, timeout: Duration) -> Result<()> {
        let pipe = self.pipe()?;
        let frame = Frame {
            content_type: self.encoder.content_type().to_string(),
            payload: self.encoder.encode(message)?,
        };
        tracing::trace!(via = %self.via, bytes = frame.payload.len(), "memory send");
        pipe.send(frame, timeout).await
    }
}

#[async_trait]
impl InputChannel for MemoryDuplexChannel {
    async fn try_receive(&self, timeout: Duration) -> Result<Option<Message>> {
        let pipe = self.pipe()?;
        let frame = tokio::select! {
            received = pipe.recv(timeout) => received?,
            _ = self.lifecycle.wait_for(|s| s != CommunicationState::Opened) => {
                return Err(Error::ObjectDisposed(self.lifecycle.name().to_string()));
            }
        };
        let Some(frame) = frame else {
            return Ok(None);
        };
        self.quotas.check_received(frame.payload.len())?;
        if !self.encoder.is_content_type_supported(&frame.content_type) {
            return Err(Error::protocol(format!(
                "content type {} does not match the expected {}",
                frame.content_type,
                self.encoder.content_type()
            )));
        }
        self.encoder.decode(&frame.payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::MessageEncodingBindingElement;
    use crate::stack::BindingParameters;
    use serde_json::json;
    use svcmodel_core::Timeouts;

    fn context() -> TransportContext {
        TransportContext {
            encoder: MessageEncodingBindingElement::default().create_encoder(),
            stream_upgrade: None,
            parameters: BindingParameters::default(),
            timeouts: Timeouts::fast(),
        }
    }

    #[tokio::test]
    async fn connect_without_listener_fails() {
        let hub = MemoryHub::new();
        let factory =
            MemoryChannelFactory::with_hub(MemoryTransportBindingElement::default(), context(), hub);
        factory.open().await.unwrap();
        let addr = EndpointAddress::parse("memory://nobody/home").unwrap();
        let channel = factory.create_duplex_channel(&addr, addr.uri()).unwrap();
        let err = channel.open().await.unwrap_err();
        assert!(matches!(err, Error::EndpointNotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_listener_is_rejected() {
        let hub = MemoryHub::new();
        let uri = Url::parse("memory://dup").unwrap();
        let encoder = context().encoder;
        let _first = hub.listen(&uri, encoder.clone()).unwrap();
        assert!(hub.listen(&uri, encoder.clone()).is_err());
        drop(_first);
        assert!(hub.listen(&uri, encoder).is_ok());
    }

    #[tokio::test]
    async fn request_round_trip() {
        let hub = MemoryHub::new();
        let uri = Url::parse("memory://echo/svc").unwrap();
        let ctx = context();
        let listener = hub.listen(&uri, ctx.encoder.clone()).unwrap();
        tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            while let Ok(Some(mut msg)) = session.receive().await {
                let body = msg.read_body().unwrap();
                let mut reply = Message::create(msg.version(), "urn:echo/EchoResponse", body);
                reply.headers_mut().relates_to = msg.headers().message_id.clone();
                session.send(reply).await.unwrap();
            }
        });

        let factory =
            MemoryChannelFactory::with_hub(MemoryTransportBindingElement::default(), ctx, hub);
        factory.open().await.unwrap();
        let addr = EndpointAddress::new(uri.clone());
        let channel = factory.create_request_channel(&addr, &uri).unwrap();
        channel.open().await.unwrap();

        for n in 0..3 {
            let mut request = Message::create(MessageVersion::default(), "urn:echo/Echo", json!(n));
            request.headers_mut().assign_message_id();
            let mut reply = channel.request(request, Duration::from_secs(5)).await.unwrap();
            assert_eq!(reply.read_body().unwrap(), json!(n));
        }
        channel.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn request_without_reply_times_out() {
        let hub = MemoryHub::new();
        let uri = Url::parse("memory://silent").unwrap();
        let ctx = context();
        let listener = hub.listen(&uri, ctx.encoder.clone()).unwrap();
        let _server = tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            while let Ok(Some(_)) = session.receive().await {}
        });

        let factory =
            MemoryChannelFactory::with_hub(MemoryTransportBindingElement::default(), ctx, hub);
        factory.open().await.unwrap();
        let addr = EndpointAddress::new(uri.clone());
        let channel = factory.create_request_channel(&addr, &uri).unwrap();
        channel.open().await.unwrap();
        let err = channel
            .request(
                Message::create_empty(MessageVersion::default(), "urn:x"),
                Duration::from_millis(200),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected() {
        let hub = MemoryHub::new();
        let uri = Url::parse("memory://big").unwrap();
        let ctx = context();
        let listener = hub.listen(&uri, ctx.encoder.clone()).unwrap();
        tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            let reply = Message::create(MessageVersion::default(), "urn:big", json!("x".repeat(4096)));
            session.send(reply).await.unwrap();
            // keep the session alive until the client is done
            let _ = session.receive().await;
        });

        let element = MemoryTransportBindingElement {
            quotas: TransportQuotas {
                max_received_message_size: 1024,
                ..TransportQuotas::default()
            },
        };
        let factory = MemoryChannelFactory::with_hub(element, ctx, hub);
        factory.open().await.unwrap();
        let addr = EndpointAddress::new(uri.clone());
        let channel = factory.create_duplex_channel(&addr, &uri).unwrap();
        channel.open().await.unwrap();
        let err = channel.receive(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn abort_unblocks_receive() {
        let hub = MemoryHub::new();
        let uri = Url::parse("memory://idle").unwrap();
        let ctx = context();
        let listener = hub.listen(&uri, ctx.encoder.clone()).unwrap();
        let _server = tokio::spawn(async move {
            let session = listener.accept().await.unwrap();
            let _ = session.receive().await;
        });

        let factory =
            MemoryChannelFactory::with_hub(MemoryTransportBindingElement::default(), ctx, hub);
        factory.open().await.unwrap();
        let addr = EndpointAddress::new(uri.clone());
        let channel = factory.create_duplex_channel(&addr, &uri).unwrap();
        channel.open().await.unwrap();

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.try_receive(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        channel.abort().await;
        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::ObjectDisposed(_))));
    }
}
