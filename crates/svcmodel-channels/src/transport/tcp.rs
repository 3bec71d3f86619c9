//! `net.tcp` transport.
//!
//! One TCP connection per channel, framed with a 4-byte big-endian length
//! prefix. The first frame a client writes is a [`TcpPreamble`] naming the
//! target `via` and the encoder's content type; every later frame is one
//! encoded message.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use url::Url;

use svcmodel_core::{
    CommunicationObject, CommunicationState, EndpointAddress, Error, Lifecycle, Message,
    MessageVersion, Result,
};

use crate::channel::{
    Channel, ChannelShape, DuplexChannel, InnerChannelFactory, InputChannel, OutputChannel,
    RequestChannel, RequestOverDuplex,
};
use crate::element::{TcpTransportBindingElement, TransportQuotas};
use crate::encoder::MessageEncoder;
use crate::transport::TransportContext;

/// Port used when a `net.tcp` address names none.
pub const DEFAULT_PORT: u16 = 808;

/// First frame of every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpPreamble {
    /// Physical address the client targeted
    pub via: String,
    /// Content type of every following frame
    pub content_type: String,
}

/// Length-prefixed codec with the frame limit set from the quotas.
pub fn frame_codec(quotas: &TransportQuotas) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(quotas.max_received_message_size)
        .new_codec()
}

/// Client factory for `net.tcp` addresses.
pub struct TcpChannelFactory {
    element: TcpTransportBindingElement,
    encoder: Arc<dyn MessageEncoder>,
    lifecycle: Lifecycle,
}

impl TcpChannelFactory {
    /// Factory for `element`
    pub fn new(element: TcpTransportBindingElement, context: TransportContext) -> Result<Self> {
        if let Some(upgrade) = context.stream_upgrade {
            return Err(Error::not_implemented(format!(
                "{:?} stream upgrade over net.tcp",
                upgrade
            )));
        }
        Ok(Self {
            element,
            encoder: context.encoder,
            lifecycle: Lifecycle::new("TcpChannelFactory"),
        })
    }

    fn duplex(&self, address: &EndpointAddress, via: &Url) -> Result<TcpDuplexChannel> {
        self.lifecycle.ensure_opened()?;
        if via.scheme() != "net.tcp" {
            return Err(Error::invalid_operation(format!(
                "the provided URI scheme '{}' is invalid; expected 'net.tcp'",
                via.scheme()
            )));
        }
        if via.host_str().is_none() {
            return Err(Error::invalid_operation(format!(
                "net.tcp address {} has no host",
                via
            )));
        }
        Ok(TcpDuplexChannel {
            lifecycle: Lifecycle::new(format!("TcpDuplexChannel({})", via)),
            address: address.clone(),
            via: via.clone(),
            encoder: self.encoder.clone(),
            quotas: self.element.quotas,
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
        })
    }
}

impl fmt::Debug for TcpChannelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpChannelFactory")
            .field("encoder", &self.encoder)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for TcpChannelFactory {
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

impl InnerChannelFactory for TcpChannelFactory {
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

type Reader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
type Writer = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

struct TcpDuplexChannel {
    lifecycle: Lifecycle,
    address: EndpointAddress,
    via: Url,
    encoder: Arc<dyn MessageEncoder>,
    quotas: TransportQuotas,
    reader: tokio::sync::Mutex<Option<Reader>>,
    writer: tokio::sync::Mutex<Option<Writer>>,
}

impl fmt::Debug for TcpDuplexChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpDuplexChannel")
            .field("via", &self.via.as_str())
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

enum ReceiveOutcome {
    Frame(Option<std::io::Result<bytes::BytesMut>>),
    TimedOut,
    Disposed,
}

impl TcpDuplexChannel {
    fn map_io(&self, err: std::io::Error) -> Error {
        if err.kind() == std::io::ErrorKind::InvalidData {
            // the codec rejects frames above max_frame_length
            Error::QuotaExceeded {
                what: "Received message",
                size: self.quotas.max_received_message_size.saturating_add(1),
                max: self.quotas.max_received_message_size,
            }
        } else {
            Error::communication(format!("net.tcp connection to {} failed: {}", self.via, err))
        }
    }

    async fn write_frame(&self, payload: Bytes, timeout: Duration) -> Result<()> {
        self.lifecycle.ensure_opened()?;
        let mut writer = tokio::time::timeout(timeout, self.writer.lock())
            .await
            .map_err(|_| Error::timeout("net.tcp send", timeout))?;
        let writer = writer
            .as_mut()
            .ok_or_else(|| Error::ObjectDisposed(self.lifecycle.name().to_string()))?;
        match tokio::time::timeout(timeout, writer.send(payload)).await {
            Ok(result) => result.map_err(|e| self.map_io(e)),
            Err(_) => Err(Error::timeout("net.tcp send", timeout)),
        }
    }
}

#[async_trait]
impl CommunicationObject for TcpDuplexChannel {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, timeout: Duration) -> Result<()> {
        let host = self.via.host_str().unwrap_or("localhost").to_string();
        let port = self.via.port().unwrap_or(DEFAULT_PORT);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::EndpointNotFound(format!(
                    "could not connect to {}: {}",
                    self.via, e
                )));
            }
            Err(_) => return Err(Error::timeout(format!("connect to {}", self.via), timeout)),
        };
        stream.set_nodelay(true)?;
        tracing::debug!(via = %self.via, "net.tcp connection established");

        let (read_half, write_half) = stream.into_split();
        let codec = frame_codec(&self.quotas);
        let mut writer = FramedWrite::new(write_half, codec.clone());
        let preamble = TcpPreamble {
            via: self.via.to_string(),
            content_type: self.encoder.content_type().to_string(),
        };
        writer
            .send(Bytes::from(serde_json::to_vec(&preamble)?))
            .await
            .map_err(|e| self.map_io(e))?;

        *self.reader.lock().await = Some(FramedRead::new(read_half, codec));
        *self.writer.lock().await = Some(writer);
        Ok(())
    }

    async fn on_close(&self, timeout: Duration) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            match tokio::time::timeout(timeout, SinkExt::<Bytes>::close(&mut writer)).await {
                Ok(result) => result.map_err(|e| self.map_io(e))?,
                Err(_) => return Err(Error::timeout("net.tcp close", timeout)),
            }
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        Ok(())
    }

    async fn on_abort(&self) {
        // a blocked receiver holds the reader; it drops it on wake-up
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }
}

impl Channel for TcpDuplexChannel {
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
impl OutputChannel for TcpDuplexChannel {
    async fn send(&self, message: Message, timeout: Duration) -> Result<()> {
        let payload = self.encoder.encode(message)?;
        tracing::trace!(via = %self.via, bytes = payload.len(), "net.tcp send");
        self.write_frame(payload, timeout).await
    }
}

#[async_trait]
impl InputChannel for TcpDuplexChannel {
    async fn try_receive(&self, timeout: Duration) -> Result<Option<Message>> {
        self.lifecycle.ensure_opened()?;
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(Error::ObjectDisposed(self.lifecycle.name().to_string()));
        };

        let outcome = tokio::select! {
            next = tokio::time::timeout(timeout, reader.next()) => match next {
                Ok(frame) => ReceiveOutcome::Frame(frame),
                Err(_) => ReceiveOutcome::TimedOut,
            },
            _ = self.lifecycle.wait_for(|s| s != CommunicationState::Opened) => ReceiveOutcome::Disposed,
        };

        match outcome {
            ReceiveOutcome::TimedOut => Ok(None),
            ReceiveOutcome::Disposed => {
                guard.take();
                Err(Error::ObjectDisposed(self.lifecycle.name().to_string()))
            }
            ReceiveOutcome::Frame(None) => Err(Error::communication(format!(
                "the net.tcp connection to {} was closed by the remote side",
                self.via
            ))),
            ReceiveOutcome::Frame(Some(Err(e))) => Err(self.map_io(e)),
            ReceiveOutcome::Frame(Some(Ok(frame))) => {
                self.quotas.check_received(frame.len())?;
                self.encoder.decode(&frame).map(Some)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{MessageEncodingBindingElement, StreamUpgradeBindingElement};
    use crate::stack::BindingParameters;
    use serde_json::json;
    use svcmodel_core::Timeouts;
    use tokio::net::TcpListener;

    fn context() -> TransportContext {
        TransportContext {
            encoder: MessageEncodingBindingElement::binary(MessageVersion::SOAP12_WSADDRESSING10)
                .create_encoder(),
            stream_upgrade: None,
            parameters: BindingParameters::default(),
            timeouts: Timeouts::fast(),
        }
    }

    #[test]
    fn stream_upgrades_are_not_implemented() {
        let mut ctx = context();
        ctx.stream_upgrade = Some(StreamUpgradeBindingElement::WindowsStreamSecurity);
        let err = TcpChannelFactory::new(TcpTransportBindingElement::default(), ctx).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[tokio::test]
    async fn echo_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let encoder = context().encoder;
        let server_encoder = encoder.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, w) = stream.into_split();
            let codec = frame_codec(&TransportQuotas::default());
            let mut reader = FramedRead::new(r, codec.clone());
            let mut writer = FramedWrite::new(w, codec);
            let preamble: TcpPreamble =
                serde_json::from_slice(&reader.next().await.unwrap().unwrap()).unwrap();
            while let Some(Ok(frame)) = reader.next().await {
                let mut request = server_encoder.decode(&frame).unwrap();
                let body = request.read_body().unwrap();
                let mut reply = Message::create(request.version(), "urn:echo/EchoResponse", body);
                reply.headers_mut().relates_to = request.headers().message_id.clone();
                writer.send(server_encoder.encode(reply).unwrap()).await.unwrap();
            }
            preamble
        });

        let factory = TcpChannelFactory::new(TcpTransportBindingElement::default(), context()).unwrap();
        factory.open().await.unwrap();
        let addr = EndpointAddress::parse(&format!("net.tcp://127.0.0.1:{}/echo", port)).unwrap();
        let channel = factory.create_request_channel(&addr, addr.uri()).unwrap();
        channel.open().await.unwrap();

        let mut request =
            Message::create(MessageVersion::SOAP12_WSADDRESSING10, "urn:echo/Echo", json!({"n": 7}));
        request.headers_mut().assign_message_id();
        let mut reply = channel.request(request, Duration::from_secs(5)).await.unwrap();
        assert_eq!(reply.read_body().unwrap(), json!({"n": 7}));

        channel.close().await.unwrap();
        let preamble = server.await.unwrap();
        assert_eq!(preamble.content_type, encoder.content_type());
        assert!(preamble.via.ends_with("/echo"));
    }

    #[tokio::test]
    async fn refused_connection_is_endpoint_not_found() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let factory = TcpChannelFactory::new(TcpTransportBindingElement::default(), context()).unwrap();
        factory.open().await.unwrap();
        let addr = EndpointAddress::parse(&format!("net.tcp://127.0.0.1:{}/x", port)).unwrap();
        let channel = factory.create_duplex_channel(&addr, addr.uri()).unwrap();
        let err = channel.open().await.unwrap_err();
        assert!(matches!(err, Error::EndpointNotFound(_)));
        assert_eq!(channel.state(), CommunicationState::Faulted);
    }

    #[tokio::test]
    async fn remote_hangup_is_a_communication_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = FramedRead::new(stream, frame_codec(&TransportQuotas::default()));
            let _ = reader.next().await;
        });

        let factory = TcpChannelFactory::new(TcpTransportBindingElement::default(), context()).unwrap();
        factory.open().await.unwrap();
        let addr = EndpointAddress::parse(&format!("net.tcp://127.0.0.1:{}/x", port)).unwrap();
        let channel = factory.create_duplex_channel(&addr, addr.uri()).unwrap();
        channel.open().await.unwrap();
        let err = channel.receive(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Communication(_)));
    }
}
