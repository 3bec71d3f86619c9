//! Channel stacks built from bindings, exercised over the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use svcmodel_channels::{
    Binding, BindingElement, BindingParameters, ChannelShape, CustomBinding, MemoryHub,
    MemoryTransportBindingElement, MessageEncodingBindingElement, SecurityBindingElement,
    SecurityElementKind, SecurityToken, SecurityTokenProvider, TokenKind,
    TransportBindingElement,
};
use svcmodel_core::{
    CommunicationObject, CommunicationState, EndpointAddress, Error, Message, MessageVersion,
    Result, constants,
};
use url::Url;

#[derive(Debug)]
struct StaticUser;

#[async_trait]
impl SecurityTokenProvider for StaticUser {
    async fn token(&self, kind: TokenKind, _timeout: Duration) -> Result<SecurityToken> {
        assert_eq!(kind, TokenKind::UserName);
        Ok(SecurityToken::UserName {
            username: "alice".into(),
            password: "s3cret".into(),
        })
    }
}

fn memory_binding(security: Option<SecurityElementKind>) -> CustomBinding {
    let mut elements = Vec::new();
    if let Some(kind) = security {
        elements.push(BindingElement::Security(SecurityBindingElement::new(kind)));
    }
    elements.push(BindingElement::Encoding(MessageEncodingBindingElement::binary(
        MessageVersion::SOAP12_WSADDRESSING10,
    )));
    elements.push(BindingElement::Transport(TransportBindingElement::Memory(
        MemoryTransportBindingElement::default(),
    )));
    CustomBinding::new(elements)
}

/// Serves one session on the global hub, answering every request with the
/// security header it carried (or null).
fn serve_headers(uri: &Url) {
    let encoder = MessageEncodingBindingElement::binary(MessageVersion::SOAP12_WSADDRESSING10)
        .create_encoder();
    let listener = MemoryHub::global().listen(uri, encoder).unwrap();
    tokio::spawn(async move {
        let session = listener.accept().await.unwrap();
        while let Ok(Some(request)) = session.receive().await {
            let security = request
                .headers()
                .find("Security", constants::WSSE_NAMESPACE)
                .map(|h| h.value.clone())
                .unwrap_or(serde_json::Value::Null);
            let mut reply = Message::create(request.version(), "urn:test/Reply", security);
            reply.headers_mut().relates_to = request.headers().message_id.clone();
            session.send(reply).await.unwrap();
        }
    });
}

#[tokio::test]
async fn security_layer_stamps_user_name_token() {
    let uri = Url::parse("memory://channel-stack/secured").unwrap();
    serve_headers(&uri);

    let binding = memory_binding(Some(SecurityElementKind::UserNameForCertificate));
    let parameters = BindingParameters {
        token_provider: Some(Arc::new(StaticUser)),
        ..BindingParameters::default()
    };
    let factory = binding.build_channel_factory(&parameters).unwrap();
    assert!(factory.supports(ChannelShape::Request));
    factory.open().await.unwrap();

    let address = EndpointAddress::new(uri.clone());
    let channel = factory.create_request_channel(&address, &uri).unwrap();
    channel.open().await.unwrap();

    let mut request = Message::create_empty(MessageVersion::SOAP12_WSADDRESSING10, "urn:test/Ping");
    request.headers_mut().assign_message_id();
    let mut reply = channel.request(request, Duration::from_secs(5)).await.unwrap();
    let security = reply.read_body().unwrap();
    assert_eq!(security["token"]["UsernameToken"]["Username"], json!("alice"));
    assert_eq!(security["token"]["UsernameToken"]["Password"], json!("s3cret"));
    assert!(security["timestamp"]["expires"].as_u64() > security["timestamp"]["created"].as_u64());

    channel.close().await.unwrap();
    factory.close().await.unwrap();
    assert_eq!(factory.state(), CommunicationState::Closed);
}

#[tokio::test]
async fn unsecured_stack_sends_no_security_header() {
    let uri = Url::parse("memory://channel-stack/plain").unwrap();
    serve_headers(&uri);

    let factory = memory_binding(None)
        .build_channel_factory(&BindingParameters::default())
        .unwrap();
    factory.open().await.unwrap();
    let address = EndpointAddress::new(uri.clone());
    let channel = factory.create_request_channel(&address, &uri).unwrap();
    channel.open().await.unwrap();

    let mut reply = channel
        .request(
            Message::create_empty(MessageVersion::SOAP12_WSADDRESSING10, "urn:test/Ping"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(reply.read_body().unwrap(), serde_json::Value::Null);
}

#[tokio::test]
async fn channels_require_an_opened_factory() {
    let factory = memory_binding(None)
        .build_channel_factory(&BindingParameters::default())
        .unwrap();
    let address = EndpointAddress::parse("memory://channel-stack/unopened").unwrap();
    let err = factory
        .create_request_channel(&address, address.uri())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}

#[test]
fn reliable_sessions_are_not_implemented() {
    let mut binding = svcmodel_channels::NetTcpBinding::new(svcmodel_channels::SecurityMode::None);
    binding.reliable_session.enabled = true;
    let err = binding
        .build_channel_factory(&BindingParameters::default())
        .unwrap_err();
    assert!(matches!(err, Error::NotImplemented(_)));
}
