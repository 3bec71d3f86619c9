//! Message encoders.
//!
//! Text and MTOM write the envelope as JSON; binary writes it as CBOR. Decoding
//! rejects envelopes of a different message version and enforces reader quotas.

use std::fmt::Debug;

use bytes::Bytes;
use svcmodel_core::{
    EnvelopeVersion, Envelope, Error, Message, MessageBody, MessageVersion, Result, constants,
};

use crate::element::ReaderQuotas;

/// Turns messages into bytes and back.
pub trait MessageEncoder: Send + Sync + Debug {
    /// Full content type, including parameters
    fn content_type(&self) -> &str;

    /// Message version this encoder reads and writes
    fn message_version(&self) -> MessageVersion;

    /// Write `message`, consuming its body
    fn encode(&self, message: Message) -> Result<Bytes>;

    /// Read a message
    fn decode(&self, bytes: &[u8]) -> Result<Message>;

    /// Whether `content_type` is acceptable input
    fn is_content_type_supported(&self, content_type: &str) -> bool {
        media_type(content_type).eq_ignore_ascii_case(media_type(self.content_type()))
    }
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

fn text_content_type(version: MessageVersion) -> &'static str {
    match version.envelope {
        EnvelopeVersion::Soap11 => constants::TEXT_XML_CONTENT_TYPE,
        EnvelopeVersion::Soap12 => constants::SOAP12_CONTENT_TYPE,
        EnvelopeVersion::None => "application/json; charset=utf-8",
    }
}

fn finish_decode(envelope: Envelope, version: MessageVersion, quotas: &ReaderQuotas) -> Result<Message> {
    if envelope.version != version {
        return Err(Error::protocol(format!(
            "message version {} does not match the encoder version {}",
            envelope.version, version
        )));
    }
    match &envelope.body {
        MessageBody::Value(value) => quotas.check(value)?,
        MessageBody::Fault(fault) => {
            if let Some(detail) = &fault.detail {
                quotas.check(&detail.value)?;
            }
        }
        MessageBody::Empty => {}
    }
    Ok(Message::from_envelope(envelope))
}

/// Text envelope encoder.
#[derive(Debug, Clone)]
pub struct TextMessageEncoder {
    version: MessageVersion,
    quotas: ReaderQuotas,
}

impl TextMessageEncoder {
    /// Encoder for `version`
    pub fn new(version: MessageVersion, quotas: ReaderQuotas) -> Self {
        Self { version, quotas }
    }
}

impl MessageEncoder for TextMessageEncoder {
    fn content_type(&self) -> &str {
        text_content_type(self.version)
    }

    fn message_version(&self) -> MessageVersion {
        self.version
    }

    fn encode(&self, message: Message) -> Result<Bytes> {
        let envelope = message.into_envelope()?;
        Ok(Bytes::from(serde_json::to_vec(&envelope)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        finish_decode(envelope, self.version, &self.quotas)
    }
}

/// MTOM encoder.
///
/// Attachments are not split out; the envelope travels as the root part.
#[derive(Debug, Clone)]
pub struct MtomMessageEncoder {
    text: TextMessageEncoder,
    content_type: String,
}

impl MtomMessageEncoder {
    /// Encoder for `version`
    pub fn new(version: MessageVersion, quotas: ReaderQuotas) -> Self {
        let start_info = media_type(text_content_type(version));
        Self {
            text: TextMessageEncoder::new(version, quotas),
            content_type: format!(
                "{}; start-info=\"{}\"",
                constants::MTOM_CONTENT_TYPE,
                start_info
            ),
        }
    }
}

impl MessageEncoder for MtomMessageEncoder {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn message_version(&self) -> MessageVersion {
        self.text.version
    }

    fn encode(&self, message: Message) -> Result<Bytes> {
        self.text.encode(message)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        self.text.decode(bytes)
    }

    // MTOM readers also accept plain text messages
    fn is_content_type_supported(&self, content_type: &str) -> bool {
        let media = media_type(content_type);
        media.eq_ignore_ascii_case("multipart/related")
            || self.text.is_content_type_supported(content_type)
    }
}

/// Binary (CBOR) encoder.
#[derive(Debug, Clone)]
pub struct BinaryMessageEncoder {
    version: MessageVersion,
    quotas: ReaderQuotas,
}

impl BinaryMessageEncoder {
    /// Encoder for `version`
    pub fn new(version: MessageVersion, quotas: ReaderQuotas) -> Self {
        Self { version, quotas }
    }
}

impl MessageEncoder for BinaryMessageEncoder {
    fn content_type(&self) -> &str {
        constants::BINARY_CONTENT_TYPE
    }

    fn message_version(&self) -> MessageVersion {
        self.version
    }

    fn encode(&self, message: Message) -> Result<Bytes> {
        let envelope = message.into_envelope()?;
        let mut buf = Vec::new();
        ciborium::into_writer(&envelope, &mut buf)
            .map_err(|e| Error::serialization(format!("binary encode failed: {}", e)))?;
        Ok(Bytes::from(buf))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let envelope: Envelope = ciborium::from_reader(bytes)
            .map_err(|e| Error::serialization(format!("binary decode failed: {}", e)))?;
        finish_decode(envelope, self.version, &self.quotas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use svcmodel_core::{FaultCode, MessageFault};

    fn message(version: MessageVersion) -> Message {
        let mut m = Message::create(version, "urn:calc/Add", json!({"Add": {"a": 1.5, "b": -2}}));
        m.headers_mut().assign_message_id();
        m
    }

    #[test]
    fn text_content_types_follow_envelope() {
        let soap11 = TextMessageEncoder::new(MessageVersion::SOAP11, ReaderQuotas::default());
        let soap12 = TextMessageEncoder::new(MessageVersion::default(), ReaderQuotas::default());
        assert_eq!(soap11.content_type(), "text/xml; charset=utf-8");
        assert_eq!(soap12.content_type(), "application/soap+xml; charset=utf-8");
        assert!(soap12.is_content_type_supported("application/soap+xml; action=\"x\""));
        assert!(!soap12.is_content_type_supported("text/xml"));
    }

    #[test]
    fn binary_preserves_body_and_headers() {
        let encoder = BinaryMessageEncoder::new(MessageVersion::default(), ReaderQuotas::default());
        let original = message(MessageVersion::default());
        let id = original.headers().message_id.clone();
        let bytes = encoder.encode(original).unwrap();
        let mut decoded = encoder.decode(&bytes).unwrap();
        assert_eq!(decoded.headers().message_id, id);
        assert_eq!(decoded.action(), Some("urn:calc/Add"));
        assert_eq!(decoded.read_body().unwrap(), json!({"Add": {"a": 1.5, "b": -2}}));
    }

    #[test]
    fn version_mismatch_is_a_protocol_error() {
        let writer = TextMessageEncoder::new(MessageVersion::SOAP11, ReaderQuotas::default());
        let reader = TextMessageEncoder::new(MessageVersion::default(), ReaderQuotas::default());
        let bytes = writer.encode(message(MessageVersion::SOAP11)).unwrap();
        assert!(matches!(reader.decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn decode_applies_reader_quotas() {
        let writer = TextMessageEncoder::new(MessageVersion::SOAP11, ReaderQuotas::default());
        let reader = TextMessageEncoder::new(
            MessageVersion::SOAP11,
            ReaderQuotas {
                max_depth: 1,
                ..ReaderQuotas::default()
            },
        );
        let bytes = writer.encode(message(MessageVersion::SOAP11)).unwrap();
        assert!(matches!(reader.decode(&bytes), Err(Error::QuotaExceeded { .. })));
    }

    #[test]
    fn faults_survive_encoding() {
        let encoder = MtomMessageEncoder::new(MessageVersion::default(), ReaderQuotas::default());
        assert!(encoder.content_type().starts_with("multipart/related"));
        let fault = MessageFault::new(FaultCode::receiver(EnvelopeVersion::Soap12), "boom");
        let bytes = encoder
            .encode(Message::create_fault(MessageVersion::default(), fault.clone(), None))
            .unwrap();
        let mut decoded = encoder.decode(&bytes).unwrap();
        assert!(decoded.is_fault());
        assert_eq!(decoded.read_fault(usize::MAX).unwrap(), fault);
    }

    #[test]
    fn consumed_message_cannot_be_encoded() {
        let encoder = TextMessageEncoder::new(MessageVersion::SOAP11, ReaderQuotas::default());
        let mut msg = message(MessageVersion::SOAP11);
        msg.read_body().unwrap();
        assert!(encoder.encode(msg).is_err());
    }
}
