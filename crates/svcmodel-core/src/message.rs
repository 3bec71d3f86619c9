//! Messages.
//!
//! A [`Message`] is read once: the body can be consumed by exactly one of
//! [`Message::read_body`], [`Message::into_envelope`] (writing) or
//! [`Message::create_buffered_copy`]. Further access reports an invalid
//! operation. A [`MessageBuffer`] can mint any number of fresh copies.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::addressing::EndpointAddress;
use crate::error::{Error, Result};
use crate::fault::MessageFault;
use crate::version::MessageVersion;

/// Lifecycle of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// Body not yet consumed
    Created,
    /// Body consumed by a reader
    Read,
    /// Body consumed by a writer
    Written,
    /// Body moved into a buffer
    Copied,
    /// Closed
    Closed,
}

/// A custom header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Local name
    pub name: String,
    /// Namespace
    #[serde(default)]
    pub namespace: String,
    /// Content
    pub value: serde_json::Value,
    /// Whether the receiver must understand it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub must_understand: bool,
}

impl MessageHeader {
    /// Header with content `value`
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            value,
            must_understand: false,
        }
    }
}

/// Addressing headers plus custom headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeaders {
    /// Action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Url>,
    /// Unique message id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Id of the message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<String>,
    /// Where replies go
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<EndpointAddress>,
    /// Sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<EndpointAddress>,
    /// Where faults go
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_to: Option<EndpointAddress>,
    /// Everything else
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<MessageHeader>,
}

impl MessageHeaders {
    /// Find a custom header
    pub fn find(&self, name: &str, namespace: &str) -> Option<&MessageHeader> {
        self.custom
            .iter()
            .find(|h| h.name == name && h.namespace == namespace)
    }

    /// Add a custom header, replacing one with the same name and namespace
    pub fn insert(&mut self, header: MessageHeader) {
        self.remove(&header.name, &header.namespace);
        self.custom.push(header);
    }

    /// Remove a custom header, returning it
    pub fn remove(&mut self, name: &str, namespace: &str) -> Option<MessageHeader> {
        let idx = self
            .custom
            .iter()
            .position(|h| h.name == name && h.namespace == namespace)?;
        Some(self.custom.remove(idx))
    }

    /// Assign a fresh `urn:uuid:` message id and return it
    pub fn assign_message_id(&mut self) -> String {
        let id = format!("urn:uuid:{}", uuid::Uuid::new_v4());
        self.message_id = Some(id.clone());
        id
    }
}

/// Local, non-serialized message properties.
pub type MessageProperties = HashMap<String, serde_json::Value>;

/// Message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "camelCase")]
pub enum MessageBody {
    /// No body
    Empty,
    /// Payload
    Value(serde_json::Value),
    /// Fault
    Fault(MessageFault),
}

/// Serializable form of a message, used by encoders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message version
    pub version: MessageVersion,
    /// Headers
    pub headers: MessageHeaders,
    /// Body
    pub body: MessageBody,
}

/// An envelope with read-once body semantics.
#[derive(Debug)]
pub struct Message {
    version: MessageVersion,
    headers: MessageHeaders,
    properties: MessageProperties,
    body: MessageBody,
    state: MessageState,
}

impl Message {
    /// Message with a payload
    pub fn create(version: MessageVersion, action: impl Into<String>, body: serde_json::Value) -> Self {
        Self::with_body(version, Some(action.into()), MessageBody::Value(body))
    }

    /// Message with no body
    pub fn create_empty(version: MessageVersion, action: impl Into<String>) -> Self {
        Self::with_body(version, Some(action.into()), MessageBody::Empty)
    }

    /// Fault message; without an action the addressing default fault action is used
    pub fn create_fault(version: MessageVersion, fault: MessageFault, action: Option<String>) -> Self {
        let action = action.or_else(|| {
            version
                .has_addressing()
                .then(|| version.addressing.default_fault_action().to_string())
        });
        Self::with_body(version, action, MessageBody::Fault(fault))
    }

    fn with_body(version: MessageVersion, action: Option<String>, body: MessageBody) -> Self {
        Self {
            version,
            headers: MessageHeaders {
                action,
                ..MessageHeaders::default()
            },
            properties: MessageProperties::new(),
            body,
            state: MessageState::Created,
        }
    }

    /// Rebuild a message from its serialized form
    pub fn from_envelope(envelope: Envelope) -> Self {
        Self {
            version: envelope.version,
            headers: envelope.headers,
            properties: MessageProperties::new(),
            body: envelope.body,
            state: MessageState::Created,
        }
    }

    /// Message version
    pub fn version(&self) -> MessageVersion {
        self.version
    }

    /// Headers
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Mutable headers
    pub fn headers_mut(&mut self) -> &mut MessageHeaders {
        &mut self.headers
    }

    /// Action header
    pub fn action(&self) -> Option<&str> {
        self.headers.action.as_deref()
    }

    /// Local properties
    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    /// Mutable local properties
    pub fn properties_mut(&mut self) -> &mut MessageProperties {
        &mut self.properties
    }

    /// Body state
    pub fn state(&self) -> MessageState {
        self.state
    }

    /// Whether the body is a fault
    pub fn is_fault(&self) -> bool {
        matches!(self.body, MessageBody::Fault(_))
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        matches!(self.body, MessageBody::Empty)
    }

    /// Borrow the body without consuming it
    pub fn peek_body(&self) -> Result<&MessageBody> {
        self.ensure_unconsumed()?;
        Ok(&self.body)
    }

    /// Consume the body as a JSON value. Empty bodies read as `null`.
    pub fn read_body(&mut self) -> Result<serde_json::Value> {
        self.ensure_unconsumed()?;
        self.state = MessageState::Read;
        match std::mem::replace(&mut self.body, MessageBody::Empty) {
            MessageBody::Empty => Ok(serde_json::Value::Null),
            MessageBody::Value(v) => Ok(v),
            MessageBody::Fault(f) => Ok(serde_json::to_value(f)?),
        }
    }

    /// Consume the body as `T`
    pub fn read_body_as<T: DeserializeOwned>(&mut self) -> Result<T> {
        let value = self.read_body()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Consume a fault body, enforcing `max_size` bytes
    pub fn read_fault(&mut self, max_size: usize) -> Result<MessageFault> {
        self.ensure_unconsumed()?;
        let MessageBody::Fault(fault) = &self.body else {
            return Err(Error::invalid_operation("message is not a fault"));
        };
        let size = fault.encoded_len();
        if size > max_size {
            return Err(Error::QuotaExceeded {
                what: "Fault",
                size,
                max: max_size,
            });
        }
        self.state = MessageState::Read;
        match std::mem::replace(&mut self.body, MessageBody::Empty) {
            MessageBody::Fault(fault) => Ok(fault),
            _ => Err(Error::invalid_operation("message is not a fault")),
        }
    }

    /// Consume the message into its serializable form
    pub fn into_envelope(mut self) -> Result<Envelope> {
        self.ensure_unconsumed()?;
        self.state = MessageState::Written;
        Ok(Envelope {
            version: self.version,
            headers: std::mem::take(&mut self.headers),
            body: std::mem::replace(&mut self.body, MessageBody::Empty),
        })
    }

    /// Move the body into a reusable buffer
    pub fn create_buffered_copy(&mut self) -> Result<MessageBuffer> {
        self.ensure_unconsumed()?;
        self.state = MessageState::Copied;
        let envelope = Envelope {
            version: self.version,
            headers: self.headers.clone(),
            body: std::mem::replace(&mut self.body, MessageBody::Empty),
        };
        Ok(MessageBuffer {
            envelope: Arc::new(envelope),
            properties: self.properties.clone(),
        })
    }

    /// Release the body
    pub fn close(&mut self) {
        self.body = MessageBody::Empty;
        self.state = MessageState::Closed;
    }

    fn ensure_unconsumed(&self) -> Result<()> {
        match self.state {
            MessageState::Created => Ok(()),
            MessageState::Closed => Err(Error::ObjectDisposed("Message".into())),
            other => Err(Error::invalid_operation(format!(
                "this message cannot support the operation because it has been {:?}",
                other
            ))),
        }
    }
}

/// Immutable buffered message that can be turned into fresh messages.
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    envelope: Arc<Envelope>,
    properties: MessageProperties,
}

impl MessageBuffer {
    /// A new message with the buffered content
    pub fn create_message(&self) -> Message {
        let mut message = Message::from_envelope(Envelope::clone(&self.envelope));
        message.properties = self.properties.clone();
        message
    }

    /// Whether the buffered body is a fault
    pub fn is_fault(&self) -> bool {
        matches!(self.envelope.body, MessageBody::Fault(_))
    }

    /// Buffered action
    pub fn action(&self) -> Option<&str> {
        self.envelope.headers.action.as_deref()
    }
}
