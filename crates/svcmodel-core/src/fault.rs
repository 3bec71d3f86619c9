//! Faults: the wire model and the error raised to callers.
//!
//! A reply whose body is a [`MessageFault`] surfaces to the caller as a
//! [`FaultException`]. When the fault detail matches a declared fault contract
//! the exception carries a [`TypedDetail`] that can be downcast with
//! [`FaultException::detail`]; otherwise only the raw fault is available.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::version::{EnvelopeVersion, MessageVersion};

/// Fault code with optional nested subcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCode {
    /// Local name
    pub name: String,
    /// Namespace, empty for envelope-defined codes
    #[serde(default)]
    pub namespace: String,
    /// More specific code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcode: Option<Box<FaultCode>>,
}

impl FaultCode {
    /// Code with a local name and no namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            subcode: None,
        }
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Nest a subcode
    pub fn with_subcode(mut self, subcode: FaultCode) -> Self {
        self.subcode = Some(Box::new(subcode));
        self
    }

    /// Envelope sender code for `version`
    pub fn sender(version: EnvelopeVersion) -> Self {
        Self::new(version.sender_fault_name()).with_namespace(version.namespace())
    }

    /// Envelope receiver code for `version`
    pub fn receiver(version: EnvelopeVersion) -> Self {
        Self::new(version.receiver_fault_name()).with_namespace(version.namespace())
    }

    /// Whether the code blames the sender
    pub fn is_sender_fault(&self) -> bool {
        matches!(self.name.as_str(), "Sender" | "Client")
    }

    /// Whether the code blames the receiver
    pub fn is_receiver_fault(&self) -> bool {
        matches!(self.name.as_str(), "Receiver" | "Server")
    }

    /// Find a code by name along the subcode chain, including `self`
    pub fn find(&self, name: &str) -> Option<&FaultCode> {
        let mut code = Some(self);
        while let Some(c) = code {
            if c.name == name {
                return Some(c);
            }
            code = c.subcode.as_deref();
        }
        None
    }
}

/// One translation of a fault reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultReasonText {
    /// Reason text
    pub text: String,
    /// Language tag
    pub lang: String,
}

/// Human-readable fault reason in one or more languages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultReason {
    /// Available translations, first is the default
    pub translations: Vec<FaultReasonText>,
}

impl FaultReason {
    /// Single `en-US` reason
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            translations: vec![FaultReasonText {
                text: text.into(),
                lang: "en-US".into(),
            }],
        }
    }

    /// Text for the first translation, empty when none
    pub fn text(&self) -> &str {
        self.translations
            .first()
            .map(|t| t.text.as_str())
            .unwrap_or_default()
    }

    /// Text for `lang`, falling back to the first translation
    pub fn matching_translation(&self, lang: &str) -> &str {
        self.translations
            .iter()
            .find(|t| t.lang.eq_ignore_ascii_case(lang))
            .map(|t| t.text.as_str())
            .unwrap_or_else(|| self.text())
    }
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Detail element of a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultDetail {
    /// Element local name
    pub name: String,
    /// Element namespace
    #[serde(default)]
    pub namespace: String,
    /// Element content
    pub value: serde_json::Value,
}

/// A fault as carried on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFault {
    /// Fault code
    pub code: FaultCode,
    /// Reason
    pub reason: FaultReason,
    /// Actor (SOAP 1.1) or role (SOAP 1.2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Node (SOAP 1.2)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Optional detail element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<FaultDetail>,
}

impl MessageFault {
    /// Fault with a code and reason
    pub fn new(code: FaultCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: FaultReason::new(reason),
            actor: None,
            node: None,
            detail: None,
        }
    }

    /// Attach a detail element by serializing `value`
    pub fn with_detail<T: Serialize>(
        mut self,
        name: impl Into<String>,
        namespace: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        self.detail = Some(FaultDetail {
            name: name.into(),
            namespace: namespace.into(),
            value: serde_json::to_value(value)?,
        });
        Ok(self)
    }

    /// Whether a detail element is present
    pub fn has_detail(&self) -> bool {
        self.detail.is_some()
    }

    /// Deserialize the detail element as `T`
    pub fn detail_as<T: DeserializeOwned>(&self) -> Result<T> {
        let detail = self
            .detail
            .as_ref()
            .ok_or_else(|| Error::serialization("fault has no detail"))?;
        Ok(serde_json::from_value(detail.value.clone())?)
    }

    /// Approximate wire size, used for fault-size quotas
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Built-in fault detail describing a service-side error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExceptionDetail {
    /// Help link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_link: Option<String>,
    /// Nested cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_exception: Option<Box<ExceptionDetail>>,
    /// Error message
    pub message: String,
    /// Stack trace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Error type name
    #[serde(rename = "Type")]
    pub type_name: String,
}

impl ExceptionDetail {
    /// Element name used on the wire
    pub const ELEMENT_NAME: &'static str = "ExceptionDetail";

    /// Detail for an error value
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            help_link: None,
            inner_exception: err.source().map(|s| Box::new(Self::from_error(s))),
            message: err.to_string(),
            stack_trace: None,
            type_name: "Error".into(),
        }
    }
}

/// A fault detail decoded into a known type.
#[derive(Clone)]
pub struct TypedDetail {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl TypedDetail {
    /// Wrap a decoded detail
    pub fn new<D: Any + Send + Sync>(value: D) -> Self {
        Self {
            type_name: type_name::<D>(),
            value: Arc::new(value),
        }
    }

    /// Rust type name of the detail
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Downcast to `D`
    pub fn downcast_ref<D: Any>(&self) -> Option<&D> {
        self.value.downcast_ref::<D>()
    }
}

impl fmt::Debug for TypedDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedDetail")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// The error raised when a call returns a fault.
#[derive(Debug, Clone)]
pub struct FaultException {
    fault: MessageFault,
    action: Option<String>,
    detail: Option<TypedDetail>,
}

impl FaultException {
    /// Fault without a typed detail
    pub fn new(fault: MessageFault, action: Option<String>) -> Self {
        Self {
            fault,
            action,
            detail: None,
        }
    }

    /// Fault with a typed detail
    pub fn with_detail(fault: MessageFault, action: Option<String>, detail: TypedDetail) -> Self {
        Self {
            fault,
            action,
            detail: Some(detail),
        }
    }

    /// Fault code
    pub fn code(&self) -> &FaultCode {
        &self.fault.code
    }

    /// Fault reason
    pub fn reason(&self) -> &FaultReason {
        &self.fault.reason
    }

    /// Action of the fault message
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Raw wire fault
    pub fn message_fault(&self) -> &MessageFault {
        &self.fault
    }

    /// Whether the detail was decoded into a declared type
    pub fn has_typed_detail(&self) -> bool {
        self.detail.is_some()
    }

    /// Type name of the typed detail
    pub fn detail_type_name(&self) -> Option<&'static str> {
        self.detail.as_ref().map(TypedDetail::type_name)
    }

    /// Typed detail, if it was decoded as `D`
    pub fn detail<D: Any>(&self) -> Option<&D> {
        self.detail.as_ref().and_then(TypedDetail::downcast_ref::<D>)
    }
}

/// A fault whose detail decoded as `D`.
#[derive(Debug, Clone, Copy)]
pub struct TypedFault<'a, D> {
    /// The whole fault
    pub fault: &'a FaultException,
    /// Its typed detail
    pub detail: &'a D,
}

impl<'a, D: Any> TypedFault<'a, D> {
    /// View `fault` as carrying a `D` detail
    pub fn from_fault(fault: &'a FaultException) -> Option<Self> {
        fault.detail::<D>().map(|detail| Self { fault, detail })
    }
}

impl fmt::Display for FaultException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fault ({}): {}", self.fault.code.name, self.fault.reason)
    }
}

impl std::error::Error for FaultException {}

/// Maps well-known faults to dedicated errors.
///
/// The client runtime offers every fault to its converter before building a
/// [`FaultException`].
pub trait FaultConverter: Send + Sync + fmt::Debug {
    /// Return `Some` to replace the fault with a specific error
    fn try_create_error(&self, message: &Message, fault: &MessageFault) -> Option<Error>;
}

/// Converter for the addressing faults every binding understands.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFaultConverter {
    version: MessageVersion,
}

impl DefaultFaultConverter {
    /// Converter for `version`
    pub fn new(version: MessageVersion) -> Self {
        Self { version }
    }
}

impl FaultConverter for DefaultFaultConverter {
    fn try_create_error(&self, _message: &Message, fault: &MessageFault) -> Option<Error> {
        let reason = fault.reason.text().to_string();
        if fault.code.find(constants::ACTION_NOT_SUPPORTED).is_some() {
            return Some(Error::ActionNotSupported(reason));
        }
        if fault.code.find(constants::DESTINATION_UNREACHABLE).is_some() {
            return Some(Error::EndpointNotFound(reason));
        }
        if self.version.envelope == EnvelopeVersion::None && fault.code.is_receiver_fault() {
            return Some(Error::communication(reason));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct MathFault {
        operation: String,
        problem: String,
    }

    #[test]
    fn subcode_lookup() {
        let code = FaultCode::sender(EnvelopeVersion::Soap12).with_subcode(
            FaultCode::new(constants::ACTION_NOT_SUPPORTED)
                .with_namespace(constants::WSA10_NAMESPACE),
        );
        assert!(code.is_sender_fault());
        assert!(code.find(constants::ACTION_NOT_SUPPORTED).is_some());
        assert!(code.find("Nope").is_none());
    }

    #[test]
    fn detail_round_trip() {
        let detail = MathFault {
            operation: "Divide".into(),
            problem: "divide by zero".into(),
        };
        let fault = MessageFault::new(FaultCode::sender(EnvelopeVersion::Soap12), "bad input")
            .with_detail("MathFault", "urn:calc", &detail)
            .unwrap();
        assert!(fault.has_detail());
        assert_eq!(fault.detail_as::<MathFault>().unwrap(), detail);
    }

    #[test]
    fn typed_detail_downcasts() {
        let fault = MessageFault::new(FaultCode::receiver(EnvelopeVersion::Soap11), "boom");
        let ex = FaultException::with_detail(
            fault,
            None,
            TypedDetail::new(MathFault {
                operation: "Add".into(),
                problem: "overflow".into(),
            }),
        );
        assert!(ex.has_typed_detail());
        assert_eq!(ex.detail::<MathFault>().unwrap().problem, "overflow");
        assert!(ex.detail::<ExceptionDetail>().is_none());
        assert_eq!(ex.to_string(), "Fault (Server): boom");
    }

    #[test]
    fn default_converter_maps_addressing_faults() {
        let converter = DefaultFaultConverter::new(MessageVersion::SOAP12_WSADDRESSING10);
        let fault = MessageFault::new(
            FaultCode::sender(EnvelopeVersion::Soap12)
                .with_subcode(FaultCode::new(constants::DESTINATION_UNREACHABLE)),
            "no endpoint",
        );
        let msg = Message::create_fault(MessageVersion::SOAP12_WSADDRESSING10, fault.clone(), None);
        assert!(matches!(
            converter.try_create_error(&msg, &fault),
            Some(Error::EndpointNotFound(_))
        ));

        let plain = MessageFault::new(FaultCode::sender(EnvelopeVersion::Soap12), "bad");
        assert!(converter.try_create_error(&msg, &plain).is_none());
    }

    #[test]
    fn exception_detail_from_error_chain() {
        let io = std::io::Error::other("disk full");
        let detail = ExceptionDetail::from_error(&io);
        assert_eq!(detail.message, "disk full");
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["Message"], "disk full");
        assert_eq!(json["Type"], "Error");
    }

    #[test]
    fn reason_translation_fallback() {
        let mut reason = FaultReason::new("hello");
        reason.translations.push(FaultReasonText {
            text: "bonjour".into(),
            lang: "fr-FR".into(),
        });
        assert_eq!(reason.matching_translation("fr-fr"), "bonjour");
        assert_eq!(reason.matching_translation("de-DE"), "hello");
    }
}
