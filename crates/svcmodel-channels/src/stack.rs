//! Channel stack assembly.
//!
//! [`build_channel_factory`] walks a binding element list, outermost first,
//! and produces the factory for the whole stack:
//!
//! ```text
//!   elements:  [Security] [Encoding] [StreamUpgrade] [Transport]
//!                  │          │            │              │
//!                  │          └──encoder───┴──upgrade────▶ transport factory
//!                  └─────────── wraps ◀───────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use svcmodel_core::{Error, Result, Timeouts};

use crate::channel::InnerChannelFactory;
use crate::element::{BindingElement, MessageEncodingBindingElement, TransportBindingElement};
use crate::security::{SecurityChannelFactory, SecurityTokenProvider};
use crate::transport::{TransportContext, http, memory, tcp};

/// Parameters endpoint behaviors contribute to the stack.
#[derive(Debug, Clone, Default)]
pub struct BindingParameters {
    /// Token source for the security layer and authenticating transports
    pub token_provider: Option<Arc<dyn SecurityTokenProvider>>,
    /// Free-form settings for custom layers
    pub properties: HashMap<String, serde_json::Value>,
}

/// Check element ordering: exactly one transport, last; at most one encoder.
pub fn validate_elements(elements: &[BindingElement]) -> Result<()> {
    let transports = elements
        .iter()
        .filter(|e| matches!(e, BindingElement::Transport(_)))
        .count();
    if transports != 1 {
        return Err(Error::invalid_operation(format!(
            "a binding must contain exactly one transport element, found {}",
            transports
        )));
    }
    if !matches!(elements.last(), Some(BindingElement::Transport(_))) {
        return Err(Error::invalid_operation(
            "the transport element must be the last element of a binding",
        ));
    }
    let encoders = elements
        .iter()
        .filter(|e| matches!(e, BindingElement::Encoding(_)))
        .count();
    if encoders > 1 {
        return Err(Error::invalid_operation(
            "a binding can contain at most one message encoding element",
        ));
    }
    Ok(())
}

/// Build the factory for a binding element stack.
pub fn build_channel_factory(
    elements: Vec<BindingElement>,
    parameters: &BindingParameters,
    timeouts: Timeouts,
) -> Result<Arc<dyn InnerChannelFactory>> {
    validate_elements(&elements)?;

    let mut security = Vec::new();
    let mut encoding = None;
    let mut stream_upgrade = None;
    let mut transport = None;

    for element in elements {
        tracing::trace!(layer = element.kind(), "building channel layer");
        match element {
            BindingElement::Security(s) => security.push(s),
            BindingElement::ReliableSession(_) => {
                return Err(Error::not_implemented("reliable sessions"));
            }
            BindingElement::Encoding(e) => encoding = Some(e),
            BindingElement::StreamUpgrade(u) => stream_upgrade = Some(u),
            BindingElement::Transport(t) => transport = Some(t),
        }
    }

    let encoding = encoding.unwrap_or_else(MessageEncodingBindingElement::default);
    let context = TransportContext {
        encoder: encoding.create_encoder(),
        stream_upgrade,
        parameters: parameters.clone(),
        timeouts,
    };

    let mut factory: Arc<dyn InnerChannelFactory> = match transport {
        Some(TransportBindingElement::Http(element)) => {
            Arc::new(http::HttpChannelFactory::new(element, false, context)?)
        }
        Some(TransportBindingElement::Https(element)) => {
            if element.require_client_certificate {
                return Err(Error::not_implemented(
                    "HTTPS client certificate authentication",
                ));
            }
            Arc::new(http::HttpChannelFactory::new(element.http, true, context)?)
        }
        Some(TransportBindingElement::Tcp(element)) => {
            Arc::new(tcp::TcpChannelFactory::new(element, context)?)
        }
        Some(TransportBindingElement::Memory(element)) => {
            Arc::new(memory::MemoryChannelFactory::new(element, context))
        }
        Some(TransportBindingElement::Custom(custom)) => custom.provider.create_factory(context)?,
        None => return Err(Error::invalid_operation("binding has no transport element")),
    };

    // innermost security layer wraps the transport first
    for element in security.into_iter().rev() {
        factory = Arc::new(SecurityChannelFactory::new(
            factory,
            element,
            parameters.token_provider.clone(),
        )?);
    }

    Ok(factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{
        HttpsTransportBindingElement, MemoryTransportBindingElement, SecurityBindingElement,
        SecurityElementKind,
    };
    use svcmodel_core::MessageVersion;

    fn memory() -> BindingElement {
        BindingElement::Transport(TransportBindingElement::Memory(
            MemoryTransportBindingElement::default(),
        ))
    }

    #[test]
    fn transport_must_be_last() {
        let elements = vec![
            memory(),
            BindingElement::Encoding(MessageEncodingBindingElement::default()),
        ];
        assert!(validate_elements(&elements).is_err());
        assert!(validate_elements(&[]).is_err());
        assert!(validate_elements(&[memory(), memory()]).is_err());
    }

    #[test]
    fn encoder_defaults_to_text() {
        let factory =
            build_channel_factory(vec![memory()], &BindingParameters::default(), Timeouts::fast())
                .unwrap();
        assert_eq!(factory.message_version(), MessageVersion::default());
    }

    #[test]
    fn encoder_version_flows_to_factory() {
        let factory = build_channel_factory(
            vec![
                BindingElement::Encoding(MessageEncodingBindingElement::binary(
                    MessageVersion::SOAP11,
                )),
                memory(),
            ],
            &BindingParameters::default(),
            Timeouts::fast(),
        )
        .unwrap();
        assert_eq!(factory.message_version(), MessageVersion::SOAP11);
    }

    #[test]
    fn security_without_credentials_is_rejected() {
        let elements = vec![
            BindingElement::Security(SecurityBindingElement::new(
                SecurityElementKind::MutualCertificate,
            )),
            BindingElement::Encoding(MessageEncodingBindingElement::default()),
            memory(),
        ];
        let err = build_channel_factory(elements, &BindingParameters::default(), Timeouts::fast())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn client_certificates_are_not_implemented() {
        let elements = vec![BindingElement::Transport(TransportBindingElement::Https(
            HttpsTransportBindingElement {
                require_client_certificate: true,
                ..HttpsTransportBindingElement::default()
            },
        ))];
        let err = build_channel_factory(elements, &BindingParameters::default(), Timeouts::fast())
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }
}
