//! Transport channel factories.
//!
//! | scheme    | shapes            | module      |
//! |-----------|-------------------|-------------|
//! | `memory`  | request, duplex   | [`memory`]  |
//! | `http(s)` | request           | [`http`]    |
//! | `net.tcp` | request, duplex   | [`tcp`]     |
//!
//! Applications plug in further transports through [`TransportFactoryProvider`].

pub mod http;
pub mod memory;
pub mod tcp;

use std::fmt::Debug;
use std::sync::Arc;

use svcmodel_core::Timeouts;

use crate::channel::InnerChannelFactory;
use crate::element::StreamUpgradeBindingElement;
use crate::encoder::MessageEncoder;
use crate::stack::BindingParameters;

/// Everything a transport needs from the layers above it.
#[derive(Debug, Clone)]
pub struct TransportContext {
    /// Encoder chosen by the encoding layer
    pub encoder: Arc<dyn MessageEncoder>,
    /// Stream upgrade requested beneath the encoder
    pub stream_upgrade: Option<StreamUpgradeBindingElement>,
    /// Parameters contributed by endpoint behaviors
    pub parameters: BindingParameters,
    /// Binding timeouts
    pub timeouts: Timeouts,
}

/// Source of channel factories for an application-defined transport.
pub trait TransportFactoryProvider: Send + Sync + Debug {
    /// Build the transport factory
    fn create_factory(&self, context: TransportContext) -> svcmodel_core::Result<Arc<dyn InnerChannelFactory>>;
}
