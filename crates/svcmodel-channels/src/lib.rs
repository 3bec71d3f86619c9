//! # svcmodel channels
//!
//! Bindings and the channel stacks they build.
//!
//! A [`Binding`] produces an ordered list of [`BindingElement`]s; the stack
//! builder turns that list into an [`InnerChannelFactory`] which creates
//! request or duplex channels for an endpoint address.
//!
//! ## Layers
//!
//! - **Security**: [`SecurityChannelFactory`] stamps a security header built from a [`SecurityToken`]
//! - **Encoding**: [`TextMessageEncoder`], [`MtomMessageEncoder`], [`BinaryMessageEncoder`]
//! - **Transport**: [`transport::memory`], [`transport::http`], [`transport::tcp`], or a
//!   [`TransportFactoryProvider`] supplied by the application
//!
//! ## Example
//!
//! ```rust,ignore
//! use svcmodel_channels::{BasicHttpBinding, BasicHttpSecurityMode, Binding, HttpClientCredentialType};
//!
//! let binding = BasicHttpBinding::new(BasicHttpSecurityMode::Transport)
//!     .with_transport_credential(HttpClientCredentialType::Basic);
//! let elements = binding.create_binding_elements()?;
//! assert_eq!(elements.len(), 2);
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod binding;
mod channel;
mod element;
mod encoder;
mod security;
mod stack;
pub mod transport;

pub use binding::{
    BasicHttpBinding, BasicHttpMessageCredentialType, BasicHttpSecurity, BasicHttpSecurityMode,
    Binding, CustomBinding, HttpClientCredentialType, MessageCredentialType, NetTcpBinding,
    NetTcpSecurity, OptionalReliableSession, SecurityMode, TcpClientCredentialType,
    WsMessageEncoding, encoding_kind,
};
pub use channel::{
    Channel, ChannelShape, DuplexChannel, InnerChannelFactory, InputChannel, OutputChannel,
    RequestChannel, RequestOverDuplex,
};
pub use element::{
    AuthenticationScheme, BindingElement, CustomTransportBindingElement, EncodingKind,
    HttpTransportBindingElement, HttpsTransportBindingElement, MemoryTransportBindingElement,
    MessageEncodingBindingElement, ReaderQuotas, ReliableSessionBindingElement,
    SecurityBindingElement, SecurityElementKind, StreamUpgradeBindingElement,
    TcpTransportBindingElement, TokenKind, TransferMode, TransportBindingElement,
    TransportQuotas,
};
pub use encoder::{BinaryMessageEncoder, MessageEncoder, MtomMessageEncoder, TextMessageEncoder};
pub use security::{SecurityChannelFactory, SecurityToken, SecurityTokenProvider};
pub use stack::{BindingParameters, build_channel_factory, validate_elements};
pub use transport::memory::{MemoryHub, MemoryListener, MemorySession};
pub use transport::{TransportContext, TransportFactoryProvider};
