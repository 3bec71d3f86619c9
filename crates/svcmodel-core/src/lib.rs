//! # svcmodel core
//!
//! Foundation types shared by every svcmodel layer. Bindings, channels, channel
//! factories and the client runtime all depend on this crate.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Lifecycle**: [`CommunicationState`], [`Lifecycle`], [`CommunicationObject`]
//! - **Messages**: [`Message`], [`MessageHeaders`], [`MessageBody`], [`MessageBuffer`], [`Envelope`]
//! - **Versions**: [`MessageVersion`], [`EnvelopeVersion`], [`AddressingVersion`]
//! - **Faults**: [`MessageFault`], [`FaultCode`], [`FaultReason`], [`FaultException`], [`FaultConverter`]
//! - **Addressing**: [`EndpointAddress`], [`AddressHeader`], [`EndpointIdentity`]
//! - **Errors**: [`Error`], [`Result`]
//! - **Timeouts & metrics**: [`Timeouts`], [`ChannelMetrics`]
//!
//! ## Usage
//!
//! Anything with an open/close/abort lifecycle implements [`CommunicationObject`]
//! and hands the state bookkeeping to a [`Lifecycle`]:
//!
//! ```rust,ignore
//! use svcmodel_core::{CommunicationObject, Lifecycle, Result};
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! struct MyChannel { lifecycle: Lifecycle }
//!
//! #[async_trait]
//! impl CommunicationObject for MyChannel {
//!     fn lifecycle(&self) -> &Lifecycle { &self.lifecycle }
//!     async fn on_open(&self, _timeout: Duration) -> Result<()> { Ok(()) }
//!     async fn on_close(&self, _timeout: Duration) -> Result<()> { Ok(()) }
//!     async fn on_abort(&self) {}
//! }
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

mod addressing;
pub mod constants;
mod error;
mod fault;
mod message;
mod metrics;
mod state;
mod timeouts;
mod version;

pub use addressing::{AddressHeader, EndpointAddress, EndpointIdentity};
pub use error::{Error, Result};
pub use fault::{
    DefaultFaultConverter, ExceptionDetail, FaultCode, FaultConverter, FaultDetail,
    FaultException, FaultReason, FaultReasonText, MessageFault, TypedDetail,
    TypedFault,
};
pub use message::{
    Envelope, Message, MessageBody, MessageBuffer, MessageHeader, MessageHeaders,
    MessageProperties, MessageState,
};
pub use metrics::{ChannelMetrics, ChannelMetricsSnapshot};
pub use state::{CommunicationObject, CommunicationState, Lifecycle};
pub use timeouts::Timeouts;
pub use version::{AddressingVersion, EnvelopeVersion, MessageVersion};
