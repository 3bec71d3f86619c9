//! # svcmodel
//!
//! A client-side service model: describe a contract, pick a binding, and
//! call the service through a typed proxy.
//!
//! - [`model`]: lifecycle state machine, messages, faults and addressing
//! - [`channels`]: bindings and the channel stacks they build
//! - [`client`]: channel factories, runtime channels, duplex callbacks and proxies
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use svcmodel::prelude::*;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct MathFault { problem: String }
//!
//! service_contract! {
//!     pub contract Calculator {
//!         name: "ICalculator",
//!         namespace: "http://example.org/calc",
//!         proxy: CalculatorClient,
//!         operations {
//!             call fn divide(a: f64, b: f64) -> f64 => "Divide" faults [MathFault => "MathFault"];
//!         }
//!     }
//! }
//!
//! let factory = ChannelFactory::<Calculator>::new(
//!     NetTcpBinding::new(SecurityMode::None),
//!     EndpointAddress::parse("net.tcp://localhost:808/calc")?,
//! )?;
//! let client = factory.create_channel().await?;
//! match client.divide(1.0, 0.0).await {
//!     Ok(q) => println!("{q}"),
//!     Err(e) => match e.typed_fault::<MathFault>() {
//!         Some(fault) => println!("service refused: {}", fault.detail.problem),
//!         None => return Err(e),
//!     },
//! }
//! factory.close().await?;
//! ```
//!
//! ## Duplex contracts
//!
//! A contract with a `callback:` contract is used through a
//! [`DuplexChannelFactory`](client::DuplexChannelFactory). Calls the service
//! makes on the session reach the [`CallbackHandler`](client::CallbackHandler)
//! held by an [`InstanceContext`](client::InstanceContext).

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

pub use svcmodel_channels as channels;
pub use svcmodel_client as client;
pub use svcmodel_core as model;

pub use svcmodel_client::service_contract;
pub use svcmodel_core::{Error, Result};

/// Everything needed to declare a contract and call it.
pub mod prelude {
    pub use svcmodel_client::{
        CallbackHandler, ChannelFactory, ClientConfig, ClientCredentials, ClientMessageInspector,
        ClientRuntime, ClientRuntimeChannel, DuplexChannelFactory, EndpointBehavior,
        InstanceContext, InstanceMode, LoggingConfig, OperationResult, ServiceContract,
        ServiceEndpoint, service_contract,
    };

    pub use svcmodel_channels::{
        BasicHttpBinding, BasicHttpSecurityMode, Binding, BindingElement, CustomBinding,
        HttpClientCredentialType, MemoryTransportBindingElement, MessageEncodingBindingElement,
        NetTcpBinding, SecurityMode, TransportBindingElement,
    };

    pub use svcmodel_core::{
        CommunicationObject, CommunicationState, EndpointAddress, Error, FaultException,
        Message, MessageVersion, Result, Timeouts,
    };

    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
}
