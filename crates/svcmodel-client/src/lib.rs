//! # svcmodel client
//!
//! The client side of svcmodel: channel factories, runtime channels that
//! turn method calls into messages, duplex channels that dispatch service
//! callbacks, and typed proxies generated by [`service_contract!`].
//!
//! ## Call path
//!
//! ```text
//! proxy method ─▶ DispatchTable ─▶ ClientRuntimeChannel::process
//!     ─▶ formatter ─▶ inspectors ─▶ channel stack ─▶ transport
//!     ◀─ fault translation ◀─ formatter ◀─ reply
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use svcmodel_client::{ChannelFactory, service_contract};
//! use svcmodel_channels::{BasicHttpBinding, BasicHttpSecurityMode};
//!
//! service_contract! {
//!     pub contract Calculator {
//!         name: "ICalculator",
//!         namespace: "http://example.org/calc",
//!         proxy: CalculatorClient,
//!         operations {
//!             call fn add(a: i32, b: i32) -> i32 => "Add";
//!         }
//!     }
//! }
//!
//! let factory = ChannelFactory::<Calculator>::new(
//!     BasicHttpBinding::new(BasicHttpSecurityMode::None),
//!     "http://localhost:8080/calc".parse()?,
//! )?;
//! let client = factory.create_channel().await?;
//! assert_eq!(client.add(2, 3).await?, 5);
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

mod channel;
mod config;
mod credentials;
mod description;
mod duplex;
mod endpoint;
mod factory;
mod formatter;
mod inspector;
mod instance;
mod logging;
mod proxy;
mod runtime;

pub use channel::{ClientRuntimeChannel, PendingCall};
pub use self::config::{BindingConfig, ClientConfig, ConfigError, ENV_PREFIX, EndpointConfig, TimeoutsConfig};
pub use credentials::ClientCredentials;
pub use description::{
    ContractBuilder, ContractDescription, DetailDecoder, FaultContractDescription,
    OperationDescription, OperationId, ParameterDescription, ParameterDirection, SessionMode,
};
pub use duplex::{DEFAULT_RECEIVE_POLL_INTERVAL, DuplexClientRuntimeChannel};
pub use endpoint::ServiceEndpoint;
pub use factory::{ChannelFactory, DuplexChannelFactory};
pub use formatter::{ClientMessageFormatter, DataContractFormatter, OperationResult};
pub use inspector::{
    ChannelInitializer, ClientMessageInspector, CorrelationState, EndpointBehavior,
    InteractiveChannelInitializer, OperationSelector,
};
pub use instance::{CallbackHandler, InstanceContext, InstanceMode};
pub use logging::LoggingConfig;
pub use proxy::{DispatchTable, OperationDispatch, ProxyCache, ProxyKey, ServiceContract};
pub use runtime::ClientRuntime;

#[doc(hidden)]
pub mod __private {
    pub use serde_json;
    pub use svcmodel_core::Result;
}
