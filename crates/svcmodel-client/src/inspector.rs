//! Extension points of the client runtime.
//!
//! Behaviors added to a channel factory run once when the factory opens. They
//! can contribute binding parameters (credentials, custom properties) and
//! install inspectors, an operation selector or channel initializers on the
//! [`ClientRuntime`](crate::ClientRuntime).

use std::any::Any;
use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;
use svcmodel_channels::BindingParameters;
use svcmodel_core::{Message, Result};

use crate::channel::ClientRuntimeChannel;
use crate::endpoint::ServiceEndpoint;
use crate::runtime::ClientRuntime;

/// State an inspector hands from `before_send_request` to `after_receive_reply`.
pub type CorrelationState = Option<Box<dyn Any + Send>>;

/// Hook around every request/reply exchange.
///
/// Inspectors run in registration order before the request is sent and
/// again, with their own correlation state, after the reply arrives.
/// One-way operations only get `before_send_request`; their correlation
/// state is dropped once the message is sent.
pub trait ClientMessageInspector: Send + Sync + Debug {
    /// Inspect or modify the outgoing request
    fn before_send_request(
        &self,
        request: &mut Message,
        channel: &ClientRuntimeChannel,
    ) -> Result<CorrelationState>;

    /// Inspect or modify the reply
    fn after_receive_reply(&self, reply: &mut Message, state: CorrelationState) -> Result<()>;
}

/// Chooses the operation a proxy method call maps to.
pub trait OperationSelector: Send + Sync + Debug {
    /// Operation name for a call to `method` with `parameters`
    fn select_operation(&self, method: &str, parameters: &[Value]) -> Result<String>;
}

/// Runs against every channel before it opens.
pub trait ChannelInitializer: Send + Sync + Debug {
    /// Prepare `channel`
    fn initialize(&self, channel: &ClientRuntimeChannel) -> Result<()>;
}

/// Collects input before a channel may open.
///
/// While any of these is registered, a channel refuses to open until
/// [`ClientRuntimeChannel::display_initialization_ui`] completed.
#[async_trait]
pub trait InteractiveChannelInitializer: Send + Sync + Debug {
    /// Gather whatever the channel needs
    async fn display_initialization_ui(&self, channel: &ClientRuntimeChannel) -> Result<()>;
}

/// Configures a channel factory's endpoint when the factory opens.
pub trait EndpointBehavior: Send + Sync + Debug {
    /// Reject an endpoint this behavior cannot work with
    fn validate(&self, endpoint: &ServiceEndpoint) -> Result<()> {
        let _ = endpoint;
        Ok(())
    }

    /// Contribute to the parameters the channel stack is built with
    fn add_binding_parameters(
        &self,
        endpoint: &ServiceEndpoint,
        parameters: &mut BindingParameters,
    ) -> Result<()> {
        let _ = (endpoint, parameters);
        Ok(())
    }

    /// Customize the client runtime
    fn apply_client_behavior(
        &self,
        endpoint: &ServiceEndpoint,
        runtime: &mut ClientRuntime,
    ) -> Result<()> {
        let _ = (endpoint, runtime);
        Ok(())
    }
}
