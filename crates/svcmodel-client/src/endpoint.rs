//! Service endpoints.

use std::sync::Arc;
use std::time::Duration;

use svcmodel_channels::Binding;
use svcmodel_core::{EndpointAddress, Error, Result};

use crate::description::ContractDescription;
use crate::inspector::EndpointBehavior;

/// Contract, binding and address of the service a factory talks to.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    /// Endpoint name, from configuration
    pub name: Option<String>,
    /// Contract
    pub contract: Arc<ContractDescription>,
    /// Binding
    pub binding: Option<Arc<dyn Binding>>,
    /// Address
    pub address: Option<EndpointAddress>,
    /// Behaviors applied when the factory opens
    pub behaviors: Vec<Arc<dyn EndpointBehavior>>,
    /// Overrides the runtime's duplex receive poll interval
    pub receive_poll_interval: Option<Duration>,
}

impl ServiceEndpoint {
    /// Endpoint for `contract` with no binding or address yet
    pub fn new(contract: Arc<ContractDescription>) -> Self {
        Self {
            name: None,
            contract,
            binding: None,
            address: None,
            behaviors: Vec::new(),
            receive_poll_interval: None,
        }
    }

    /// Set the binding
    pub fn with_binding(mut self, binding: Arc<dyn Binding>) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Set the address
    pub fn with_address(mut self, address: EndpointAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a behavior
    pub fn with_behavior(mut self, behavior: Arc<dyn EndpointBehavior>) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Set how often duplex receive loops wake while idle
    pub fn with_receive_poll_interval(mut self, interval: Duration) -> Self {
        self.receive_poll_interval = Some(interval);
        self
    }

    /// Binding and address, failing when either is missing or they disagree on the scheme
    pub fn validate(&self) -> Result<(&Arc<dyn Binding>, &EndpointAddress)> {
        let binding = self.binding.as_ref().ok_or_else(|| {
            Error::invalid_operation(format!(
                "the endpoint for contract {} has no binding",
                self.contract.name
            ))
        })?;
        let address = self.address.as_ref().ok_or_else(|| {
            Error::invalid_operation(format!(
                "the endpoint for contract {} has no address",
                self.contract.name
            ))
        })?;
        address.ensure_scheme(&[binding.scheme()])?;
        Ok((binding, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::OperationDescription;
    use svcmodel_channels::{BasicHttpBinding, BasicHttpSecurityMode};

    fn endpoint() -> ServiceEndpoint {
        let contract = ContractDescription::builder("IPing")
            .operation(OperationDescription::new("Ping"))
            .build()
            .unwrap();
        ServiceEndpoint::new(Arc::new(contract))
    }

    #[test]
    fn incomplete_endpoints_are_rejected() {
        let ep = endpoint();
        assert!(matches!(ep.validate(), Err(Error::InvalidOperation(_))));

        let ep = ep.with_binding(Arc::new(BasicHttpBinding::new(BasicHttpSecurityMode::None)));
        assert!(ep.validate().is_err());

        let ep = ep.with_address(EndpointAddress::parse("http://localhost/ping").unwrap());
        assert!(ep.validate().is_ok());
    }

    #[test]
    fn scheme_must_match_binding() {
        let ep = endpoint()
            .with_binding(Arc::new(BasicHttpBinding::new(BasicHttpSecurityMode::Transport)))
            .with_address(EndpointAddress::parse("http://localhost/ping").unwrap());
        assert!(matches!(ep.validate(), Err(Error::InvalidOperation(_))));
    }
}
