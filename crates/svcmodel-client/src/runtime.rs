//! Per-factory client runtime.

use std::sync::Arc;
use std::time::Duration;

use svcmodel_core::{FaultConverter, Result, constants};

use crate::description::ContractDescription;
use crate::formatter::ClientMessageFormatter;
use crate::inspector::{
    ChannelInitializer, ClientMessageInspector, InteractiveChannelInitializer, OperationSelector,
};
use crate::proxy::DispatchTable;

/// Everything a channel factory's channels share: the dispatch tables and
/// the extensions endpoint behaviors installed.
///
/// Built fresh each time a factory opens and frozen afterwards.
#[derive(Debug, Clone)]
pub struct ClientRuntime {
    contract: Arc<ContractDescription>,
    operations: Arc<DispatchTable>,
    callback_operations: Option<Arc<DispatchTable>>,
    /// Inspectors, run in order around every request
    pub message_inspectors: Vec<Arc<dyn ClientMessageInspector>>,
    /// Maps proxy method names to operation names
    pub operation_selector: Option<Arc<dyn OperationSelector>>,
    /// Run against each channel before it opens
    pub channel_initializers: Vec<Arc<dyn ChannelInitializer>>,
    /// Must complete before a channel may open
    pub interactive_channel_initializers: Vec<Arc<dyn InteractiveChannelInitializer>>,
    /// Largest fault body accepted, in bytes
    pub max_fault_size: usize,
    /// Consulted before the built-in fault conversions
    pub fault_converter: Option<Arc<dyn FaultConverter>>,
    /// Longest a duplex receive loop blocks before checking for an idle instance
    pub receive_poll_interval: Duration,
}

impl ClientRuntime {
    /// Runtime over a contract and its shared dispatch table
    pub fn new(contract: Arc<ContractDescription>, operations: Arc<DispatchTable>) -> Self {
        let callback_operations = contract
            .callback
            .as_deref()
            .map(|callback| Arc::new(DispatchTable::new(callback)));
        Self {
            contract,
            operations,
            callback_operations,
            message_inspectors: Vec::new(),
            operation_selector: None,
            channel_initializers: Vec::new(),
            interactive_channel_initializers: Vec::new(),
            max_fault_size: constants::DEFAULT_MAX_FAULT_SIZE,
            fault_converter: None,
            receive_poll_interval: crate::duplex::DEFAULT_RECEIVE_POLL_INTERVAL,
        }
    }

    /// Contract served by the runtime
    pub fn contract(&self) -> &Arc<ContractDescription> {
        &self.contract
    }

    /// Operations of the contract
    pub fn operations(&self) -> &DispatchTable {
        &self.operations
    }

    /// Operations of the callback contract, for duplex contracts
    pub fn callback_operations(&self) -> Option<&Arc<DispatchTable>> {
        self.callback_operations.as_ref()
    }

    /// Use `formatter` for `operation` on channels of this runtime only
    pub fn set_formatter(
        &mut self,
        operation: &str,
        formatter: Arc<dyn ClientMessageFormatter>,
    ) -> Result<()> {
        Arc::make_mut(&mut self.operations).set_formatter(operation, formatter)
    }

    /// Append an inspector
    pub fn add_message_inspector(&mut self, inspector: Arc<dyn ClientMessageInspector>) {
        self.message_inspectors.push(inspector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::OperationDescription;
    use crate::formatter::DataContractFormatter;

    #[test]
    fn formatter_override_does_not_touch_the_shared_table() {
        let contract = Arc::new(
            ContractDescription::builder("IOne")
                .operation(OperationDescription::new("A"))
                .callback(
                    ContractDescription::builder("IOneCallback")
                        .operation(OperationDescription::new("Notify").one_way())
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        );
        let shared = Arc::new(DispatchTable::new(&contract));
        let mut runtime = ClientRuntime::new(contract, shared.clone());
        runtime.set_formatter("A", Arc::new(DataContractFormatter)).unwrap();
        assert!(!Arc::ptr_eq(&shared, &runtime.operations));
        assert_eq!(runtime.max_fault_size, constants::DEFAULT_MAX_FAULT_SIZE);
        assert_eq!(runtime.callback_operations().unwrap().len(), 1);
    }
}
