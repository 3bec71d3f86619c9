//! Contract and operation descriptions.
//!
//! A [`ContractDescription`] lists a contract's operations in declaration
//! order; each operation gets its [`OperationId`] from that position when the
//! description is built. Descriptions of [`ServiceContract`] types are built
//! once per process and shared.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use svcmodel_core::{Error, Result, TypedDetail, constants};

use crate::proxy::ServiceContract;

static DESCRIPTIONS: LazyLock<DashMap<(TypeId, bool), Arc<ContractDescription>>> =
    LazyLock::new(DashMap::new);

/// Position of an operation in its contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub usize);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterDirection {
    /// Sent with the request
    In,
    /// Returned with the reply
    Out,
    /// Sent and returned
    InOut,
}

impl ParameterDirection {
    /// Whether the parameter travels in the request
    pub fn is_input(self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    /// Whether the parameter travels in the reply
    pub fn is_output(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }
}

/// One operation parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescription {
    /// Wire name
    pub name: String,
    /// Direction
    pub direction: ParameterDirection,
}

/// Decodes a fault detail value into its declared type.
pub type DetailDecoder = fn(&serde_json::Value) -> Result<TypedDetail>;

fn decode_detail<D>(value: &serde_json::Value) -> Result<TypedDetail>
where
    D: DeserializeOwned + Any + Send + Sync,
{
    Ok(TypedDetail::new(serde_json::from_value::<D>(value.clone())?))
}

/// A typed fault an operation declares.
#[derive(Clone)]
pub struct FaultContractDescription {
    /// Detail element name
    pub detail_name: String,
    /// Detail element namespace; empty until the contract is built
    pub detail_namespace: String,
    /// Fault action; empty until the contract is built
    pub action: String,
    /// Rust type of the detail
    pub detail_type: &'static str,
    decode: DetailDecoder,
}

impl FaultContractDescription {
    /// Fault contract whose detail decodes as `D`
    pub fn of<D>(detail_name: impl Into<String>) -> Self
    where
        D: DeserializeOwned + Any + Send + Sync,
    {
        Self {
            detail_name: detail_name.into(),
            detail_namespace: String::new(),
            action: String::new(),
            detail_type: std::any::type_name::<D>(),
            decode: decode_detail::<D>,
        }
    }

    /// Override the detail namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.detail_namespace = namespace.into();
        self
    }

    /// Override the fault action
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Decode a detail value
    pub fn decode(&self, value: &serde_json::Value) -> Result<TypedDetail> {
        (self.decode)(value)
    }
}

impl fmt::Debug for FaultContractDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultContractDescription")
            .field("detail_name", &self.detail_name)
            .field("detail_namespace", &self.detail_namespace)
            .field("action", &self.action)
            .field("detail_type", &self.detail_type)
            .finish()
    }
}

/// One contract operation.
#[derive(Debug, Clone)]
pub struct OperationDescription {
    /// Position in the contract, set when the contract is built
    pub id: OperationId,
    /// Operation name
    pub name: String,
    /// Request action; defaulted when the contract is built
    pub action: String,
    /// Reply action; defaulted when the contract is built
    pub reply_action: String,
    /// No reply is expected
    pub is_one_way: bool,
    /// Parameters in declaration order
    pub parameters: Vec<ParameterDescription>,
    /// Rust type of the return value
    pub return_type: Option<&'static str>,
    /// Declared typed faults
    pub fault_contracts: Vec<FaultContractDescription>,
    /// The proxy offers a begin/end pair
    pub has_async_pattern: bool,
    /// Starts a session
    pub is_initiating: bool,
    /// Ends a session
    pub is_terminating: bool,
}

impl OperationDescription {
    /// Request/reply operation named `name` with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: OperationId(0),
            name: name.into(),
            action: String::new(),
            reply_action: String::new(),
            is_one_way: false,
            parameters: Vec::new(),
            return_type: None,
            fault_contracts: Vec::new(),
            has_async_pattern: false,
            is_initiating: true,
            is_terminating: false,
        }
    }

    /// Add an input parameter
    pub fn parameter(self, name: impl Into<String>) -> Self {
        self.parameter_with(name, ParameterDirection::In)
    }

    /// Add an output parameter
    pub fn out_parameter(self, name: impl Into<String>) -> Self {
        self.parameter_with(name, ParameterDirection::Out)
    }

    /// Add a parameter with an explicit direction
    pub fn parameter_with(mut self, name: impl Into<String>, direction: ParameterDirection) -> Self {
        self.parameters.push(ParameterDescription {
            name: name.into(),
            direction,
        });
        self
    }

    /// Declare the return type
    pub fn returns<T>(mut self) -> Self {
        let name = std::any::type_name::<T>();
        self.return_type = (name != "()").then_some(name);
        self
    }

    /// Make the operation one-way
    pub fn one_way(mut self) -> Self {
        self.is_one_way = true;
        self
    }

    /// Set the request action
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Set the reply action
    pub fn with_reply_action(mut self, reply_action: impl Into<String>) -> Self {
        self.reply_action = reply_action.into();
        self
    }

    /// Declare a typed fault
    pub fn fault<D>(mut self, detail_name: impl Into<String>) -> Self
    where
        D: DeserializeOwned + Any + Send + Sync,
    {
        self.fault_contracts
            .push(FaultContractDescription::of::<D>(detail_name));
        self
    }

    /// Declare a fault contract built elsewhere
    pub fn fault_contract(mut self, contract: FaultContractDescription) -> Self {
        self.fault_contracts.push(contract);
        self
    }

    /// The proxy exposes a begin/end pair
    pub fn with_async_pattern(mut self) -> Self {
        self.has_async_pattern = true;
        self
    }

    /// Session flags
    pub fn session(mut self, is_initiating: bool, is_terminating: bool) -> Self {
        self.is_initiating = is_initiating;
        self.is_terminating = is_terminating;
        self
    }

    /// Input parameters, in order
    pub fn inputs(&self) -> impl Iterator<Item = &ParameterDescription> {
        self.parameters.iter().filter(|p| p.direction.is_input())
    }

    /// Output parameters, in order
    pub fn outputs(&self) -> impl Iterator<Item = &ParameterDescription> {
        self.parameters.iter().filter(|p| p.direction.is_output())
    }
}

/// Whether a contract requires a session-capable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionMode {
    /// Sessions are used when the binding offers one
    #[default]
    Allowed,
    /// The binding must offer a session
    Required,
    /// The binding must not establish a session
    NotAllowed,
}

/// A service contract: its name, namespace and operations.
#[derive(Debug, Clone)]
pub struct ContractDescription {
    /// Contract name
    pub name: String,
    /// Contract namespace
    pub namespace: String,
    /// Operations in declaration order
    pub operations: Vec<OperationDescription>,
    /// Contract the service calls back on, for duplex contracts
    pub callback: Option<Box<ContractDescription>>,
    /// Session requirement
    pub session_mode: SessionMode,
}

impl ContractDescription {
    /// Start describing a contract
    pub fn builder(name: impl Into<String>) -> ContractBuilder {
        ContractBuilder {
            name: name.into(),
            namespace: constants::DEFAULT_NAMESPACE.to_string(),
            operations: Vec::new(),
            callback: None,
            session_mode: SessionMode::Allowed,
        }
    }

    /// The shared description of `C`.
    ///
    /// Built on first use and cached per contract type and duplex flag. A
    /// duplex description must carry a callback contract.
    pub fn for_contract<C: ServiceContract>(duplex: bool) -> Result<Arc<Self>> {
        let key = (TypeId::of::<C>(), duplex);
        if let Some(cached) = DESCRIPTIONS.get(&key) {
            return Ok(cached.clone());
        }
        let description = C::describe()?;
        if description.operations.is_empty() {
            return Err(Error::invalid_operation(format!(
                "contract {} declares no operations",
                description.name
            )));
        }
        if duplex && description.callback.is_none() {
            return Err(Error::invalid_operation(format!(
                "contract {} has no callback contract and cannot be used with a duplex channel factory",
                description.name
            )));
        }
        let description = Arc::new(description);
        tracing::debug!(contract = %description.name, duplex, "contract description built");
        Ok(DESCRIPTIONS
            .entry(key)
            .or_insert(description)
            .value()
            .clone())
    }

    /// Operation with id `id`
    pub fn operation(&self, id: OperationId) -> Option<&OperationDescription> {
        self.operations.get(id.0)
    }

    /// Operation named `name`
    pub fn find_operation(&self, name: &str) -> Option<&OperationDescription> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Operation whose request action is `action`
    pub fn find_by_action(&self, action: &str) -> Option<&OperationDescription> {
        self.operations.iter().find(|op| op.action == action)
    }

    /// `namespace` joined with the contract name, as used in actions
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() || self.namespace.ends_with('/') {
            format!("{}{}", self.namespace, self.name)
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

/// Builder for [`ContractDescription`].
#[derive(Debug)]
pub struct ContractBuilder {
    name: String,
    namespace: String,
    operations: Vec<OperationDescription>,
    callback: Option<ContractDescription>,
    session_mode: SessionMode,
}

impl ContractBuilder {
    /// Set the namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Append an operation
    pub fn operation(mut self, operation: OperationDescription) -> Self {
        self.operations.push(operation);
        self
    }

    /// Set the callback contract
    pub fn callback(mut self, callback: ContractDescription) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Set the session requirement
    pub fn session_mode(mut self, session_mode: SessionMode) -> Self {
        self.session_mode = session_mode;
        self
    }

    /// Assign ids and default actions, and check names are unique.
    pub fn build(self) -> Result<ContractDescription> {
        let mut contract = ContractDescription {
            name: self.name,
            namespace: self.namespace,
            operations: Vec::with_capacity(self.operations.len()),
            callback: self.callback.map(Box::new),
            session_mode: self.session_mode,
        };
        let prefix = contract.qualified_name();

        let mut names = HashSet::new();
        for (index, mut op) in self.operations.into_iter().enumerate() {
            if !names.insert(op.name.clone()) {
                return Err(Error::invalid_operation(format!(
                    "contract {} declares operation {} more than once",
                    contract.name, op.name
                )));
            }
            if op.is_one_way && op.return_type.is_some() {
                return Err(Error::invalid_operation(format!(
                    "one-way operation {}.{} cannot return a value",
                    contract.name, op.name
                )));
            }
            if op.is_one_way && op.parameters.iter().any(|p| p.direction.is_output()) {
                return Err(Error::invalid_operation(format!(
                    "one-way operation {}.{} cannot have output parameters",
                    contract.name, op.name
                )));
            }
            op.id = OperationId(index);
            if op.action.is_empty() {
                op.action = format!("{}/{}", prefix, op.name);
            }
            if op.reply_action.is_empty() && !op.is_one_way {
                op.reply_action = format!("{}{}", op.action, constants::REPLY_ACTION_SUFFIX);
            }
            for fault in &mut op.fault_contracts {
                if fault.detail_namespace.is_empty() {
                    fault.detail_namespace = contract.namespace.clone();
                }
                if fault.action.is_empty() {
                    fault.action = format!("{}/{}{}Fault", prefix, op.name, fault.detail_name);
                }
            }
            contract.operations.push(op);
        }
        Ok(contract)
    }
}
