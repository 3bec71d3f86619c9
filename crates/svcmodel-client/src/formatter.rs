//! Mapping between call parameters and message bodies.

use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use svcmodel_core::{Error, Message, MessageVersion, Result};

use crate::description::OperationDescription;

/// What a call produced: the return value plus output parameters in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationResult {
    /// Return value, `null` for operations without one
    pub return_value: Value,
    /// Output parameter values
    pub out_values: Vec<Value>,
}

impl OperationResult {
    /// Result with a return value and output parameters
    pub fn new(return_value: Value, out_values: Vec<Value>) -> Self {
        Self {
            return_value,
            out_values,
        }
    }

    /// Result with nothing in it
    pub fn empty() -> Self {
        Self::default()
    }

    /// Result carrying `value` as its return value
    pub fn from_return<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(value)?, Vec::new()))
    }

    /// Return value as `T`
    pub fn return_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.return_value.clone())?)
    }

    /// Output parameter `index` as `T`
    pub fn out_as<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.out_values.get(index).ok_or_else(|| {
            Error::serialization(format!("reply has no output parameter at position {}", index))
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Turns parameters into request messages and reply messages into results.
pub trait ClientMessageFormatter: Send + Sync + Debug {
    /// Build the request message for `operation`
    fn serialize_request(
        &self,
        version: MessageVersion,
        operation: &OperationDescription,
        parameters: &[Value],
    ) -> Result<Message>;

    /// Read the reply message of `operation`
    fn deserialize_reply(
        &self,
        message: &mut Message,
        operation: &OperationDescription,
    ) -> Result<OperationResult>;
}

/// Wrapped-element formatter.
///
/// Requests carry `{"<Op>": {"<param>": value, ..}}` and replies carry
/// `{"<Op>Response": {"<Op>Result": value, "<outParam>": value, ..}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataContractFormatter;

impl DataContractFormatter {
    fn response_element(operation: &OperationDescription) -> String {
        format!("{}Response", operation.name)
    }

    fn result_element(operation: &OperationDescription) -> String {
        format!("{}Result", operation.name)
    }

    /// Read the input parameters of a request, as a service would
    pub fn deserialize_request(
        &self,
        message: &mut Message,
        operation: &OperationDescription,
    ) -> Result<Vec<Value>> {
        let body = message.read_body()?;
        let wrapper = match body {
            Value::Object(mut map) => map.remove(&operation.name).unwrap_or(Value::Null),
            Value::Null => Value::Null,
            other => {
                return Err(Error::serialization(format!(
                    "expected the {} element, found {}",
                    operation.name, other
                )));
            }
        };
        Ok(operation
            .inputs()
            .map(|p| wrapper.get(&p.name).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Build the reply to a request, as a service would
    pub fn serialize_reply(
        &self,
        version: MessageVersion,
        operation: &OperationDescription,
        result: &OperationResult,
    ) -> Result<Message> {
        let mut wrapper = Map::new();
        if operation.return_type.is_some() || !result.return_value.is_null() {
            wrapper.insert(Self::result_element(operation), result.return_value.clone());
        }
        for (param, value) in operation.outputs().zip(&result.out_values) {
            wrapper.insert(param.name.clone(), value.clone());
        }
        let mut body = Map::new();
        body.insert(Self::response_element(operation), Value::Object(wrapper));
        Ok(Message::create(
            version,
            operation.reply_action.clone(),
            Value::Object(body),
        ))
    }
}

impl ClientMessageFormatter for DataContractFormatter {
    fn serialize_request(
        &self,
        version: MessageVersion,
        operation: &OperationDescription,
        parameters: &[Value],
    ) -> Result<Message> {
        let expected = operation.inputs().count();
        if parameters.len() != expected {
            return Err(Error::invalid_operation(format!(
                "operation {} takes {} parameters but {} were supplied",
                operation.name,
                expected,
                parameters.len()
            )));
        }
        let wrapper: Map<String, Value> = operation
            .inputs()
            .zip(parameters)
            .map(|(p, v)| (p.name.clone(), v.clone()))
            .collect();
        let mut body = Map::new();
        body.insert(operation.name.clone(), Value::Object(wrapper));
        Ok(Message::create(
            version,
            operation.action.clone(),
            Value::Object(body),
        ))
    }

    fn deserialize_reply(
        &self,
        message: &mut Message,
        operation: &OperationDescription,
    ) -> Result<OperationResult> {
        let body = message.read_body()?;
        let wrapper = match body {
            Value::Null => return Ok(OperationResult::empty()),
            Value::Object(mut map) => {
                map.remove(&Self::response_element(operation))
                    .ok_or_else(|| {
                        Error::serialization(format!(
                            "reply to {} has no {} element",
                            operation.name,
                            Self::response_element(operation)
                        ))
                    })?
            }
            other => {
                return Err(Error::serialization(format!(
                    "reply to {} is not an element: {}",
                    operation.name, other
                )));
            }
        };
        let return_value = wrapper
            .get(Self::result_element(operation))
            .cloned()
            .unwrap_or(Value::Null);
        let out_values = operation
            .outputs()
            .map(|p| wrapper.get(&p.name).cloned().unwrap_or(Value::Null))
            .collect();
        Ok(OperationResult::new(return_value, out_values))
    }
}
