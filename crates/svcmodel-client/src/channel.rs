//! The client runtime channel.
//!
//! Every proxy call lands in [`ClientRuntimeChannel::process`], which runs
//! the whole client pipeline for one operation:
//!
//! ```text
//!   proxy method
//!       │  OperationId + serialized parameters
//!       ▼
//!   resolve operation ──▶ formatter.serialize_request ──▶ addressing headers
//!                                                              │
//!                                                              ▼
//!                                                inspectors.before_send_request
//!                                                              │
//!   request(message, operation_timeout) ◀──────────────────────┤
//!       │                                   one-way: send and return
//!       │
//!       ├─ fault ──▶ fault converter ──▶ typed / ExceptionDetail / plain fault
//!       ▼
//!   inspectors.after_receive_reply ──▶ formatter.deserialize_reply ──▶ OperationResult
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use url::Url;

use svcmodel_channels::RequestChannel;
use svcmodel_core::{
    ChannelMetrics, ChannelMetricsSnapshot, CommunicationObject, CommunicationState,
    DefaultFaultConverter, EndpointAddress, FaultConverter, Error, ExceptionDetail, FaultException, Lifecycle,
    Message, MessageFault, MessageHeader, MessageVersion, Result, Timeouts, TypedDetail,
};

use crate::description::{OperationDescription, OperationId};
use crate::duplex::DuplexClientRuntimeChannel;
use crate::formatter::OperationResult;
use crate::inspector::CorrelationState;
use crate::proxy::OperationDispatch;
use crate::runtime::ClientRuntime;

/// The channel a runtime channel sends through.
#[derive(Debug, Clone)]
pub(crate) enum InnerChannel {
    /// Request/reply transport channel
    Request(Arc<dyn RequestChannel>),
    /// Duplex session with callback dispatch
    Duplex(Arc<DuplexClientRuntimeChannel>),
}

impl InnerChannel {
    fn object(&self) -> &dyn CommunicationObject {
        match self {
            Self::Request(channel) => channel.as_ref(),
            Self::Duplex(channel) => channel.as_ref(),
        }
    }

    async fn request(
        &self,
        message: Message,
        reply_action: Option<&str>,
        timeout: Duration,
    ) -> Result<Message> {
        match self {
            Self::Request(channel) => channel.request(message, timeout).await,
            Self::Duplex(channel) => {
                channel
                    .request_correlated(message, reply_action, timeout)
                    .await
            }
        }
    }

    async fn send(&self, message: Message, timeout: Duration) -> Result<()> {
        match self {
            Self::Request(channel) => channel.send_one_way(message, timeout).await,
            Self::Duplex(channel) => channel.send(message, timeout).await,
        }
    }
}

/// Channels created by one factory, closed or aborted with it.
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    channels: DashMap<u64, Weak<ClientRuntimeChannel>>,
}

impl ChannelRegistry {
    pub(crate) fn insert(&self, channel: &Arc<ClientRuntimeChannel>) {
        self.channels.insert(channel.id, Arc::downgrade(channel));
    }

    pub(crate) fn remove(&self, id: u64) {
        self.channels.remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    /// Remove and return every live channel
    pub(crate) fn drain(&self) -> Vec<Arc<ClientRuntimeChannel>> {
        let ids: Vec<u64> = self.channels.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.channels.remove(&id))
            .filter_map(|(_, channel)| channel.upgrade())
            .collect()
    }
}

/// A call started with [`ClientRuntimeChannel::begin_process`].
#[derive(Debug)]
pub struct PendingCall {
    channel_id: u64,
    operation: OperationId,
    handle: JoinHandle<Result<OperationResult>>,
}

impl PendingCall {
    /// Operation being called
    pub fn operation(&self) -> OperationId {
        self.operation
    }

    /// Whether the call already finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Runs the client pipeline for one channel created by a channel factory.
pub struct ClientRuntimeChannel {
    id: u64,
    lifecycle: Lifecycle,
    runtime: Arc<ClientRuntime>,
    inner: InnerChannel,
    address: EndpointAddress,
    via: Url,
    version: MessageVersion,
    timeouts: Timeouts,
    operation_timeout: Mutex<Duration>,
    ui_completed: AtomicBool,
    registry: Weak<ChannelRegistry>,
    metrics: Arc<ChannelMetrics>,
}

impl ClientRuntimeChannel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        runtime: Arc<ClientRuntime>,
        inner: InnerChannel,
        address: EndpointAddress,
        via: Url,
        version: MessageVersion,
        timeouts: Timeouts,
        registry: Weak<ChannelRegistry>,
    ) -> Self {
        let metrics = match &inner {
            InnerChannel::Duplex(duplex) => duplex.metrics_handle(),
            InnerChannel::Request(_) => Arc::new(ChannelMetrics::default()),
        };
        Self {
            id,
            lifecycle: Lifecycle::new(format!("ClientRuntimeChannel({}, {})", runtime.contract().name, via)),
            runtime,
            inner,
            address,
            via,
            version,
            operation_timeout: Mutex::new(timeouts.send),
            timeouts,
            ui_completed: AtomicBool::new(false),
            registry,
            metrics,
        }
    }

    /// Identifier unique within the owning factory
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Logical destination
    pub fn remote_address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Physical destination
    pub fn via(&self) -> &Url {
        &self.via
    }

    /// Message version of the channel stack
    pub fn message_version(&self) -> MessageVersion {
        self.version
    }

    /// Runtime shared with the factory's other channels
    pub fn runtime(&self) -> &ClientRuntime {
        &self.runtime
    }

    /// The duplex session, for channels created by a duplex factory
    pub fn duplex(&self) -> Option<&Arc<DuplexClientRuntimeChannel>> {
        match &self.inner {
            InnerChannel::Duplex(duplex) => Some(duplex),
            InnerChannel::Request(_) => None,
        }
    }

    /// Timeout applied to each call
    pub fn operation_timeout(&self) -> Duration {
        *self.operation_timeout.lock()
    }

    /// Change the timeout applied to each call
    pub fn set_operation_timeout(&self, timeout: Duration) {
        *self.operation_timeout.lock() = timeout;
    }

    /// Call counters
    pub fn metrics(&self) -> ChannelMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Id of the operation named `name`
    pub fn operation_id(&self, name: &str) -> Result<OperationId> {
        self.runtime.operations().id_of(name).ok_or_else(|| {
            Error::invalid_operation(format!(
                "contract {} has no operation named {}",
                self.runtime.contract().name,
                name
            ))
        })
    }

    /// Run the interactive channel initializers.
    ///
    /// Must complete before the channel opens when any are registered.
    pub async fn display_initialization_ui(&self) -> Result<()> {
        self.lifecycle.ensure_mutable()?;
        for initializer in &self.runtime.interactive_channel_initializers {
            initializer.display_initialization_ui(self).await?;
        }
        self.ui_completed.store(true, Ordering::Release);
        Ok(())
    }

    /// Invoke an operation and wait for its result.
    ///
    /// Opens the channel on first use. One-way operations return an empty
    /// result once the message was handed to the transport; inspectors see
    /// the request but `after_receive_reply` never runs for them.
    pub async fn process(&self, operation: OperationId, parameters: Vec<Value>) -> Result<OperationResult> {
        self.ensure_opened().await?;
        let dispatch = self.resolve(operation, &parameters)?;
        let description = &dispatch.description;
        tracing::trace!(
            operation = %description.name,
            action = %description.action,
            one_way = description.is_one_way,
            "dispatching call"
        );

        let mut request =
            dispatch
                .formatter
                .serialize_request(self.version, description, &parameters)?;
        self.address_request(&mut request, description.is_one_way);
        let correlation = self.before_send(&mut request)?;
        let timeout = self.operation_timeout();

        if description.is_one_way {
            // no reply, so the inspectors' correlation state ends here
            drop(correlation);
            self.metrics.record_one_way();
            self.inner
                .send(request, timeout)
                .await
                .map_err(|e| self.transport_error(e))?;
            return Ok(OperationResult::empty());
        }

        self.metrics.record_request();
        let started = Instant::now();
        let mut reply = self
            .inner
            .request(request, Some(&description.reply_action), timeout)
            .await
            .map_err(|e| self.transport_error(e))?;

        if reply.is_fault() {
            self.metrics.record_fault();
            return Err(self.translate_fault(&mut reply, description));
        }

        self.after_receive(&mut reply, correlation)?;
        let result = dispatch.formatter.deserialize_reply(&mut reply, description)?;
        self.metrics.record_reply(started.elapsed());
        Ok(result)
    }

    /// Start an operation in the background.
    ///
    /// Errors surface from [`end_process`](Self::end_process).
    pub fn begin_process(self: &Arc<Self>, operation: OperationId, parameters: Vec<Value>) -> PendingCall {
        let channel = Arc::clone(self);
        let handle = tokio::spawn(async move { channel.process(operation, parameters).await });
        PendingCall {
            channel_id: self.id,
            operation,
            handle,
        }
    }

    /// Wait for a call started with [`begin_process`](Self::begin_process).
    pub async fn end_process(&self, call: PendingCall) -> Result<OperationResult> {
        if call.channel_id != self.id {
            return Err(Error::invalid_operation(
                "the pending call was started on a different channel",
            ));
        }
        match call.handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::communication(format!("call task failed: {}", e))),
        }
    }

    fn resolve(&self, operation: OperationId, parameters: &[Value]) -> Result<&OperationDispatch> {
        let table = self.runtime.operations();
        let declared = table.get(operation).ok_or_else(|| {
            Error::invalid_operation(format!(
                "contract {} has no operation {}",
                table.contract(),
                operation
            ))
        })?;
        let Some(selector) = &self.runtime.operation_selector else {
            return Ok(declared);
        };
        let selected = selector.select_operation(&declared.description.name, parameters)?;
        table.find(&selected).ok_or_else(|| {
            Error::invalid_operation(format!(
                "the operation selector chose {}, which contract {} does not declare",
                selected,
                table.contract()
            ))
        })
    }

    fn address_request(&self, request: &mut Message, one_way: bool) {
        if self.version.has_addressing() {
            let headers = request.headers_mut();
            headers.to = Some(self.address.uri().clone());
            if !one_way {
                headers.assign_message_id();
                headers.reply_to = self
                    .version
                    .addressing
                    .anonymous_uri()
                    .and_then(|uri| EndpointAddress::parse(uri).ok());
            }
        }
        for header in self.address.headers() {
            request.headers_mut().insert(MessageHeader::new(
                header.name.clone(),
                header.namespace.clone(),
                header.value.clone(),
            ));
        }
    }

    fn before_send(&self, request: &mut Message) -> Result<Vec<CorrelationState>> {
        self.runtime
            .message_inspectors
            .iter()
            .map(|inspector| inspector.before_send_request(request, self))
            .collect()
    }

    fn after_receive(&self, reply: &mut Message, states: Vec<CorrelationState>) -> Result<()> {
        for (inspector, state) in self.runtime.message_inspectors.iter().zip(states) {
            inspector.after_receive_reply(reply, state)?;
        }
        Ok(())
    }

    fn transport_error(&self, error: Error) -> Error {
        match &error {
            Error::Timeout { .. } => self.metrics.record_timeout(),
            Error::Communication(_) | Error::Io(_) => {
                if self.lifecycle.fault() {
                    tracing::warn!(channel = %self.lifecycle.name(), error = %error, "channel faulted");
                }
            }
            _ => {}
        }
        error
    }

    fn translate_fault(&self, reply: &mut Message, operation: &OperationDescription) -> Error {
        let fault = match reply.read_fault(self.runtime.max_fault_size) {
            Ok(fault) => fault,
            Err(e) => return e,
        };

        if let Some(converter) = &self.runtime.fault_converter
            && let Some(error) = converter.try_create_error(reply, &fault)
        {
            return error;
        }
        if let Some(error) = DefaultFaultConverter::new(self.version).try_create_error(reply, &fault) {
            return error;
        }

        let action = reply.action().map(str::to_string);
        tracing::debug!(
            operation = %operation.name,
            code = %fault.code.name,
            reason = %fault.reason,
            "fault reply"
        );
        match typed_detail(&fault, action.as_deref(), operation) {
            Some(detail) => Error::fault(FaultException::with_detail(fault, action, detail)),
            None => Error::fault(FaultException::new(fault, action)),
        }
    }

    fn detach(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Decode a fault detail against the operation's fault contracts, falling
/// back to the built-in [`ExceptionDetail`].
fn typed_detail(
    fault: &MessageFault,
    action: Option<&str>,
    operation: &OperationDescription,
) -> Option<TypedDetail> {
    let detail = fault.detail.as_ref()?;
    let declared = operation.fault_contracts.iter().find(|contract| {
        action == Some(contract.action.as_str())
            || (contract.detail_name == detail.name
                && (detail.namespace.is_empty() || contract.detail_namespace == detail.namespace))
    });
    if let Some(contract) = declared {
        match contract.decode(&detail.value) {
            Ok(typed) => return Some(typed),
            Err(e) => {
                tracing::debug!(detail = %detail.name, error = %e, "fault detail did not match its contract");
            }
        }
    }
    if detail.name == ExceptionDetail::ELEMENT_NAME
        && let Ok(exception) = serde_json::from_value::<ExceptionDetail>(detail.value.clone())
    {
        return Some(TypedDetail::new(exception));
    }
    None
}

impl fmt::Debug for ClientRuntimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRuntimeChannel")
            .field("id", &self.id)
            .field("contract", &self.runtime.contract().name)
            .field("via", &self.via.as_str())
            .field("state", &self.lifecycle.state())
            .field("inner", &self.inner)
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for ClientRuntimeChannel {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    async fn on_open(&self, timeout: Duration) -> Result<()> {
        if !self.runtime.interactive_channel_initializers.is_empty()
            && !self.ui_completed.load(Ordering::Acquire)
        {
            return Err(Error::invalid_operation(
                "display_initialization_ui must complete before a channel with interactive initializers is opened",
            ));
        }
        for initializer in &self.runtime.channel_initializers {
            initializer.initialize(self)?;
        }
        self.inner.object().open_with_timeout(timeout).await
    }

    async fn on_close(&self, timeout: Duration) -> Result<()> {
        let result = self.inner.object().close_with_timeout(timeout).await;
        self.detach();
        result
    }

    async fn on_abort(&self) {
        self.inner.object().abort().await;
        self.detach();
    }
}

impl Drop for ClientRuntimeChannel {
    fn drop(&mut self) {
        if !matches!(
            self.lifecycle.state(),
            CommunicationState::Closed | CommunicationState::Created
        ) {
            tracing::debug!(channel = %self.lifecycle.name(), "runtime channel dropped without close");
        }
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{ContractDescription, OperationDescription};
    use serde::{Deserialize, Serialize};
    use svcmodel_core::{EnvelopeVersion, FaultCode, FaultDetail};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Overdrawn {
        balance: i64,
    }

    fn withdraw() -> OperationDescription {
        ContractDescription::builder("IBank")
            .namespace("urn:bank")
            .operation(OperationDescription::new("Withdraw").fault::<Overdrawn>("Overdrawn"))
            .build()
            .unwrap()
            .operations
            .remove(0)
    }

    fn fault_with(name: &str, namespace: &str, value: Value) -> MessageFault {
        let mut fault = MessageFault::new(FaultCode::sender(EnvelopeVersion::Soap12), "nope");
        fault.detail = Some(FaultDetail {
            name: name.into(),
            namespace: namespace.into(),
            value,
        });
        fault
    }

    #[test]
    fn detail_matches_by_element_name() {
        let op = withdraw();
        let fault = fault_with("Overdrawn", "urn:bank", serde_json::json!({"balance": -3}));
        let detail = typed_detail(&fault, None, &op).unwrap();
        assert_eq!(detail.downcast_ref::<Overdrawn>(), Some(&Overdrawn { balance: -3 }));
    }

    #[test]
    fn detail_matches_by_action() {
        let op = withdraw();
        let fault = fault_with("Other", "urn:elsewhere", serde_json::json!({"balance": 1}));
        let detail = typed_detail(&fault, Some("urn:bank/IBank/WithdrawOverdrawnFault"), &op);
        assert!(detail.unwrap().downcast_ref::<Overdrawn>().is_some());
    }

    #[test]
    fn undecodable_or_unknown_detail_is_untyped() {
        let op = withdraw();
        let wrong_shape = fault_with("Overdrawn", "urn:bank", serde_json::json!("text"));
        assert!(typed_detail(&wrong_shape, None, &op).is_none());

        let unknown = fault_with("Mystery", "urn:bank", serde_json::json!({}));
        assert!(typed_detail(&unknown, None, &op).is_none());

        let bare = MessageFault::new(FaultCode::sender(EnvelopeVersion::Soap12), "nope");
        assert!(typed_detail(&bare, None, &op).is_none());
    }

    #[test]
    fn exception_detail_is_recognized() {
        let op = withdraw();
        let exception = ExceptionDetail::from_error(&std::io::Error::other("boom"));
        let fault = fault_with(
            ExceptionDetail::ELEMENT_NAME,
            svcmodel_core::constants::EXCEPTION_DETAIL_NAMESPACE,
            serde_json::to_value(&exception).unwrap(),
        );
        let detail = typed_detail(&fault, None, &op).unwrap();
        assert_eq!(detail.downcast_ref::<ExceptionDetail>().unwrap().message, "boom");
    }
}
