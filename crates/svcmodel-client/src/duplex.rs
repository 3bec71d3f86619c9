//! Duplex client runtime channel.
//!
//! A duplex session carries both the replies to our requests and the calls
//! the service makes back on the callback contract. A single background task
//! owns `try_receive` on the session and routes every inbound message:
//!
//! ```text
//!   session.try_receive ──▶ front waiter expects this reply? ──yes──▶ resolve waiter
//!                                     │
//!                                     no
//!                                     ▼
//!                         callback dispatch (spawned) ──▶ handler ──▶ reply / fault
//! ```
//!
//! Replies are matched to waiters in arrival order, not by `RelatesTo`. A
//! reply arriving after its request timed out is handed to the next waiter
//! expecting the same reply action.
//!
//! The loop wakes at least once per receive poll interval
//! ([`ClientRuntime::receive_poll_interval`](crate::ClientRuntime::receive_poll_interval))
//! to release idle instance contexts.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;

use svcmodel_channels::DuplexChannel;
use svcmodel_core::{
    ChannelMetrics, CommunicationObject, CommunicationState, Error, ExceptionDetail, FaultCode,
    Lifecycle, Message, MessageFault, Result, Timeouts, constants,
};

use crate::formatter::DataContractFormatter;
use crate::instance::InstanceContext;
use crate::proxy::{DispatchTable, OperationDispatch};

/// Default wait of one `try_receive` before the loop checks for idle instances.
pub const DEFAULT_RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

type ReplySender = oneshot::Sender<Result<Message>>;

struct Waiter {
    id: u64,
    reply_action: Option<String>,
    reply: ReplySender,
}

struct Shared {
    lifecycle: Lifecycle,
    inner: Arc<dyn DuplexChannel>,
    instance: Arc<InstanceContext>,
    attached: AtomicBool,
    callbacks: Option<Arc<DispatchTable>>,
    waiters: Mutex<VecDeque<Waiter>>,
    next_waiter: AtomicU64,
    shutdown: Notify,
    timeouts: Timeouts,
    poll_interval: Duration,
    metrics: Arc<ChannelMetrics>,
}

/// A duplex session that correlates replies and dispatches callbacks.
pub struct DuplexClientRuntimeChannel {
    shared: Arc<Shared>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
}

impl DuplexClientRuntimeChannel {
    pub(crate) fn new(
        inner: Arc<dyn DuplexChannel>,
        instance: Arc<InstanceContext>,
        callbacks: Option<Arc<DispatchTable>>,
        timeouts: Timeouts,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                lifecycle: Lifecycle::new(format!("DuplexClientRuntimeChannel({})", inner.via())),
                inner,
                instance,
                attached: AtomicBool::new(false),
                callbacks,
                waiters: Mutex::new(VecDeque::new()),
                next_waiter: AtomicU64::new(1),
                shutdown: Notify::new(),
                timeouts,
                poll_interval,
                metrics: Arc::new(ChannelMetrics::default()),
            }),
            receive_loop: Mutex::new(None),
        }
    }

    /// Instance context receiving callbacks
    pub fn instance_context(&self) -> &Arc<InstanceContext> {
        &self.shared.instance
    }

    /// Longest single wait of the receive loop
    pub fn receive_poll_interval(&self) -> Duration {
        self.shared.poll_interval
    }

    /// Requests waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.shared.waiters.lock().len()
    }

    pub(crate) fn metrics_handle(&self) -> Arc<ChannelMetrics> {
        self.shared.metrics.clone()
    }

    /// Send `message` and wait for the next reply carrying `reply_action`.
    ///
    /// On timeout the waiter is withdrawn so later requests still line up
    /// with their replies.
    pub async fn request_correlated(
        &self,
        message: Message,
        reply_action: Option<&str>,
        timeout: Duration,
    ) -> Result<Message> {
        let shared = &self.shared;
        shared.lifecycle.ensure_opened()?;
        let deadline = tokio::time::Instant::now() + timeout;
        let action = message.action().unwrap_or_default().to_string();

        let (tx, rx) = oneshot::channel();
        let id = shared.next_waiter.fetch_add(1, Ordering::Relaxed);
        shared.waiters.lock().push_back(Waiter {
            id,
            reply_action: reply_action.map(str::to_string),
            reply: tx,
        });
        tracing::trace!(waiter = id, action = %action, "duplex request queued");

        if let Err(e) = shared.inner.send(message, timeout).await {
            shared.remove_waiter(id);
            return Err(e);
        }
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::ObjectDisposed(shared.lifecycle.name().to_string())),
            Err(_) => {
                shared.remove_waiter(id);
                Err(Error::timeout(format!("request {}", action), timeout))
            }
        }
    }

    /// Send a one-way message on the session
    pub async fn send(&self, message: Message, timeout: Duration) -> Result<()> {
        self.shared.lifecycle.ensure_opened()?;
        self.shared.inner.send(message, timeout).await
    }

    fn stop_receive_loop(&self) -> Option<JoinHandle<()>> {
        self.shared.shutdown.notify_one();
        self.receive_loop.lock().take()
    }
}

impl Shared {
    async fn release_instance(&self) {
        if self.attached.swap(false, Ordering::AcqRel) {
            self.instance.detach().await;
        }
    }

    fn remove_waiter(&self, id: u64) {
        self.waiters.lock().retain(|w| w.id != id);
    }

    fn fail_waiters(&self, error: &Error) {
        let drained: Vec<Waiter> = self.waiters.lock().drain(..).collect();
        for waiter in drained {
            let _ = waiter.reply.send(Err(error.clone()));
        }
    }

    async fn run(self: Arc<Self>) {
        tracing::debug!(session = %self.lifecycle.name(), "duplex receive loop started");
        loop {
            if self.instance.release_if_idle().await {
                tracing::debug!(session = %self.lifecycle.name(), "idle instance context released");
            }
            let received = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                received = self.inner.try_receive(self.poll_interval) => received,
            };
            match received {
                Ok(None) => continue,
                Ok(Some(message)) => self.route(message),
                Err(e) => {
                    if matches!(
                        self.lifecycle.state(),
                        CommunicationState::Closing | CommunicationState::Closed
                    ) {
                        break;
                    }
                    tracing::error!(session = %self.lifecycle.name(), error = %e, "duplex receive loop failed");
                    self.lifecycle.fault();
                    self.fail_waiters(&e);
                    break;
                }
            }
        }
        tracing::debug!(session = %self.lifecycle.name(), "duplex receive loop stopped");
    }

    fn route(self: &Arc<Self>, message: Message) {
        let waiter = {
            let mut waiters = self.waiters.lock();
            let expected = waiters.front().is_some_and(|front| {
                message.is_fault()
                    || front
                        .reply_action
                        .as_deref()
                        .is_none_or(|action| message.action() == Some(action))
            });
            if expected { waiters.pop_front() } else { None }
        };

        if let Some(waiter) = waiter {
            tracing::trace!(waiter = waiter.id, "duplex reply routed");
            if waiter.reply.send(Ok(message)).is_err() {
                tracing::warn!(waiter = waiter.id, "reply arrived after its caller stopped waiting");
            }
            return;
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.dispatch_callback(message).await });
    }

    async fn dispatch_callback(&self, mut message: Message) {
        let version = message.version();
        let action = message.action().unwrap_or_default().to_string();
        let request_id = message.headers().message_id.clone();

        let Some(table) = &self.callbacks else {
            tracing::warn!(action = %action, "dropping unexpected message on a session without a callback contract");
            return;
        };
        self.metrics.record_callback();
        self.instance.touch();

        let mut reply = match table.find_by_action(&action) {
            Some(operation) => {
                let one_way = operation.description.is_one_way;
                match self.invoke(operation, &mut message).await {
                    Ok(_) if one_way => return,
                    Ok(reply) => reply,
                    Err(e) if one_way => {
                        tracing::warn!(action = %action, error = %e, "one-way callback failed");
                        return;
                    }
                    Err(e) => {
                        tracing::debug!(action = %action, error = %e, "callback failed");
                        Message::create_fault(version, error_fault(version.envelope, &e), None)
                    }
                }
            }
            None => {
                tracing::warn!(action = %action, "callback action not supported");
                if request_id.is_none() {
                    return;
                }
                let code = FaultCode::sender(version.envelope).with_subcode(
                    FaultCode::new(constants::ACTION_NOT_SUPPORTED)
                        .with_namespace(version.addressing.namespace()),
                );
                let fault = MessageFault::new(
                    code,
                    format!("the callback contract does not handle the action '{}'", action),
                );
                Message::create_fault(version, fault, None)
            }
        };

        reply.headers_mut().relates_to = request_id;
        if let Err(e) = self.inner.send(reply, self.timeouts.send).await {
            tracing::warn!(action = %action, error = %e, "failed to send callback reply");
        }
    }

    async fn invoke(&self, operation: &OperationDispatch, message: &mut Message) -> Result<Message> {
        let handler = self.instance.ensure_usable()?;
        let description = &operation.description;
        let parameters = DataContractFormatter.deserialize_request(message, description)?;
        let result = handler.invoke(&description.name, parameters).await?;
        DataContractFormatter.serialize_reply(message.version(), description, &result)
    }
}

/// Fault reply for a failed callback
fn error_fault(envelope: svcmodel_core::EnvelopeVersion, error: &Error) -> MessageFault {
    if let Error::Fault(fault) = error {
        return fault.message_fault().clone();
    }
    let fault = MessageFault::new(FaultCode::receiver(envelope), error.to_string());
    fault
        .clone()
        .with_detail(
            ExceptionDetail::ELEMENT_NAME,
            constants::EXCEPTION_DETAIL_NAMESPACE,
            &ExceptionDetail::from_error(error),
        )
        .unwrap_or(fault)
}

impl fmt::Debug for DuplexClientRuntimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexClientRuntimeChannel")
            .field("inner", &self.shared.inner)
            .field("state", &self.shared.lifecycle.state())
            .field("pending", &self.pending_requests())
            .field("instance", &self.shared.instance)
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for DuplexClientRuntimeChannel {
    fn lifecycle(&self) -> &Lifecycle {
        &self.shared.lifecycle
    }

    fn timeouts(&self) -> Timeouts {
        self.shared.timeouts
    }

    async fn on_open(&self, timeout: Duration) -> Result<()> {
        let shared = &self.shared;
        shared.instance.attach().await?;
        shared.attached.store(true, Ordering::Release);
        if let Err(e) = shared.inner.open_with_timeout(timeout).await {
            shared.release_instance().await;
            return Err(e);
        }

        // abort takes this lock after raising its flag
        let spawned = {
            let mut receive_loop = self.receive_loop.lock();
            if shared.lifecycle.is_aborted() {
                false
            } else {
                *receive_loop = Some(tokio::spawn(Arc::clone(shared).run()));
                true
            }
        };
        if !spawned {
            shared.release_instance().await;
            return Err(Error::ObjectDisposed(shared.lifecycle.name().to_string()));
        }
        Ok(())
    }

    async fn on_close(&self, timeout: Duration) -> Result<()> {
        if let Some(handle) = self.stop_receive_loop()
            && tokio::time::timeout(timeout, handle).await.is_err()
        {
            tracing::warn!(session = %self.shared.lifecycle.name(), "receive loop did not stop in time");
        }
        let result = self.shared.inner.close_with_timeout(timeout).await;
        self.shared
            .fail_waiters(&Error::ObjectDisposed(self.shared.lifecycle.name().to_string()));
        self.shared.release_instance().await;
        result
    }

    async fn on_abort(&self) {
        if let Some(handle) = self.stop_receive_loop() {
            handle.abort();
        }
        self.shared.inner.abort().await;
        self.shared
            .fail_waiters(&Error::ObjectDisposed(self.shared.lifecycle.name().to_string()));
        self.shared.release_instance().await;
    }
}
