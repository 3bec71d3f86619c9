//! Instance contexts for duplex callbacks.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use svcmodel_core::{CommunicationObject, Error, Lifecycle, Result};

use crate::formatter::OperationResult;

/// Receives the calls a service makes on a duplex channel.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Handle one callback operation
    async fn invoke(&self, operation: &str, parameters: Vec<Value>) -> Result<OperationResult>;
}

/// How long an instance context lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InstanceMode {
    /// Closed when the last channel using it closes
    #[default]
    PerSession,
    /// Outlives the channels using it
    Single,
}

/// Holder of the callback instance of duplex channels.
pub struct InstanceContext {
    lifecycle: Lifecycle,
    mode: InstanceMode,
    handler: RwLock<Option<Arc<dyn CallbackHandler>>>,
    extensions: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    idle_timeout: Option<Duration>,
    last_activity: Mutex<Instant>,
    sessions: AtomicUsize,
}

impl InstanceContext {
    /// Per-session context around `handler`
    pub fn new(handler: impl CallbackHandler + 'static) -> Self {
        Self::from_handler(Some(Arc::new(handler)))
    }

    /// Context without a callback instance
    pub fn empty() -> Self {
        Self::from_handler(None)
    }

    fn from_handler(handler: Option<Arc<dyn CallbackHandler>>) -> Self {
        Self {
            lifecycle: Lifecycle::new("InstanceContext"),
            mode: InstanceMode::PerSession,
            handler: RwLock::new(handler),
            extensions: DashMap::new(),
            idle_timeout: None,
            last_activity: Mutex::new(Instant::now()),
            sessions: AtomicUsize::new(0),
        }
    }

    /// Set the instance mode
    pub fn with_mode(mut self, mode: InstanceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Release the context after `timeout` without callbacks
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Instance mode
    pub fn mode(&self) -> InstanceMode {
        self.mode
    }

    /// The callback instance
    pub fn handler(&self) -> Option<Arc<dyn CallbackHandler>> {
        self.handler.read().clone()
    }

    /// Replace the callback instance
    pub fn set_handler(&self, handler: Arc<dyn CallbackHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Store an extension, replacing one of the same type
    pub fn add_extension<T: Any + Send + Sync>(&self, extension: T) {
        self.extensions.insert(TypeId::of::<T>(), Arc::new(extension));
    }

    /// Extension of type `T`
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let extension = self.extensions.get(&TypeId::of::<T>())?.value().clone();
        extension.downcast::<T>().ok()
    }

    /// Remove the extension of type `T`
    pub fn remove_extension<T: Any + Send + Sync>(&self) -> bool {
        self.extensions.remove(&TypeId::of::<T>()).is_some()
    }

    /// Channels currently attached
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }

    /// Record callback activity
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Whether the idle timeout elapsed since the last activity
    pub fn is_idle(&self) -> bool {
        self.idle_timeout
            .is_some_and(|timeout| self.last_activity.lock().elapsed() >= timeout)
    }

    pub(crate) async fn attach(&self) -> Result<()> {
        self.ensure_opened().await?;
        self.sessions.fetch_add(1, Ordering::AcqRel);
        self.touch();
        Ok(())
    }

    pub(crate) async fn detach(&self) {
        let previous = self
            .sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous == 1
            && self.mode == InstanceMode::PerSession
            && let Err(e) = self.close().await
        {
            tracing::debug!(error = %e, "instance context close failed");
        }
    }

    /// Close the context if it sat idle past its timeout.
    pub(crate) async fn release_if_idle(&self) -> bool {
        if !self.is_idle() || self.lifecycle.ensure_opened().is_err() {
            return false;
        }
        tracing::debug!(idle_timeout = ?self.idle_timeout, "releasing idle instance context");
        if let Err(e) = self.close().await {
            tracing::debug!(error = %e, "instance context close failed");
        }
        true
    }

    pub(crate) fn ensure_usable(&self) -> Result<Arc<dyn CallbackHandler>> {
        self.lifecycle.ensure_opened()?;
        self.handler().ok_or_else(|| {
            Error::invalid_operation("the instance context has no callback instance")
        })
    }
}

impl fmt::Debug for InstanceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceContext")
            .field("state", &self.lifecycle.state())
            .field("mode", &self.mode)
            .field("has_handler", &self.handler.read().is_some())
            .field("extensions", &self.extensions.len())
            .field("idle_timeout", &self.idle_timeout)
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[async_trait]
impl CommunicationObject for InstanceContext {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn on_open(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn on_close(&self, _timeout: Duration) -> Result<()> {
        self.extensions.clear();
        Ok(())
    }

    async fn on_abort(&self) {
        self.extensions.clear();
    }
}
