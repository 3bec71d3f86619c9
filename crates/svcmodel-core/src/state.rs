//! Communication object lifecycle.
//!
//! Every factory, channel and instance context moves through the same finite
//! state machine. Transitions are validated in one place
//! ([`CommunicationState::can_transition_to`]) and applied by [`Lifecycle`];
//! types plug their own behaviour in through the [`CommunicationObject`] hooks.
//!
//! ```text
//!   Created ──open──▶ Opening ──▶ Opened ──close──▶ Closing ──▶ Closed
//!      │                 │           │                 │          ▲
//!      └─────────────────┴─fault─────┴─────────────────┴─▶ Faulted │
//!                                                            └─abort┘
//! ```
//!
//! `abort` is accepted in every state and always ends in `Closed`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::timeouts::Timeouts;

/// State of a communication object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommunicationState {
    /// Constructed and still configurable
    Created,
    /// `open` is in progress
    Opening,
    /// Usable for communication
    Opened,
    /// `close` is in progress
    Closing,
    /// Closed or aborted
    Closed,
    /// Failed; only `abort` is accepted
    Faulted,
}

impl CommunicationState {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use CommunicationState::{Closed, Closing, Created, Faulted, Opened, Opening};
        match (self, next) {
            (Created, Opening) | (Opening, Opened) | (Opened, Closing) | (Closing, Closed) => true,
            (Created | Opening | Opened | Closing, Faulted) => true,
            // abort
            (Created | Opening | Opened | Closing | Faulted, Closed) => true,
            _ => false,
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for CommunicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Opening => "Opening",
            Self::Opened => "Opened",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

/// State holder for a communication object.
///
/// Transitions are applied atomically through a `watch` channel so that
/// background tasks (receive loops, pending waits) can observe `Closed` and
/// `Faulted` without polling.
#[derive(Debug)]
pub struct Lifecycle {
    name: String,
    state: watch::Sender<CommunicationState>,
    aborted: AtomicBool,
}

impl Lifecycle {
    /// Create a lifecycle in the `Created` state. `name` appears in errors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: watch::Sender::new(CommunicationState::Created),
            aborted: AtomicBool::new(false),
        }
    }

    /// Name used in diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> CommunicationState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<CommunicationState> {
        self.state.subscribe()
    }

    /// Move from `from` to `to`, failing if the current state is not `from`.
    pub fn transition(&self, from: CommunicationState, to: CommunicationState) -> Result<()> {
        debug_assert!(from.can_transition_to(to));
        let mut observed = from;
        let changed = self.state.send_if_modified(|current| {
            observed = *current;
            if *current == from && current.can_transition_to(to) {
                *current = to;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(object = %self.name, from = %from, to = %to, "state transition");
            Ok(())
        } else {
            Err(self.state_error(observed))
        }
    }

    /// `Created` → `Opening`.
    pub fn begin_open(&self) -> Result<()> {
        self.transition(CommunicationState::Created, CommunicationState::Opening)
    }

    /// `Opening` → `Opened`.
    pub fn complete_open(&self) -> Result<()> {
        self.transition(CommunicationState::Opening, CommunicationState::Opened)
    }

    /// `Opened` → `Closing`.
    pub fn begin_close(&self) -> Result<()> {
        self.transition(CommunicationState::Opened, CommunicationState::Closing)
    }

    /// `Closing` → `Closed`.
    pub fn complete_close(&self) -> Result<()> {
        self.transition(CommunicationState::Closing, CommunicationState::Closed)
    }

    /// Move to `Faulted` unless already `Closed` or `Faulted`.
    ///
    /// Returns `true` if this call faulted the object.
    pub fn fault(&self) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(CommunicationState::Faulted) {
                *current = CommunicationState::Faulted;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(object = %self.name, "faulted");
        }
        changed
    }

    /// Claim the right to run abort. Only the first caller gets `true`.
    pub fn begin_abort(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        !self.aborted.swap(true, Ordering::AcqRel)
    }

    /// Whether `abort` has started on this object.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Force the object into `Closed`.
    pub fn complete_abort(&self) {
        let previous = self.state.send_replace(CommunicationState::Closed);
        if previous != CommunicationState::Closed {
            tracing::debug!(object = %self.name, from = %previous, "aborted");
        }
    }

    /// Fail unless the object is `Opened`.
    pub fn ensure_opened(&self) -> Result<()> {
        match self.state() {
            CommunicationState::Opened => Ok(()),
            other => Err(self.state_error(other)),
        }
    }

    /// Fail unless the object is still `Created` (configuration is mutable).
    pub fn ensure_mutable(&self) -> Result<()> {
        match self.state() {
            CommunicationState::Created => Ok(()),
            other => Err(Error::invalid_operation(format!(
                "{} cannot be modified while in the {} state",
                self.name, other
            ))),
        }
    }

    /// Wait until the object reaches a state matching `pred`.
    pub async fn wait_for(&self, pred: impl Fn(CommunicationState) -> bool) -> CommunicationState {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| pred(*s)).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    fn state_error(&self, state: CommunicationState) -> Error {
        match state {
            CommunicationState::Faulted => Error::CommunicationObjectFaulted(self.name.clone()),
            CommunicationState::Closing | CommunicationState::Closed => {
                Error::ObjectDisposed(self.name.clone())
            }
            other => Error::invalid_operation(format!(
                "{} is in the {} state and cannot perform this operation",
                self.name, other
            )),
        }
    }
}

/// An object with the open/close/abort lifecycle.
///
/// Implementors supply the `on_*` hooks; the provided methods drive the
/// state machine around them.
///
/// ```
/// use std::time::Duration;
/// use svcmodel_core::{CommunicationObject, CommunicationState, Lifecycle, Result};
///
/// struct Pipe {
///     lifecycle: Lifecycle,
/// }
///
/// #[async_trait::async_trait]
/// impl CommunicationObject for Pipe {
///     fn lifecycle(&self) -> &Lifecycle {
///         &self.lifecycle
///     }
///     async fn on_open(&self, _timeout: Duration) -> Result<()> {
///         Ok(())
///     }
///     async fn on_close(&self, _timeout: Duration) -> Result<()> {
///         Ok(())
///     }
///     async fn on_abort(&self) {}
/// }
///
/// # tokio_test::block_on(async {
/// let pipe = Pipe { lifecycle: Lifecycle::new("Pipe") };
/// pipe.open().await?;
/// assert_eq!(pipe.state(), CommunicationState::Opened);
/// pipe.close().await?;
/// assert!(pipe.open().await.is_err());
/// # Ok::<(), svcmodel_core::Error>(())
/// # }).unwrap();
/// ```
#[async_trait]
pub trait CommunicationObject: Send + Sync {
    /// The state holder for this object
    fn lifecycle(&self) -> &Lifecycle;

    /// Default timeouts for `open` and `close`
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Current state
    fn state(&self) -> CommunicationState {
        self.lifecycle().state()
    }

    /// Acquire resources. Called in `Opening`.
    async fn on_open(&self, timeout: Duration) -> Result<()>;

    /// Release resources gracefully. Called in `Closing`.
    async fn on_close(&self, timeout: Duration) -> Result<()>;

    /// Release resources immediately.
    async fn on_abort(&self);

    /// Open with the default open timeout.
    async fn open(&self) -> Result<()> {
        let timeout = self.timeouts().open;
        self.open_with_timeout(timeout).await
    }

    /// Open; a failing `on_open` leaves the object `Faulted`.
    async fn open_with_timeout(&self, timeout: Duration) -> Result<()> {
        let lifecycle = self.lifecycle();
        lifecycle.begin_open()?;
        match tokio::time::timeout(timeout, self.on_open(timeout)).await {
            Ok(Ok(())) => lifecycle.complete_open(),
            Ok(Err(e)) => {
                lifecycle.fault();
                Err(e)
            }
            Err(_) => {
                lifecycle.fault();
                Err(Error::timeout(format!("open {}", lifecycle.name()), timeout))
            }
        }
    }

    /// Open on first use.
    ///
    /// `Created` opens, `Opening` waits for the concurrent open to finish and
    /// `Opened` returns at once. Any other state is an error.
    async fn ensure_opened(&self) -> Result<()> {
        loop {
            let lifecycle = self.lifecycle();
            match lifecycle.state() {
                CommunicationState::Opened => return Ok(()),
                CommunicationState::Created => match self.open().await {
                    Ok(()) => return Ok(()),
                    // lost the race to a concurrent open
                    Err(_) if lifecycle.state() == CommunicationState::Opening => continue,
                    Err(_) if lifecycle.state() == CommunicationState::Opened => return Ok(()),
                    Err(e) => return Err(e),
                },
                CommunicationState::Opening => {
                    lifecycle
                        .wait_for(|s| s != CommunicationState::Opening)
                        .await;
                }
                _ => return lifecycle.ensure_opened(),
            }
        }
    }

    /// Close with the default close timeout.
    async fn close(&self) -> Result<()> {
        let timeout = self.timeouts().close;
        self.close_with_timeout(timeout).await
    }

    /// Close gracefully.
    ///
    /// An object that never opened is aborted instead. Closing a faulted
    /// object aborts it and reports the fault.
    async fn close_with_timeout(&self, timeout: Duration) -> Result<()> {
        let lifecycle = self.lifecycle();
        match lifecycle.state() {
            CommunicationState::Created | CommunicationState::Opening => {
                self.abort().await;
                Ok(())
            }
            CommunicationState::Closing | CommunicationState::Closed => Ok(()),
            CommunicationState::Faulted => {
                self.abort().await;
                Err(Error::CommunicationObjectFaulted(lifecycle.name().to_string()))
            }
            CommunicationState::Opened => {
                lifecycle.begin_close()?;
                match tokio::time::timeout(timeout, self.on_close(timeout)).await {
                    Ok(Ok(())) => match lifecycle.complete_close() {
                        Ok(()) => Ok(()),
                        // aborted while closing
                        Err(_) if lifecycle.state().is_terminal() => Ok(()),
                        Err(e) => Err(e),
                    },
                    Ok(Err(e)) => {
                        self.abort().await;
                        Err(e)
                    }
                    Err(_) => {
                        self.abort().await;
                        Err(Error::timeout(format!("close {}", lifecycle.name()), timeout))
                    }
                }
            }
        }
    }

    /// Tear down immediately. Always ends in `Closed`.
    async fn abort(&self) {
        let lifecycle = self.lifecycle();
        if lifecycle.begin_abort() {
            self.on_abort().await;
        }
        lifecycle.complete_abort();
    }
}
