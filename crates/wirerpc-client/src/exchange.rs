//! Pending-call bookkeeping keyed by correlation id.
//!
//! Every outgoing request gets an [`Exchange`] holding a single-assignment
//! result slot. The connection reader completes it when the matching
//! response arrives; the caller waits on it with a timeout.
//!
//! # State machine
//!
//! ```text
//! PENDING -> COMPLETED | FAILED | CANCELLED | TIMED_OUT
//! ```
//!
//! Every terminal transition happens while removing the entry from the
//! registry map, under the map lock. Whoever removes the entry owns the
//! transition, so exactly one of them ever happens and anything arriving
//! later finds no entry and is discarded.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use wirerpc_common::protocol::{CorrelationId, Request, Response, Result, RpcError, RpcValue};

/// Lifecycle state of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExchangeState {
    Pending = 0,
    Completed = 1,
    Failed = 2,
    Cancelled = 3,
    TimedOut = 4,
}

impl ExchangeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ExchangeState::Completed,
            2 => ExchangeState::Failed,
            3 => ExchangeState::Cancelled,
            4 => ExchangeState::TimedOut,
            _ => ExchangeState::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != ExchangeState::Pending
    }
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeState::Pending => "PENDING",
            ExchangeState::Completed => "COMPLETED",
            ExchangeState::Failed => "FAILED",
            ExchangeState::Cancelled => "CANCELLED",
            ExchangeState::TimedOut => "TIMED_OUT",
        };
        f.write_str(name)
    }
}

type Outcome = Result<Response>;

struct Slot {
    state: Arc<AtomicU8>,
    tx: oneshot::Sender<Outcome>,
}

impl Slot {
    fn finish(self, state: ExchangeState, outcome: Option<Outcome>) {
        self.state.store(state as u8, Ordering::Release);
        if let Some(outcome) = outcome {
            // The receiver is gone only if the exchange was dropped, which
            // would have removed this slot first
            let _ = self.tx.send(outcome);
        }
    }
}

/// Concurrent map from correlation id to pending result slot.
///
/// Cloning is cheap and every clone shares the same map.
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    slots: Arc<Mutex<HashMap<CorrelationId, Slot>>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates and stores a `PENDING` exchange for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateCorrelationId`] if an exchange with the
    /// same correlation id is still pending.
    pub fn register(&self, request: Request) -> Result<Exchange> {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(AtomicU8::new(ExchangeState::Pending as u8));
        let correlation_id = request.correlation_id.clone();

        {
            let mut slots = self.lock();
            if slots.contains_key(&correlation_id) {
                return Err(RpcError::DuplicateCorrelationId(correlation_id));
            }
            slots.insert(
                correlation_id.clone(),
                Slot {
                    state: Arc::clone(&state),
                    tx,
                },
            );
        }

        Ok(Exchange {
            correlation_id,
            request,
            created_at: Instant::now(),
            state,
            rx: Some(rx),
            registry: self.clone(),
        })
    }

    /// Delivers a response to the exchange with the same correlation id.
    ///
    /// A success response moves the exchange to `COMPLETED`, an error
    /// response to `FAILED`. Returns `false` when no pending exchange
    /// matches, i.e. the response is late, duplicated or unsolicited; it is
    /// discarded without touching any other exchange.
    pub fn complete(&self, response: Response) -> bool {
        let mut slots = self.lock();
        match slots.remove(&response.correlation_id) {
            Some(slot) => {
                let state = if response.is_success() {
                    ExchangeState::Completed
                } else {
                    ExchangeState::Failed
                };
                slot.finish(state, Some(Ok(response)));
                true
            }
            None => {
                drop(slots);
                tracing::warn!(
                    correlation_id = %response.correlation_id,
                    "Discarding response with no pending exchange"
                );
                false
            }
        }
    }

    /// Fails a pending exchange with a local error (e.g. its connection died).
    pub fn fail(&self, correlation_id: &str, error: RpcError) -> bool {
        let mut slots = self.lock();
        match slots.remove(correlation_id) {
            Some(slot) => {
                slot.finish(ExchangeState::Failed, Some(Err(error)));
                true
            }
            None => false,
        }
    }

    /// Moves a pending exchange to `CANCELLED`.
    ///
    /// The request already on the wire is not retracted. Returns `false` if
    /// the exchange already reached a terminal state.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        let mut slots = self.lock();
        match slots.remove(correlation_id) {
            Some(slot) => {
                // Dropping the sender wakes the waiter with a closed channel
                slot.finish(ExchangeState::Cancelled, None);
                true
            }
            None => false,
        }
    }

    /// Waits for `exchange` to finish, at most `timeout`.
    ///
    /// Returns the result value, or [`RpcError::RemoteFailure`] carrying the
    /// remote error. On timeout the exchange moves to `TIMED_OUT`, leaves
    /// the registry and [`RpcError::Timeout`] is returned; the remote side
    /// may still execute the call.
    pub async fn wait(&self, mut exchange: Exchange, timeout: Duration) -> Result<RpcValue> {
        let correlation_id = exchange.correlation_id.clone();
        let mut rx = match exchange.rx.take() {
            Some(rx) => rx,
            None => return Err(RpcError::Cancelled(correlation_id)),
        };

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::Cancelled(correlation_id.clone())),
            Err(_) => {
                let mut slots = self.lock();
                match slots.remove(&correlation_id) {
                    Some(slot) => {
                        slot.finish(ExchangeState::TimedOut, None);
                        drop(slots);
                        tracing::debug!(
                            correlation_id = %correlation_id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Exchange timed out"
                        );
                        Err(RpcError::Timeout {
                            correlation_id: correlation_id.clone(),
                            timeout_ms: timeout.as_millis() as u64,
                        })
                    }
                    None => {
                        drop(slots);
                        // Someone else finished it between the timer firing and
                        // the removal; their outcome is already in the channel
                        match rx.try_recv() {
                            Ok(outcome) => outcome,
                            Err(_) => Err(RpcError::Cancelled(correlation_id.clone())),
                        }
                    }
                }
            }
        };

        outcome?.into_result()
    }

    /// Whether an exchange with this id is still pending.
    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    /// Number of pending exchanges.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

/// One in-flight call.
///
/// Dropping an exchange that is still `PENDING` cancels it, so an abandoned
/// call never leaves an entry behind.
pub struct Exchange {
    correlation_id: CorrelationId,
    request: Request,
    created_at: Instant,
    state: Arc<AtomicU8>,
    rx: Option<oneshot::Receiver<Outcome>>,
    registry: ExchangeRegistry,
}

impl Exchange {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn state(&self) -> ExchangeState {
        ExchangeState::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("correlation_id", &self.correlation_id)
            .field("service", &self.request.service_name)
            .field("method", &self.request.method_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if self.state() == ExchangeState::Pending && self.registry.cancel(&self.correlation_id) {
            tracing::debug!(correlation_id = %self.correlation_id, "Abandoned exchange cancelled");
        }
    }
}
