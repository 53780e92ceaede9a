//! Agent request channel
//!
//! Turns the event socket into a single-flight request/response call. The wire
//! protocol carries no correlation id: a request is matched with the first
//! `agent:result` or `agent:error` that arrives after it was emitted, which is
//! only sound because at most one request is in flight per session.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::connection::ConnectionManager;
use crate::core::{ChannelError, TransportError};
use crate::transport::protocol::{
    AgentResult, ErrorPayload, ExecuteOptions, ExecuteRequest, ResultPayload, EVENT_ERROR,
    EVENT_EXECUTE, EVENT_RESULT,
};
use crate::transport::{ListenerId, SocketTransport};

/// What a request resolves to
pub type Outcome = Result<AgentResult, ChannelError>;

/// Per-session values sent with every request
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub user_id: String,
    pub options: ExecuteOptions,
    /// Give up on a request after this long; `None` waits forever
    pub request_timeout: Option<Duration>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            user_id: crate::storage::USER_ID_FALLBACK.to_string(),
            options: ExecuteOptions::default(),
            request_timeout: None,
        }
    }
}

/// Runs with the outcome before the channel goes idle
pub type OutcomeHook = Box<dyn FnOnce(&Outcome) + Send>;

/// Notified each time a request settles and the channel is idle again
pub type IdleObserver = Arc<dyn Fn() + Send + Sync>;

/// Terminal-event registration for one request
///
/// Whoever resolves first wins: it takes the sender, removes both terminal
/// handlers, runs the outcome hook, then clears the in-flight flag. Later
/// calls are no-ops. A new request cannot start until the hook has run.
struct Registration {
    request_id: Uuid,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
    listener_ids: Mutex<Vec<ListenerId>>,
    transport: Weak<dyn SocketTransport>,
    executing: Arc<AtomicBool>,
    on_outcome: Mutex<Option<OutcomeHook>>,
    idle_observers: Arc<Mutex<Vec<IdleObserver>>>,
}

impl Registration {
    /// Claim the request; `None` when it was already resolved
    fn claim(&self) -> Option<oneshot::Sender<Outcome>> {
        let sender = lock(&self.sender).take()?;
        self.release_listeners();
        Some(sender)
    }

    /// Claim and go idle without an outcome (the request never left)
    fn finish(&self) {
        if self.claim().is_some() {
            lock(&self.on_outcome).take();
            self.executing.store(false, Ordering::SeqCst);
        }
    }

    fn release_listeners(&self) {
        let ids: Vec<ListenerId> = lock(&self.listener_ids).drain(..).collect();
        if let Some(transport) = self.transport.upgrade() {
            for id in ids {
                transport.off(id);
            }
        }
    }

    fn resolve(&self, outcome: Outcome) -> bool {
        let Some(sender) = self.claim() else {
            return false;
        };

        match &outcome {
            Ok(_) => tracing::debug!(request_id = %self.request_id, "Agent request succeeded"),
            Err(e) => tracing::debug!(request_id = %self.request_id, "Agent request failed: {}", e),
        }

        let hook = lock(&self.on_outcome).take();
        if let Some(hook) = hook {
            hook(&outcome);
        }
        self.executing.store(false, Ordering::SeqCst);

        let observers: Vec<IdleObserver> = lock(&self.idle_observers).clone();
        for observer in observers {
            observer();
        }

        let _ = sender.send(outcome);
        true
    }

    fn is_resolved(&self) -> bool {
        lock(&self.sender).is_none()
    }
}

/// A request that has been emitted and awaits its terminal event
pub struct PendingExecution {
    registration: Arc<Registration>,
    receiver: oneshot::Receiver<Outcome>,
    timeout: Option<Duration>,
}

impl PendingExecution {
    /// Local id of this request (logs only; never sent)
    pub fn request_id(&self) -> Uuid {
        self.registration.request_id
    }

    /// Wait for the terminal event
    pub async fn wait(mut self) -> Result<AgentResult, ChannelError> {
        if let Some(limit) = self.timeout {
            match tokio::time::timeout(limit, &mut self.receiver).await {
                Ok(outcome) => return outcome.unwrap_or(Err(ChannelError::Disconnected)),
                Err(_) => {
                    tracing::warn!(
                        request_id = %self.registration.request_id,
                        "No terminal event after {}s",
                        limit.as_secs()
                    );
                    self.registration
                        .resolve(Err(ChannelError::Timeout(limit.as_secs())));
                }
            }
        }

        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.registration.resolve(Err(ChannelError::Disconnected));
                Err(ChannelError::Disconnected)
            }
        }
    }
}

/// Single-flight request/response over the session's socket
pub struct AgentRequestChannel {
    connection: Arc<ConnectionManager>,
    settings: ChannelSettings,
    executing: Arc<AtomicBool>,
    in_flight: Arc<Mutex<Option<Arc<Registration>>>>,
    idle_observers: Arc<Mutex<Vec<IdleObserver>>>,
}

impl AgentRequestChannel {
    /// Create a channel on `connection`
    ///
    /// A request in flight when the connection drops resolves as
    /// [`ChannelError::Disconnected`]; nothing reconnects underneath it.
    pub fn new(connection: Arc<ConnectionManager>, settings: ChannelSettings) -> Self {
        let in_flight: Arc<Mutex<Option<Arc<Registration>>>> = Arc::new(Mutex::new(None));

        let watched = in_flight.clone();
        connection.on_change(Arc::new(move |connected: bool| {
            if !connected {
                abandon(&watched);
            }
        }));

        Self {
            connection,
            settings,
            executing: Arc::new(AtomicBool::new(false)),
            in_flight,
            idle_observers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Observe every return to idle
    pub fn on_idle(&self, observer: IdleObserver) {
        lock(&self.idle_observers).push(observer);
    }

    /// Check preconditions, register terminal handlers and emit the request
    ///
    /// Fails fast, without emitting, when not connected or when another
    /// request is still in flight.
    pub fn begin(
        &self,
        query: &str,
        project: Option<&str>,
    ) -> Result<PendingExecution, ChannelError> {
        self.begin_with(query, project, Box::new(|_: &Outcome| {}))
    }

    /// Like [`begin`](Self::begin), running `on_outcome` when the request
    /// resolves and before the channel accepts another one
    pub fn begin_with(
        &self,
        query: &str,
        project: Option<&str>,
        on_outcome: OutcomeHook,
    ) -> Result<PendingExecution, ChannelError> {
        let transport = match self.connection.transport() {
            Some(transport) if self.connection.is_connected() => transport,
            _ => return Err(ChannelError::NotConnected),
        };

        if self
            .executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ChannelError::AlreadyExecuting);
        }

        let request_id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();
        let registration = Arc::new(Registration {
            request_id,
            sender: Mutex::new(Some(sender)),
            listener_ids: Mutex::new(Vec::new()),
            transport: Arc::downgrade(&transport),
            executing: self.executing.clone(),
            on_outcome: Mutex::new(Some(on_outcome)),
            idle_observers: self.idle_observers.clone(),
        });

        let on_result = {
            let registration = registration.clone();
            Arc::new(move |payload: Value| {
                let result = serde_json::from_value::<ResultPayload>(payload.clone())
                    .map(|p| p.result)
                    .unwrap_or(AgentResult(payload));
                registration.resolve(Ok(result));
            })
        };
        let on_error = {
            let registration = registration.clone();
            Arc::new(move |payload: Value| {
                registration.resolve(Err(ChannelError::Backend(ErrorPayload::message_from(
                    &payload,
                ))));
            })
        };

        let ids = vec![
            transport.on(EVENT_RESULT, on_result),
            transport.on(EVENT_ERROR, on_error),
        ];
        lock(&registration.listener_ids).extend(ids);
        // A stray terminal event may have raced the id bookkeeping
        if registration.is_resolved() {
            registration.release_listeners();
        }
        *lock(&self.in_flight) = Some(registration.clone());

        let request = ExecuteRequest {
            query: query.to_string(),
            project: project.map(String::from),
            user_id: self.settings.user_id.clone(),
            options: self.settings.options,
        };
        let emitted = serde_json::to_value(&request)
            .map_err(TransportError::from)
            .and_then(|payload| transport.emit(EVENT_EXECUTE, payload));

        if let Err(e) = emitted {
            registration.finish();
            return Err(ChannelError::Transport(e));
        }

        tracing::info!(
            request_id = %request_id,
            project = ?project,
            "Agent request sent ({} chars)",
            query.len()
        );

        Ok(PendingExecution {
            registration,
            receiver,
            timeout: self.settings.request_timeout,
        })
    }

    /// Send a request and wait for its outcome
    pub async fn execute(
        &self,
        query: &str,
        project: Option<&str>,
    ) -> Result<AgentResult, ChannelError> {
        self.begin(query, project)?.wait().await
    }

    /// Resolve the request in flight, if any, as disconnected
    pub fn abandon(&self) {
        abandon(&self.in_flight);
    }
}

fn abandon(in_flight: &Mutex<Option<Arc<Registration>>>) {
    let registration = lock(in_flight).take();
    if let Some(registration) = registration {
        if registration.resolve(Err(ChannelError::Disconnected)) {
            tracing::warn!(
                request_id = %registration.request_id,
                "Connection lost with a request in flight"
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Request channel mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}
