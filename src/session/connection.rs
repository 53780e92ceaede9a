//! Connection manager
//!
//! Owns the transport handle and the connected flag. Connection failures are
//! never returned to the session as errors: they show up as
//! `is_connected() == false` and a warning in the log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::core::TransportError;
use crate::transport::{
    build_transport, EventHandler, Lifecycle, SocketTransport, TransportKind, TransportOptions,
};

/// Callback for connected-flag transitions
pub type ConnectionObserver = Arc<dyn Fn(bool) + Send + Sync>;

struct Signals {
    connected: AtomicBool,
    observers: RwLock<Vec<ConnectionObserver>>,
}

impl Signals {
    /// Update the flag; observers hear about actual transitions only
    fn set(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }
        let observers = self
            .observers
            .read()
            .map(|o| o.clone())
            .unwrap_or_default();
        for observer in observers {
            observer(connected);
        }
    }

    fn on_lifecycle(&self, signal: &Lifecycle) {
        match signal {
            Lifecycle::Opened => {
                tracing::debug!("Agent socket connected");
                self.set(true);
            }
            Lifecycle::Closed(reason) => {
                tracing::warn!("Agent socket disconnected: {}", reason);
                self.set(false);
            }
            Lifecycle::Error(message) => {
                tracing::warn!("Agent socket error: {}", message);
                self.set(false);
            }
        }
    }
}

/// Owner of the session's single socket connection
pub struct ConnectionManager {
    transport: RwLock<Option<Arc<dyn SocketTransport>>>,
    signals: Arc<Signals>,
    subscriptions: Mutex<Vec<(String, EventHandler)>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            transport: RwLock::new(None),
            signals: Arc::new(Signals {
                connected: AtomicBool::new(false),
                observers: RwLock::new(Vec::new()),
            }),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.signals.connected.load(Ordering::SeqCst)
    }

    /// Current transport handle, if one is attached
    pub fn transport(&self) -> Option<Arc<dyn SocketTransport>> {
        self.transport
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Name of the attached transport, for status output
    pub fn transport_name(&self) -> Option<&'static str> {
        self.transport().map(|t| t.name())
    }

    /// Watch connected-flag transitions
    pub fn on_change(&self, observer: ConnectionObserver) {
        if let Ok(mut observers) = self.signals.observers.write() {
            observers.push(observer);
        }
    }

    /// Register an event handler that lives as long as the connection
    ///
    /// Installed on every transport this manager attaches.
    pub fn subscribe(&self, event: &str, handler: EventHandler) {
        if let Some(transport) = self.transport() {
            transport.on(event, handler.clone());
        }
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.push((event.to_string(), handler));
        }
    }

    /// Connect to `endpoint`, trying each transport kind in order
    ///
    /// Failure leaves the manager disconnected and is only logged.
    pub async fn connect(
        &self,
        endpoint: &str,
        path: &str,
        kinds: &[TransportKind],
        options: TransportOptions,
    ) {
        self.disconnect();

        for kind in kinds {
            let transport = build_transport(*kind, endpoint, path, options.clone());
            match self.attach(transport).await {
                Ok(()) => return,
                Err(e) => tracing::debug!("{} transport failed: {}", kind, e),
            }
        }
        tracing::warn!("Could not connect to agent server at {}", endpoint);
    }

    /// Open `transport` and make it the session's connection
    pub async fn attach(&self, transport: Arc<dyn SocketTransport>) -> Result<(), TransportError> {
        self.disconnect();
        self.install(&transport);

        if let Err(e) = transport.open().await {
            transport.off_all();
            transport.close();
            self.signals.set(false);
            return Err(e);
        }

        if let Ok(mut slot) = self.transport.write() {
            *slot = Some(transport.clone());
        }
        // Loopback and fast servers may have signalled before we stored the handle
        self.signals.set(transport.is_open());
        tracing::info!("Agent session connected via {}", transport.name());
        Ok(())
    }

    fn install(&self, transport: &Arc<dyn SocketTransport>) {
        let signals = self.signals.clone();
        transport.on_lifecycle(Arc::new(move |signal: &Lifecycle| {
            signals.on_lifecycle(signal)
        }));

        let subscriptions = self
            .subscriptions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        for (event, handler) in subscriptions {
            transport.on(&event, handler);
        }
    }

    /// Tear the connection down
    ///
    /// Every handler is unregistered before the handle is closed, so nothing
    /// fires into a session that is going away. Idempotent.
    pub fn disconnect(&self) {
        let transport = match self.transport.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(transport) = transport {
            tracing::debug!("Closing {} transport", transport.name());
            transport.off_all();
            transport.close();
        }
        self.signals.set(false);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
