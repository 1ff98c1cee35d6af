//! Observer hooks and event broadcasting for the driver
//!
//! Provides:
//! - `Hook` names for every notification point of the driver
//! - `DriverEvent` payloads delivered to hooks
//! - `Hooks`, a registry holding at most one callback per hook
//! - `EventDispatcher` for publishing events to any number of subscribers
//! - `Notifier`, which does both on every event

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Notification points a caller can attach a callback to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Transport opened
    Connect,
    /// Transport closed
    Disconnect,
    /// Device answered bring-up
    Online,
    /// Print started
    Start,
    /// Main queue drained
    Finish,
    /// Print paused
    Pause,
    /// Print resumed
    Resume,
    /// Acknowledgement or plain line received
    Receive,
    /// Frame written to the wire
    Send,
    /// Temperature report received
    Temperature,
    /// Device requested retransmission
    Resend,
    /// Device reported an error
    Error,
    /// Device emitted debug output
    Debug,
    /// Response did not match any known class
    InvalidResponse,
    /// Session-ending failure
    CriticalError,
    /// Print moved to a new layer
    LayerChange,
}

impl Hook {
    /// All hooks, in declaration order.
    pub const ALL: [Hook; 16] = [
        Hook::Connect,
        Hook::Disconnect,
        Hook::Online,
        Hook::Start,
        Hook::Finish,
        Hook::Pause,
        Hook::Resume,
        Hook::Receive,
        Hook::Send,
        Hook::Temperature,
        Hook::Resend,
        Hook::Error,
        Hook::Debug,
        Hook::InvalidResponse,
        Hook::CriticalError,
        Hook::LayerChange,
    ];
}

/// Driver event types
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Transport opened
    Connected,
    /// Transport closed
    Disconnected,
    /// Device is online
    Online,
    /// Print started
    Started,
    /// Print finished
    Finished,
    /// Print paused
    Paused,
    /// Print resumed
    Resumed,
    /// Line received from the device
    Receive(String),
    /// Frame sent to the device
    Send(String),
    /// Temperature line received
    Temperature(String),
    /// Retransmission requested from this line number
    Resend(i64),
    /// Error line from the device, or a recoverable driver fault
    Error(String),
    /// Debug line from the device
    Debug(String),
    /// Unclassifiable line
    InvalidResponse(String),
    /// Unrecoverable failure
    CriticalError(String),
    /// New layer reached
    LayerChange(u32),
}

impl DriverEvent {
    /// The hook this event is delivered to.
    pub fn hook(&self) -> Hook {
        match self {
            DriverEvent::Connected => Hook::Connect,
            DriverEvent::Disconnected => Hook::Disconnect,
            DriverEvent::Online => Hook::Online,
            DriverEvent::Started => Hook::Start,
            DriverEvent::Finished => Hook::Finish,
            DriverEvent::Paused => Hook::Pause,
            DriverEvent::Resumed => Hook::Resume,
            DriverEvent::Receive(_) => Hook::Receive,
            DriverEvent::Send(_) => Hook::Send,
            DriverEvent::Temperature(_) => Hook::Temperature,
            DriverEvent::Resend(_) => Hook::Resend,
            DriverEvent::Error(_) => Hook::Error,
            DriverEvent::Debug(_) => Hook::Debug,
            DriverEvent::InvalidResponse(_) => Hook::InvalidResponse,
            DriverEvent::CriticalError(_) => Hook::CriticalError,
            DriverEvent::LayerChange(_) => Hook::LayerChange,
        }
    }
}

impl fmt::Display for DriverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverEvent::Connected => write!(f, "Connected"),
            DriverEvent::Disconnected => write!(f, "Disconnected"),
            DriverEvent::Online => write!(f, "Online"),
            DriverEvent::Started => write!(f, "Print started"),
            DriverEvent::Finished => write!(f, "Print finished"),
            DriverEvent::Paused => write!(f, "Print paused"),
            DriverEvent::Resumed => write!(f, "Print resumed"),
            DriverEvent::Receive(line) => write!(f, "Received: {}", line),
            DriverEvent::Send(line) => write!(f, "Sent: {}", line),
            DriverEvent::Temperature(line) => write!(f, "Temperature: {}", line),
            DriverEvent::Resend(n) => write!(f, "Resend from line {}", n),
            DriverEvent::Error(msg) => write!(f, "Error: {}", msg),
            DriverEvent::Debug(msg) => write!(f, "Debug: {}", msg),
            DriverEvent::InvalidResponse(line) => write!(f, "Invalid response: {}", line),
            DriverEvent::CriticalError(msg) => write!(f, "Critical error: {}", msg),
            DriverEvent::LayerChange(layer) => write!(f, "Layer {}", layer),
        }
    }
}

/// Callback attached to a hook
pub type HookFn = Arc<dyn Fn(&DriverEvent) + Send + Sync>;

/// Registry of hook callbacks, one per hook
#[derive(Clone, Default)]
pub struct Hooks {
    callbacks: HashMap<Hook, HookFn>,
}

impl Hooks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn on<F>(mut self, hook: Hook, callback: F) -> Self
    where
        F: Fn(&DriverEvent) + Send + Sync + 'static,
    {
        self.set(hook, callback);
        self
    }

    /// Attach `callback` to `hook`, replacing any previous one
    pub fn set<F>(&mut self, hook: Hook, callback: F)
    where
        F: Fn(&DriverEvent) + Send + Sync + 'static,
    {
        self.callbacks.insert(hook, Arc::new(callback));
    }

    /// Detach the callback for `hook`
    pub fn remove(&mut self, hook: Hook) -> bool {
        self.callbacks.remove(&hook).is_some()
    }

    /// Whether a callback is attached to `hook`
    pub fn is_set(&self, hook: Hook) -> bool {
        self.callbacks.contains_key(&hook)
    }

    /// Invoke the callback for the event's hook, if any.
    ///
    /// Returns whether a callback ran.
    pub fn invoke(&self, event: &DriverEvent) -> bool {
        match self.callbacks.get(&event.hook()) {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("registered", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for driver events.
    tx: broadcast::Sender<DriverEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 256)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    pub fn publish(
        &self,
        event: DriverEvent,
    ) -> Result<usize, broadcast::error::SendError<DriverEvent>> {
        self.tx.send(event)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Delivers each event to its hook callback and to broadcast subscribers
#[derive(Default)]
pub struct Notifier {
    hooks: RwLock<Hooks>,
    dispatcher: EventDispatcher,
}

impl Notifier {
    /// Create a notifier with the given hooks
    pub fn new(hooks: Hooks) -> Self {
        Self {
            hooks: RwLock::new(hooks),
            dispatcher: EventDispatcher::default(),
        }
    }

    /// Fire `event`
    pub fn notify(&self, event: DriverEvent) {
        tracing::trace!("event: {}", event);
        // Clone out so a callback may re-register hooks without deadlocking.
        let callback = self.hooks.read().callbacks.get(&event.hook()).cloned();
        if let Some(callback) = callback {
            callback(&event);
        }
        // No subscribers is not an error.
        let _ = self.dispatcher.publish(event);
    }

    /// Attach or replace a hook callback
    pub fn set_hook<F>(&self, hook: Hook, callback: F)
    where
        F: Fn(&DriverEvent) + Send + Sync + 'static,
    {
        self.hooks.write().set(hook, callback);
    }

    /// Detach a hook callback
    pub fn remove_hook(&self, hook: Hook) -> bool {
        self.hooks.write().remove(hook)
    }

    /// Subscribe to every event
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.dispatcher.subscribe()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("hooks", &*self.hooks.read())
            .field("subscribers", &self.dispatcher.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_every_event_maps_to_a_hook() {
        assert_eq!(DriverEvent::Resend(3).hook(), Hook::Resend);
        assert_eq!(DriverEvent::LayerChange(2).hook(), Hook::LayerChange);
        assert_eq!(DriverEvent::Finished.hook(), Hook::Finish);
        assert_eq!(Hook::ALL.len(), 16);
    }

    #[test]
    fn test_hooks_invoke_only_registered() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let hooks = Hooks::new().on(Hook::Receive, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(hooks.invoke(&DriverEvent::Receive("ok".into())));
        assert!(!hooks.invoke(&DriverEvent::Send("G28".into())));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_replaces_and_remove() {
        let mut hooks = Hooks::new();
        hooks.set(Hook::Error, |_| {});
        assert!(hooks.is_set(Hook::Error));
        assert!(hooks.remove(Hook::Error));
        assert!(!hooks.is_set(Hook::Error));
        assert!(!hooks.remove(Hook::Error));
    }

    #[test]
    fn test_dispatcher_subscribe() {
        let dispatcher = EventDispatcher::new(8);
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 1);
        dispatcher
            .publish(DriverEvent::Online)
            .expect("one subscriber");
        assert_eq!(rx.try_recv().ok(), Some(DriverEvent::Online));
    }

    #[test]
    fn test_notifier_hooks_and_broadcast() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = seen.clone();
        let notifier = Notifier::new(Hooks::new().on(Hook::Temperature, move |e| {
            s.lock().push(e.to_string());
        }));
        let mut rx = notifier.subscribe();

        notifier.notify(DriverEvent::Temperature("T:20".into()));
        notifier.notify(DriverEvent::Debug("x".into()));

        assert_eq!(seen.lock().as_slice(), ["Temperature: T:20"]);
        assert_eq!(
            rx.try_recv().ok(),
            Some(DriverEvent::Temperature("T:20".into()))
        );
        assert_eq!(rx.try_recv().ok(), Some(DriverEvent::Debug("x".into())));
    }
}
