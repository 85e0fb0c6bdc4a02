//! Typed event bus between the control plane and its listeners
//!
//! Handlers are registered per event kind and invoked synchronously, in
//! registration order, on the task that raised the event. Handlers must not
//! block; anything slow belongs on a spawned task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Lifecycle events raised by accepted configuration requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlEvent {
    /// Settings changed, no lifecycle request
    GetNewSetting,
    /// Client asked for streaming to start
    StartStreaming,
    /// Client asked for streaming to stop
    StopStreaming,
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlEvent::GetNewSetting => "GET_NEW_SETTING",
            ControlEvent::StartStreaming => "START_STREAMING",
            ControlEvent::StopStreaming => "STOP_STREAMING",
        })
    }
}

/// Failures surfaced by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlErrorEvent {
    /// A SET batch was rejected
    CannotSetData(String),
    /// Listener or connection failure
    ServerInternal(String),
    /// Client disconnected in the middle of a SET batch
    BreakReceiveSettings,
    /// Discovery socket failure
    BroadcastError(String),
}

type Handler = Arc<dyn Fn() + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&ControlErrorEvent) + Send + Sync>;

/// Registry of event handlers
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<ControlEvent, Vec<Handler>>>,
    error_handlers: RwLock<Vec<ErrorHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `event`
    pub fn add_handler<F>(&self, event: ControlEvent, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Subscribe `handler` to every error event
    pub fn add_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ControlErrorEvent) + Send + Sync + 'static,
    {
        self.error_handlers.write().push(Arc::new(handler));
    }

    /// Invoke every handler of `event`, returning how many ran
    pub fn emit(&self, event: ControlEvent) -> usize {
        // Copy the list so handlers may register further handlers
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(&event)
            .cloned()
            .unwrap_or_default();
        debug!(%event, handlers = handlers.len(), "dispatching event");
        for handler in &handlers {
            handler();
        }
        handlers.len()
    }

    /// Invoke every error handler, returning how many ran
    pub fn emit_error(&self, event: ControlErrorEvent) -> usize {
        let handlers: Vec<ErrorHandler> = self.error_handlers.read().clone();
        debug!(?event, handlers = handlers.len(), "dispatching error event");
        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<ControlEvent, usize> = self
            .handlers
            .read()
            .iter()
            .map(|(k, v)| (*k, v.len()))
            .collect();
        f.debug_struct("EventBus")
            .field("handlers", &counts)
            .field("error_handlers", &self.error_handlers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_run_per_kind_in_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let log = Arc::clone(&log);
            bus.add_handler(ControlEvent::StartStreaming, move || log.lock().push(tag));
        }
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let stops = Arc::clone(&stops);
            bus.add_handler(ControlEvent::StopStreaming, move || {
                stops.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(bus.emit(ControlEvent::StartStreaming), 2);
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert_eq!(bus.emit(ControlEvent::GetNewSetting), 0);
    }

    #[test]
    fn test_error_handlers_receive_event() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.add_error_handler(move |e| seen.lock().push(e.clone()));
        }
        bus.emit_error(ControlErrorEvent::BreakReceiveSettings);
        assert_eq!(*seen.lock(), vec![ControlErrorEvent::BreakReceiveSettings]);
    }

    #[test]
    fn test_handler_may_register_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.add_handler(ControlEvent::GetNewSetting, move || {
            inner.add_handler(ControlEvent::GetNewSetting, || {});
        });
        assert_eq!(bus.emit(ControlEvent::GetNewSetting), 1);
        assert_eq!(bus.emit(ControlEvent::GetNewSetting), 2);
    }
}
