use std::sync::Arc;

use parking_lot::Mutex;
use tradehook::port::outbound::notifier::{Event, Notifier};

/// Captures notifications for assertions.
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Boxable handle so the registry can own a reference to the recorder.
pub struct RecordingHandle(pub Arc<RecordingNotifier>);

impl Notifier for RecordingHandle {
    fn notify(&self, event: Event) {
        self.0.record(event);
    }
}
