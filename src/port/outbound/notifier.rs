//! Notification port for operator-facing events.
//!
//! The notification sink itself (email, chat, pager) is an external
//! collaborator; this port is the seam. Notifications are fire-and-forget:
//! failures are logged, never propagated.

/// Operator-facing event.
#[derive(Debug, Clone)]
pub enum Event {
    /// A webhook crossed its consecutive-error threshold and was paused.
    WebhookAutoPaused {
        webhook_id: String,
        url_path: String,
        consecutive_errors: u32,
    },

    /// An account was deactivated after the exchange rejected its
    /// credentials.
    AccountDeactivated {
        account_id: String,
        exchange: String,
        reason: String,
    },

    /// A job exhausted its attempts and failed terminally.
    JobFailed {
        job_id: String,
        alert_id: String,
        code: String,
    },
}

/// Handler for operator notifications.
///
/// # Implementation Notes
///
/// - [`notify`](Self::notify) should return quickly
/// - For slow transports, spawn an async task
/// - Failures should be logged rather than propagated
pub trait Notifier: Send + Sync {
    fn notify(&self, event: Event);
}

/// Composite notifier that broadcasts events to multiple handlers.
pub struct NotifierRegistry {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { notifiers: vec![] }
    }

    pub fn register(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    /// Broadcast an event to all registered notifiers.
    pub fn notify_all(&self, event: Event) {
        for notifier in &self.notifiers {
            notifier.notify(event.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Default for NotifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// No-op notifier that discards all events.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: Event) {}
}

/// Notifier that logs events using the `tracing` framework.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Event) {
        use tracing::warn;
        match event {
            Event::WebhookAutoPaused {
                webhook_id,
                url_path,
                consecutive_errors,
            } => {
                warn!(
                    webhook_id = %webhook_id,
                    url_path = %url_path,
                    consecutive_errors,
                    "Webhook auto-paused"
                );
            }
            Event::AccountDeactivated {
                account_id,
                exchange,
                reason,
            } => {
                warn!(
                    account_id = %account_id,
                    exchange = %exchange,
                    reason = %reason,
                    "Account deactivated"
                );
            }
            Event::JobFailed {
                job_id,
                alert_id,
                code,
            } => {
                warn!(
                    job_id = %job_id,
                    alert_id = %alert_id,
                    code = %code,
                    "Job failed terminally"
                );
            }
        }
    }
}
