//! Subscription matching and notification delivery

pub mod dispatcher;
pub mod matcher;
pub mod notifier;

pub use dispatcher::{DispatchSummary, NotificationDispatcher};
pub use matcher::matches;
pub use notifier::{NotificationMessage, Notifier, NotifyError, new_arrival_message, price_change_message};
