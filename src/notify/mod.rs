//! User-facing side effects of a sync: email notices and live events.

pub mod email;
pub mod events;
pub mod registry;

pub use email::{LogMailer, Mailer, Notifier, RelayMailer};
pub use events::{BroadcastSink, EventSink, ProgressReporter, SyncEvent};
pub use registry::ConnectionRegistry;
