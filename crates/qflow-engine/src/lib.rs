//! Ticket lifecycle and dispatch engine.
//!
//! - [`Dispatcher`]: reserve, call, recall, delete, feedback and queue views.
//!   Every mutation commits in one store transaction and is then published to
//!   the hub.
//! - [`ClosingScheduler`]: closes counters at their closing time and finishes
//!   the tickets they were serving.
//! - [`RetentionSweeper`]: purges tickets past the retention period.
//! - [`NotificationPool`]: bounded worker pool for best-effort requester
//!   notifications, drained on shutdown.

pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod scheduler;
pub mod waiting;

pub use dispatcher::{CounterQueue, Dispatch, Dispatcher, Reservation, MAX_NOTE_CHARS};
pub use error::{EngineError, EngineResult, NotifyError};
pub use notify::{
    DynNotifier, LogNotifier, MockNotifier, Notification, NotificationKind, NotificationPool,
    NotificationPoolConfig, NotificationSender, Notifier,
};
pub use scheduler::{ClosingConfig, ClosingScheduler, RetentionSweeper};
pub use waiting::{reference_ordinal, waiting_after_reference, waiting_position};
