//! Realtime fan-out for qflow.
//!
//! Every committed mutation is published as a [`HubEvent`] to all connected
//! viewers. One dispatch task owns the subscriber registry; producers only
//! ever push onto its ingress channel and never wait on a viewer.
//!
//! ```text
//!  Dispatcher ──broadcast──▶ ingress ──▶ dispatch loop ──try_send──▶ viewer queue ──▶ /ws
//!  Scheduler  ──broadcast──▶                  │
//!                                             └── full or closed queue: viewer dropped
//! ```

pub mod error;
pub mod event;
pub mod hub;
pub mod ws;

pub use error::{HubError, HubResult};
pub use event::{Frame, HubEvent};
pub use hub::{spawn_hub, HubHandle, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use ws::{serve_viewer, ConnectionGuard, ConnectionLimiter};
