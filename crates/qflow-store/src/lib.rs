//! Transactional persistence for qflow.
//!
//! [`QueueStore`] is the seam between the dispatch engine and storage. Two
//! implementations are provided:
//! - [`MemoryStore`]: in-process, one lock per call (default)
//! - `PgStore`: PostgreSQL via sqlx with row-level locking (feature `postgres`)

pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use store::{
    BoxFuture, CallOutcome, ClosingOutcome, ClosingQuery, DynStore, NewCounter, NewTopic,
    QueueStore,
};
