//! Connection lifecycle against an external producer.
//!
//! ```text
//!   None ──open──▶ Connecting ──found──▶ Open ──close / producer gone──▶ Closed
//!    ▲                 │
//!    └──timeout/error──┘
//! ```
//!
//! Every public [`Connection`] is an *outer* handle onto one shared core. The
//! core holds the *inner* connection (a tagged union swapped under a lock),
//! the [`OuterConnectionTracker`], one cancellation token, and the
//! data-ready fan-out fed by the background worker.

mod inner;
mod options;
mod outer;
mod shared;
mod signal;
mod source;
mod tracker;
mod worker;

pub use inner::ConnectionState;
pub use options::{
    ConnectionOptions, DEFAULT_DATA_READY_EVENT_NAME, DEFAULT_EXPECTED_VERSION,
    DEFAULT_MEMORY_MAP_NAME,
};
pub use outer::Connection;
pub use source::{Clock, DataReadyEvent, DataSource, NamedDataSource, SystemClock, WaitResult};
pub use tracker::{OuterConnectionTracker, OuterId};
pub use worker::WorkerExit;
