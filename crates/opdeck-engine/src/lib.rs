#![forbid(unsafe_code)]
#![deny(
    dead_code,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Operation store and status pollers.
//!
//! The store is the single writer of operation state: callers start, cancel,
//! dismiss, and release operations through it, and observe transitions via
//! snapshots or the transition feed.
//!
//! Layout: `store.rs` (registry, transitions, guard enforcement), `poller.rs`
//! (per-job status loop), `handle.rs` (awaitable start handle).

pub mod handle;
pub mod poller;
pub mod store;

pub use handle::OperationHandle;
pub use poller::{DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_POLL_INTERVAL, PollPolicy, Poller};
pub use store::{OperationStore, OperationStoreBuilder, StartOptions};
