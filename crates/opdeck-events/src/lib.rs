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

//! Ordered transition feed for operation lifecycles.
//!
//! Every state change an operation store makes is published here with a
//! sequential identifier. Subscribers may replay recent transitions after a
//! cursor (e.g. a view that re-attaches after a reload). Internally the feed
//! uses `tokio::broadcast` with a bounded buffer; when the channel overflows,
//! the oldest transitions are dropped.
//!
//! Layout: `payloads.rs` (envelope and id types), `routing.rs` (bus and
//! subscriber streams).

pub mod payloads;
pub mod routing;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, EventId, TransitionEnvelope};
pub use routing::{TransitionBus, TransitionStream};
