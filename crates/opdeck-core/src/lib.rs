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

//! Transport-agnostic operation lifecycle primitives.
//!
//! Layout: `model/` (ids, states, kickoff and status DTOs), `service/`
//! (executor, status fetcher, and catalog traits), `guard.rs` (re-entrancy
//! policy), `reconcile.rs` (local/parent state merging), `presenter.rs`
//! (view flags), `error.rs` (typed failures).

pub mod error;
pub mod guard;
pub mod model;
pub mod presenter;
pub mod reconcile;
pub mod service;

pub use error::{CancelError, GuardRejection, OperationError};
pub use guard::{ActionGuard, ExclusivityGroup, ExclusivityPolicy};
pub use model::{
    ErrorInfo, ErrorKind, JobId, JobStatus, Kickoff, OperationId, OperationKind, OperationRequest,
    OperationState, Outcome, StatusReport,
};
pub use presenter::{ActionLabel, LabelPhase, ViewFlags, to_view_flags};
pub use reconcile::{
    BaseProps, CatalogReconciler, ReconcileOutcome, StateSource, ViewState, merge_view_state,
};
pub use service::{CatalogUpdater, Executor, FnExecutor, StatusFetcher, executor_fn};
