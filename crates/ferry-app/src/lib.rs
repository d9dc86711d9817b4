#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(clippy::all, clippy::pedantic, missing_docs, unreachable_pub)]
#![allow(clippy::module_name_repetitions)]

//! Ferry daemon wiring.
//!
//! Layout: `bootstrap.rs` (environment loading and service wiring),
//! `router.rs` (live connection routes), `reconciler.rs` (the tick loop that
//! drives every tracked torrent), `instrument.rs` (metric feeds), `error.rs`.

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application error types.
pub mod error;
/// Metric feeds for snapshots and transfers.
pub mod instrument;
/// Periodic lifecycle reconciliation.
pub mod reconciler;
/// Connection routes and their transfer engines.
pub mod router;

pub use bootstrap::{App, run_app};
pub use error::{AppError, AppResult};
pub use instrument::{MeteredSnapshotSink, spawn_transfer_metrics};
pub use reconciler::{ReconcileSettings, Reconciler, TickReport};
pub use router::{ConnectionRouter, Route};
