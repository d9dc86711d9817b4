#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(clippy::all, clippy::pedantic, missing_docs, unreachable_pub)]
#![allow(clippy::module_name_repetitions)]

//! Persistence of tracked torrents across restarts.
//!
//! The snapshot is advisory: anything lost is rediscovered from the media
//! manager queues and client state on the next ticks.

pub mod error;
pub mod record;
pub mod store;

pub use error::{SnapshotError, SnapshotResult};
pub use record::{TorrentRecord, restore};
pub use store::SnapshotStore;
