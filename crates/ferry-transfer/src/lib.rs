#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(clippy::all, clippy::pedantic, missing_docs, unreachable_pub)]
#![allow(clippy::module_name_repetitions)]

//! Payload transfer between download clients.
//!
//! Each configured route owns one [`TransferEngine`]: a bounded pool that
//! moves a torrent's `.torrent` metadata and payload through a [`Transport`]
//! chosen from the route's endpoint pair, then registers the torrent on the
//! target client.
//!
//! Layout: `transport/` (local and SFTP strategies), `progress.rs` (throttled
//! telemetry), `engine.rs` (job pipeline and active set), `history.rs`
//! (event-backed transfer history), `error.rs`.

pub mod engine;
pub mod error;
pub mod history;
pub mod progress;
pub mod transport;

pub use engine::{ActiveTransfer, EngineDeps, EnqueueOutcome, TransferEngine};
pub use error::{TransferError, TransferResult};
pub use history::{DEFAULT_HISTORY_CAPACITY, EventHistory, TransferRecord, TransferStatus};
pub use progress::{ProgressSample, ProgressThrottle};
pub use transport::{FileProgress, TransferPhase, Transport, build_transport};
