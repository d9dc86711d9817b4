#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(clippy::all, clippy::pedantic, missing_docs, unreachable_pub)]
#![allow(clippy::module_name_repetitions)]

//! Engine-agnostic torrent lifecycle types shared across Ferry.
//!
//! Layout: `state.rs` (lifecycle state machine), `model/` (entity and DTOs),
//! `service/` (adapter and sink traits), `registry.rs` (name-keyed adapter
//! registries), `catalog.rs` (tracked-torrent collection), `error.rs`.

pub mod catalog;
pub mod error;
pub mod model;
pub mod registry;
pub mod service;
pub mod state;

pub use catalog::TorrentCatalog;
pub use error::{ClientError, ClientResult, ManagerError, ManagerResult};
pub use model::{
    AddTorrent, AddTorrentOptions, ClientFile, ClientTorrentInfo, ConnectionTest,
    MediaManagerKind, QueueEntry, Torrent, TorrentId, TransferDescriptor, TransferTelemetry,
};
pub use registry::{ClientRegistry, ManagerRegistry, Named, Registry};
pub use service::{
    DownloadClientAdapter, MediaManagerAdapter, NoopHistory, SnapshotSink, TransferHistory,
};
pub use state::{ClientPhase, ClientSide, StateParseError, TorrentState};
