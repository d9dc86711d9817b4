#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(clippy::all, clippy::pedantic, missing_docs, unreachable_pub)]
#![allow(clippy::module_name_repetitions)]

//! Concrete download-client and media-manager adapters.
//!
//! Layout: `deluge.rs` (Deluge Web JSON-RPC), `arr.rs` (Radarr/Sonarr v3
//! queue API), `factory.rs` (construction keyed by configured type tag).

pub mod arr;
pub mod deluge;
pub mod factory;

pub use arr::ArrClient;
pub use deluge::DelugeClient;
pub use factory::{build_download_client, build_media_manager};
