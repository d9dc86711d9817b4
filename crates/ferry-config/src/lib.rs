#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(clippy::all, clippy::pedantic, missing_docs, unreachable_pub)]
#![allow(clippy::module_name_repetitions)]

//! File-backed configuration for Ferry.
//!
//! Layout: `model.rs` (typed document), `defaults.rs` (default values),
//! `loader.rs` (YAML/JSON parsing and atomic write-back), `validate.rs`
//! (structural checks), `service.rs` (`ConfigService` runtime mutations).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod service;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_PATH_ENV, ConfigFormat, load_from_path, parse_str, resolve_config_path};
pub use model::{
    ConnectionConfig, DownloadClientConfig, EngineConfig, FerryConfig, LoggingSettings,
    MediaManagerConfig, SftpEndpoint, TransferConfig, TransportEndpoint,
};
pub use service::{ConfigChange, ConfigService};
pub use validate::validate;
