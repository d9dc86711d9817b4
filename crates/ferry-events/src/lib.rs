#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(clippy::all, clippy::pedantic, missing_docs, unreachable_pub)]
#![allow(clippy::module_name_repetitions)]

//! Core event bus for Ferry.
//!
//! The bus provides a typed event enum, sequential identifiers, and support for
//! replaying recent events when subscribers attach late. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows, the
//! oldest events are dropped.
//!
//! Layout: `payloads.rs` (event types), `routing.rs` (bus and subscriber stream).

pub mod payloads;
pub mod routing;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};
pub use routing::{EventBus, EventStream};
