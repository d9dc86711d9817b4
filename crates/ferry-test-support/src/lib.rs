#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared test helpers used across Ferry test suites.
//! Layout: mocks.rs (fake download clients and media managers), fixtures.rs (on-disk payloads).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{PayloadFixture, client_info};
pub use mocks::{FakeClient, FakeManager, Fault};
