#![forbid(unsafe_code)]
#![deny(unused_must_use, missing_docs)]

//! Binary entrypoint that loads the configuration and runs the reconciler
//! until Ctrl-C.

use ferry_app::{AppResult, run_app};

/// Bootstraps Ferry and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
