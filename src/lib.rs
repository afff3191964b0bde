//! SCDT peer: wires the transport-free [`engine`] protocol state machine to
//! a real UDP socket, configuration, logging, and on-disk diagnostics.

use std::sync::Arc;

use anyhow::Result;

pub mod config;
pub mod diagnostics;
pub mod server;
pub mod statistics;

use config::Config;
use statistics::Statistics;

/// Entry point shared by `main` and integration tests: builds the runtime
/// state and drives the peer's UDP loop until it's told to stop.
pub async fn server_main(config: Arc<Config>) -> Result<()> {
    let stats = Statistics::default();
    server::run(config, stats).await
}
