//! xpanel daemon
//!
//! Keeps a proxy engine's configuration in step with the user roster and a
//! rotating set of transport credentials, and serves the admin API.

use anyhow::Result;
use clap::Parser;
use xpanel_daemon::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    cli::run(Cli::parse()).await
}
