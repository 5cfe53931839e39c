//! `daemon <images_folder> <own_port> [<peer_port>]` — §6.
//!
//! Omitting `<peer_port>` makes this the bootstrap peer (self-id 1, empty
//! network). Otherwise it dials `localhost:<peer_port>` as the introducer
//! and runs the join handshake (§4.5) before entering the normal listen
//! loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use photomesh::config::DaemonConfig;
use photomesh::log::setup_logger;
use photomesh::runner::run_daemon;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let folder: PathBuf = args
        .next()
        .context("usage: daemon <images_folder> <own_port> [<peer_port>]")?
        .into();
    let own_port: u16 = args
        .next()
        .context("missing <own_port>")?
        .parse()
        .context("own_port must be a u16")?;
    let peer_port: Option<u16> = args.next().map(|s| s.parse()).transpose()?;

    let cfg = DaemonConfig::load();
    setup_logger(&folder, &cfg)?;

    run_daemon(folder, own_port, peer_port).await
}
