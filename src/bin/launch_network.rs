//! `launch_network <N>` — spawns one bootstrap peer and `N - 1` joiners
//! against localhost, ten seconds apart, all as tasks within this one
//! process (§6). Each peer gets its own scratch folder under a temp
//! directory so there is something real to scan and replicate.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use photomesh::config::DaemonConfig;
use photomesh::log::setup_logger;
use photomesh::runner::run_daemon;

const BASE_PORT: u16 = 9000;
const JOIN_SPACING: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let count: usize = std::env::args()
        .nth(1)
        .context("usage: launch_network <N>")?
        .parse()
        .context("N must be a positive integer")?;
    anyhow::ensure!(count >= 1, "N must be at least 1");

    let cfg = DaemonConfig::load();
    let root = std::env::temp_dir().join(format!("photomesh-launch-{}", std::process::id()));
    setup_logger(&root, &cfg)?;
    log::info!("launching a {count}-peer network under {}", root.display());

    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let folder: PathBuf = root.join(format!("peer{i}"));
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("creating {}", folder.display()))?;

        let own_port = BASE_PORT + i as u16;
        let peer_port = if i == 0 { None } else { Some(BASE_PORT) };

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_daemon(folder, own_port, peer_port).await {
                log::error!("peer {i} exited: {e:#}");
            }
        }));

        if i + 1 < count {
            tokio::time::sleep(JOIN_SPACING).await;
        }
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
