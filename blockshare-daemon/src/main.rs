// Blockshare peer daemon: upload server plus startup shares from config.

mod config;

use anyhow::Context;
use blockshare_core::{NodeOptions, PeerNode};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("blockshare-daemon {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new().context("starting runtime")?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let mut options = NodeOptions::new(
        ([0, 0, 0, 0], cfg.listen_port).into(),
        &cfg.basedir,
        &cfg.download_dir,
    );
    options.welcome = cfg.welcome.clone();
    options.transfer = cfg.transfer.clone();
    let node = PeerNode::start(options)
        .await
        .with_context(|| format!("listening on port {}", cfg.listen_port))?;

    match &cfg.index {
        Some(index) => {
            for share in &cfg.shares {
                if let Err(e) = node.share_file(&share.path, index, &share.secret).await {
                    tracing::error!(file = %share.path, error = %e, "could not share file");
                }
            }
        }
        None if !cfg.shares.is_empty() => {
            tracing::warn!(count = cfg.shares.len(), "no index server configured, not sharing files");
        }
        None => {}
    }

    shutdown_signal().await?;
    tracing::info!("shutting down");
    for entry in node.shares().list().await {
        if let Err(e) = node.drop_share(&entry.relative_path).await {
            tracing::warn!(file = %entry.relative_path, error = %e, "could not withdraw share");
        }
    }
    node.shutdown().await?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.context("waiting for Ctrl+C")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    }
    Ok(())
}
