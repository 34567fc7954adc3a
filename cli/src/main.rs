use std::path::PathBuf;
use anyhow::Context;
use clap::Parser;
use peershare::{start_peer, Config, SwarmEvent};

mod logging;

#[derive(Parser)]
#[command(name = "peer_process", about = "Share a file with the configured swarm")]
struct Args {
    #[arg(help = "Identity of this peer, as listed in PeerInfo.cfg")]
    peer_id: u32,

    #[arg(short, long, default_value = ".", help = "Directory holding Common.cfg, PeerInfo.cfg and peer_<id>/")]
    config_dir: PathBuf,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {

    let args = Args::parse();

    // Set up logging.
    logging::init(&args.config_dir, args.peer_id, args.verbose)
        .context("failed to create log file")?;

    let config = Config::load(&args.config_dir, args.peer_id)
        .with_context(|| format!("failed to load config from {}", args.config_dir.display()))?;
    let (handle, mut events) = start_peer(config).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SwarmEvent::Progress(stats)) => tracing::info!(
                    "progress: {:.1}% ({}/{} pieces), {} peers, {} bytes up, {} bytes down",
                    stats.percent(),
                    stats.num_have,
                    stats.num_pieces,
                    stats.num_peers,
                    stats.uploaded,
                    stats.downloaded
                ),
                Some(SwarmEvent::LocalComplete) => tracing::info!("file complete, still serving"),
                Some(SwarmEvent::SwarmComplete) => {
                    tracing::info!("every peer has the file");
                    break;
                },
                None => {
                    tracing::warn!("swarm stopped");
                    break;
                },
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            },
        }
    }

    handle.shutdown().await?;

    Ok(())
}
