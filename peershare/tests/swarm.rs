use std::{path::Path, time::Duration};
use peershare::{start_peer, CommonConfig, Config, PeerInfo, SwarmEvent};

const FILE_NAME: &str = "shared.dat";
const FILE_SIZE: usize = 10_000;
const PIECE_SIZE: usize = 1024;
const NUM_PIECES: usize = 10;

fn common() -> CommonConfig {
    CommonConfig {
        num_preferred_neighbors: 1,
        unchoking_interval: Duration::from_millis(100),
        optimistic_unchoking_interval: Duration::from_millis(200),
        file_name: FILE_NAME.into(),
        file_size: FILE_SIZE as u64,
        piece_size: PIECE_SIZE,
    }
}

fn peers(base_port: u16) -> Vec<PeerInfo> {
    (0..3)
        .map(|i| PeerInfo {
            id: 1001 + i as u32,
            host: "127.0.0.1".into(),
            port: base_port + i,
            has_file: i == 0,
        })
        .collect()
}

fn file_path(dir: &Path, id: u32) -> std::path::PathBuf {
    dir.join(format!("peer_{}", id)).join(FILE_NAME)
}

// One seeder, two leechers over loopback: everyone ends with the file and
// every peer sees the swarm complete.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_peer_swarm() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let dir = tempfile::tempdir()?;
    let data: Vec<u8> = (0..FILE_SIZE).map(|i| (i * 7 % 251) as u8).collect();
    std::fs::create_dir_all(dir.path().join("peer_1001"))?;
    std::fs::write(file_path(dir.path(), 1001), &data)?;

    let base_port = 40_000 + (std::process::id() % 5_000) as u16 * 3;
    let peers = peers(base_port);

    // Started in configured order, so every dialled peer is already listening.
    let mut running = Vec::new();
    for peer in &peers {
        let config = Config::new(peer.id, common(), peers.clone(), dir.path())?;
        running.push(start_peer(config).await?);
    }

    for (peer, (handle, mut events)) in peers.iter().zip(running) {
        let (complete, last_progress) = tokio::time::timeout(Duration::from_secs(30), async {
            let mut last_progress = None;
            while let Some(event) = events.recv().await {
                match event {
                    SwarmEvent::Progress(stats) => last_progress = Some(stats),
                    SwarmEvent::SwarmComplete => return (true, last_progress),
                    SwarmEvent::LocalComplete => {},
                }
            }
            (false, last_progress)
        })
        .await?;
        assert!(complete, "swarm stopped before completing");
        handle.shutdown().await?;

        // Leechers report every acquired piece, the last one included.
        if !peer.has_file {
            let stats = last_progress.expect("no progress reported");
            assert_eq!(stats.num_pieces, NUM_PIECES);
            assert_eq!(stats.num_have, NUM_PIECES);
            assert_eq!(stats.percent(), 100.0);
        }
    }

    for id in [1002, 1003] {
        let downloaded = std::fs::read(file_path(dir.path(), id))?;
        assert!(downloaded == data, "peer {} has a corrupt copy", id);
    }
    Ok(())
}

#[tokio::test]
async fn test_missing_seed_file_fails_start() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let peers = peers(39_000 + (std::process::id() % 500) as u16);
    let config = Config::new(1001, common(), peers, dir.path())?;
    assert!(start_peer(config).await.is_err());
    Ok(())
}

// A lone seeder only stops once told every other peer is done.
#[tokio::test]
async fn test_declared_swarm_complete() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join("peer_1001"))?;
    std::fs::write(file_path(dir.path(), 1001), vec![1u8; FILE_SIZE])?;

    let peers: Vec<PeerInfo> = peers(38_000 + (std::process::id() % 500) as u16 * 2)
        .into_iter()
        .take(2)
        .collect();
    let config = Config::new(1001, common(), peers, dir.path())?;
    let (handle, mut events) = start_peer(config).await?;

    let first = tokio::time::timeout(Duration::from_secs(5), events.recv()).await?;
    assert_eq!(first, Some(SwarmEvent::LocalComplete));

    // Peer 1002 never shows up, so the swarm keeps running.
    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = events.try_recv() {
        assert!(matches!(event, SwarmEvent::Progress(_)), "unexpected {:?}", event);
    }

    handle.declare_swarm_complete()?;
    let complete = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if event == SwarmEvent::SwarmComplete {
                return true;
            }
        }
        false
    })
    .await?;
    assert!(complete);
    handle.shutdown().await?;
    Ok(())
}
