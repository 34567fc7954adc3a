use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use crate::{store::StoreInfo, PeerId};

pub const COMMON_CONFIG_FILE: &str = "Common.cfg";
pub const PEER_INFO_FILE: &str = "PeerInfo.cfg";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("missing key: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error("peer {0} listed more than once")]
    DuplicatePeer(PeerId),

    #[error("peer {0} is not listed in PeerInfo.cfg")]
    UnknownPeer(PeerId),

    #[error("no peers listed")]
    NoPeers,

}

type Result<T> = std::result::Result<T, ConfigError>;

// Settings shared by every peer of the swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfig {

    // Number of preferred neighbors unchoked each interval (k).
    pub num_preferred_neighbors: usize,

    pub unchoking_interval: Duration,

    pub optimistic_unchoking_interval: Duration,

    pub file_name: String,

    pub file_size: u64,

    pub piece_size: usize,

}

impl CommonConfig {

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&read(path)?)
    }

    // `Key Value` per line, blank lines and `#` comments skipped.
    pub fn parse(src: &str) -> Result<Self> {
        let mut num_preferred_neighbors = None;
        let mut unchoking_interval = None;
        let mut optimistic_unchoking_interval = None;
        let mut file_name = None;
        let mut file_size = None;
        let mut piece_size = None;

        for (line_no, line) in lines(src) {
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => {
                    return Err(ConfigError::InvalidLine {
                        line: line_no,
                        reason: format!("expected `key value`, got {:?}", line),
                    })
                },
            };
            match key {
                "NumberOfPreferredNeighbors" => num_preferred_neighbors = Some(positive(key, value)?),
                "UnchokingInterval" => unchoking_interval = Some(Duration::from_secs(positive(key, value)?)),
                "OptimisticUnchokingInterval" => {
                    optimistic_unchoking_interval = Some(Duration::from_secs(positive(key, value)?))
                },
                "FileName" => file_name = Some(value.to_string()),
                "FileSize" => file_size = Some(positive(key, value)?),
                "PieceSize" => piece_size = Some(positive(key, value)?),
                _ => tracing::warn!("ignoring unknown config key {}", key),
            }
        }

        Ok(Self {
            num_preferred_neighbors: num_preferred_neighbors
                .ok_or(ConfigError::MissingKey("NumberOfPreferredNeighbors"))?,
            unchoking_interval: unchoking_interval
                .ok_or(ConfigError::MissingKey("UnchokingInterval"))?,
            optimistic_unchoking_interval: optimistic_unchoking_interval
                .ok_or(ConfigError::MissingKey("OptimisticUnchokingInterval"))?,
            file_name: file_name
                .filter(|name| !name.is_empty())
                .ok_or(ConfigError::MissingKey("FileName"))?,
            file_size: file_size.ok_or(ConfigError::MissingKey("FileSize"))?,
            piece_size: piece_size.ok_or(ConfigError::MissingKey("PieceSize"))?,
        })
    }

    pub fn store_info(&self) -> StoreInfo {
        StoreInfo::new(self.file_size, self.piece_size)
    }

}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {

    pub id: PeerId,

    pub host: String,

    pub port: u16,

    // Whether the peer starts with the whole file.
    pub has_file: bool,

}

impl PeerInfo {

    pub fn load_all(path: &Path) -> Result<Vec<Self>> {
        Self::parse_all(&read(path)?)
    }

    // `<id> <host> <port> <has_file>` per line, order preserved.
    pub fn parse_all(src: &str) -> Result<Vec<Self>> {
        let mut peers = Vec::new();
        let mut seen = HashSet::new();

        for (line_no, line) in lines(src) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let &[id, host, port, has_file] = &fields[..] else {
                return Err(ConfigError::InvalidLine {
                    line: line_no,
                    reason: format!("expected 4 fields, got {}", fields.len()),
                });
            };
            let id: PeerId = positive("peer id", id)?;
            let port: u16 = positive("port", port)?;
            let has_file = match has_file {
                "0" => false,
                "1" => true,
                value => {
                    return Err(ConfigError::InvalidValue {
                        key: "has_file".into(),
                        value: value.into(),
                    })
                },
            };
            if !seen.insert(id) {
                return Err(ConfigError::DuplicatePeer(id));
            }
            peers.push(PeerInfo { id, host: host.to_string(), port, has_file });
        }

        if peers.is_empty() {
            return Err(ConfigError::NoPeers);
        }
        Ok(peers)
    }

}

#[derive(Debug, Clone)]
pub struct Config {

    pub local_id: PeerId,

    pub common: CommonConfig,

    // Every peer of the swarm in configured order, ourselves included.
    pub peers: Vec<PeerInfo>,

    // Holds the config files and the peer_<id> directories.
    pub dir: PathBuf,

}

impl Config {

    pub fn new(
        local_id: PeerId,
        common: CommonConfig,
        peers: Vec<PeerInfo>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        if !peers.iter().any(|p| p.id == local_id) {
            return Err(ConfigError::UnknownPeer(local_id));
        }
        Ok(Self { local_id, common, peers, dir: dir.into() })
    }

    // Reads Common.cfg and PeerInfo.cfg from `dir`.
    pub fn load(dir: impl AsRef<Path>, local_id: PeerId) -> Result<Self> {
        let dir = dir.as_ref();
        let common = CommonConfig::load(&dir.join(COMMON_CONFIG_FILE))?;
        let peers = PeerInfo::load_all(&dir.join(PEER_INFO_FILE))?;
        Self::new(local_id, common, peers, dir)
    }

    pub fn local_peer(&self) -> Option<&PeerInfo> {
        self.peers.iter().find(|p| p.id == self.local_id)
    }

    // Peers we dial, the rest dial us.
    pub fn outbound_peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.iter().filter(move |p| p.id < self.local_id)
    }

    // peer_<id>/<FileName>
    pub fn file_path(&self) -> PathBuf {
        self.dir
            .join(format!("peer_{}", self.local_id))
            .join(&self.common.file_name)
    }

}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// Numbered meaningful lines.
fn lines(src: &str) -> impl Iterator<Item = (usize, &str)> {
    src.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn positive<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr + Default + PartialOrd,
{
    match value.parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
