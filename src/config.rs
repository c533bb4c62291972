use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use crate::core_models::entities::{BlockLayout, PeerId, PeerIdentity};
use crate::p2p::codec::{MAX_BLOCK_SIZE, MAX_PEER_ID};

pub const COMMON_CONFIG_FILE: &str = "Common.cfg";
pub const PEER_INFO_FILE: &str = "PeerInfo.cfg";
pub const DEFAULT_RETRY_LIMIT: usize = 10;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(3000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("missing setting {0}")]
    MissingKey(&'static str),
    #[error("setting {0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("peer {0} is not listed in the peer info file")]
    UnknownHost(PeerId),
    #[error("peer id {0} does not fit the 4-digit handshake field")]
    InvalidPeerId(PeerId),
    #[error("piece size {0} exceeds the largest block a frame can carry ({})", MAX_BLOCK_SIZE)]
    BlockTooLarge(usize),
    #[error("peer {0} is listed twice")]
    DuplicatePeer(PeerId),
}

/// Static, read-only description of the swarm as seen by the host peer.
#[derive(Clone, Debug)]
pub struct Config {
    pub host_id: PeerId,
    pub preferred_neighbors: usize,
    pub unchoking_interval: Duration,
    pub optimistic_unchoking_interval: Duration,
    pub file_name: String,
    pub file_length: u64,
    pub block_size: usize,
    // every configured peer, the host included
    pub peers: Vec<PeerIdentity>,
    pub retry_limit: usize,
    pub retry_interval: Duration,
    pub file_path: PathBuf,
}

struct CommonSettings {
    preferred_neighbors: usize,
    unchoking_interval: u64,
    optimistic_unchoking_interval: u64,
    file_name: String,
    file_length: u64,
    block_size: usize,
}

impl Config {
    pub fn load(config_dir: &Path, host_id: PeerId) -> Result<Self, ConfigError> {
        let common = parse_common(&read_to_string(&config_dir.join(COMMON_CONFIG_FILE))?)?;
        let peers = parse_peer_info(&read_to_string(&config_dir.join(PEER_INFO_FILE))?)?;
        let file_path = config_dir.join(host_id.to_string()).join(&common.file_name);

        let config = Config {
            host_id,
            preferred_neighbors: common.preferred_neighbors,
            unchoking_interval: Duration::from_secs(common.unchoking_interval),
            optimistic_unchoking_interval: Duration::from_secs(common.optimistic_unchoking_interval),
            file_name: common.file_name,
            file_length: common.file_length,
            block_size: common.block_size,
            peers,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            file_path,
        };
        config.validate()?;
        return Ok(config);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_length == 0 {
            return Err(ConfigError::NotPositive("FileSize"));
        }
        if self.block_size == 0 {
            return Err(ConfigError::NotPositive("PieceSize"));
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::BlockTooLarge(self.block_size));
        }
        if self.unchoking_interval.is_zero() {
            return Err(ConfigError::NotPositive("UnchokingInterval"));
        }
        if self.optimistic_unchoking_interval.is_zero() {
            return Err(ConfigError::NotPositive("OptimisticUnchokingInterval"));
        }
        let mut seen = HashSet::new();
        for peer in self.peers.iter() {
            if peer.id > MAX_PEER_ID {
                return Err(ConfigError::InvalidPeerId(peer.id));
            }
            if !seen.insert(peer.id) {
                return Err(ConfigError::DuplicatePeer(peer.id));
            }
        }
        if self.host().is_none() {
            return Err(ConfigError::UnknownHost(self.host_id));
        }
        return Ok(());
    }

    pub fn host(&self) -> Option<&PeerIdentity> {
        return self.peers.iter().find(|peer| peer.id == self.host_id);
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &PeerIdentity> {
        return self.peers.iter().filter(move |peer| peer.id != self.host_id);
    }

    pub fn neighbor(&self, peer_id: PeerId) -> Option<&PeerIdentity> {
        return self.neighbors().find(|peer| peer.id == peer_id);
    }

    pub fn listening_port(&self) -> u16 {
        return self.host().map_or(0, |host| host.port);
    }

    pub fn layout(&self) -> BlockLayout {
        return BlockLayout::new(self.file_length, self.block_size);
    }
}

fn read_to_string(path: &Path) -> Result<String, ConfigError> {
    return fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source });
}

// (line number, whitespace separated fields) for every meaningful line
fn config_lines(text: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    return text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| (line_no, line.split_whitespace().collect()));
}

fn parse_common(text: &str) -> Result<CommonSettings, ConfigError> {
    let mut values: HashMap<&str, (usize, &str)> = HashMap::new();
    for (line_no, fields) in config_lines(text) {
        if fields.len() != 2 {
            return Err(ConfigError::Parse { line: line_no, reason: "expected `key value`".to_string() });
        }
        values.insert(fields[0], (line_no, fields[1]));
    }

    return Ok(CommonSettings {
        preferred_neighbors: parse_number(&values, "NumberOfPreferredNeighbors")?,
        unchoking_interval: parse_number(&values, "UnchokingInterval")?,
        optimistic_unchoking_interval: parse_number(&values, "OptimisticUnchokingInterval")?,
        file_name: values.get("FileName")
            .map(|(_, value)| value.to_string())
            .ok_or(ConfigError::MissingKey("FileName"))?,
        file_length: parse_number(&values, "FileSize")?,
        block_size: parse_number(&values, "PieceSize")?,
    });
}

fn parse_number<T: std::str::FromStr>(values: &HashMap<&str, (usize, &str)>, key: &'static str) -> Result<T, ConfigError> {
    let (line, value) = values.get(key).ok_or(ConfigError::MissingKey(key))?;
    return value.parse::<T>().map_err(|_| ConfigError::Parse {
        line: *line,
        reason: format!("{} is not a valid number for {}", value, key),
    });
}

fn parse_peer_info(text: &str) -> Result<Vec<PeerIdentity>, ConfigError> {
    let mut peers = Vec::new();
    for (line_no, fields) in config_lines(text) {
        if fields.len() != 4 {
            return Err(ConfigError::Parse { line: line_no, reason: "expected `id host port hasFile`".to_string() });
        }
        let parse_error = |what: &str| ConfigError::Parse { line: line_no, reason: format!("invalid {}", what) };
        let id = fields[0].parse::<PeerId>().map_err(|_| parse_error("peer id"))?;
        let port = fields[2].parse::<u16>().map_err(|_| parse_error("port"))?;
        let has_file = match fields[3] {
            "0" => false,
            "1" => true,
            _ => return Err(parse_error("hasFile flag")),
        };
        peers.push(PeerIdentity::new(id, fields[1], port, has_file));
    }
    return Ok(peers);
}
