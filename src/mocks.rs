use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use crate::block_store::BlockStore;
use crate::config::Config;
use crate::core_models::entities::{PeerId, PeerIdentity};
use crate::dependency_provider::{DependencyProvider, SwarmDeps};
use crate::file_provider::FileProvider;

/// In-memory stand-in for the target file; clones share the same bytes.
#[derive(Clone)]
pub struct MemoryFileProvider {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemoryFileProvider {
    pub fn new(length: usize) -> Self {
        return MemoryFileProvider::from_bytes(vec![0; length]);
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        return MemoryFileProvider { bytes: Arc::new(Mutex::new(bytes)) };
    }

    pub fn contents(&self) -> Vec<u8> {
        return self.lock().clone();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        return match self.bytes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
    }
}

#[async_trait]
impl FileProvider for MemoryFileProvider {
    async fn read(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let bytes = self.lock();
        let start = offset as usize;
        return bytes.get(start..start + length)
            .map(|slice| slice.to_vec())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past the end of the file"));
    }

    async fn write(&mut self, offset: u64, data: Vec<u8>) -> io::Result<()> {
        let mut bytes = self.lock();
        let start = offset as usize;
        if start + data.len() > bytes.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "write past the end of the file"));
        }
        bytes[start..start + data.len()].copy_from_slice(&data);
        return Ok(());
    }
}

/// Deterministic file contents used by seeds in tests.
pub fn sample_file(length: usize) -> Vec<u8> {
    return (0..length).map(|idx| (idx % 251) as u8).collect();
}

/// Configuration with millisecond timers, suited to tests.
pub fn test_config(host_id: PeerId, peers: Vec<PeerIdentity>, file_length: u64, block_size: usize) -> Config {
    return Config {
        host_id,
        preferred_neighbors: 1,
        unchoking_interval: Duration::from_millis(50),
        optimistic_unchoking_interval: Duration::from_millis(100),
        file_name: "shared.dat".to_string(),
        file_length,
        block_size,
        peers,
        retry_limit: 3,
        retry_interval: Duration::from_millis(20),
        file_path: PathBuf::from("shared.dat"),
    };
}

/// Wires a dependency provider around an in-memory block store.
///
/// A host that starts with the file gets `sample_file` contents, any other host an empty file.
pub fn memory_deps(config: Config) -> (Arc<dyn SwarmDeps>, MemoryFileProvider) {
    let layout = config.layout();
    let has_file = config.host().map_or(false, |host| host.has_file_at_start);
    let file = if has_file {
        MemoryFileProvider::from_bytes(sample_file(layout.file_length as usize))
    } else {
        MemoryFileProvider::new(layout.file_length as usize)
    };
    let store = BlockStore::new(layout, Box::new(file.clone()), has_file);
    let deps: Arc<dyn SwarmDeps> = Arc::new(DependencyProvider::init(config, store));
    return (deps, file);
}
