use std::collections::{HashMap, HashSet};
use std::io;
use log::{debug, warn};
use rand::prelude::IteratorRandom;
use thiserror::Error;
use tokio::sync::Mutex;
use crate::config::Config;
use crate::core_models::entities::{Bitfield, BlockIndex, BlockLayout, PeerId};
use crate::core_models::events::WriteOutcome;
use crate::file_provider::{FileProvider, TokioFileProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("block {index} is out of range (block count {block_count})")]
    OutOfRange { index: BlockIndex, block_count: usize },
    #[error("block {index} expects {expected} bytes, got {actual}")]
    LengthMismatch { index: BlockIndex, expected: usize, actual: usize },
    #[error("store holds the complete file and is read-only")]
    ReadOnly,
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
}

struct BlockStoreState {
    file: Box<dyn FileProvider>,
    own_bitfield: Bitfield,
    // Missing blocks that have not been requested yet
    interested: HashSet<BlockIndex>,
    // Requested blocks awaiting their PIECE message
    downloading: HashSet<BlockIndex>,
    remote_have: HashMap<PeerId, HashSet<BlockIndex>>,
}

impl BlockStoreState {
    fn is_missing(&self, block_idx: &BlockIndex) -> bool {
        return self.interested.contains(block_idx) || self.downloading.contains(block_idx);
    }
}

/// Owns the target file, the local bitfield and the block-selection sets.
///
/// Every block moves `Missing -> Requested -> Owned`: missing blocks sit in
/// `interested`, requested ones in `downloading`, and owned blocks are in
/// neither set and have their bit set in the own bitfield. All transitions
/// happen under a single lock.
pub struct BlockStore {
    layout: BlockLayout,
    read_only: bool,
    state: Mutex<BlockStoreState>,
    obtained_blocks: Mutex<Vec<BlockIndex>>,
}

impl BlockStore {
    pub fn new(layout: BlockLayout, file: Box<dyn FileProvider>, has_complete_file: bool) -> Self {
        let (own_bitfield, interested) = if has_complete_file {
            (Bitfield::full(layout.block_count), HashSet::new())
        } else {
            (Bitfield::init(layout.block_count), (0..layout.block_count).collect())
        };

        return BlockStore {
            layout,
            read_only: has_complete_file,
            state: Mutex::new(BlockStoreState {
                file,
                own_bitfield,
                interested,
                downloading: HashSet::new(),
                remote_have: HashMap::new(),
            }),
            obtained_blocks: Mutex::new(Vec::new()),
        };
    }

    /// Opens the host's copy of the shared file: read-only for a seed, freshly sized otherwise.
    pub async fn open(config: &Config) -> Result<Self, StorageError> {
        let layout = config.layout();
        let has_file = config.host().map_or(false, |host| host.has_file_at_start);
        let file = if has_file {
            TokioFileProvider::open_read_only(&config.file_path, layout.file_length).await?
        } else {
            TokioFileProvider::create(&config.file_path, layout.file_length).await?
        };
        return Ok(BlockStore::new(layout, Box::new(file), has_file));
    }

    pub fn layout(&self) -> BlockLayout {
        return self.layout;
    }

    pub async fn select_block_to_request(&self, neighbor: PeerId) -> Option<BlockIndex> {
        let mut state = self.state.lock().await;
        let have = state.remote_have.get(&neighbor)?;

        if !state.interested.is_empty() {
            let block_idx = state.interested.iter()
                .filter(|block_idx| have.contains(block_idx))
                .choose(&mut rand::thread_rng())
                .copied()?;
            state.interested.remove(&block_idx);
            state.downloading.insert(block_idx);
            return Some(block_idx);
        }

        // Only requested blocks remain: re-pick one so a request lost to a choke is retried
        return state.downloading.iter()
            .filter(|block_idx| have.contains(block_idx))
            .choose(&mut rand::thread_rng())
            .copied();
    }

    /// Returns a requested block to `interested` when its request will not be answered.
    pub async fn release_block(&self, block_idx: BlockIndex) {
        let mut state = self.state.lock().await;
        if state.downloading.remove(&block_idx) {
            state.interested.insert(block_idx);
        }
    }

    #[cfg(test)]
    pub async fn is_downloading(&self, block_idx: BlockIndex) -> bool {
        return self.state.lock().await.downloading.contains(&block_idx);
    }

    pub async fn write_block(&self, block_idx: BlockIndex, data: Vec<u8>) -> Result<WriteOutcome, StorageError> {
        self.check_range(block_idx)?;
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let expected = self.layout.block_length(block_idx);
        if data.len() != expected {
            return Err(StorageError::LengthMismatch { index: block_idx, expected, actual: data.len() });
        }

        let mut state = self.state.lock().await;
        if state.own_bitfield.has_block(block_idx) {
            return Ok(WriteOutcome::Duplicate);
        }

        if let Err(err) = state.file.write(self.layout.offset(block_idx), data).await {
            // keep the block retryable instead of stranding it in `downloading`
            state.downloading.remove(&block_idx);
            state.interested.insert(block_idx);
            return Err(StorageError::Io(err));
        }

        state.interested.remove(&block_idx);
        state.downloading.remove(&block_idx);
        state.own_bitfield.block_acquired(block_idx);
        let completed = state.interested.is_empty() && state.downloading.is_empty();
        drop(state);

        self.obtained_blocks.lock().await.push(block_idx);
        debug!("Block store :: block {} written", block_idx);

        return Ok(if completed { WriteOutcome::Completed } else { WriteOutcome::Stored });
    }

    pub async fn read_block(&self, block_idx: BlockIndex) -> Result<Vec<u8>, StorageError> {
        self.check_range(block_idx)?;
        let mut state = self.state.lock().await;
        let data = state.file
            .read(self.layout.offset(block_idx), self.layout.block_length(block_idx))
            .await?;
        return Ok(data);
    }

    pub async fn is_complete(&self) -> bool {
        let state = self.state.lock().await;
        return state.interested.is_empty() && state.downloading.is_empty();
    }

    pub async fn has_block(&self, block_idx: BlockIndex) -> bool {
        return self.state.lock().await.own_bitfield.has_block(block_idx);
    }

    pub async fn own_bitfield(&self) -> Bitfield {
        return self.state.lock().await.own_bitfield.clone();
    }

    pub async fn owned_count(&self) -> usize {
        let state = self.state.lock().await;
        return self.layout.block_count - state.interested.len() - state.downloading.len();
    }

    pub async fn record_remote_bitfield(&self, neighbor: PeerId, bytes: &[u8]) {
        let have: HashSet<BlockIndex> = Bitfield::new(bytes.to_vec())
            .owned_blocks(self.layout.block_count)
            .into_iter()
            .collect();
        self.state.lock().await.remote_have.insert(neighbor, have);
    }

    pub async fn record_remote_have(&self, neighbor: PeerId, block_idx: BlockIndex) {
        if !self.layout.contains(block_idx) {
            warn!("Block store :: peer {} announced block {} outside of the file", neighbor, block_idx);
            return;
        }
        self.state.lock().await.remote_have
            .entry(neighbor)
            .or_default()
            .insert(block_idx);
    }

    pub async fn is_interested_in(&self, neighbor: PeerId) -> bool {
        let state = self.state.lock().await;
        return match state.remote_have.get(&neighbor) {
            Some(have) => have.iter().any(|block_idx| state.is_missing(block_idx)),
            None => false,
        };
    }

    pub async fn remote_has_all(&self, neighbor: PeerId) -> bool {
        let state = self.state.lock().await;
        return state.remote_have.get(&neighbor)
            .map_or(false, |have| have.len() == self.layout.block_count);
    }

    /// Hands out the blocks written since the previous call and clears the queue.
    pub async fn drain_obtained_blocks(&self) -> Vec<BlockIndex> {
        let mut obtained = self.obtained_blocks.lock().await;
        return std::mem::take(&mut *obtained);
    }

    fn check_range(&self, block_idx: BlockIndex) -> Result<(), StorageError> {
        if !self.layout.contains(block_idx) {
            return Err(StorageError::OutOfRange { index: block_idx, block_count: self.layout.block_count });
        }
        return Ok(());
    }

    #[cfg(test)]
    async fn selection_sets(&self) -> (HashSet<BlockIndex>, HashSet<BlockIndex>) {
        let state = self.state.lock().await;
        return (state.interested.clone(), state.downloading.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io;
    use crate::block_store::{BlockStore, StorageError};
    use crate::core_models::entities::BlockLayout;
    use crate::core_models::events::WriteOutcome;
    use crate::file_provider::MockFileProvider;
    use crate::mocks::MemoryFileProvider;

    const NEIGHBOR: u32 = 1001;

    fn leecher(file_length: u64, block_size: usize) -> (BlockStore, MemoryFileProvider) {
        let layout = BlockLayout::new(file_length, block_size);
        let file = MemoryFileProvider::new(file_length as usize);
        return (BlockStore::new(layout, Box::new(file.clone()), false), file);
    }

    async fn assert_sets_disjoint(store: &BlockStore) {
        let (interested, downloading) = store.selection_sets().await;
        assert!(interested.is_disjoint(&downloading));
        assert_eq!(store.is_complete().await, interested.is_empty() && downloading.is_empty());
    }

    #[tokio::test]
    async fn select_requires_known_have_set() {
        let (store, _) = leecher(10, 4);
        assert_eq!(store.select_block_to_request(NEIGHBOR).await, None);
    }

    #[tokio::test]
    async fn select_only_blocks_the_neighbor_has() {
        let (store, _) = leecher(10, 4);
        store.record_remote_bitfield(NEIGHBOR, &[0b0100_0000]).await;

        assert_eq!(store.select_block_to_request(NEIGHBOR).await, Some(1));
        let (interested, downloading) = store.selection_sets().await;
        assert_eq!(interested, HashSet::from([0, 2]));
        assert_eq!(downloading, HashSet::from([1]));
        assert_sets_disjoint(&store).await;

        // block 1 is already requested and others are still unrequested
        assert_eq!(store.select_block_to_request(NEIGHBOR).await, None);
    }

    #[tokio::test]
    async fn select_re_picks_downloading_when_nothing_else_is_left() {
        let (store, _) = leecher(10, 4);
        store.record_remote_bitfield(NEIGHBOR, &[0b1110_0000]).await;
        let mut picked = HashSet::new();
        for _ in 0..3 {
            picked.insert(store.select_block_to_request(NEIGHBOR).await.unwrap());
        }
        assert_eq!(picked, HashSet::from([0, 1, 2]));

        let re_picked = store.select_block_to_request(NEIGHBOR).await.unwrap();
        assert!(picked.contains(&re_picked));
        let (interested, downloading) = store.selection_sets().await;
        assert!(interested.is_empty());
        assert_eq!(downloading.len(), 3);
    }

    #[tokio::test]
    async fn select_never_returns_owned_blocks() {
        let (store, _) = leecher(10, 4);
        store.record_remote_bitfield(NEIGHBOR, &[0b1110_0000]).await;
        store.write_block(0, vec![1; 4]).await.unwrap();
        store.write_block(2, vec![3; 2]).await.unwrap();

        for _ in 0..5 {
            assert_eq!(store.select_block_to_request(NEIGHBOR).await, Some(1));
        }
    }

    #[tokio::test]
    async fn write_moves_block_to_owned() {
        let (store, file) = leecher(10, 4);
        store.record_remote_bitfield(NEIGHBOR, &[0b1000_0000]).await;
        assert_eq!(store.select_block_to_request(NEIGHBOR).await, Some(0));

        let outcome = store.write_block(0, vec![7; 4]).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Stored);
        assert!(store.has_block(0).await);
        assert_eq!(store.own_bitfield().await.as_bytes(), &[0b1000_0000]);
        let (interested, downloading) = store.selection_sets().await;
        assert_eq!(interested, HashSet::from([1, 2]));
        assert!(downloading.is_empty());
        assert_eq!(&file.contents()[..4], &[7, 7, 7, 7]);
        assert_eq!(store.drain_obtained_blocks().await, vec![0]);
        assert!(store.drain_obtained_blocks().await.is_empty());
    }

    #[tokio::test]
    async fn write_with_wrong_length_is_rejected() {
        let (store, file) = leecher(10, 4);

        let result = store.write_block(2, vec![1; 4]).await;
        assert!(matches!(result, Err(StorageError::LengthMismatch { index: 2, expected: 2, actual: 4 })));
        let result = store.write_block(0, vec![1; 3]).await;
        assert!(matches!(result, Err(StorageError::LengthMismatch { .. })));

        assert_eq!(store.owned_count().await, 0);
        assert!(file.contents().iter().all(|byte| *byte == 0));
        assert!(store.drain_obtained_blocks().await.is_empty());
    }

    #[tokio::test]
    async fn rewrite_of_owned_block() {
        let (store, _) = leecher(10, 4);
        store.write_block(1, vec![1; 4]).await.unwrap();

        assert_eq!(store.write_block(1, vec![1; 4]).await.unwrap(), WriteOutcome::Duplicate);
        assert!(matches!(store.write_block(1, vec![1; 2]).await, Err(StorageError::LengthMismatch { .. })));
        assert_eq!(store.drain_obtained_blocks().await, vec![1]);
    }

    #[tokio::test]
    async fn last_write_reports_completion() {
        let (store, file) = leecher(10, 4);
        assert_eq!(store.write_block(0, vec![1; 4]).await.unwrap(), WriteOutcome::Stored);
        assert_eq!(store.write_block(2, vec![3; 2]).await.unwrap(), WriteOutcome::Stored);
        assert!(!store.is_complete().await);
        assert_eq!(store.write_block(1, vec![2; 4]).await.unwrap(), WriteOutcome::Completed);

        assert!(store.is_complete().await);
        assert_sets_disjoint(&store).await;
        assert_eq!(file.contents(), vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3]);
        assert_eq!(store.read_block(2).await.unwrap(), vec![3, 3]);
    }

    #[tokio::test]
    async fn read_out_of_range() {
        let (store, _) = leecher(10, 4);
        assert!(matches!(store.read_block(3).await, Err(StorageError::OutOfRange { index: 3, block_count: 3 })));
        assert!(matches!(store.write_block(3, vec![]).await, Err(StorageError::OutOfRange { .. })));
    }

    #[tokio::test]
    async fn seed_store_is_read_only() {
        let layout = BlockLayout::new(10, 4);
        let file = MemoryFileProvider::from_bytes((0..10).collect());
        let store = BlockStore::new(layout, Box::new(file), true);

        assert!(store.is_complete().await);
        assert_eq!(store.own_bitfield().await.as_bytes(), &[0b1110_0000]);
        assert!(matches!(store.write_block(0, vec![0; 4]).await, Err(StorageError::ReadOnly)));
        assert_eq!(store.read_block(1).await.unwrap(), vec![4, 5, 6, 7]);
        assert_eq!(store.read_block(2).await.unwrap(), vec![8, 9]);
    }

    #[tokio::test]
    async fn failed_write_returns_block_to_interested() {
        let mut file = MockFileProvider::new();
        file.expect_write().returning(|_, _| Err(io::Error::new(io::ErrorKind::Other, "disk full")));
        let store = BlockStore::new(BlockLayout::new(10, 4), Box::new(file), false);
        store.record_remote_bitfield(NEIGHBOR, &[0b0010_0000]).await;
        assert_eq!(store.select_block_to_request(NEIGHBOR).await, Some(2));

        let result = store.write_block(2, vec![1; 2]).await;

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(!store.has_block(2).await);
        let (interested, downloading) = store.selection_sets().await;
        assert!(interested.contains(&2));
        assert!(downloading.is_empty());
        assert_eq!(store.select_block_to_request(NEIGHBOR).await, Some(2));
    }

    #[tokio::test]
    async fn release_block_makes_it_selectable_again() {
        let (store, _) = leecher(10, 4);
        store.record_remote_bitfield(NEIGHBOR, &[0b1000_0000]).await;
        assert_eq!(store.select_block_to_request(NEIGHBOR).await, Some(0));
        store.release_block(0).await;
        store.release_block(1).await;

        let (interested, downloading) = store.selection_sets().await;
        assert_eq!(interested, HashSet::from([0, 1, 2]));
        assert!(downloading.is_empty());
    }

    #[tokio::test]
    async fn interest_follows_local_missing_blocks() {
        let (store, _) = leecher(10, 4);
        assert!(!store.is_interested_in(NEIGHBOR).await);

        store.record_remote_bitfield(NEIGHBOR, &[0b1110_0000]).await;
        assert!(store.is_interested_in(NEIGHBOR).await);
        assert!(store.remote_has_all(NEIGHBOR).await);

        store.write_block(0, vec![0; 4]).await.unwrap();
        store.write_block(1, vec![0; 4]).await.unwrap();
        // block 2 is requested but not yet owned
        store.select_block_to_request(NEIGHBOR).await;
        assert!(store.is_interested_in(NEIGHBOR).await);

        store.write_block(2, vec![0; 2]).await.unwrap();
        assert!(!store.is_interested_in(NEIGHBOR).await);
    }

    #[tokio::test]
    async fn have_messages_extend_the_remote_set() {
        let (store, _) = leecher(10, 4);
        store.record_remote_bitfield(NEIGHBOR, &[0]).await;
        assert!(!store.is_interested_in(NEIGHBOR).await);

        store.record_remote_have(NEIGHBOR, 1).await;
        store.record_remote_have(NEIGHBOR, 9).await;
        assert!(store.is_interested_in(NEIGHBOR).await);
        assert!(!store.remote_has_all(NEIGHBOR).await);

        store.record_remote_have(NEIGHBOR, 0).await;
        store.record_remote_have(NEIGHBOR, 2).await;
        assert!(store.remote_has_all(NEIGHBOR).await);
    }
}
