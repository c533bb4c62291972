pub type PeerId = u32;
pub type BlockIndex = usize;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PeerIdentity {
    pub id: PeerId,
    pub host: String,
    pub port: u16,
    pub has_file_at_start: bool,
}

impl PeerIdentity {
    pub fn new(id: PeerId, host: &str, port: u16, has_file_at_start: bool) -> Self {
        return PeerIdentity {
            id,
            host: host.to_string(),
            port,
            has_file_at_start,
        };
    }
}

/// Splits the shared file into fixed-size blocks; only the last one may be shorter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockLayout {
    pub file_length: u64,
    pub block_size: usize,
    pub block_count: usize,
}

impl BlockLayout {
    pub fn new(file_length: u64, block_size: usize) -> Self {
        let block_size_u64 = block_size as u64;
        let block_count = ((file_length + block_size_u64 - 1) / block_size_u64) as usize;
        return BlockLayout { file_length, block_size, block_count };
    }

    pub fn contains(&self, block_idx: BlockIndex) -> bool {
        return block_idx < self.block_count;
    }

    pub fn offset(&self, block_idx: BlockIndex) -> u64 {
        return block_idx as u64 * self.block_size as u64;
    }

    pub fn block_length(&self, block_idx: BlockIndex) -> usize {
        return if block_idx == self.block_count - 1 {
            (self.file_length - self.offset(block_idx)) as usize
        } else {
            self.block_size
        };
    }

    pub fn bitfield_length(&self) -> usize {
        return (self.block_count + 7) / 8;
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    Complete,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(BlockIndex),
    Bitfield(Vec<u8>),
    Request(BlockIndex),
    Piece(BlockIndex, Vec<u8>),
}

impl Message {
    pub fn name(&self) -> &'static str {
        return match self {
            Message::Complete => "COMPLETE",
            Message::Choke => "CHOKE",
            Message::Unchoke => "UNCHOKE",
            Message::Interested => "INTERESTED",
            Message::NotInterested => "NOT INTERESTED",
            Message::Have(_) => "HAVE",
            Message::Bitfield(_) => "BITFIELD",
            Message::Request(_) => "REQUEST",
            Message::Piece(_, _) => "PIECE",
        };
    }
}

/// Bit-per-block ownership vector; bit 0 of each byte is the most significant one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bitfield {
    content: Vec<u8>,
}

impl Bitfield {
    pub fn new(bytes: Vec<u8>) -> Self {
        return Bitfield { content: bytes };
    }

    pub fn init(num_of_blocks: usize) -> Self {
        return Bitfield { content: vec![0u8; (num_of_blocks + 7) / 8] };
    }

    pub fn full(num_of_blocks: usize) -> Self {
        let mut bitfield = Bitfield::init(num_of_blocks);
        for block_idx in 0..num_of_blocks {
            bitfield.block_acquired(block_idx);
        }
        return bitfield;
    }

    pub fn block_acquired(&mut self, block_idx: BlockIndex) {
        let (byte_idx, bit_idx) = (block_idx / 8, block_idx % 8);
        if byte_idx < self.content.len() {
            self.content[byte_idx] |= 1 << (7 - bit_idx);
        }
    }

    pub fn has_block(&self, block_idx: BlockIndex) -> bool {
        let (byte_idx, bit_idx) = (block_idx / 8, block_idx % 8);
        return byte_idx < self.content.len() && self.content[byte_idx] & (1 << (7 - bit_idx)) != 0;
    }

    /// Indices of set bits below `num_of_blocks`; padding bits are ignored.
    pub fn owned_blocks(&self, num_of_blocks: usize) -> Vec<BlockIndex> {
        return (0..num_of_blocks)
            .filter(|block_idx| self.has_block(*block_idx))
            .collect();
    }

    pub fn as_bytes(&self) -> &[u8] {
        return &self.content;
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        return self.content.clone();
    }
}

#[cfg(test)]
mod tests {
    use crate::core_models::entities::{Bitfield, BlockLayout};

    #[test]
    pub fn bitfield_initialization_test() {
        let bitfield: Bitfield = Bitfield::init(4);
        assert_eq!(bitfield.as_bytes().len(), 1);
        assert_eq!(bitfield.as_bytes()[0], 0);
        assert_eq!(Bitfield::init(9).as_bytes().len(), 2);
    }

    #[test]
    pub fn bitfield_update_test() {
        let mut bitfield: Bitfield = Bitfield::init(4);
        bitfield.block_acquired(3);
        bitfield.block_acquired(1);
        bitfield.block_acquired(2);
        assert_eq!(bitfield.as_bytes()[0], 0b0111_0000);
    }

    #[test]
    pub fn bitfield_has_test() {
        let mut bitfield: Bitfield = Bitfield::init(4);
        bitfield.block_acquired(1);
        bitfield.block_acquired(2);
        assert!(bitfield.has_block(1) && bitfield.has_block(2));
        assert!(!bitfield.has_block(0) && !bitfield.has_block(3));
        assert!(!bitfield.has_block(64));
    }

    #[test]
    pub fn full_bitfield_leaves_padding_clear_test() {
        let bitfield = Bitfield::full(3);
        assert_eq!(bitfield.as_bytes(), &[0b1110_0000]);
        assert_eq!(bitfield.owned_blocks(3), vec![0, 1, 2]);
    }

    #[test]
    pub fn owned_blocks_ignores_padding_test() {
        let bitfield = Bitfield::new(vec![0b1010_0011]);
        assert_eq!(bitfield.owned_blocks(3), vec![0, 2]);
    }

    #[test]
    pub fn layout_with_short_last_block_test() {
        let layout = BlockLayout::new(10, 4);
        assert_eq!(layout.block_count, 3);
        assert_eq!(layout.block_length(0), 4);
        assert_eq!(layout.block_length(1), 4);
        assert_eq!(layout.block_length(2), 2);
        assert_eq!(layout.offset(2), 8);
        assert_eq!(layout.bitfield_length(), 1);
        assert!(!layout.contains(3));
    }

    #[test]
    pub fn layout_with_exact_blocks_test() {
        let layout = BlockLayout::new(16, 4);
        assert_eq!(layout.block_count, 4);
        assert_eq!(layout.block_length(3), 4);
    }
}
