use crate::core_models::entities::{BlockIndex, Message, PeerId};

// Commands pushed into a running session by the scheduler or a sibling session
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionCommand {
    Deliver(Message),
    AnnounceComplete,
}

/// Outcome of one choking round for a single neighbor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChokeDecision {
    Choke(PeerId),
    Unchoke(PeerId),
}

impl ChokeDecision {
    pub fn peer(&self) -> PeerId {
        return match self {
            ChokeDecision::Choke(id) => *id,
            ChokeDecision::Unchoke(id) => *id,
        };
    }

    pub fn message(&self) -> Message {
        return match self {
            ChokeDecision::Choke(_) => Message::Choke,
            ChokeDecision::Unchoke(_) => Message::Unchoke,
        };
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    Stored,
    Completed,
    Duplicate,
}

impl WriteOutcome {
    pub fn is_completed(&self) -> bool {
        return matches!(self, WriteOutcome::Completed);
    }
}

pub fn have_commands(blocks: &[BlockIndex]) -> Vec<SessionCommand> {
    return blocks.iter()
        .map(|block_idx| SessionCommand::Deliver(Message::Have(*block_idx)))
        .collect();
}
