use crate::ai::Message;

/// Bounded FIFO buffer of conversation turns.
///
/// Used as the fallback context source when Discord history is unavailable.
/// The capacity is fixed at construction; appending beyond it evicts the
/// oldest turn first.
pub struct ConversationHistory {
    history: Vec<Message>,
    max_history: usize,
}

impl ConversationHistory {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: Vec::new(),
            max_history,
        }
    }

    pub fn append(&mut self, message: Message) {
        self.history.push(message);
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }
    }

    /// Defensive copy - caller mutation does not affect internal state.
    pub fn snapshot(&self) -> Vec<Message> {
        self.history.clone()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Render as "role: content" lines joined by newline, in stored order.
    pub fn formatted(&self) -> String {
        self.history
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
