use crate::constants::MAX_MESSAGES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// The cap is reached; the input must not be stored or sent.
    Closed,
}

/// Hard ceiling on stored messages. Checked before a user turn is accepted,
/// never after a reply is generated, so the reply to the last admitted
/// input may take the transcript one past the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimiter {
    max_messages: usize,
}

impl Default for TurnLimiter {
    fn default() -> Self {
        Self::new(MAX_MESSAGES)
    }
}

impl TurnLimiter {
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn admit(&self, stored: usize) -> Admission {
        if stored >= self.max_messages {
            Admission::Closed
        } else {
            Admission::Accepted
        }
    }

    /// The transcript can be downloaded once the ceiling is reached.
    pub fn exportable(&self, stored: usize) -> bool {
        stored >= self.max_messages
    }
}
