use serde::{Deserialize, Serialize};

/// Opening assistant line of every fresh transcript.
pub const GREETING: &str = "Hello! I am Aiko. How can I assist you today?";

/// Non-conversational hint shown under the greeting.
pub const HINT: &str = "Select a suggested question below or type your own to get started.";

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// Informational line that is not part of the exchange.
    SystemNote,
}

/// One transcript line. Fields are private so a message cannot change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    sender: Role,
    text: String,
}

impl Message {
    pub fn new(sender: Role, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system_note(text: impl Into<String>) -> Self {
        Self::new(Role::SystemNote, text)
    }

    pub fn sender(&self) -> Role {
        self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Live, append-only conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Default for Transcript {
    /// Greeting followed by the hint note.
    fn default() -> Self {
        Self {
            messages: vec![Message::assistant(GREETING), Message::system_note(HINT)],
        }
    }
}

impl Transcript {
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
