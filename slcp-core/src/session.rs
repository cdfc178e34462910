//! Local session: who we are, whether we joined, and the autoreply policy.

use crate::protocol::{Message, AUTOREPLY_PREFIX};
use crate::wire::{self, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    #[default]
    Unjoined,
    Joined,
}

/// Changed only by locally issued JOIN/LEAVE; network traffic never touches it.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub presence: Presence,
    pub local_handle: String,
    pub local_port: u16,
    pub autoreply: Option<String>,
}

impl SessionState {
    pub fn new(local_handle: impl Into<String>, local_port: u16) -> Self {
        Self {
            presence: Presence::Unjoined,
            local_handle: local_handle.into(),
            local_port,
            autoreply: None,
        }
    }

    pub fn with_autoreply(mut self, text: Option<String>) -> Result<Self, ProtocolError> {
        self.set_autoreply(text)?;
        Ok(self)
    }

    pub fn is_joined(&self) -> bool {
        self.presence == Presence::Joined
    }

    pub fn join(&mut self) {
        self.presence = Presence::Joined;
    }

    pub fn leave(&mut self) {
        self.presence = Presence::Unjoined;
    }

    /// Blank text clears the autoreply. Text whose autoreply MSG would not fit in one
    /// message is rejected and the previous setting kept.
    pub fn set_autoreply(&mut self, text: Option<String>) -> Result<(), ProtocolError> {
        let text = text.filter(|t| !t.trim().is_empty());
        if let Some(t) = &text {
            let reply = format!("{AUTOREPLY_PREFIX}{t}");
            wire::encode(&Message::msg(&self.local_handle, &reply))?;
        }
        self.autoreply = text;
        Ok(())
    }

    pub fn is_local(&self, handle: &str) -> bool {
        self.local_handle == handle
    }

    /// Text to send back to an inquirer, if any: only while unjoined and configured.
    pub fn autoreply_text(&self) -> Option<String> {
        if self.is_joined() {
            return None;
        }
        self.autoreply
            .as_ref()
            .map(|t| format!("{AUTOREPLY_PREFIX}{t}"))
    }
}
