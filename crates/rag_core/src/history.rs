//! Conversation log for transports. The query pipeline never reads or
//! writes it; the caller owns one and passes it where it is needed.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatLog {
    turns: Vec<ChatTurn>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a question and its reply with one shared timestamp.
    pub fn push_exchange(&mut self, question: impl Into<String>, reply: impl Into<String>) {
        let timestamp = Utc::now();
        self.turns.push(ChatTurn {
            role: Role::User,
            content: question.into(),
            timestamp,
        });
        self.turns.push(ChatTurn {
            role: Role::Assistant,
            content: reply.into(),
            timestamp,
        });
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.turns)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchanges_are_user_then_assistant() {
        let mut log = ChatLog::new();
        log.push_exchange("北京天气？", "北京今天晴。");
        log.push_exchange("谢谢", "No relevant answer found.");

        let roles: Vec<Role> = log.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(log.turns()[0].timestamp, log.turns()[1].timestamp);
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = ChatLog::new();
        log.push_exchange("q", "a");
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn json_export_lists_turns() {
        let mut log = ChatLog::new();
        log.push_exchange("q", "a");

        let turns: Vec<ChatTurn> = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "a");
    }
}
