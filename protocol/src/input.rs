use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub role: Role,
    pub content: String,
}

/// A single message written to the process's stdin in dispatch mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEnvelope {
    User {
        message: UserMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl InputEnvelope {
    pub fn user(prompt: impl Into<String>, session_id: Option<String>) -> Self {
        InputEnvelope::User {
            message: UserMessage {
                role: Role::User,
                content: prompt.into(),
            },
            session_id,
        }
    }

    /// Serializes the message as one newline-terminated line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
