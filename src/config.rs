use std::{env, net::SocketAddr};

use crate::conversation::DEFAULT_CAPACITY;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_FINAL_REPLY: &str = "All tools processed";

const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 0);

#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Model name echoed in every completion envelope.
    pub model: String,
    /// Port `0` lets the OS pick a free port.
    pub bind_addr: SocketAddr,
    /// Content of the final response when neither a tool result nor a reply is available.
    pub final_reply: String,
    /// Conversations tracked at once; the oldest unfinished one is dropped beyond this.
    pub max_conversations: usize,
}

impl MockConfig {
    pub fn new() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            bind_addr: SocketAddr::from(DEFAULT_BIND_ADDR),
            final_reply: DEFAULT_FINAL_REPLY.to_string(),
            max_conversations: DEFAULT_CAPACITY,
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(model) = env::var("OPENAI_MOCK_MODEL") {
            config.model = model;
        }
        if let Ok(addr) = env::var("OPENAI_MOCK_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(addr) => config.bind_addr = addr,
                Err(error) => tracing::warn!(%addr, %error, "ignoring invalid OPENAI_MOCK_ADDR"),
            }
        }
        if let Ok(reply) = env::var("OPENAI_MOCK_FINAL_REPLY") {
            config.final_reply = reply;
        }
        if let Ok(max) = env::var("OPENAI_MOCK_MAX_CONVERSATIONS") {
            match max.parse::<usize>() {
                Ok(max) => config.max_conversations = max,
                Err(error) => {
                    tracing::warn!(%max, %error, "ignoring invalid OPENAI_MOCK_MAX_CONVERSATIONS")
                }
            }
        }

        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    pub fn with_final_reply(mut self, final_reply: impl Into<String>) -> Self {
        self.final_reply = final_reply.into();
        self
    }

    pub fn with_max_conversations(mut self, max_conversations: usize) -> Self {
        self.max_conversations = max_conversations;
        self
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self::new()
    }
}
