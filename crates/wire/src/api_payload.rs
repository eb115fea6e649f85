// SPDX-License-Identifier: MIT

//! The OpenAI-compatible HTTP adapter payload (§6): request shape sent to
//! any chat-completions-compatible endpoint, and the response fields the
//! adapter reads back (`choices[0].message.content` as stdout,
//! `usage.total_tokens` as tokens used).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub temperature: f64,
    pub stream: bool,
}

impl ApiRequest {
    pub fn new(model: impl Into<String>, instruction: impl Into<String>, temperature: f64) -> Self {
        Self {
            model: model.into(),
            messages: vec![ApiMessage { role: "user".to_string(), content: instruction.into() }],
            temperature,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiChoice {
    pub message: ApiMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ApiUsage {
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub choices: Vec<ApiChoice>,
    #[serde(default)]
    pub usage: ApiUsage,
}

impl ApiResponse {
    /// `choices[0].message.content`, the text the adapter treats as stdout.
    pub fn stdout(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// `usage.total_tokens`, surfaced on the engine run record.
    pub fn tokens_used(&self) -> u64 {
        self.usage.total_tokens
    }
}
