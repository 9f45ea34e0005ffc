//! Items exchanged with the model across one turn.
//!
//! These mirror the shape of a response-style model API closely enough for
//! the core to drive tool calls, without committing to any provider's wire
//! format (the transport lives behind the `ModelClient` trait in the core).

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    InputText { text: String },
    OutputText { text: String },
}

/// One item in the model conversation: either content authored by a party or
/// a tool-call request/result pair correlated by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message {
        role: String,
        content: Vec<ContentItem>,
    },
    FunctionCall {
        name: String,
        /// JSON-encoded argument payload, exactly as the model produced it.
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: FunctionCallOutputPayload,
    },
}

impl ResponseItem {
    pub fn user_message(text: impl Into<String>) -> Self {
        Self::Message {
            role: "user".to_string(),
            content: vec![ContentItem::InputText { text: text.into() }],
        }
    }

    pub fn assistant_message(text: impl Into<String>) -> Self {
        Self::Message {
            role: "assistant".to_string(),
            content: vec![ContentItem::OutputText { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallOutputPayload {
    pub content: String,
    /// `None` means the tool did not report success/failure explicitly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl FunctionCallOutputPayload {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: Some(true),
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: Some(false),
        }
    }
}

/// Extracts the plain text of a message item, joining its content parts.
pub fn message_text(item: &ResponseItem) -> Option<String> {
    match item {
        ResponseItem::Message { content, .. } => Some(
            content
                .iter()
                .map(|c| match c {
                    ContentItem::InputText { text } | ContentItem::OutputText { text } => {
                        text.as_str()
                    }
                })
                .collect::<Vec<_>>()
                .join(""),
        ),
        _ => None,
    }
}
