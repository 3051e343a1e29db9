use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub output: Value,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
}

/// Binary content sent alongside a message. `uri` is either a remote URL or a
/// `data:` URL carrying the payload inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub uri: String,
}

impl Attachment {
    pub fn inline_image(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            kind: AttachmentKind::Image,
            uri: format!("data:{mime_type};base64,{}", STANDARD.encode(bytes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_result: Option<ToolResult>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call: None,
            tool_result: None,
            attachments: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::plain(Role::Assistant, String::new())
        }
    }

    pub fn tool(name: impl Into<String>, output: Value, tool_call_id: Option<String>) -> Self {
        let name = name.into();
        Self {
            tool_result: Some(ToolResult {
                name: name.clone(),
                output,
                tool_call_id,
            }),
            ..Self::plain(Role::Tool, format!("Result of `{name}`"))
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}
