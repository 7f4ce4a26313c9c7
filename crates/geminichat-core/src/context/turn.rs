use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a turn. Only two roles reach the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Parse a role label as produced by chat front-ends. `assistant` is the
    /// UI-side name for the model.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "model" | "assistant" => Some(Self::Model),
            _ => None,
        }
    }

    /// The role that must follow this one.
    pub fn next(self) -> Self {
        match self {
            Self::User => Self::Model,
            Self::Model => Self::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Attachment {
        mime_type: String,
        bytes: Vec<u8>,
        display_name: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Attachment { .. } => None,
        }
    }
}

impl From<AttachmentInput> for ContentPart {
    fn from(input: AttachmentInput) -> Self {
        Self::Attachment {
            mime_type: input.mime_type,
            bytes: input.bytes,
            display_name: input.name,
        }
    }
}

/// A file handed over by the front-end: nothing more than name, type, bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInput {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentInput {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Display-only data carried alongside a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnMetadata {
    /// Names of files that travelled with the request for this user turn.
    pub attachment_names: Vec<String>,
    /// Rendered search suggestion returned with a grounded model reply.
    pub grounding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub metadata: TurnMetadata,
}

impl Turn {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            metadata: TurnMetadata::default(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![ContentPart::text(text)])
    }

    pub fn with_metadata(mut self, metadata: TurnMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// All text parts joined, for rendering.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn attachments(&self) -> impl Iterator<Item = &ContentPart> {
        self.content
            .iter()
            .filter(|p| matches!(p, ContentPart::Attachment { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_labels() {
        assert_eq!(Role::from_label("assistant"), Some(Role::Model));
        assert_eq!(Role::from_label("Model"), Some(Role::Model));
        assert_eq!(Role::from_label(" user "), Some(Role::User));
        assert_eq!(Role::from_label("system"), None);
        assert_eq!(Role::User.next(), Role::Model);
        assert_eq!(Role::Model.to_string(), "model");
    }

    #[test]
    fn turn_text_skips_attachments() {
        let turn = Turn::new(
            Role::User,
            vec![
                ContentPart::text("look at this"),
                AttachmentInput::new("a.png", "image/png", vec![1, 2]).into(),
                ContentPart::text("and this"),
            ],
        );
        assert_eq!(turn.text(), "look at this\nand this");
        assert_eq!(turn.attachments().count(), 1);
    }
}
