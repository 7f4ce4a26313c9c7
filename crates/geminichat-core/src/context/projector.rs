use serde::{Deserialize, Serialize};

use crate::context::{AttachmentInput, ContentPart, MimeAllowList, Role, Turn};
use crate::error::{ChatError, Result};

/// One turn in the exact shape the provider expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTurn {
    pub role: Role,
    pub parts: Vec<ProviderPart>,
}

impl ProviderTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ProviderPart::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

impl ProviderPart {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Reference to a file already uploaded to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

/// Turns the Turn Store into provider turns. Pure and synchronous: no I/O,
/// no retries, no repair of bad input.
#[derive(Debug, Clone, Default)]
pub struct HistoryProjector {
    allow_list: MimeAllowList,
}

impl HistoryProjector {
    pub fn new(allow_list: MimeAllowList) -> Self {
        Self { allow_list }
    }

    pub fn allow_list(&self) -> &MimeAllowList {
        &self.allow_list
    }

    /// Map `turns` 1:1 and append `pending_attachments` to the final user
    /// turn.
    pub fn project(
        &self,
        turns: &[Turn],
        pending_attachments: &[ContentPart],
    ) -> Result<Vec<ProviderTurn>> {
        let mut projected = Vec::with_capacity(turns.len());
        let mut expected = Role::User;

        for turn in turns {
            if turn.role != expected {
                return Err(ChatError::InvalidTurnOrder {
                    expected,
                    found: turn.role,
                });
            }
            expected = expected.next();

            if turn.content.is_empty() {
                return Err(ChatError::EmptyTurn);
            }
            let parts = turn
                .content
                .iter()
                .map(|part| self.project_part(part))
                .collect::<Result<Vec<_>>>()?;

            projected.push(ProviderTurn {
                role: turn.role,
                parts,
            });
        }

        if !pending_attachments.is_empty() {
            let current = projected.last_mut().ok_or(ChatError::EmptyHistory)?;
            if current.role != Role::User {
                return Err(ChatError::InvalidTurnOrder {
                    expected: Role::User,
                    found: current.role,
                });
            }
            for part in pending_attachments {
                current.parts.push(self.project_part(part)?);
            }
        }

        if projected.is_empty() {
            return Err(ChatError::EmptyHistory);
        }
        Ok(projected)
    }

    /// Check uploads against the allow-list before anything is stored.
    pub fn validate_attachments(&self, attachments: &[AttachmentInput]) -> Result<()> {
        for attachment in attachments {
            self.check_mime(&attachment.name, &attachment.mime_type)?;
        }
        Ok(())
    }

    fn project_part(&self, part: &ContentPart) -> Result<ProviderPart> {
        match part {
            ContentPart::Text(text) => Ok(ProviderPart::Text { text: text.clone() }),
            ContentPart::Attachment {
                mime_type,
                bytes,
                display_name,
            } => {
                self.check_mime(display_name, mime_type)?;
                Ok(ProviderPart::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.clone(),
                        data: bytes.clone(),
                    },
                })
            }
        }
    }

    fn check_mime(&self, name: &str, mime_type: &str) -> Result<()> {
        if self.allow_list.allows(mime_type) {
            Ok(())
        } else {
            Err(ChatError::MalformedAttachment {
                name: name.to_string(),
                mime_type: mime_type.to_string(),
            })
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
