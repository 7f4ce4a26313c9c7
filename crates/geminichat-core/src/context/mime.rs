use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Broad attachment families the provider accepts inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MimeCategory {
    Image,
    Video,
    Audio,
    Document,
    Spreadsheet,
    SourceCode,
}

impl MimeCategory {
    pub fn all() -> Vec<MimeCategory> {
        vec![
            Self::Image,
            Self::Video,
            Self::Audio,
            Self::Document,
            Self::Spreadsheet,
            Self::SourceCode,
        ]
    }

    pub fn mime_types(&self) -> &'static [&'static str] {
        match self {
            Self::Image => &[
                "image/png",
                "image/jpeg",
                "image/webp",
                "image/heic",
                "image/heif",
                "image/gif",
            ],
            Self::Video => &[
                "video/mp4",
                "video/mpeg",
                "video/mpg",
                "video/mov",
                "video/quicktime",
                "video/avi",
                "video/x-msvideo",
                "video/x-flv",
                "video/webm",
                "video/wmv",
                "video/x-ms-wmv",
                "video/3gpp",
            ],
            Self::Audio => &[
                "audio/wav",
                "audio/x-wav",
                "audio/mp3",
                "audio/mpeg",
                "audio/aiff",
                "audio/aac",
                "audio/ogg",
                "audio/flac",
            ],
            Self::Document => &[
                "application/pdf",
                "text/plain",
                "text/markdown",
                "text/html",
                "text/rtf",
                "application/rtf",
            ],
            Self::Spreadsheet => &[
                "text/csv",
                "text/tab-separated-values",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            ],
            Self::SourceCode => &[
                "text/x-python",
                "application/x-python-code",
                "text/javascript",
                "application/javascript",
                "application/x-javascript",
                "text/x-typescript",
                "application/typescript",
                "text/css",
                "application/json",
                "text/xml",
                "application/xml",
                "text/x-c",
                "text/x-c++",
                "text/x-java",
                "text/x-java-source",
                "text/x-rust",
                "text/x-go",
                "text/x-sh",
                "application/x-sh",
                "text/x-yaml",
                "application/x-yaml",
                "application/toml",
            ],
        }
    }
}

/// Configured set of MIME types the projector lets through.
#[derive(Debug, Clone)]
pub struct MimeAllowList {
    allowed: HashSet<String>,
}

impl MimeAllowList {
    pub fn new(categories: &[MimeCategory], extra_mime_types: &[String]) -> Self {
        let mut allowed: HashSet<String> = categories
            .iter()
            .flat_map(|c| c.mime_types().iter().map(|m| m.to_string()))
            .collect();
        allowed.extend(extra_mime_types.iter().map(|m| normalize(m)));
        Self { allowed }
    }

    pub fn allows(&self, mime_type: &str) -> bool {
        let mime = normalize(mime_type);
        if mime.is_empty() {
            return false;
        }
        self.allowed.contains(&mime)
    }
}

impl Default for MimeAllowList {
    fn default() -> Self {
        Self::new(&MimeCategory::all(), &[])
    }
}

// "Text/Plain; charset=utf-8" -> "text/plain"
fn normalize(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_every_category() {
        let list = MimeAllowList::default();
        assert!(list.allows("image/png"));
        assert!(list.allows("video/mp4"));
        assert!(list.allows("audio/mpeg"));
        assert!(list.allows("application/pdf"));
        assert!(list.allows("text/csv"));
        assert!(list.allows("text/x-python"));
        assert!(!list.allows("application/x-msdownload"));
        assert!(!list.allows(""));
    }

    #[test]
    fn parameters_and_case_ignored() {
        let list = MimeAllowList::default();
        assert!(list.allows("Text/Plain; charset=utf-8"));
        assert!(list.allows("IMAGE/JPEG"));
    }

    #[test]
    fn restricted_categories_with_extras() {
        let list = MimeAllowList::new(
            &[MimeCategory::Image],
            &["application/octet-stream".to_string()],
        );
        assert!(list.allows("image/webp"));
        assert!(!list.allows("application/pdf"));
        assert!(list.allows("application/octet-stream"));
    }
}
