use anyhow::{Context, Result};
use geminichat_core::AttachmentInput;
use std::path::Path;

/// Read a file from disk into an attachment, guessing its MIME type from
/// the extension.
pub fn load_attachment(path: &Path) -> Result<AttachmentInput> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(AttachmentInput::new(name, guess_mime_type(path), bytes))
}

// Source extensions mime_guess misses or maps elsewhere (`.ts` is MPEG-TS).
const SOURCE_TYPES: &[(&str, &str)] = &[
    ("ts", "text/x-typescript"),
    ("tsx", "text/x-typescript"),
    ("mts", "text/x-typescript"),
    ("cts", "text/x-typescript"),
    ("py", "text/x-python"),
    ("rs", "text/x-rust"),
    ("go", "text/x-go"),
    ("java", "text/x-java"),
    ("c", "text/x-c"),
    ("h", "text/x-c"),
    ("cc", "text/x-c++"),
    ("cpp", "text/x-c++"),
    ("hpp", "text/x-c++"),
    ("sh", "text/x-sh"),
    ("yaml", "text/x-yaml"),
    ("yml", "text/x-yaml"),
    ("toml", "application/toml"),
    ("md", "text/markdown"),
];

fn guess_mime_type(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    if let Some(ext) = ext.as_deref() {
        if let Some((_, mime)) = SOURCE_TYPES.iter().find(|(e, _)| *e == ext) {
            return mime.to_string();
        }
    }
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// `512 B`, `12 KB`, `3.4 MB`
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{} KB", bytes / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn mime_type_guessed_from_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let file = load_attachment(&path).unwrap();
        assert_eq!(file.name, "notes.pdf");
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.bytes, b"%PDF");
    }

    #[test]
    fn unknown_extension_is_octet_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.zzqx");
        std::fs::write(&path, [0u8; 3]).unwrap();
        assert_eq!(
            load_attachment(&path).unwrap().mime_type,
            "application/octet-stream"
        );
    }

    #[test]
    fn source_extensions_use_allow_listed_types() {
        let allow = geminichat_core::MimeAllowList::default();
        for (file, mime) in [
            ("app.ts", "text/x-typescript"),
            ("View.TSX", "text/x-typescript"),
            ("main.rs", "text/x-rust"),
            ("Cargo.toml", "application/toml"),
        ] {
            let guessed = guess_mime_type(Path::new(file));
            assert_eq!(guessed, mime, "{file}");
            assert!(allow.allows(&guessed), "{file}");
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_attachment(Path::new("/definitely/not/here.png")).is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(12 * 1024), "12 KB");
        assert_eq!(format_size(3 * 1024 * 1024 + 400 * 1024), "3.4 MB");
    }
}
