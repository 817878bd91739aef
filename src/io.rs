use anyhow::{Context, Result};
use std::path::Path;

/// Read a text file as UTF-8, re-decoding the same bytes as Latin-1 when the
/// content is not valid UTF-8. Latin-1 maps every byte to a code point, so the
/// fallback only fails if the file itself cannot be read.
pub async fn read_text_with_fallback_async(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading file: {}", path.display()))?;
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(err) => Ok(err.into_bytes().iter().map(|&b| b as char).collect()),
    }
}

pub fn filename_only(path: &Path) -> String {
    path.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Write text content to a file asynchronously
pub async fn write_file_async(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory: {}", parent.display()))?;
        }
    }

    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("writing file: {}", path.display()))?;
    Ok(())
}

pub fn scan_todos(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let ln = i + 1;
        let upper = line.to_uppercase();
        if upper.contains("TODO") || upper.contains("FIXME") || upper.contains("NOTE:") || upper.starts_with("NOTE") {
            out.push((ln, line.trim().to_string()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latin1_fallback_decodes_every_byte() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("legacy.py");
        // 0xE9 is 'é' in Latin-1 and invalid as a standalone UTF-8 byte
        std::fs::write(&path, b"# caf\xe9\nprint('ok')\n").unwrap();
        let text = read_text_with_fallback_async(&path).await.unwrap();
        assert!(text.starts_with("# café"));
    }

    #[tokio::test]
    async fn utf8_read_is_unchanged() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("plain.rs");
        std::fs::write(&path, "fn main() {}\n").unwrap();
        let text = read_text_with_fallback_async(&path).await.unwrap();
        assert_eq!(text, "fn main() {}\n");
    }

    #[test]
    fn scan_todos_finds_markers() {
        let text = "fn a() {}\n// TODO: remove\nlet x = 1; // fixme later\n";
        let found = scan_todos(text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, 2);
    }
}
