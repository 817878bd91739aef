use anyhow::{bail, Context, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};

use crate::io::filename_only;

/// Directory names pruned from recursive descent, plus any dot-prefixed name.
pub const EXCLUDED_DIRS: [&str; 10] = [
    "node_modules",
    "build",
    "dist",
    "__pycache__",
    "target",
    ".git",
    ".vscode",
    ".idea",
    "venv",
    "env",
];

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub path: PathBuf,
    pub size: u64,
    pub language: &'static str,
}

pub fn detect_language(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "py" => "Python",
        "js" => "JavaScript",
        "ts" => "TypeScript",
        "java" => "Java",
        "go" => "Go",
        "php" => "PHP",
        "rb" => "Ruby",
        "rs" => "Rust",
        "cpp" => "C++",
        "c" => "C",
        "cs" => "C#",
        "swift" => "Swift",
        "kt" => "Kotlin",
        _ => "code",
    }
}

/// Compile user-supplied glob patterns. An invalid pattern is an input error,
/// reported before any traversal starts.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    let mut out = Vec::with_capacity(patterns.len());
    for p in patterns {
        let compiled = Pattern::new(p).with_context(|| format!("invalid file pattern: {}", p))?;
        out.push(compiled);
    }
    Ok(out)
}

/// Walk `root` collecting files whose base name matches any pattern and whose
/// size is within `max_size`. Returns the ordered items plus the count of
/// files excluded for size alone; oversized files are never opened.
pub async fn discover(
    root: &Path,
    patterns: &[Pattern],
    recursive: bool,
    max_size: u64,
) -> Result<(Vec<WorkItem>, u64)> {
    if !root.is_dir() {
        bail!("directory not found: {}", root.display());
    }
    let mut items = Vec::new();
    let mut size_skipped = 0u64;
    walk(root, patterns, recursive, max_size, &mut items, &mut size_skipped).await?;
    Ok((items, size_skipped))
}

fn walk<'a>(
    dir: &'a Path,
    patterns: &'a [Pattern],
    recursive: bool,
    max_size: u64,
    items: &'a mut Vec<WorkItem>,
    size_skipped: &'a mut u64,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'a>> {
    Box::pin(async move {
        let mut entries = Vec::new();
        let mut rd = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("reading directory: {}", dir.display()))?;
        while let Some(entry) = rd.next_entry().await? {
            entries.push(entry.path());
        }
        // read_dir order is platform-dependent; sort for a stable traversal
        entries.sort();

        for path in entries {
            if path.is_dir() {
                if !recursive {
                    continue;
                }
                let name = filename_only(&path);
                if name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_str()) {
                    continue;
                }
                walk(&path, patterns, recursive, max_size, items, size_skipped).await?;
            } else if path.is_file() {
                let name = filename_only(&path);
                if !patterns.iter().any(|p| p.matches(&name)) {
                    continue;
                }
                let meta = tokio::fs::metadata(&path)
                    .await
                    .with_context(|| format!("reading metadata: {}", path.display()))?;
                if meta.len() > max_size {
                    *size_skipped += 1;
                    continue;
                }
                let language = detect_language(&path);
                items.push(WorkItem { path, size: meta.len(), language });
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn patterns(globs: &[&str]) -> Vec<Pattern> {
        compile_patterns(&globs.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[tokio::test]
    async fn non_recursive_matches_base_names_only() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.py"), "1234567890").unwrap();
        fs::write(temp.path().join("b.py"), "1234567890").unwrap();
        fs::write(temp.path().join("x.tmp"), "1234567890").unwrap();

        let (items, skipped) = discover(temp.path(), &patterns(&["*.py"]), false, 1000)
            .await
            .unwrap();
        let names: Vec<String> = items.iter().map(|i| filename_only(&i.path)).collect();
        assert_eq!(names, vec!["a.py", "b.py"]);
        assert_eq!(skipped, 0);
    }

    #[tokio::test]
    async fn excluded_directories_are_pruned() {
        let temp = tempfile::tempdir().unwrap();
        for dir in ["node_modules", ".git", "__pycache__", "target", ".hidden"] {
            let d = temp.path().join(dir);
            fs::create_dir_all(&d).unwrap();
            fs::write(d.join("inner.py"), "x = 1").unwrap();
        }
        let nested = temp.path().join("src");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("keep.py"), "x = 1").unwrap();

        let (items, _) = discover(temp.path(), &patterns(&["*.py"]), true, 1000)
            .await
            .unwrap();
        let names: Vec<String> = items.iter().map(|i| filename_only(&i.path)).collect();
        assert_eq!(names, vec!["keep.py"]);
    }

    #[tokio::test]
    async fn oversized_files_count_as_skipped() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("small.py"), "ok").unwrap();
        fs::write(temp.path().join("big.py"), "x".repeat(64)).unwrap();

        let (items, skipped) = discover(temp.path(), &patterns(&["*.py"]), false, 10)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(filename_only(&items[0].path), "small.py");
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("nope");
        let err = discover(&missing, &patterns(&["*.py"]), true, 1000)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("directory not found"));
    }

    #[test]
    fn language_table_covers_known_extensions() {
        assert_eq!(detect_language(Path::new("a.py")), "Python");
        assert_eq!(detect_language(Path::new("a.rs")), "Rust");
        assert_eq!(detect_language(Path::new("a.kt")), "Kotlin");
        assert_eq!(detect_language(Path::new("a.xyz")), "code");
        assert_eq!(detect_language(Path::new("Makefile")), "code");
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = compile_patterns(&["[".to_string()]).unwrap_err();
        assert!(err.to_string().contains("invalid file pattern"));
    }
}
