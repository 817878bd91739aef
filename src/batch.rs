use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::discover::{compile_patterns, discover};
use crate::instruct::{resolve_instruction, ExecutionRequest};
use crate::llm::CompletionBackend;
use crate::transform::transform_file;

pub const DEFAULT_PATTERNS: [&str; 11] = [
    "*.py", "*.js", "*.ts", "*.java", "*.go", "*.php", "*.rb", "*.rs", "*.cpp", "*.c", "*.cs",
];

pub const BACKUP_SUFFIX: &str = ".backup";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000;

/// Caps on the enumerated report lists. Counters are never capped.
pub const MAX_REPORT_ERRORS: usize = 10;
pub const MAX_REPORT_DETAILS: usize = 5;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub request: ExecutionRequest,
    pub patterns: Vec<String>,
    pub recursive: bool,
    pub apply_changes: bool,
    pub max_file_size: u64,
}

#[derive(Debug, Serialize)]
pub struct FileDetail {
    pub path: String,
    pub changed: bool,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub summary: String,
    pub instruction: String,
    pub technical_instruction: String,
    /// False when an order's interpretation failed (or the request was a
    /// command) and the instruction above is the user's text verbatim.
    pub instruction_interpreted: bool,
    pub root: String,
    pub total_files_found: usize,
    pub files_processed: usize,
    pub files_changed: usize,
    /// Files excluded for size before any processing.
    pub files_skipped: u64,
    /// Files whose transform failed; `files_processed + files_errored`
    /// always equals `total_files_found`.
    pub files_errored: usize,
    /// Every recorded error string, including apply failures on files that
    /// were otherwise processed.
    pub errors_count: usize,
    pub errors: Vec<String>,
    pub details: Vec<FileDetail>,
    pub apply_changes: bool,
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(BACKUP_SUFFIX);
    PathBuf::from(os)
}

/// Copy the original content to `<path>.backup`, then overwrite the target.
/// A backup failure aborts before the target is touched.
async fn persist_with_backup(path: &Path, original: &str, candidate: &str) -> Result<PathBuf> {
    let backup = backup_path(path);
    tokio::fs::write(&backup, original)
        .await
        .with_context(|| format!("writing backup: {}", backup.display()))?;
    tokio::fs::write(path, candidate)
        .await
        .with_context(|| format!("writing file: {}", path.display()))?;
    Ok(backup)
}

fn request_label(request: &ExecutionRequest) -> &str {
    match request {
        ExecutionRequest::Order(order) => order,
        ExecutionRequest::Command { name, .. } => name,
    }
}

fn compose_summary(
    label: &str,
    technical: &str,
    root: &Path,
    found: usize,
    processed: usize,
    changed: usize,
    skipped: u64,
    errors_count: usize,
) -> String {
    let success_rate = if found > 0 { processed as f64 / found as f64 * 100.0 } else { 0.0 };
    let change_rate = if processed > 0 { changed as f64 / processed as f64 * 100.0 } else { 0.0 };
    format!(
        "batch run: {}\n\
         technical instruction: {}\n\
         root: {}\n\
         found: {}, processed: {}, changed: {}, size-skipped: {}, errors: {}\n\
         success rate: {:.1}%, modification rate: {:.1}%",
        label,
        crate::util::truncate_for_display(technical, 150),
        root.display(),
        found,
        processed,
        changed,
        skipped,
        errors_count,
        success_rate,
        change_rate
    )
}

/// Drive one batch run: discover, interpret once, transform each file,
/// optionally persist with backup, and aggregate the report. Per-file
/// failures never abort the run.
pub async fn run(backend: &dyn CompletionBackend, model: &str, opts: &RunOptions) -> Result<RunReport> {
    if request_label(&opts.request).trim().is_empty() {
        bail!("empty instruction; provide an order or command name");
    }
    let compiled = compile_patterns(&opts.patterns)?;
    let (items, size_skipped) = discover(&opts.root, &compiled, opts.recursive, opts.max_file_size).await?;

    // One interpretation per run, shared by every file.
    let instruction = resolve_instruction(backend, model, &opts.request).await;

    let mut processed = 0usize;
    let mut changed = 0usize;
    let mut errored = 0usize;
    let mut errors: Vec<String> = Vec::new();
    let mut details: Vec<FileDetail> = Vec::new();

    for (i, item) in items.iter().enumerate() {
        eprintln!("processing {} ({} bytes, {}/{})", item.path.display(), item.size, i + 1, items.len());
        let outcome = transform_file(backend, model, item, &instruction).await;
        if outcome.success {
            processed += 1;
            let mut detail = FileDetail {
                path: item.path.display().to_string(),
                changed: outcome.changed,
                applied: false,
                backup: None,
                error: None,
            };
            if outcome.changed {
                changed += 1;
                if opts.apply_changes {
                    let candidate = outcome.candidate.as_deref().unwrap_or_default();
                    match persist_with_backup(&item.path, &outcome.original, candidate).await {
                        Ok(backup) => {
                            detail.applied = true;
                            detail.backup = Some(backup.display().to_string());
                        }
                        Err(e) => {
                            detail.error = Some(e.to_string());
                            errors.push(format!("{}: apply failed: {}", item.path.display(), e));
                        }
                    }
                }
            }
            details.push(detail);
        } else {
            errored += 1;
            let message = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            errors.push(format!("{}: {}", item.path.display(), message));
        }
    }

    let errors_count = errors.len();
    errors.truncate(MAX_REPORT_ERRORS);
    details.truncate(MAX_REPORT_DETAILS);

    let label = request_label(&opts.request).to_string();
    let summary = compose_summary(
        &label,
        &instruction.technical,
        &opts.root,
        items.len(),
        processed,
        changed,
        size_skipped,
        errors_count,
    );

    Ok(RunReport {
        summary,
        instruction: label,
        instruction_interpreted: instruction.interpreted,
        technical_instruction: instruction.technical,
        root: opts.root.display().to_string(),
        total_files_found: items.len(),
        files_processed: processed,
        files_changed: changed,
        files_skipped: size_skipped,
        files_errored: errored,
        errors_count,
        errors,
        details,
        apply_changes: opts.apply_changes,
    })
}

/// Write the report as a timestamped JSON artifact in the working directory.
pub fn write_report_artifact(report: &RunReport) -> Result<PathBuf> {
    let name = format!("run_report_{}.json", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let path = PathBuf::from(name);
    let text = serde_json::to_string_pretty(report).context("serializing run report")?;
    std::fs::write(&path, text).with_context(|| format!("writing report: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockBackend, MockMode};
    use std::fs;

    fn order_opts(root: &Path) -> RunOptions {
        RunOptions {
            root: root.to_path_buf(),
            request: ExecutionRequest::Order("Add comments everywhere".into()),
            patterns: vec!["*.py".into()],
            recursive: false,
            apply_changes: false,
            max_file_size: 1000,
        }
    }

    #[tokio::test]
    async fn counters_balance_and_interpretation_happens_once() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(temp.path().join("b.py"), "y = 2\n").unwrap();
        fs::write(temp.path().join("x.tmp"), "ignored").unwrap();
        let backend = MockBackend::new(MockMode::Echo);

        let report = run(&backend, "m", &order_opts(temp.path())).await.unwrap();
        assert_eq!(report.total_files_found, 2);
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.files_changed, 0);
        assert_eq!(report.files_errored, 0);
        assert_eq!(report.files_processed + report.files_errored, report.total_files_found);
        // one interpretation shared by both files
        assert_eq!(backend.interpret_calls(), 1);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn remote_failures_are_isolated_per_file() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(temp.path().join("b.py"), "y = 2\n").unwrap();
        let backend = MockBackend::new(MockMode::Fail);

        let report = run(&backend, "m", &order_opts(temp.path())).await.unwrap();
        assert_eq!(report.files_processed, 0);
        assert_eq!(report.files_errored, 2);
        assert_eq!(report.files_processed + report.files_errored, report.total_files_found);
        assert_eq!(report.errors_count, 2);
        assert!(report.errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn size_skipped_files_are_counted_separately() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("small.py"), "x = 1\n").unwrap();
        fs::write(temp.path().join("big.py"), "x".repeat(2000)).unwrap();
        let backend = MockBackend::new(MockMode::Echo);

        let report = run(&backend, "m", &order_opts(temp.path())).await.unwrap();
        assert_eq!(report.total_files_found, 1);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.files_processed, 1);
    }

    #[tokio::test]
    async fn apply_writes_backup_before_target() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("a.py");
        fs::write(&target, "x = 1\n").unwrap();
        let backend = MockBackend::new(MockMode::Edit);
        let mut opts = order_opts(temp.path());
        opts.apply_changes = true;

        let report = run(&backend, "m", &opts).await.unwrap();
        assert_eq!(report.files_changed, 1);
        let backup = backup_path(&target);
        assert_eq!(fs::read_to_string(&backup).unwrap(), "x = 1\n");
        assert!(fs::read_to_string(&target).unwrap().contains("// reviewed"));
        assert!(report.details[0].applied);
    }

    #[tokio::test]
    async fn failed_backup_leaves_the_target_untouched() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("a.py");
        fs::write(&target, "x = 1\n").unwrap();
        // a directory at the backup path makes the backup write fail
        fs::create_dir(backup_path(&target)).unwrap();
        let backend = MockBackend::new(MockMode::Edit);
        let mut opts = order_opts(temp.path());
        opts.apply_changes = true;

        let report = run(&backend, "m", &opts).await.unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "x = 1\n");
        assert_eq!(report.errors_count, 1);
        assert!(report.errors[0].contains("apply failed"));
        // the file still counts as processed, not errored
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.files_errored, 0);
    }

    #[tokio::test]
    async fn detail_list_is_capped_but_counters_are_not() {
        let temp = tempfile::tempdir().unwrap();
        for i in 0..7 {
            fs::write(temp.path().join(format!("f{}.py", i)), "x = 1\n").unwrap();
        }
        let backend = MockBackend::new(MockMode::Echo);

        let report = run(&backend, "m", &order_opts(temp.path())).await.unwrap();
        assert_eq!(report.files_processed, 7);
        assert_eq!(report.details.len(), MAX_REPORT_DETAILS);
    }

    #[tokio::test]
    async fn input_errors_fail_fast() {
        let temp = tempfile::tempdir().unwrap();
        let backend = MockBackend::new(MockMode::Echo);

        let mut opts = order_opts(temp.path());
        opts.request = ExecutionRequest::Order("  ".into());
        assert!(run(&backend, "m", &opts).await.is_err());

        let mut opts = order_opts(&temp.path().join("missing"));
        opts.request = ExecutionRequest::Order("ok".into());
        assert!(run(&backend, "m", &opts).await.is_err());
        // no completion call happened for either failure
        assert_eq!(backend.calls(), 0);
    }
}
