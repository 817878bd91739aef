use std::path::PathBuf;

use crate::discover::WorkItem;
use crate::instruct::ResolvedInstruction;
use crate::io::read_text_with_fallback_async;
use crate::llm::{ChatMessage, CompletionBackend, CompletionRequest};

pub(crate) const ORIGINAL_CODE_HEADER: &str = "Original code:\n";
pub(crate) const CONSTRAINTS_HEADER: &str = "\n\nConstraints:";

/// Result of applying the run's instruction to one file. Never mutated after
/// creation; the orchestrator reads it to decide persistence and accounting.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub success: bool,
    pub original: String,
    pub candidate: Option<String>,
    pub changed: bool,
    pub error: Option<String>,
}

impl FileOutcome {
    fn failure(path: PathBuf, original: String, message: String) -> Self {
        Self { path, success: false, original, candidate: None, changed: false, error: Some(message) }
    }
}

/// Drop one enclosing triple-backtick fence from a model reply. The opening
/// line may carry a language tag; everything else passes through verbatim.
pub fn strip_code_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    lines.remove(0);
    if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n")
}

/// Locate the file content embedded in a transform prompt. Used by the
/// deterministic mock backend to reproduce the input.
pub(crate) fn embedded_original_code(prompt: &str) -> Option<&str> {
    let start = prompt.find(ORIGINAL_CODE_HEADER)? + ORIGINAL_CODE_HEADER.len();
    let end = prompt.rfind(CONSTRAINTS_HEADER)?;
    if end < start {
        return None;
    }
    Some(&prompt[start..end])
}

fn build_prompt(item: &WorkItem, content: &str, instruction: &ResolvedInstruction) -> String {
    let mut constraints = String::new();
    if let Some(natural) = &instruction.natural {
        constraints.push_str(&format!("- Apply exactly what was requested: \"{}\"\n", natural));
    }
    constraints.push_str(&format!(
        "- Respect the syntax and conventions of {}\n\
         - Preserve all existing behavior\n\
         - Output only the final code, with no explanation or markdown formatting\n\
         - If no change is needed, reproduce the original code unchanged",
        item.language
    ));
    format!(
        "{}\n\nFile: {}\nLanguage: {}\n\n{}{}{}\n{}",
        instruction.technical,
        item.path.display(),
        item.language,
        ORIGINAL_CODE_HEADER,
        content,
        CONSTRAINTS_HEADER,
        constraints
    )
}

/// Read one file, ask the completion API for a candidate replacement, and
/// compare. All failures land in the returned outcome, never in the caller.
pub async fn transform_file(
    backend: &dyn CompletionBackend,
    model: &str,
    item: &WorkItem,
    instruction: &ResolvedInstruction,
) -> FileOutcome {
    let original = match read_text_with_fallback_async(&item.path).await {
        Ok(s) => s,
        Err(e) => {
            return FileOutcome::failure(item.path.clone(), String::new(), format!("read error: {}", e));
        }
    };

    let system = format!(
        "You are an expert {} developer who modifies code according to precise instructions. Reply only with the final code.",
        item.language
    );
    let req = CompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage { role: "system".into(), content: system },
            ChatMessage { role: "user".into(), content: build_prompt(item, &original, instruction) },
        ],
        max_tokens: Some(4000),
        temperature: Some(0.1),
        stream: false,
    };

    match backend.complete(req).await {
        Ok(res) if !res.content.trim().is_empty() => {
            let candidate = strip_code_fence(&res.content);
            let changed = original.trim() != candidate.trim();
            FileOutcome {
                path: item.path.clone(),
                success: true,
                original,
                candidate: Some(candidate),
                changed,
                error: None,
            }
        }
        Ok(_) => FileOutcome::failure(
            item.path.clone(),
            original,
            "empty reply from completion API".to_string(),
        ),
        Err(e) => FileOutcome::failure(item.path.clone(), original, format!("completion API error: {}", e)),
    }
}
