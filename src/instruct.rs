use crate::llm::{ChatMessage, CompletionBackend, CompletionRequest};

pub const INTERPRETER_ROLE: &str =
    "You convert natural-language requests about code into precise, actionable technical instructions.";

/// A unit of work as the user phrased it: either a free-text order that needs
/// interpretation, or a named command with an optional literal override.
#[derive(Debug, Clone)]
pub enum ExecutionRequest {
    Order(String),
    Command { name: String, custom_prompt: Option<String> },
}

pub struct PredefinedCommand {
    pub name: &'static str,
    pub description: &'static str,
    pub instruction: &'static str,
}

pub const PREDEFINED_COMMANDS: [PredefinedCommand; 8] = [
    PredefinedCommand {
        name: "refactor_all",
        description: "Refactor code files to improve their structure",
        instruction: "Refactor this code to improve readability, maintainability and performance. Apply the language's best practices.",
    },
    PredefinedCommand {
        name: "add_documentation",
        description: "Add missing documentation to all files",
        instruction: "Add complete documentation to this code: docstrings, explanatory comments, and API documentation where relevant.",
    },
    PredefinedCommand {
        name: "security_audit",
        description: "Audit security and fix vulnerabilities",
        instruction: "Analyze this code for security vulnerabilities and apply the necessary fixes: input validation, error handling, protection against common attacks.",
    },
    PredefinedCommand {
        name: "optimize_performance",
        description: "Optimize performance of all files",
        instruction: "Optimize this code for better performance: more efficient algorithms, reduced complexity, improved memory management.",
    },
    PredefinedCommand {
        name: "modernize_code",
        description: "Modernize code with current practices",
        instruction: "Modernize this code using the latest language features and conventions, removing deprecated constructs.",
    },
    PredefinedCommand {
        name: "add_error_handling",
        description: "Add robust error handling",
        instruction: "Add complete and robust error handling to this code: appropriate error propagation, input validation, informative error messages.",
    },
    PredefinedCommand {
        name: "clean_code",
        description: "Apply clean-code principles",
        instruction: "Clean up this code: explicit names, short functions, dead code removal, improved readability.",
    },
    PredefinedCommand {
        name: "add_tests",
        description: "Generate unit tests for the code",
        instruction: "Generate complete unit tests for this code: normal cases, edge cases, error cases. Use the test framework appropriate to the language.",
    },
];

pub fn lookup_command(name: &str) -> Option<&'static PredefinedCommand> {
    PREDEFINED_COMMANDS.iter().find(|c| c.name == name)
}

/// The technical instruction shared by every file of a run, resolved exactly
/// once per request.
#[derive(Debug, Clone)]
pub struct ResolvedInstruction {
    pub technical: String,
    /// Original free-text order, kept for prompt context on `Order` requests.
    pub natural: Option<String>,
    /// False when interpretation failed and the raw order is used verbatim.
    pub interpreted: bool,
}

fn interpretation_prompt(natural: &str) -> String {
    format!(
        r#"The user gave this order about their code: "{natural}"

Your role:
1. Understand exactly what the user wants done to their code
2. Produce a precise technical instruction for modifying the code accordingly
3. Be very specific about the actions to take

Interpretation examples:
- "Add comments everywhere" -> "Add detailed explanatory comments to every function, class and complex code block"
- "Make the code safer" -> "Add input validation, robust error handling, and fix all security vulnerabilities"
- "Improve performance" -> "Optimize algorithms, reduce complexity, improve memory management and eliminate bottlenecks"
- "Modernize this code" -> "Update the code to the latest language features, remove deprecated constructs, apply current best practices"

Reply only with the technical instruction to use for modifying the code."#
    )
}

/// One completion call translating a free-text order into a technical
/// directive. Degrades to the order itself on any failure or empty reply.
pub async fn interpret(backend: &dyn CompletionBackend, model: &str, natural: &str) -> (String, bool) {
    let req = CompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage { role: "system".into(), content: INTERPRETER_ROLE.to_string() },
            ChatMessage { role: "user".into(), content: interpretation_prompt(natural) },
        ],
        max_tokens: Some(500),
        temperature: Some(0.3),
        stream: false,
    };
    match backend.complete(req).await {
        Ok(res) if !res.content.trim().is_empty() => (res.content.trim().to_string(), true),
        Ok(_) => (natural.to_string(), false),
        Err(e) => {
            eprintln!("interpretation failed, using the order verbatim: {}", e);
            (natural.to_string(), false)
        }
    }
}

pub async fn resolve_instruction(
    backend: &dyn CompletionBackend,
    model: &str,
    request: &ExecutionRequest,
) -> ResolvedInstruction {
    match request {
        ExecutionRequest::Order(natural) => {
            let (technical, interpreted) = interpret(backend, model, natural).await;
            ResolvedInstruction { technical, natural: Some(natural.clone()), interpreted }
        }
        ExecutionRequest::Command { name, custom_prompt } => {
            let technical = custom_prompt
                .clone()
                .or_else(|| lookup_command(name).map(|c| c.instruction.to_string()))
                .unwrap_or_else(|| name.clone());
            ResolvedInstruction { technical, natural: None, interpreted: false }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockBackend, MockMode};

    #[test]
    fn lookup_finds_known_commands() {
        assert!(lookup_command("security_audit").is_some());
        assert!(lookup_command("no_such_command").is_none());
    }

    #[tokio::test]
    async fn command_resolution_never_calls_the_backend() {
        let backend = MockBackend::new(MockMode::Echo);

        let predefined = ExecutionRequest::Command { name: "clean_code".into(), custom_prompt: None };
        let r = resolve_instruction(&backend, "m", &predefined).await;
        assert!(r.technical.contains("Clean up this code"));

        let custom = ExecutionRequest::Command {
            name: "clean_code".into(),
            custom_prompt: Some("strip trailing whitespace".into()),
        };
        let r = resolve_instruction(&backend, "m", &custom).await;
        assert_eq!(r.technical, "strip trailing whitespace");

        let verbatim = ExecutionRequest::Command { name: "translate comments".into(), custom_prompt: None };
        let r = resolve_instruction(&backend, "m", &verbatim).await;
        assert_eq!(r.technical, "translate comments");

        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn order_is_interpreted_once() {
        let backend = MockBackend::new(MockMode::Echo);
        let order = ExecutionRequest::Order("Add comments everywhere".into());
        let r = resolve_instruction(&backend, "m", &order).await;
        assert!(r.interpreted);
        assert_eq!(r.technical, "[interpreted] mock technical directive");
        assert_eq!(r.natural.as_deref(), Some("Add comments everywhere"));
        assert_eq!(backend.interpret_calls(), 1);
    }

    #[tokio::test]
    async fn interpretation_failure_degrades_to_the_order() {
        let backend = MockBackend::new(MockMode::Fail);
        let (technical, interpreted) = interpret(&backend, "m", "Make it faster").await;
        assert_eq!(technical, "Make it faster");
        assert!(!interpreted);
    }
}
