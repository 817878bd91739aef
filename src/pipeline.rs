use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{load_json_registry, save_json_registry};
use crate::util::truncate_for_display;

/// A registered external capability a pipeline step can target: a remote API
/// endpoint or an installable command-line package. Read-only to the
/// executor; edited through the `server` subcommands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub kind: ServerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default = "default_install_args")]
    pub install_args: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Api,
    Package,
}

fn default_install_args() -> String {
    "--global".to_string()
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Api,
    Package,
    Extension,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub kind: StepKind,
    pub server: String,
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub steps: Vec<PipelineStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallCacheEntry {
    pub package: String,
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// An embedded step capability. Extensions are registered at startup and
/// looked up by the step's server name; there is no dynamic module loading.
pub trait PipelineExtension: Send + Sync {
    fn transform(&self, input: &str) -> Result<String>;
}

pub struct ExtensionRegistry {
    map: HashMap<String, Box<dyn PipelineExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("todos", Box::new(TodoScanExtension));
        registry.register("tokens", Box::new(TokenEstimateExtension));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, extension: Box<dyn PipelineExtension>) {
        self.map.insert(name.into(), extension);
    }

    pub fn get(&self, name: &str) -> Option<&dyn PipelineExtension> {
        self.map.get(name).map(|b| b.as_ref())
    }
}

struct TodoScanExtension;

impl PipelineExtension for TodoScanExtension {
    fn transform(&self, input: &str) -> Result<String> {
        let found = crate::io::scan_todos(input);
        if found.is_empty() {
            return Ok("no TODO/FIXME markers found".to_string());
        }
        let mut out = format!("{} marker(s) found:", found.len());
        for (line, text) in found {
            out.push_str(&format!("\nL{}: {}", line, text));
        }
        Ok(out)
    }
}

struct TokenEstimateExtension;

impl PipelineExtension for TokenEstimateExtension {
    fn transform(&self, input: &str) -> Result<String> {
        Ok(format!("estimated tokens: {}", crate::util::estimate_tokens_for_text(input)))
    }
}

#[derive(Debug)]
pub struct PipelineRun {
    pub output: String,
    pub trace: Vec<String>,
}

pub struct PipelineExecutor<'a> {
    pub servers: &'a [Server],
    pub registry: &'a ExtensionRegistry,
    pub install_cache_path: PathBuf,
    /// Skip the install confirmation prompt (`--yes`).
    pub assume_yes: bool,
}

impl PipelineExecutor<'_> {
    /// Linear fold over the pipeline's steps: the input value threads through
    /// each step, replaced when a step produces output. Skipped or failing
    /// steps leave the value unchanged and the run continues.
    pub async fn execute(&self, pipeline: &Pipeline, input: &str) -> Result<PipelineRun> {
        let mut trace: Vec<String> = Vec::new();
        let mut current = input.to_string();

        for step in &pipeline.steps {
            if step.kind == StepKind::Extension {
                self.run_extension_step(step, &mut trace, &mut current);
                continue;
            }
            let server = self.servers.iter().find(|s| s.name == step.server && s.active);
            let Some(server) = server else {
                trace.push(format!("server '{}' not available; step skipped", step.server));
                continue;
            };
            trace.push(format!("step {}: {} ({})", kind_label(step.kind), step.server, step.action));
            match step.kind {
                StepKind::Api => {
                    let url = server.url.as_deref().unwrap_or("<no url>");
                    trace.push(format!("  calling {}", url));
                    current = format!("simulated response for '{}'", truncate_for_display(&current, 30));
                }
                StepKind::Package => {
                    self.run_package_step(server, step, &mut trace, &mut current).await;
                }
                StepKind::Extension => unreachable!(),
            }
        }

        Ok(PipelineRun { output: current, trace })
    }

    fn run_extension_step(&self, step: &PipelineStep, trace: &mut Vec<String>, current: &mut String) {
        match self.registry.get(&step.server) {
            Some(extension) => {
                trace.push(format!("step extension: {} ({})", step.server, step.action));
                match extension.transform(current) {
                    Ok(output) => *current = output,
                    Err(e) => trace.push(format!("  extension '{}' failed: {}", step.server, e)),
                }
            }
            None => {
                trace.push(format!("extension '{}' not available; step skipped", step.server));
            }
        }
    }

    async fn run_package_step(
        &self,
        server: &Server,
        step: &PipelineStep,
        trace: &mut Vec<String>,
        current: &mut String,
    ) {
        let Some(package) = server.package.as_deref() else {
            trace.push(format!("  no package configured for {}", server.name));
            return;
        };
        match self.ensure_installed(package, &server.install_args, trace).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                trace.push(format!("  install check failed for {}: {}", package, e));
                return;
            }
        }
        match run_package_command(package, &step.action, &step.params).await {
            Ok(output) if !output.trim().is_empty() => {
                trace.push("  command output captured".to_string());
                *current = output;
            }
            Ok(_) => trace.push("  command produced no output".to_string()),
            Err(e) => trace.push(format!("  error running {}: {}", package, e)),
        }
    }

    /// Consult the install cache, confirm with the user when interactive, and
    /// install the package globally when approved. The cache is persisted so
    /// a package installs at most once.
    async fn ensure_installed(&self, package: &str, install_args: &str, trace: &mut Vec<String>) -> Result<bool> {
        let mut cache: Vec<InstallCacheEntry> = load_json_registry(&self.install_cache_path)?;
        if cache.iter().any(|c| c.package == package && c.installed) {
            trace.push(format!("  {} already installed", package));
            return Ok(true);
        }

        if !self.assume_yes && !confirm_install(package)? {
            trace.push(format!("  {} not installed; re-run with --yes to install", package));
            return Ok(false);
        }

        trace.push(format!("  installing {}", package));
        let mut argv: Vec<String> = vec!["npm".into(), "install".into()];
        argv.extend(install_args.split_whitespace().map(|s| s.to_string()));
        argv.push(package.to_string());
        let (code, _stdout, stderr) = run_command_captured(argv, Duration::from_secs(120)).await?;
        if code != 0 {
            trace.push(format!("  install failed ({}): {}", code, stderr.trim()));
            return Ok(false);
        }

        if let Some(entry) = cache.iter_mut().find(|c| c.package == package) {
            entry.installed = true;
        } else {
            cache.push(InstallCacheEntry { package: package.to_string(), installed: true, version: None });
        }
        save_json_registry(&self.install_cache_path, &cache)?;
        trace.push(format!("  {} installed", package));
        Ok(true)
    }
}

fn kind_label(kind: StepKind) -> &'static str {
    match kind {
        StepKind::Api => "api",
        StepKind::Package => "package",
        StepKind::Extension => "extension",
    }
}

fn confirm_install(package: &str) -> Result<bool> {
    use std::io::{IsTerminal as _, Write as _};
    let interactive = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
    if !interactive {
        return Ok(false);
    }
    print!("Install {}? [y/N]: ", package);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

async fn run_package_command(
    package: &str,
    action: &str,
    params: &BTreeMap<String, serde_json::Value>,
) -> Result<String> {
    let mut argv: Vec<String> = vec!["npx".into(), package.into(), action.into()];
    for (key, value) in params {
        argv.push(format!("--{}", key));
        let rendered = match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        };
        argv.push(rendered);
    }
    let (code, stdout, stderr) = run_command_captured(argv, Duration::from_secs(60)).await?;
    if code != 0 {
        anyhow::bail!("exit {}: {}", code, stderr.trim());
    }
    Ok(stdout)
}

/// Run a command captured via spawn_blocking so no tokio::process feature is
/// required, bounded by a timeout.
async fn run_command_captured(argv: Vec<String>, timeout: Duration) -> Result<(i32, String, String)> {
    let (program, args) = argv.split_first().ok_or_else(|| anyhow!("empty command"))?;
    let program = program.clone();
    let args: Vec<String> = args.to_vec();
    let handle = tokio::task::spawn_blocking(move || {
        std::process::Command::new(&program)
            .args(&args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
    });
    let res = tokio::time::timeout(timeout, handle).await;
    match res {
        Ok(Ok(Ok(output))) => {
            let code = output.status.code().unwrap_or(-1);
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Ok((code, stdout, stderr))
        }
        Ok(Ok(Err(e))) => Err(anyhow!(e)).context("spawning command"),
        Ok(Err(join_err)) => Err(anyhow!("command join error: {}", join_err)),
        Err(_) => Err(anyhow!("command timed out after {:?}", timeout)),
    }
}
