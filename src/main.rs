use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod batch;
mod config;
mod discover;
mod instruct;
mod io;
mod llm;
mod pipeline;
mod render;
mod session;
mod transform;
mod util;

use crate::render as render_mod;
use anyhow::Context as _;
use llm::{CompletionBackend, HttpBackend, MockBackend, MockMode};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "cw", version, about = "Conversational code assistant CLI", long_about = None)]
struct Cli {
    /// Active profile name
    #[arg(short = 'p', long = "profile", global = true)]
    profile: Option<String>,

    /// Default model override
    #[arg(short = 'm', long = "model", global = true)]
    model: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long = "json", global = true)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Timeout (seconds) for network requests
    #[arg(long = "timeout", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// First-time credential and profile setup
    Init(InitArgs),

    /// Ask a one-shot question
    Ask(AskArgs),

    /// Interactive multi-turn chat
    Chat(ChatArgs),

    /// Batch code-modification runs over a directory
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Execute and inspect declarative pipelines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },

    /// Manage registered servers
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },

    /// Manage conversation sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Args, Debug, Clone)]
struct InitArgs {
    /// Non-interactive: provider name (e.g., mistral, mock)
    #[arg(long)]
    provider: Option<String>,
    /// Non-interactive: API key value
    #[arg(long = "api-key")]
    api_key: Option<String>,
    /// Seal the API key at rest with the local key file
    #[arg(long)]
    seal: bool,
    /// Override the completion API base URL
    #[arg(long = "api-base")]
    api_base: Option<String>,
    /// Non-interactive: default model
    #[arg(long)]
    default_model: Option<String>,
    /// Profile name to create or update (default: "default")
    #[arg(long, default_value = "default")]
    profile: String,
    /// Validate credentials now (non-interactive). Interactive mode will prompt.
    #[arg(long)]
    validate: bool,
}

#[derive(Args, Debug, Clone)]
struct AskArgs {
    /// Question to ask
    #[arg(required = true, num_args = 1.., value_name = "PROMPT...")]
    prompt: Vec<String>,
    /// Stream output tokens as they arrive
    #[arg(long)]
    stream: bool,
    /// Associate with a named session
    #[arg(long)]
    session: Option<String>,
    /// Provider to use (e.g., mistral, mock)
    #[arg(long)]
    provider: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct ChatArgs {
    /// Start or continue a named session
    #[arg(long)]
    session: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
enum BatchCommands {
    /// Run a natural-language order over a directory of code files
    Order(BatchOrderArgs),
    /// Run a predefined or custom command over a directory
    Command(BatchCommandArgs),
    /// List the predefined batch commands
    List,
}

#[derive(Args, Debug, Clone)]
struct BatchRunArgs {
    /// Directory to process
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    /// Comma-separated base-name glob patterns (default: common code files)
    #[arg(long)]
    patterns: Option<String>,
    /// Recurse into subdirectories
    #[arg(long, short = 'r')]
    recursive: bool,
    /// Write accepted changes to disk (originals backed up first)
    #[arg(long)]
    apply: bool,
    /// Maximum file size in bytes; larger files are skipped unopened
    #[arg(long = "max-file-size", default_value_t = batch::DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,
    /// Provider to use (e.g., mistral, mock)
    #[arg(long)]
    provider: Option<String>,
    /// Skip writing the JSON report artifact
    #[arg(long = "no-report")]
    no_report: bool,
}

#[derive(Args, Debug, Clone)]
struct BatchOrderArgs {
    /// Free-text order, e.g. "Add comments everywhere"
    #[arg(required = true, num_args = 1.., value_name = "ORDER...")]
    order: Vec<String>,
    #[command(flatten)]
    common: BatchRunArgs,
}

#[derive(Args, Debug, Clone)]
struct BatchCommandArgs {
    /// Predefined command name (see `cw batch list`) or a literal instruction
    #[arg(long)]
    name: String,
    /// Literal instruction override
    #[arg(long)]
    prompt: Option<String>,
    #[command(flatten)]
    common: BatchRunArgs,
}

#[derive(Subcommand, Debug, Clone)]
enum PipelineCommands {
    /// List registered pipelines
    List,
    /// Run a named pipeline over an input value
    Run {
        /// Pipeline name
        #[arg(long)]
        name: String,
        /// Input value threaded through the steps
        #[arg(long)]
        input: String,
        /// Install missing packages without confirmation
        #[arg(long)]
        yes: bool,
        /// Session to record the run into (defaults to the active session)
        #[arg(long)]
        session: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum ServerCommands {
    /// List registered servers
    List,
    /// Register a server
    Add {
        #[arg(long)]
        name: String,
        /// Server kind: api or package
        #[arg(long)]
        kind: String,
        /// Endpoint URL (api servers)
        #[arg(long)]
        url: Option<String>,
        /// API key, sealed at rest (api servers)
        #[arg(long = "api-key")]
        api_key: Option<String>,
        /// Package identifier (package servers)
        #[arg(long)]
        package: Option<String>,
        /// Install arguments (package servers)
        #[arg(long = "install-args", default_value = "--global")]
        install_args: String,
    },
    /// Toggle a server active/inactive
    Toggle { name: String },
    /// Remove a server
    Remove { name: String },
}

#[derive(Subcommand, Debug, Clone)]
enum SessionCommands {
    /// Create a new session and make it active
    New { name: String },
    /// List sessions
    List,
    /// Switch active session
    Switch { name: String },
    /// Show active session details
    Show,
    /// Search within a session by substring
    Search {
        name: String,
        #[arg(long = "contains")]
        contains: String,
    },
}

#[derive(Debug, Clone)]
struct GlobalOpts {
    profile: Option<String>,
    model: Option<String>,
    json: bool,
    verbose: u8,
    timeout_secs: Option<u64>,
}

fn classify_error(e: &anyhow::Error) -> (String, Option<String>) {
    let msg = e.to_string();
    let (code, hint): (&str, Option<&str>) = if msg.contains("directory not found") {
        ("dir_not_found", None)
    } else if msg.contains("unknown pipeline") || msg.contains("unknown server") || msg.contains("unknown session") {
        ("not_found", None)
    } else if msg.contains("empty instruction") || msg.contains("empty prompt") || msg.contains("empty input") {
        ("missing_input", None)
    } else if msg.contains("invalid file pattern") || msg.contains("invalid server kind") {
        ("invalid_args", None)
    } else if msg.contains("missing API key") {
        ("missing_api_key", Some("run `cw init` or set CODEWRIGHT_API_KEY"))
    } else if msg.contains("timed out") {
        ("timeout", Some("try increasing --timeout"))
    } else if msg.to_lowercase().contains("network") || msg.contains("dns") || msg.contains("Connection") {
        ("network_error", None)
    } else {
        ("unknown", None)
    };
    (code.to_string(), hint.map(|h| h.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let Cli { profile, model, json, verbose, timeout_secs, command } = cli;

    let globals = GlobalOpts { profile, model, json, verbose, timeout_secs };

    let result = match command {
        Commands::Init(args) => cmd_init(&globals, args).await,
        Commands::Ask(args) => cmd_ask(&globals, args).await,
        Commands::Chat(args) => cmd_chat(&globals, args).await,
        Commands::Batch { command } => cmd_batch(&globals, command).await,
        Commands::Pipeline { command } => cmd_pipeline(&globals, command).await,
        Commands::Server { command } => cmd_server(&globals, command).await,
        Commands::Session { command } => cmd_session(&globals, command).await,
    };

    if let Err(e) = result {
        if globals.json {
            let (code, hint) = classify_error(&e);
            render_mod::print_json_error(&code, &e.to_string(), hint.as_deref());
        } else {
            eprintln!("{}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Build the completion backend for the effective provider. The `mock*`
/// providers are deterministic and offline; everything else goes over HTTP
/// with the profile (or environment) credential.
fn resolve_backend(
    globals: &GlobalOpts,
    provider_override: Option<&str>,
) -> anyhow::Result<(Arc<dyn CompletionBackend>, config::EffectiveSettings)> {
    dotenvy::dotenv().ok();
    let eff = config::resolve_effective_settings(
        globals.profile.as_deref(),
        provider_override,
        globals.model.as_deref(),
    )?;
    let backend: Arc<dyn CompletionBackend> = match eff.provider.to_lowercase().as_str() {
        "mock" => Arc::new(MockBackend::new(MockMode::Echo)),
        "mock-edit" => Arc::new(MockBackend::new(MockMode::Edit)),
        "mock-fail" => Arc::new(MockBackend::new(MockMode::Fail)),
        _ => {
            let api_key = eff.api_key.clone().or_else(llm::api_key_from_env);
            if api_key.is_none() {
                anyhow::bail!("missing API key (run `cw init` or set CODEWRIGHT_API_KEY)");
            }
            let timeout = Duration::from_secs(globals.timeout_secs.unwrap_or(llm::COMPLETION_TIMEOUT_SECS));
            Arc::new(HttpBackend::new(eff.api_base.clone(), api_key, timeout)?)
        }
    };
    Ok((backend, eff))
}

async fn cmd_init(globals: &GlobalOpts, mut args: InitArgs) -> anyhow::Result<()> {
    use config::{default_config_path, load_config_if_exists, write_config, Profile};
    use std::io::{IsTerminal as _, Write as _};

    dotenvy::dotenv().ok();
    let path = default_config_path()?;
    let mut cfg = load_config_if_exists(&path)?.unwrap_or_default();

    let stdin_is_tty = std::io::stdin().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let interactive = stdin_is_tty && stdout_is_tty;

    if args.provider.is_none() && interactive {
        print!("Provider [mistral|mock] (default: mistral): ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        let p = line.trim();
        args.provider = Some(if p.is_empty() { "mistral".to_string() } else { p.to_string() });
    }
    let provider = args.provider.clone().unwrap_or_else(|| "mistral".to_string());

    // Credential: prefer the flag, then the environment, then a prompt.
    let needs_key = !provider.to_lowercase().starts_with("mock");
    if needs_key && args.api_key.is_none() {
        if let Some(val) = llm::api_key_from_env() {
            args.api_key = Some(val);
        }
        if args.api_key.is_none() && interactive {
            print!("API key for {} (leave blank to skip): ", provider);
            std::io::stdout().flush().ok();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            let v = line.trim();
            if !v.is_empty() {
                args.api_key = Some(v.to_string());
            }
        }
    }

    if args.default_model.is_none() && interactive {
        let suggestion = "mistral-large-latest";
        print!("Default model (default: {}): ", suggestion);
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        let m = line.trim();
        args.default_model = Some(if m.is_empty() { suggestion.to_string() } else { m.to_string() });
    }

    let mut profile_name = args.profile.clone();
    if interactive && cfg.profiles.contains_key(&profile_name) {
        println!("Profile '{}' already exists.", profile_name);
        print!("Press Enter to overwrite, or type a new profile name: ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        let s = line.trim();
        if !s.is_empty() {
            profile_name = s.to_string();
        }
    }

    let mut do_validate = args.validate;
    if interactive && !do_validate && needs_key {
        print!("Validate credentials now? [y/N]: ");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        let a = line.trim().to_lowercase();
        do_validate = a == "y" || a == "yes";
    }
    if do_validate && needs_key {
        llm::validate_credentials(args.api_key.as_deref(), args.api_base.as_deref(), globals.timeout_secs).await?;
    }

    let prof = cfg.profiles.entry(profile_name.clone()).or_insert_with(Profile::default);
    prof.provider = Some(provider);
    if let Some(base) = args.api_base {
        prof.api_base = Some(base);
    }
    if let Some(key) = args.api_key {
        if args.seal {
            prof.sealed_api_key = Some(config::seal_credential(&key)?);
            prof.api_key = None;
        } else {
            prof.api_key = Some(key);
            prof.sealed_api_key = None;
        }
    }
    if let Some(model) = args.default_model {
        prof.model = Some(model);
    }
    if cfg.default_profile.is_none() {
        cfg.default_profile = Some(profile_name);
    }

    write_config(&path, &cfg)?;
    println!("config written: {}", path.display());
    Ok(())
}

async fn cmd_ask(globals: &GlobalOpts, args: AskArgs) -> anyhow::Result<()> {
    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("empty prompt; provide text, e.g. cw ask \"What does this error mean?\"");
    }
    let (backend, eff) = resolve_backend(globals, args.provider.as_deref())?;

    let session_name = if let Some(s) = &args.session {
        Some(s.clone())
    } else {
        session::get_active_session()?
    };

    let messages = if let Some(name) = &session_name {
        let history = session::load_session_history(name)?;
        session::build_messages_with_truncation(&history, &prompt, 4000)
    } else {
        vec![llm::ChatMessage { role: "user".into(), content: prompt.clone() }]
    };

    // In JSON mode, force non-streaming to produce a single JSON object output
    let req = llm::CompletionRequest {
        model: eff.model.clone(),
        messages,
        max_tokens: None,
        temperature: None,
        stream: if globals.json { false } else { args.stream },
    };

    if req.stream {
        let mut stream = backend.complete_stream(req).await?;
        use futures_util::StreamExt;
        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(t) => {
                    print!("{}", t);
                    full.push_str(&t);
                    use std::io::Write;
                    std::io::stdout().flush().ok();
                }
                Err(e) => return Err(e),
            }
        }
        println!();
        if let Some(name) = session_name {
            session::append_record(&name, &session::SessionRecord::chat("user", prompt, None, None))?;
            session::append_record(
                &name,
                &session::SessionRecord::chat("assistant", full, Some(eff.model.clone()), None),
            )?;
        }
    } else {
        let res = backend.complete(req).await?;
        if let Some(name) = session_name {
            session::append_record(&name, &session::SessionRecord::chat("user", prompt.clone(), None, None))?;
            session::append_record(
                &name,
                &session::SessionRecord::chat("assistant", res.content.clone(), Some(eff.model.clone()), res.usage.clone()),
            )?;
        }
        if globals.json {
            #[derive(serde::Serialize)]
            struct Out<'a> {
                model: &'a str,
                usage: Option<&'a llm::Usage>,
                answer: &'a str,
            }
            let out = Out { model: &eff.model, usage: res.usage.as_ref(), answer: &res.content };
            render_mod::print_json(&out);
        } else {
            println!("{}", res.content);
        }
    }
    Ok(())
}

async fn cmd_chat(globals: &GlobalOpts, args: ChatArgs) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let session_name = match args.session {
        Some(name) => name,
        None => match session::get_active_session()? {
            Some(s) => s,
            None => {
                anyhow::bail!("no session specified and no active session. Use --session NAME or `cw session new NAME`");
            }
        },
    };
    session::create_session_if_missing(&session_name)?;
    session::set_active_session(&session_name)?;

    println!("chatting in session: {} (Ctrl+C to exit)", &session_name);
    let (backend, eff) = resolve_backend(globals, None)?;

    loop {
        print!("> ");
        io::stdout().flush().ok();
        let mut input = String::new();
        let n = std::io::stdin().read_line(&mut input)?;
        if n == 0 {
            eprintln!("exiting chat; session saved");
            break;
        }
        let prompt = input.trim().to_string();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt.as_str(), "/exit" | "exit" | "/quit" | "quit") {
            eprintln!("bye");
            break;
        }

        let history = session::load_session_history(&session_name)?;
        let messages = session::build_messages_with_truncation(&history, &prompt, 4000);
        let req = llm::CompletionRequest {
            model: eff.model.clone(),
            messages,
            max_tokens: None,
            temperature: None,
            stream: false,
        };
        let res = backend.complete(req).await?;
        session::append_record(&session_name, &session::SessionRecord::chat("user", prompt, None, None))?;
        session::append_record(
            &session_name,
            &session::SessionRecord::chat("assistant", res.content.clone(), Some(eff.model.clone()), res.usage.clone()),
        )?;
        println!("{}", res.content);
    }
    Ok(())
}

async fn cmd_batch(globals: &GlobalOpts, command: BatchCommands) -> anyhow::Result<()> {
    match command {
        BatchCommands::Order(args) => {
            let order = args.order.join(" ");
            run_batch(globals, instruct::ExecutionRequest::Order(order), args.common).await
        }
        BatchCommands::Command(args) => {
            let request = instruct::ExecutionRequest::Command { name: args.name, custom_prompt: args.prompt };
            run_batch(globals, request, args.common).await
        }
        BatchCommands::List => {
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> {
                    name: &'a str,
                    description: &'a str,
                }
                let list: Vec<Out> = instruct::PREDEFINED_COMMANDS
                    .iter()
                    .map(|c| Out { name: c.name, description: c.description })
                    .collect();
                render_mod::print_json(&list);
            } else {
                for c in &instruct::PREDEFINED_COMMANDS {
                    println!("{:<22} {}", c.name, c.description);
                }
            }
            Ok(())
        }
    }
}

async fn run_batch(
    globals: &GlobalOpts,
    request: instruct::ExecutionRequest,
    common: BatchRunArgs,
) -> anyhow::Result<()> {
    let (backend, eff) = resolve_backend(globals, common.provider.as_deref())?;

    let patterns: Vec<String> = match &common.patterns {
        Some(list) => list.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
        None => batch::DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect(),
    };

    let opts = batch::RunOptions {
        root: common.dir,
        request,
        patterns,
        recursive: common.recursive,
        apply_changes: common.apply,
        max_file_size: common.max_file_size,
    };
    let report = batch::run(backend.as_ref(), &eff.model, &opts).await?;

    let report_path = if common.no_report { None } else { Some(batch::write_report_artifact(&report)?) };

    if globals.json {
        let mut out = serde_json::to_value(&report)?;
        if let Some(p) = &report_path {
            out["report_file"] = serde_json::Value::String(p.display().to_string());
        }
        render_mod::print_json(&out);
    } else {
        render_mod::render_run_report(&report);
        if globals.verbose > 0 {
            for d in &report.details {
                println!("{}: changed={} applied={}", d.path, d.changed, d.applied);
            }
        }
        if let Some(p) = report_path {
            println!("report saved: {}", p.display());
        }
        if report.apply_changes && report.files_changed > 0 {
            println!("originals kept with the {} suffix; review before deleting", batch::BACKUP_SUFFIX);
        }
    }
    Ok(())
}

async fn cmd_pipeline(globals: &GlobalOpts, command: PipelineCommands) -> anyhow::Result<()> {
    match command {
        PipelineCommands::List => {
            let pipelines: Vec<pipeline::Pipeline> = config::load_json_registry(&config::pipelines_path()?)?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> {
                    name: &'a str,
                    steps: usize,
                }
                let list: Vec<Out> =
                    pipelines.iter().map(|p| Out { name: &p.name, steps: p.steps.len() }).collect();
                render_mod::print_json(&list);
            } else if pipelines.is_empty() {
                println!("no pipelines registered");
            } else {
                for p in &pipelines {
                    println!("{} ({} steps)", p.name, p.steps.len());
                }
            }
            Ok(())
        }
        PipelineCommands::Run { name, input, yes, session: session_arg } => {
            if input.trim().is_empty() {
                anyhow::bail!("empty input; provide a value with --input");
            }
            let servers: Vec<pipeline::Server> = config::load_json_registry(&config::servers_path()?)?;
            let pipelines: Vec<pipeline::Pipeline> = config::load_json_registry(&config::pipelines_path()?)?;
            let selected = pipelines
                .iter()
                .find(|p| p.name == name)
                .with_context(|| format!("unknown pipeline: {}", name))?;

            let registry = pipeline::ExtensionRegistry::with_builtins();
            let executor = pipeline::PipelineExecutor {
                servers: &servers,
                registry: &registry,
                install_cache_path: config::install_cache_path()?,
                assume_yes: yes,
            };
            let run = executor.execute(selected, &input).await?;

            let session_name = match session_arg {
                Some(s) => Some(s),
                None => session::get_active_session()?,
            };
            if let Some(sname) = session_name {
                session::append_record(&sname, &session::SessionRecord::chat("user", input.clone(), None, None))?;
                session::append_record(
                    &sname,
                    &session::SessionRecord::pipeline_run(&selected.name, run.output.clone(), run.trace.clone()),
                )?;
            }

            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> {
                    pipeline: &'a str,
                    output: &'a str,
                    trace: &'a [String],
                }
                let out = Out { pipeline: &selected.name, output: &run.output, trace: &run.trace };
                render_mod::print_json(&out);
            } else {
                render_mod::render_pipeline_trace(&run.trace, &run.output);
            }
            Ok(())
        }
    }
}

async fn cmd_server(globals: &GlobalOpts, command: ServerCommands) -> anyhow::Result<()> {
    let path = config::servers_path()?;
    let mut servers: Vec<pipeline::Server> = config::load_json_registry(&path)?;

    match command {
        ServerCommands::List => {
            if globals.json {
                render_mod::print_json(&servers);
            } else if servers.is_empty() {
                println!("no servers registered");
            } else {
                for s in &servers {
                    let target = s.url.as_deref().or(s.package.as_deref()).unwrap_or("-");
                    let status = if s.active { "active" } else { "inactive" };
                    let kind = match s.kind {
                        pipeline::ServerKind::Api => "api",
                        pipeline::ServerKind::Package => "package",
                    };
                    println!("{} ({}): {} [{}]", s.name, kind, target, status);
                }
            }
            Ok(())
        }
        ServerCommands::Add { name, kind, url, api_key, package, install_args } => {
            if servers.iter().any(|s| s.name == name) {
                anyhow::bail!("server '{}' already exists", name);
            }
            let kind = match kind.to_lowercase().as_str() {
                "api" => pipeline::ServerKind::Api,
                "package" => pipeline::ServerKind::Package,
                other => anyhow::bail!("invalid server kind: {} (expected api or package)", other),
            };
            match kind {
                pipeline::ServerKind::Api if url.is_none() => {
                    anyhow::bail!("api servers require --url");
                }
                pipeline::ServerKind::Package if package.is_none() => {
                    anyhow::bail!("package servers require --package");
                }
                _ => {}
            }
            let sealed_api_key = match api_key {
                Some(key) => Some(config::seal_credential(&key)?),
                None => None,
            };
            servers.push(pipeline::Server { name: name.clone(), kind, url, sealed_api_key, package, install_args, active: true });
            config::save_json_registry(&path, &servers)?;
            println!("server added: {}", name);
            Ok(())
        }
        ServerCommands::Toggle { name } => {
            let server = servers
                .iter_mut()
                .find(|s| s.name == name)
                .with_context(|| format!("unknown server: {}", name))?;
            server.active = !server.active;
            let status = if server.active { "activated" } else { "deactivated" };
            config::save_json_registry(&path, &servers)?;
            println!("server {}: {}", name, status);
            Ok(())
        }
        ServerCommands::Remove { name } => {
            let before = servers.len();
            servers.retain(|s| s.name != name);
            if servers.len() == before {
                anyhow::bail!("unknown server: {}", name);
            }
            config::save_json_registry(&path, &servers)?;
            println!("server removed: {}", name);
            Ok(())
        }
    }
}

async fn cmd_session(globals: &GlobalOpts, command: SessionCommands) -> anyhow::Result<()> {
    match command {
        SessionCommands::New { name } => {
            session::create_session_if_missing(&name)?;
            session::set_active_session(&name)?;
            println!("session created: {}", name);
            Ok(())
        }
        SessionCommands::List => {
            let sessions = session::list_sessions_metadata()?;
            if globals.json {
                #[derive(serde::Serialize)]
                struct Out<'a> {
                    name: &'a str,
                    path: String,
                    records: usize,
                    size: u64,
                }
                let list: Vec<Out> = sessions
                    .iter()
                    .map(|s| Out {
                        name: &s.name,
                        path: s.path.display().to_string(),
                        records: s.num_lines,
                        size: s.file_size,
                    })
                    .collect();
                render_mod::print_json(&list);
            } else {
                for s in &sessions {
                    println!("{} ({} records)", s.name, s.num_lines);
                }
            }
            Ok(())
        }
        SessionCommands::Switch { name } => {
            let path = session::session_file_path(&name)?;
            if !path.exists() {
                anyhow::bail!("unknown session: {}", name);
            }
            session::set_active_session(&name)?;
            println!("active session: {}", name);
            Ok(())
        }
        SessionCommands::Show => {
            let active = session::get_active_session()?;
            match active {
                Some(name) => {
                    let history = session::load_session_history(&name)?;
                    if globals.json {
                        #[derive(serde::Serialize)]
                        struct Out<'a> {
                            name: &'a str,
                            records: usize,
                        }
                        render_mod::print_json(&Out { name: &name, records: history.len() });
                    } else {
                        println!("active session: {} ({} records)", name, history.len());
                    }
                    Ok(())
                }
                None => anyhow::bail!("no active session"),
            }
        }
        SessionCommands::Search { name, contains } => {
            let hits = session::search_session(&name, &contains)?;
            if globals.json {
                render_mod::print_json(&hits);
            } else {
                for r in &hits {
                    println!("[{}] {}", r.role, r.content);
                }
            }
            Ok(())
        }
    }
}
