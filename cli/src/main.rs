//! `arbiter` binary: wire components from configuration and run the shell.
//!
//! Exit code 0 on clean shutdown, non-zero on fatal initialization errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use arbiter::{
    Critic, DebateEngine, EventBus, InMemoryVectorIndex, JsonlEventLog, ListDirTool,
    ChatOpenAI, OpenAIEmbedder, Orchestrator, OrchestratorBuilder, OrchestratorConfig,
    PersonaLibrary, PersonaManager, RateLimiter, ReadFileTool, Router, SandboxGuard,
    SandboxPolicy, SemanticCache, SqliteCheckpointStore, ToolRegistry, ToolUseLoop,
    CheckpointStore,
};
use cli::repl::{run_repl, ReplContext};

/// Hybrid local/cloud agent orchestration shell.
#[derive(Parser, Debug)]
#[command(name = "arbiter", version, about)]
struct Args {
    /// Base configuration document (system.* / security.*).
    #[arg(long, default_value = "configs/base.yaml")]
    config: PathBuf,

    /// Directory of persona YAML documents overriding the embedded set.
    #[arg(long)]
    personas: Option<PathBuf>,

    /// OpenAI-compatible proxy multiplexing all model tiers.
    #[arg(long, env = "ARBITER_BASE_URL", default_value = "http://localhost:4000")]
    base_url: String,

    /// Router model name.
    #[arg(long, default_value = "local-router")]
    router_model: String,

    /// Worker model name.
    #[arg(long, default_value = "local-worker")]
    worker_model: String,

    /// Critic model name.
    #[arg(long, default_value = "local-helper")]
    critic_model: String,

    /// Cloud model name.
    #[arg(long, default_value = "cloud-pm-gemini")]
    cloud_model: String,

    /// Embedding model for the semantic cache.
    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Directory for checkpoints and event logs.
    #[arg(long, default_value = "history")]
    history_dir: PathBuf,

    /// Initial session name.
    #[arg(long, default_value = "default")]
    session: String,

    /// Disable the semantic cache.
    #[arg(long)]
    no_cache: bool,

    /// Verbose logging (RUST_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "arbiter=debug,cli=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn build_context(args: &Args) -> Result<ReplContext, Box<dyn std::error::Error>> {
    // Env bootstrap (API keys, base URLs): env > .env > XDG.
    config::load_and_apply("arbiter", None)?;
    let document = config::SystemConfig::load_or_default(&args.config)?;

    // Personas
    let library = Arc::new(match &args.personas {
        Some(dir) => PersonaLibrary::with_dir(dir),
        None => PersonaLibrary::embedded(),
    });
    let personas = Arc::new(PersonaManager::new(
        Arc::clone(&library),
        &document.system.default_persona,
    )?);

    // Tools behind the sandbox policy.
    let policy = SandboxPolicy::from_section(&document.security);
    let guard = Arc::new(SandboxGuard::new(policy, std::env::current_dir()?));
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ReadFileTool::new(Arc::clone(&guard))));
    registry.register(Box::new(ListDirTool::new(Arc::clone(&guard))));
    let registry = Arc::new(registry);

    // Model clients behind one proxy; model name selects the tier. The
    // worker advertises the registry's schemas so it can emit tool calls.
    let router_llm = Arc::new(ChatOpenAI::for_proxy(&args.base_url, &args.router_model));
    let worker_llm = Arc::new(
        ChatOpenAI::for_proxy(&args.base_url, &args.worker_model)
            .with_sampling(personas.sampling())
            .with_tools(registry.list()),
    );
    let critic_llm = Arc::new(ChatOpenAI::for_proxy(&args.base_url, &args.critic_model));
    let cloud_llm = Arc::new(ChatOpenAI::for_proxy(&args.base_url, &args.cloud_model));
    let debate_llm = Arc::new(ChatOpenAI::for_proxy(&args.base_url, &args.worker_model));

    // Durable stores and observability.
    std::fs::create_dir_all(&args.history_dir)?;
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(
        args.history_dir.join("checkpoints.db"),
    )?);
    let bus = Arc::new(
        EventBus::new().with_jsonl_sink(JsonlEventLog::new(args.history_dir.join("events"))?),
    );
    bus.start().await;

    let cache = {
        let embedder = Arc::new(OpenAIEmbedder::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_base(&args.base_url)
                .with_api_key("not-needed"),
            &args.embedding_model,
        ));
        let cache = SemanticCache::new(embedder, Arc::new(InMemoryVectorIndex::new()));
        Arc::new(if args.no_cache { cache.disabled() } else { cache })
    };

    let critic = Critic::new(critic_llm, &library)?
        .with_unreachable_pass(document.system.critic_unreachable_pass);
    let debate = DebateEngine::new(debate_llm.clone(), Arc::clone(&personas))
        .with_max_rounds(document.system.debate_max_rounds)
        .with_approval_threshold(document.system.debate_approval_threshold);
    let repl_debate = DebateEngine::new(debate_llm, Arc::clone(&personas))
        .with_max_rounds(document.system.debate_max_rounds)
        .with_approval_threshold(document.system.debate_approval_threshold);

    let orchestrator: Orchestrator = OrchestratorBuilder::new(
        Router::new(router_llm),
        worker_llm,
        cloud_llm,
        args.cloud_model.clone(),
        ToolUseLoop::new(Arc::clone(&registry)).with_events(Arc::clone(&bus)),
        critic,
        Arc::clone(&checkpoints),
        Arc::clone(&personas),
    )
    .with_debate(debate)
    .with_cache(cache)
    .with_limiter(Arc::new(RateLimiter::default_local()))
    .with_bus(Arc::clone(&bus))
    .with_config(OrchestratorConfig::from_system(&document.system))
    .build();

    info!(base_url = %args.base_url, cloud = %args.cloud_model, "arbiter initialized");

    Ok(ReplContext {
        orchestrator,
        checkpoints,
        personas,
        debate: repl_debate,
        bus,
        base_url: args.base_url.clone(),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let ctx = match build_context(&args).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("fatal: initialization failed: {}", e);
            return ExitCode::from(1);
        }
    };

    match run_repl(ctx, &args.session).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {}", e);
            ExitCode::from(1)
        }
    }
}
