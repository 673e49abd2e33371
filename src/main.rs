// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use maestro_config::Config;
use maestro_core::{
    AgentModeRunner, ChatRequest, MessageBuilder, Orchestrator, PlainModeRunner,
    PromptOverrideService, PromptProvider, RagModeRunner, ToolAuthorizationService,
    ToolsModeRunner,
};
use maestro_domain::{AllowAll, InMemoryConversationRepository, InMemorySessionRepository};
use maestro_events::{CliPublisher, EventPublisher};
use maestro_files::InMemoryFileStore;
use maestro_gateway::{GatewayState, OrchestratorFactory};
use maestro_mcp::McpToolManager;
use maestro_model::{CompletionBackend, EchoBackend, LlmCaller};
use maestro_rag::UnifiedRagService;
use maestro_tools::{ApprovalPolicy, ElicitationBroker, ToolExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Arc::new(maestro_config::load(cli.config.as_deref())?);

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(config.as_ref()).unwrap_or_default());
            Ok(())
        }
        Commands::Ask {
            prompt,
            model,
            user,
            tools,
            data_sources,
            agent,
            strategy,
            collect,
        } => {
            run_ask(
                &config,
                prompt,
                model,
                user,
                tools,
                data_sources,
                agent,
                strategy,
                collect,
            )
            .await
        }
        Commands::Serve { addr } => run_serve(config, addr).await,
    }
}

/// Select the completion backend from config.
///
/// Provider adapters live outside this crate; deployments inject their own
/// [`CompletionBackend`] when embedding the library.  The binary ships the
/// deterministic mock for local smoke testing.
fn backend_from_config(config: &Config) -> anyhow::Result<Arc<dyn CompletionBackend>> {
    match config.model.provider.as_str() {
        "mock" => Ok(Arc::new(EchoBackend)),
        other => anyhow::bail!(
            "provider {other:?} is not bundled with this binary; \
             embed maestro-core with your own CompletionBackend, or configure provider: mock"
        ),
    }
}

/// Build the pipeline bottom-up: repositories, tool plumbing, LLM caller,
/// mode runners, then the orchestrator.
fn build_orchestrator(
    config: &Config,
    publisher: Arc<dyn EventPublisher>,
    broker: Arc<ElicitationBroker>,
) -> anyhow::Result<Orchestrator> {
    let backend = backend_from_config(config)?;

    let manager = Arc::new(McpToolManager::new(config.app.mcp_tool_timeout_seconds));
    let executor = Arc::new(ToolExecutor::new(
        manager.clone(),
        ApprovalPolicy::from_config(config),
        broker,
    ));

    let rag = Arc::new(UnifiedRagService::new(config.rag_sources.clone()));
    let llm = Arc::new(LlmCaller::new(backend).with_rag(rag));

    let prompt_provider = Arc::new(PromptProvider::new(config.app.system_prompt.clone()));
    let store = Arc::new(InMemoryFileStore::new());
    let repository = Arc::new(InMemorySessionRepository::new());
    let conversations = Arc::new(InMemoryConversationRepository::new());

    let factory = Arc::new(maestro_core::agent::AgentLoopFactory::new(
        llm.clone(),
        executor.clone(),
        config.app.agent_loop_strategy.clone(),
    ));

    let orchestrator = Orchestrator::new(
        repository,
        publisher.clone(),
        MessageBuilder::new(prompt_provider.clone()),
        PromptOverrideService::new(Some(manager.clone())),
        ToolAuthorizationService::new(Some(manager), Arc::new(AllowAll)),
        PlainModeRunner::new(llm.clone(), publisher.clone()),
        RagModeRunner::new(llm.clone(), publisher.clone()),
        ToolsModeRunner::new(llm, executor, publisher.clone(), prompt_provider)
            .with_store(store.clone()),
    )
    .with_agent_mode(AgentModeRunner::new(factory, publisher).with_store(store.clone()))
    .with_store(store)
    .with_conversations(conversations)
    .with_save_conversations(config.persistence.save_conversations)
    .with_default_max_steps(config.app.agent_max_steps);

    Ok(orchestrator)
}

#[allow(clippy::too_many_arguments)]
async fn run_ask(
    config: &Config,
    prompt: String,
    model: Option<String>,
    user: Option<String>,
    tools: Vec<String>,
    data_sources: Vec<String>,
    agent: bool,
    strategy: Option<String>,
    collect: bool,
) -> anyhow::Result<()> {
    let cli_publisher = Arc::new(if collect {
        CliPublisher::collecting()
    } else {
        CliPublisher::streaming()
    });
    let publisher: Arc<dyn EventPublisher> = cli_publisher.clone();
    let broker = Arc::new(ElicitationBroker::new());
    let orchestrator = build_orchestrator(config, publisher, broker)?;

    let session = orchestrator.create_session(user.as_deref()).await;

    let mut request = ChatRequest::new(
        session.id,
        prompt,
        model.unwrap_or_else(|| config.model.name.clone()),
    );
    request.user_email = user;
    request.selected_tools = tools;
    request.selected_data_sources = data_sources;
    request.agent_mode = agent;
    request.agent_loop_strategy = strategy;
    request.temperature = config.model.temperature;

    let outcome = orchestrator.execute(request).await?;
    if outcome.is_error() {
        eprintln!("error: {}", outcome.message);
        std::process::exit(1);
    }

    if collect {
        println!("{}", serde_json::to_string_pretty(&cli_publisher.result())?);
    }
    Ok(())
}

async fn run_serve(config: Arc<Config>, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    // Surface a bad provider at startup, not on first connection.
    backend_from_config(&config)?;

    let broker = Arc::new(ElicitationBroker::new());

    // Every connection builds its own orchestrator around the connection's
    // publisher; the broker is shared so elicitation responses resolve no
    // matter which connection task is waiting.
    let factory_config = config.clone();
    let factory_broker = broker.clone();
    let factory: OrchestratorFactory = Arc::new(move |publisher| {
        let orchestrator = build_orchestrator(&factory_config, publisher, factory_broker.clone())
            .expect("orchestrator construction is infallible with the mock backend");
        Arc::new(orchestrator)
    });

    let state = GatewayState {
        factory,
        broker,
        default_model: config.model.name.clone(),
    };
    maestro_gateway::serve(addr, state).await
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
