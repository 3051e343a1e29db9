//! # fact-forensic
//!
//! Runs the fact-checking agent against a Coral server, or answers a single
//! request from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;

use fact_forensic::prompt::{coral_system_prompt, standalone_system_prompt};
use fact_forensic::tools::forensic_toolkit;
use fact_forensic::{
    init_tracing, model_from_config, Agent, AgentResponder, AppConfig, CoralSession,
    ImageForensicsTool, MentionLoop, Result, Supervisor, ToolRegistry,
};

/// Fact-checking agent: image forensics and web search over Coral
#[derive(Parser)]
#[command(name = "fact-forensic")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Analyses content for misinformation and deepfakes")]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, env = "FACT_FORENSIC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Coral and answer mentions until interrupted
    Serve {
        /// Stop after this many mention polls
        #[arg(long)]
        max_iterations: Option<u64>,
    },

    /// Answer one request without Coral
    Ask {
        /// The content or question to check
        input: String,
    },

    /// Run the image forensics tool on one URL
    Analyse {
        /// Image URL
        url: String,
    },

    /// Show the agent's own tools
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => AppConfig::from_env_or_file(path)?,
        None => AppConfig::from_env(),
    };
    if cli.verbose {
        cfg.logging.level = "debug".into();
    }
    init_tracing(&cfg.logging);

    info!("Starting fact-forensic v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(Commands::Serve { max_iterations }) => {
            if max_iterations.is_some() {
                cfg.supervisor.max_iterations = max_iterations;
            }
            serve(cfg).await
        }
        Some(Commands::Ask { input }) => ask(cfg, input).await,
        Some(Commands::Analyse { url }) => analyse(cfg, &url).await,
        Some(Commands::Tools) => list_tools(&cfg),
        None if std::env::var_os("CORAL_ORCHESTRATION_RUNTIME").is_some() => serve(cfg).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    let model = model_from_config(&cfg.model)?;
    let agent_tools = forensic_toolkit(&cfg)?;

    let session = CoralSession::connect(&cfg.coral).await?;
    let mut tools = ToolRegistry::new();
    let coral_count = session.register_tools(&mut tools).await?;
    info!(coral_tools = coral_count, "registered Coral tools");

    let prompt = coral_system_prompt(&tools.describe(), &agent_tools.describe());
    tools.extend(agent_tools);

    let agent = Agent::new(model)
        .with_system_prompt(prompt)
        .with_tools(tools)
        .with_max_steps(cfg.supervisor.max_steps);
    let mention_loop = MentionLoop::new(session.clone(), Arc::new(AgentResponder::new(agent)));
    let supervisor = Supervisor::from_config(Arc::new(mention_loop), &cfg.supervisor);

    let token = supervisor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            token.cancel();
        }
    });

    let report = supervisor.run().await;
    session.client().close().await?;
    info!(
        iterations = report.iterations,
        failures = report.failures,
        "agent stopped"
    );
    Ok(())
}

async fn ask(cfg: AppConfig, input: String) -> Result<()> {
    let model = model_from_config(&cfg.model)?;
    let tools = forensic_toolkit(&cfg)?;
    let prompt = standalone_system_prompt(&tools.describe());

    let mut agent = Agent::new(model)
        .with_system_prompt(prompt)
        .with_tools(tools)
        .with_max_steps(cfg.supervisor.max_steps);
    let answer = agent.respond(input).await?;
    println!("{answer}");
    Ok(())
}

async fn analyse(cfg: AppConfig, url: &str) -> Result<()> {
    let forensics = ImageForensicsTool::from_config(&cfg.forensics)?;
    let result = forensics.analyse(url).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn list_tools(cfg: &AppConfig) -> Result<()> {
    for tool in forensic_toolkit(cfg)?.describe() {
        println!("{}: {}", tool.name, tool.description);
        if let Some(schema) = tool.parameters {
            println!("  schema: {schema}");
        }
    }
    Ok(())
}
