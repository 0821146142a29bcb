use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use assistflow::cli::{assistant_entries, build_registry, render_event};
use assistflow::config::StreamConfig;
use assistflow::events::DomainEvent;
use assistflow::runtime::{InvocationRequest, StreamOrchestrator, DEFAULT_AGENT};
use assistflow::session::MemorySessionStore;
use assistflow::utils::LoggingConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "assistflow", version, about = "Stream coding assistant CLIs as structured events", author)]
struct Cli {
    /// JSON 配置文件，缺省时使用默认值与环境变量
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 列出已注册的助手与模型轮换表
    Assistants {
        #[arg(long)]
        json: bool,
    },
    /// 调用助手并打印事件流
    Run {
        prompt: String,
        #[arg(long)]
        assistant: Option<String>,
        #[arg(long, default_value = DEFAULT_AGENT)]
        agent: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        repo: Option<PathBuf>,
        /// 每个事件输出一行 JSON
        #[arg(long)]
        json: bool,
    },
    /// 估算 prompt 的复杂度与耗时
    Estimate { prompt: String },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<StreamConfig> {
    let config = match path {
        Some(path) => StreamConfig::load(path)?.with_env_overrides()?,
        None => StreamConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    LoggingConfig::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Assistants { json } => handle_assistants(&config, json)?,
        Command::Run {
            prompt,
            assistant,
            agent,
            model,
            repo,
            json,
        } => {
            let config = match repo {
                Some(repo) => config.with_repo_root(repo),
                None => config,
            };
            let request = InvocationRequest::new(prompt)
                .with_agent(agent)
                .with_assistant(assistant)
                .with_model(model);
            handle_run(config, request, json).await?;
        }
        Command::Estimate { prompt } => handle_estimate(config, &prompt)?,
    }
    Ok(())
}

fn handle_assistants(config: &StreamConfig, json: bool) -> anyhow::Result<()> {
    let registry = build_registry(config)?;
    let entries = assistant_entries(&registry);
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    println!("{:<16} {:<8} {}", "Name", "Default", "Models");
    for entry in entries {
        let models = if entry.models.is_empty() {
            "-".to_string()
        } else {
            entry.models.join(", ")
        };
        println!(
            "{:<16} {:<8} {}",
            entry.name,
            if entry.default { "yes" } else { "" },
            models
        );
    }
    Ok(())
}

async fn handle_run(config: StreamConfig, request: InvocationRequest, json: bool) -> anyhow::Result<()> {
    let registry = Arc::new(build_registry(&config)?);
    let session = Arc::new(MemorySessionStore::new());
    let orchestrator = Arc::new(StreamOrchestrator::new(config, session, registry));

    let mut invocation = orchestrator.stream(request);
    let mut stdout = std::io::stdout();
    while let Some(event) = invocation.next_event().await {
        if json {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
            continue;
        }
        match &event {
            DomainEvent::ContentDelta { text, .. } => write!(stdout, "{text}")?,
            DomainEvent::Progress(update) if update.is_heartbeat() => {}
            other => {
                if let Some(line) = render_event(other) {
                    writeln!(stdout, "\n{line}")?;
                }
            }
        }
        stdout.flush()?;
    }

    let (_, result) = invocation.collect().await;
    let result = result?;
    if !json {
        writeln!(
            stdout,
            "\n{} ({}) finished, {} tokens",
            result.assistant_name, result.model_name, result.tokens
        )?;
    }
    Ok(())
}

fn handle_estimate(config: StreamConfig, prompt: &str) -> anyhow::Result<()> {
    let registry = Arc::new(build_registry(&config)?);
    let session = Arc::new(MemorySessionStore::new());
    let orchestrator = StreamOrchestrator::new(config, session, registry);

    let complexity = orchestrator.analyze_complexity(prompt);
    let duration = orchestrator.estimated_duration(&complexity);
    println!("complexity: {} (score {:.2})", complexity.label.as_str(), complexity.score);
    println!("multiplier: {:.2}", complexity.multiplier());
    println!("estimated duration: {duration:.1}s");
    Ok(())
}
