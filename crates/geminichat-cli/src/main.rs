use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod app;
mod commands;
mod files;

#[derive(Parser)]
#[command(name = "geminichat")]
#[command(about = "geminichat - terminal chat for Google Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Model to use
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Sampling temperature (0.0-1.0)
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Nucleus sampling (0.0-1.0)
    #[arg(long, global = true)]
    top_p: Option<f32>,

    /// Thinking token budget
    #[arg(long, global = true)]
    thinking_budget: Option<u32>,

    /// Ground answers with Google Search
    #[arg(long, global = true)]
    grounding: bool,

    /// System instruction
    #[arg(long, global = true)]
    system: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a single prompt and exit
    Ask {
        prompt: String,
        /// Files to send with the prompt
        #[arg(short, long)]
        attach: Vec<PathBuf>,
    },
    /// Manage context caches
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Upload a file and create a cache from it
    Create {
        file: PathBuf,
        /// Time to live: 5m, 1h, 6h, 12h, 1d, or seconds
        #[arg(long, default_value = "1h")]
        ttl: String,
    },
    /// List caches
    List,
    /// Delete a cache
    Delete { name: String },
    /// Ask a question against a cache
    Query { name: String, prompt: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut settings = geminichat_core::Settings::load();
    tracing::debug!(
        "settings from {}",
        geminichat_core::Settings::config_path().display()
    );

    if let Some(ref model) = cli.model {
        settings.provider.model = model.clone();
    }
    let generation = &mut settings.generation;
    if let Some(t) = cli.temperature {
        generation.set_temperature(t).context("--temperature")?;
    }
    if let Some(p) = cli.top_p {
        generation.set_top_p(p).context("--top-p")?;
    }
    if let Some(b) = cli.thinking_budget {
        generation
            .set_thinking_budget(Some(b))
            .context("--thinking-budget")?;
    }
    if cli.grounding {
        generation.set_grounding(true);
    }
    if cli.system.is_some() {
        generation.set_system_instruction(cli.system.clone());
    }

    match cli.command {
        None => app::run_repl(settings).await?,
        Some(Command::Ask { prompt, attach }) => {
            app::run_single_prompt(&settings, &prompt, &attach).await?
        }
        Some(Command::Cache(cache)) => match cache {
            CacheCommand::Create { file, ttl } => {
                app::cache_create(&settings, &file, &ttl, cli.system).await?
            }
            CacheCommand::List => app::cache_list(&settings).await?,
            CacheCommand::Delete { name } => app::cache_delete(&settings, &name).await?,
            CacheCommand::Query { name, prompt } => {
                app::cache_query(&settings, &name, &prompt).await?
            }
        },
    }

    Ok(())
}
