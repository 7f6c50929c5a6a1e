//! # tenant-rag CLI (`trag`)
//!
//! Manage apps, upload documents, train per-app indexes, chat, and run the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! trag --config ./config/trag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trag init` | Write a default config if missing and create storage |
//! | `trag apps list` | List apps and their status |
//! | `trag apps create <id> --name <name>` | Register an app |
//! | `trag apps show <id>` | App details and uploaded files |
//! | `trag apps delete <id>` | Delete an app with its files and index |
//! | `trag upload <id> <files...>` | Store `.txt`/`.md` files for an app |
//! | `trag train <id>` | Rebuild an app's index |
//! | `trag chat <id> "<message>"` | Ask a question |
//! | `trag chat <id>` | Ask questions read from stdin until `exit` |
//! | `trag serve` | Start the HTTP server |
//!
//! Command output goes to stdout; logs go to stderr (`RUST_LOG`, `--verbose`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tenant_rag::config::{self, Config};
use tenant_rag::engine::Engine;
use tenant_rag::models::Answer;
use tenant_rag::server;

/// tenant-rag: per-app document indexing and grounded chat.
#[derive(Parser)]
#[command(name = "trag", version, about = "Multi-tenant retrieval-augmented chat backend")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trag.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file (if missing) and create the storage layout.
    ///
    /// Idempotent: running it again keeps the existing config and data.
    Init,

    #[command(flatten)]
    Engine(EngineCommand),
}

/// Commands that run against an opened engine.
#[derive(Subcommand)]
enum EngineCommand {
    /// Manage apps.
    Apps {
        #[command(subcommand)]
        action: AppsAction,
    },

    /// Upload `.txt` or `.md` files to an app.
    Upload {
        app_id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Rebuild an app's index from all of its uploaded files.
    Train { app_id: String },

    /// Ask a question against a trained app.
    ///
    /// Without a message, questions are read from stdin one per line until
    /// `exit` or end of input.
    Chat {
        app_id: String,
        message: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum AppsAction {
    /// List all apps.
    List,
    /// Register a new app.
    Create {
        /// 2-50 letters, digits, or dashes; stored lowercased.
        app_id: String,
        /// Display name used in prompts. Defaults to the id.
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Show an app and its files.
    Show { app_id: String },
    /// Delete an app with its files and index.
    Delete { app_id: String },
}

const DEFAULT_CONFIG: &str = r#"# tenant-rag configuration

[storage]
root = "./data"

[chunking]
size = 800
overlap = 120

[retrieval]
top_k = 3

[embedding]
provider = "hash"

[generator]
model = "gpt-3.5-turbo"
api_key_env = "OPENAI_API_KEY"

[index]
backend = "sqlite"

[server]
bind = "127.0.0.1:8000"
"#;

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn write_default_config(path: &Path) -> anyhow::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(true)
}

fn load(path: &Path) -> anyhow::Result<Config> {
    config::load_config(path).with_context(|| {
        format!(
            "Could not load {} (run `trag init` to create it)",
            path.display()
        )
    })
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources: {}", answer.sources.join(", "));
    }
}

async fn init(config_path: &Path) -> anyhow::Result<()> {
    let created = write_default_config(config_path)?;
    let cfg = load(config_path)?;
    Engine::open(cfg.clone()).await?;
    if created {
        println!("Wrote default config to {}", config_path.display());
    }
    println!("Storage initialized at {}", cfg.storage.root.display());
    Ok(())
}

/// Answer questions from stdin until `exit` or end of input.
async fn chat_loop(engine: &Engine, app_id: &str) -> anyhow::Result<()> {
    let app = engine.get_app(app_id).await?;
    println!("Ask me anything about {} (type 'exit' to quit):", app.name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        match engine.chat(&app.app_id, question).await {
            Ok(answer) => {
                println!();
                print_answer(&answer);
                println!();
            }
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    Ok(())
}

async fn run(engine: Engine, command: EngineCommand) -> anyhow::Result<()> {
    match command {
        EngineCommand::Apps { action } => match action {
            AppsAction::List => {
                let apps = engine.list_apps().await?;
                if apps.is_empty() {
                    println!("No apps.");
                }
                for app in apps {
                    println!(
                        "{:<20} {:<9} docs={:<4} chunks={:<6} {}",
                        app.app_id, app.status.as_str(), app.document_count, app.chunk_count, app.name
                    );
                }
            }
            AppsAction::Create { app_id, name } => {
                let app = engine.create_app(&app_id, &name).await?;
                println!("Created app '{}' ({})", app.app_id, app.status);
            }
            AppsAction::Show { app_id } => {
                let app = engine.get_app(&app_id).await?;
                println!("id:              {}", app.app_id);
                println!("name:            {}", app.name);
                println!("status:          {}", app.status);
                println!(
                    "last trained:    {}",
                    app.last_trained_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string())
                );
                println!("documents:       {}", app.document_count);
                println!("chunks:          {}", app.chunk_count);
                if let Some(reason) = &app.failure_reason {
                    println!("failure:         {}", reason);
                }
                let files = engine.list_documents(&app.app_id).await?;
                println!("files:           {}", files.len());
                for f in files {
                    println!("  {:<30} {:>8} bytes  {}", f.filename, f.size_bytes, &f.sha256[..12]);
                }
            }
            AppsAction::Delete { app_id } => {
                engine.delete_app(&app_id).await?;
                println!("Deleted app '{}'", app_id.to_ascii_lowercase());
            }
        },
        EngineCommand::Upload { app_id, files } => {
            for path in files {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .with_context(|| format!("Not a file: {}", path.display()))?;
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let record = engine.upload(&app_id, &filename, &bytes).await?;
                println!("Uploaded {} ({} bytes)", record.filename, record.size_bytes);
            }
        }
        EngineCommand::Train { app_id } => {
            let report = engine.train(&app_id).await?;
            println!(
                "Training complete for '{}': {} documents, {} chunks, status {}",
                report.app_id, report.documents, report.chunks, report.status
            );
        }
        EngineCommand::Chat { app_id, message } => match message {
            Some(message) => print_answer(&engine.chat(&app_id, &message).await?),
            None => chat_loop(&engine, &app_id).await?,
        },
        EngineCommand::Serve => {
            let recovered = engine.recover_interrupted().await?;
            if !recovered.is_empty() {
                eprintln!("Marked interrupted training as failed: {}", recovered.join(", "));
            }
            server::run_server(Arc::new(engine)).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init => init(&cli.config).await,
        Commands::Engine(command) => {
            let engine = Engine::open(load(&cli.config)?).await?;
            run(engine, command).await
        }
    }
}
