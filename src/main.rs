//! # drive-qa CLI
//!
//! ## Usage
//!
//! ```bash
//! drive-qa --config ./config/drive-qa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `drive-qa serve` | Start the HTTP server |
//! | `drive-qa list [PATH]` | List a drive path, share link or site URL |
//! | `drive-qa children <DRIVE> <ITEM>` | List a folder by id |
//! | `drive-qa ask "<question>" --file DRIVE:ITEM:NAME` | Answer a question from files |
//! | `drive-qa extract <FILE>` | Print the text extracted from a local file |
//!
//! Commands that talk to the provider need a token, from `--token` or the
//! `DRIVE_QA_TOKEN` environment variable.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use drive_qa::assemble::ContextAssembler;
use drive_qa::chat::QuestionAnswerer;
use drive_qa::config::{self, Config};
use drive_qa::credential::Credential;
use drive_qa::endpoints::Endpoints;
use drive_qa::extract::Extractor;
use drive_qa::llm::create_model;
use drive_qa::models::{ListingResponse, SelectedFile};
use drive_qa::remote::GraphClient;
use drive_qa::resolver::ResourceResolver;
use drive_qa::server;

#[derive(Parser)]
#[command(
    name = "drive-qa",
    about = "Browse cloud drives and ask questions about their files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/drive-qa.toml")]
    config: PathBuf,

    /// Access token for the storage provider.
    #[arg(long, global = true, env = "DRIVE_QA_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// List the items under a drive path, share link or site URL.
    ///
    /// An empty path lists the root of your own drive.
    List {
        #[arg(default_value = "")]
        path: String,
    },

    /// List a folder by drive id and item id.
    Children { drive_id: String, item_id: String },

    /// Ask a question about one or more files.
    Ask {
        question: String,

        /// File as DRIVE_ID:ITEM_ID:NAME. Repeatable; order is kept.
        #[arg(long = "file", required = true, value_parser = parse_selected_file)]
        files: Vec<SelectedFile>,
    },

    /// Extract text from a local file, as a question would see it.
    Extract { file: PathBuf },
}

fn parse_selected_file(raw: &str) -> Result<SelectedFile, String> {
    let mut parts = raw.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(drive), Some(item), Some(name)) if !name.is_empty() => {
            Ok(SelectedFile::new(item, drive, name))
        }
        _ => Err(format!("expected DRIVE_ID:ITEM_ID:NAME, got '{}'", raw)),
    }
}

fn require_token(token: Option<&str>) -> anyhow::Result<Credential> {
    token
        .and_then(Credential::parse)
        .context("Missing access token: pass --token or set DRIVE_QA_TOKEN")
}

fn print_listing(listing: ListingResponse) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Local extraction needs neither a token nor the network.
    if let Commands::Extract { file } = &cli.command {
        let cfg = config::load_config(&cli.config)?;
        let bytes = std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        println!("{}", Extractor::from_config(&cfg.extract).extract(&bytes, name));
        return Ok(());
    }

    let cfg: Config = config::load_config(&cli.config)?;

    if let Commands::Serve = cli.command {
        return server::run_server(&cfg).await;
    }

    let cred = require_token(cli.token.as_deref())?;
    let client = GraphClient::new(&cfg.graph)?;
    let endpoints = Endpoints::new(&cfg.graph.base_url);

    match cli.command {
        Commands::List { path } => {
            let resolver = ResourceResolver::new(&client, &endpoints, &cfg);
            let listing = resolver.resolve(&path, &cred).await?;
            print_listing(listing.into())?;
        }
        Commands::Children { drive_id, item_id } => {
            let resolver = ResourceResolver::new(&client, &endpoints, &cfg);
            let listing = resolver.list_children(&drive_id, &item_id, &cred).await?;
            print_listing(listing.into())?;
        }
        Commands::Ask { question, files } => {
            let model = create_model(&cfg.llm)?;
            let assembler = ContextAssembler::new(
                &client,
                &endpoints,
                Arc::new(Extractor::from_config(&cfg.extract)),
                cfg.assemble.concurrency,
            );
            let answerer = QuestionAnswerer::new(
                assembler,
                model.as_ref(),
                &cfg.llm.system_prompt,
                cfg.context.max_chars,
            );
            let answer = answerer.answer(&question, &files, &cred).await?;
            println!("{}", answer);
        }
        Commands::Serve | Commands::Extract { .. } => {}
    }

    Ok(())
}
