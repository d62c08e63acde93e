use std::sync::Arc;

use anyhow::{Context, Result};
use axploration::config::StoreLocation;
use axploration::{
    Neo4jHttpStore, OllamaClient, OllamaClientBuilder, RecordStore, RunState, Settings,
    SqliteRecordStore, Workflow, doctor, telemetry,
};
use clap::{Parser, Subcommand};

/// axp - ask questions about building data in plain language
#[derive(Parser)]
#[command(name = "axp")]
#[command(about = "Natural-language questions over a building dataset")]
#[command(version)]
struct Cli {
    /// Log progress to stderr (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Answer a question
    Ask(AskCommand),
    /// Check store and oracle connectivity
    Doctor,
}

/// Answer a question
#[derive(Parser)]
struct AskCommand {
    /// The question, e.g. "Wie viele Schulen gibt es in Pankow?"
    #[arg(value_name = "QUERY")]
    query: String,

    /// Filter geometry as WKT or GeoJSON, in the store's CRS
    #[arg(short, long, value_name = "WKT")]
    spatial_filter: Option<String>,

    /// Print each step's messages as it completes
    #[arg(long)]
    stream: bool,

    /// Print the final state as JSON instead of the answer
    #[arg(long)]
    json: bool,
}

fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    let result = match &cli.command {
        Commands::Ask(cmd) => handle_ask(cmd),
        Commands::Doctor => handle_doctor(),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            // Determine exit code based on error type
            let exit_code = if is_user_error(&e) { 1 } else { 2 };
            eprintln!("Error: {e:#}");
            std::process::exit(exit_code);
        }
    }
}

/// Determines if an error is a user error (vs setup failure).
fn is_user_error(error: &anyhow::Error) -> bool {
    error.to_string().contains("cannot be empty")
}

/// Runs the workflow. Returns `false` when the run ended with an error.
fn handle_ask(cmd: &AskCommand) -> Result<bool> {
    if cmd.query.trim().is_empty() {
        anyhow::bail!("Query cannot be empty");
    }

    let settings = Settings::from_env();
    let store = open_store()?;
    let oracle = build_oracle(&settings)?;
    let workflow = Workflow::new(Arc::new(oracle), store, settings);

    let state = if cmd.stream {
        stream_run(&workflow, cmd)
    } else {
        workflow.run(&cmd.query, cmd.spatial_filter.as_deref())
    };

    if cmd.json {
        let json = serde_json::to_string_pretty(&state).context("Failed to serialize run state")?;
        println!("{}", json);
    } else {
        println!("{}", state.final_answer);
    }

    Ok(state.error.is_none())
}

/// Prints messages node by node and returns the terminal state.
fn stream_run(workflow: &Workflow, cmd: &AskCommand) -> RunState {
    let mut steps = workflow.steps(&cmd.query, cmd.spatial_filter.as_deref());
    let mut printed = 0;
    let mut last = None;

    for step in steps.by_ref() {
        eprintln!("[{}]", step.node);
        for message in &step.state.messages[printed..] {
            eprintln!("  {}", message);
        }
        printed = step.state.messages.len();
        last = Some(step.state);
    }

    last.unwrap_or_else(|| steps.state().clone())
}

fn handle_doctor() -> Result<bool> {
    let settings = Settings::from_env();
    let store = open_store()?;
    let oracle = build_oracle(&settings)?;

    doctor::run_health_checks(store.as_ref(), &oracle, &settings)
}

fn open_store() -> Result<Arc<dyn RecordStore>> {
    let location = StoreLocation::from_env()?;

    let store: Arc<dyn RecordStore> = match location {
        StoreLocation::Sqlite(path) => Arc::new(
            SqliteRecordStore::open(&path)
                .with_context(|| format!("Failed to open database: {}", path.display()))?,
        ),
        StoreLocation::Neo4j {
            uri,
            username,
            password,
            database,
        } => Arc::new(
            Neo4jHttpStore::new(&uri, username, password, &database)
                .context("Failed to configure Neo4j store")?,
        ),
    };
    Ok(store)
}

fn build_oracle(settings: &Settings) -> Result<OllamaClient> {
    let mut builder = OllamaClientBuilder::new();
    if !settings.chat_model.is_empty() {
        builder = builder.model(&settings.chat_model);
    }
    builder.build().context("Failed to configure Ollama client")
}
