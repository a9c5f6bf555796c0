//! Binary entry point for the Nostr graph importer.
#![forbid(unsafe_code)]

mod ui;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{ArgAction, Parser};
use nostr_graph::{run_import, ImportConfig, ImportReport, MemoryStore, Neo4jStore};
use tracing_subscriber::EnvFilter;

use crate::ui::{format_runtime, Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "nostr-graph",
    version,
    about = "Import Nostr events into a Neo4j property graph"
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Config file (TOML)")]
    config: Option<PathBuf>,

    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "NOSTR_GRAPH_INPUT",
        help = "Newline-delimited JSON events"
    )]
    input: Option<PathBuf>,

    #[arg(long, value_name = "N", help = "Maximum input lines to read (0 = all)")]
    max_records: Option<usize>,

    #[arg(long, value_name = "N", help = "Flush once more than N nodes are buffered")]
    batch_threshold: Option<usize>,

    #[arg(long, env = "NEO4J_URI", help = "Bolt URI")]
    neo4j_uri: Option<String>,

    #[arg(long, env = "NEO4J_USER")]
    neo4j_user: Option<String>,

    #[arg(long, env = "NEO4J_PASSWORD", hide_env_values = true)]
    neo4j_password: Option<String>,

    #[arg(long, env = "NEO4J_DATABASE")]
    neo4j_database: Option<String>,

    #[arg(long, help = "Link e/p tags to the referenced event or user")]
    link_references: bool,

    #[arg(long, help = "Skip creating constraints and indexes")]
    no_bootstrap: bool,

    #[arg(long, help = "Import into an in-memory graph instead of Neo4j")]
    dry_run: bool,

    #[arg(
        long,
        value_enum,
        default_value_t = Theme::Auto,
        help = "Color theme for the summary"
    )]
    theme: Theme,

    #[arg(short, long, action = ArgAction::Count, help = "Increase log verbosity")]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut ImportConfig) {
        if let Some(input) = &self.input {
            config.input = input.clone();
        }
        if let Some(max_records) = self.max_records {
            config.max_records = max_records;
        }
        if let Some(threshold) = self.batch_threshold {
            config.batch_threshold = threshold;
        }
        if let Some(uri) = &self.neo4j_uri {
            config.neo4j.uri = uri.clone();
        }
        if let Some(user) = &self.neo4j_user {
            config.neo4j.user = user.clone();
        }
        if let Some(password) = &self.neo4j_password {
            config.neo4j.password = password.clone();
        }
        if let Some(database) = &self.neo4j_database {
            config.neo4j.database = database.clone();
        }
        if self.link_references {
            config.link_references = true;
        }
        if self.no_bootstrap {
            config.bootstrap = false;
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let started = Instant::now();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = ImportConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let ui = Ui::new(cli.theme, cli.verbose == 0);
    let task = ui.task(format!("Importing {}", config.input.display()));
    let outcome = tokio::select! {
        outcome = import(&config, cli.dry_run) => outcome?,
        Ok(()) = tokio::signal::ctrl_c() => {
            ui.warn("interrupted; buffered entities were not written");
            std::process::exit(130);
        }
    };
    task.finish();

    let (report, totals) = outcome;
    ui.section(
        "Import",
        [
            ("records read", report.records_read.to_string()),
            ("malformed", report.records_malformed.to_string()),
            ("rejected", report.records_rejected.to_string()),
            ("flushes", report.flushes.to_string()),
            ("node rows", report.nodes_written.to_string()),
            ("relationship rows", report.relationships_written.to_string()),
        ],
    );
    if let Some((nodes, relationships)) = totals {
        ui.section(
            "In-memory graph",
            [
                ("nodes", nodes.to_string()),
                ("relationships", relationships.to_string()),
            ],
        );
    }
    ui.success("import complete");
    println!("Runtime: {}", format_runtime(started.elapsed()));
    Ok(())
}

/// Runs the import, returning stored totals when writing to memory.
async fn import(
    config: &ImportConfig,
    dry_run: bool,
) -> Result<(ImportReport, Option<(usize, usize)>), Box<dyn Error>> {
    if dry_run {
        let store = Arc::new(MemoryStore::new());
        let report = run_import(config, Arc::clone(&store)).await?;
        return Ok((report, Some((store.node_count(), store.relationship_count()))));
    }
    let store = Neo4jStore::connect(&config.neo4j).await?;
    Ok((run_import(config, store).await?, None))
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nostr_graph=info")),
        1 => EnvFilter::new("nostr_graph=debug"),
        _ => EnvFilter::new("nostr_graph=trace,neo4rs=debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
