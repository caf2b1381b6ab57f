//! Command-line front end for mdict-hub
//!
//! Usage:
//!   mdict-hub scan-path add ~/dicts
//!   mdict-hub discover
//!   mdict-hub lookup <word>
//!   mdict-hub resource sound://hello.spx --dict <id> --out hello.wav
//!   mdict-hub info <file.mdx|file.mdd>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mdict_hub::{
    DictionaryService, EngineConfig, EntryContent, ExternalTranscoder, JsonFileStore, MdictBackend,
    Mdd, Mdx,
};

#[derive(Parser)]
#[command(name = "mdict-hub", about = "Look words up across MDX/MDD dictionary bundles")]
struct Cli {
    /// State file holding scan directories and per-dictionary settings
    #[arg(long, global = true, default_value = "./mdict-hub.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the directories scanned for dictionaries
    ScanPath {
        #[command(subcommand)]
        action: ScanPathAction,
    },
    /// Scan directories and list the dictionaries found
    Discover,
    /// Enable a dictionary
    Enable { id: String },
    /// Disable a dictionary
    Disable { id: String },
    /// Look a word up in every enabled dictionary
    Lookup {
        word: String,
        /// Only this dictionary
        #[arg(long)]
        dict: Option<String>,
    },
    /// Head-words starting with a prefix
    Prefix {
        prefix: String,
        #[arg(long, default_value_t = 20)]
        max: usize,
    },
    /// Head-words related to a phrase
    Associate {
        phrase: String,
        #[arg(long, default_value_t = 20)]
        max: usize,
    },
    /// Spelling suggestions
    Suggest {
        phrase: String,
        #[arg(long, default_value_t = 2)]
        distance: usize,
        #[arg(long, default_value_t = 10)]
        max: usize,
    },
    /// Head-words within an edit distance
    Fuzzy {
        word: String,
        #[arg(long, default_value_t = 10)]
        size: usize,
        #[arg(long, default_value_t = 2)]
        gap: usize,
    },
    /// Extract an embedded resource
    Resource {
        key: String,
        #[arg(long)]
        dict: String,
        /// Write the decoded bytes here instead of printing a summary
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show header information of a single MDX or MDD file
    Info { file: PathBuf },
}

#[derive(Subcommand)]
enum ScanPathAction {
    Add { dir: PathBuf },
    Remove { dir: PathBuf },
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Command::Info { file } = &cli.command {
        return print_info(file);
    }

    let config = EngineConfig::from_env();
    let transcoder = ExternalTranscoder::ffmpeg(config.transcoder.clone());
    let mut service = DictionaryService::start(
        Arc::new(MdictBackend),
        Arc::new(transcoder),
        Arc::new(JsonFileStore::new(&cli.state)),
        config,
    )?;

    let result = run(&mut service, cli.command).await;
    service.shutdown().await;
    result
}

async fn run(service: &mut DictionaryService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::ScanPath { action } => match action {
            ScanPathAction::Add { dir } => {
                let dir = std::path::absolute(&dir)
                    .with_context(|| format!("invalid path {}", dir.display()))?;
                if !service.add_scan_path(&dir)? {
                    println!("{} is already configured", dir.display());
                }
            }
            ScanPathAction::Remove { dir } => {
                let dir = std::path::absolute(&dir).unwrap_or(dir);
                if !service.remove_scan_path(&dir)? {
                    println!("{} was not configured", dir.display());
                }
            }
            ScanPathAction::List => {
                for dir in service.scan_paths()? {
                    println!("{}", dir.display());
                }
            }
        },
        Command::Discover => {
            let outcome = service.discover().await?;
            for e in &outcome.path_errors {
                eprintln!("warning: {}", e);
            }
            for group in &outcome.groups {
                let config = outcome.configs.get(&group.id);
                let enabled = config.map_or(true, |c| c.enabled);
                let name = config.and_then(|c| c.custom_name()).unwrap_or(&group.name);
                println!("[{}] {} {}", if enabled { "x" } else { " " }, group.id, name);
                for resource in &group.resources {
                    println!("      {}", resource.name);
                }
            }
        }
        Command::Enable { id } => toggle(service, &id, true).await?,
        Command::Disable { id } => toggle(service, &id, false).await?,
        Command::Lookup { word, dict } => {
            open(service).await?;
            let records = match dict {
                Some(id) => service.lookup_in_dict(&word, &id).await?.into_iter().collect(),
                None => service.lookup(&word).await?,
            };
            if records.is_empty() {
                println!("Word '{}' not found", word);
            }
            for record in records {
                println!("== {} ({}) ==", record.dictionary_name, record.headword);
                match record.content {
                    EntryContent::Definition(text) => println!("{}", text),
                    EntryContent::RedirectFailed(failure) => println!("({})", failure),
                }
            }
        }
        Command::Prefix { prefix, max } => {
            open(service).await?;
            for word in service.prefix(&prefix, max).await? {
                println!("{}", word);
            }
        }
        Command::Associate { phrase, max } => {
            open(service).await?;
            for m in service.associate(&phrase, max).await? {
                println!("{}\t{}", m.headword, m.dictionary_id);
            }
        }
        Command::Suggest { phrase, distance, max } => {
            open(service).await?;
            for word in service.suggest(&phrase, distance, max).await? {
                println!("{}", word);
            }
        }
        Command::Fuzzy { word, size, gap } => {
            open(service).await?;
            for m in service.fuzzy_search(&word, size, gap).await? {
                println!("{}\t{}\t{}", m.edit_distance, m.headword, m.dictionary_id);
            }
        }
        Command::Resource { key, dict, out } => {
            open(service).await?;
            let Some(resource) = service.get_resource(&key, &dict).await? else {
                bail!("resource '{}' not found in {}", key, dict);
            };
            let data = BASE64
                .decode(resource.data.as_bytes())
                .context("resource payload is not base64")?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &data)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("{} ({} bytes) -> {}", resource.mime_type, data.len(), path.display());
                }
                None => println!("{} ({} bytes)", resource.mime_type, data.len()),
            }
        }
        Command::Info { file } => print_info(&file)?,
    }
    Ok(())
}

/// Discover and load enabled dictionaries, reporting failures on stderr
async fn open(service: &mut DictionaryService) -> anyhow::Result<()> {
    let outcome = service.discover().await?;
    for e in &outcome.path_errors {
        eprintln!("warning: {}", e);
    }
    let report = service.load().await?;
    for failure in &report.failures {
        eprintln!("warning: {}", failure);
    }
    if report.loaded.is_empty() {
        eprintln!("warning: no dictionaries loaded");
    }
    Ok(())
}

async fn toggle(service: &mut DictionaryService, id: &str, enabled: bool) -> anyhow::Result<()> {
    service.discover().await?;
    service.set_enabled(id, enabled)?;
    Ok(())
}

fn print_info(file: &Path) -> anyhow::Result<()> {
    let is_mdd = file
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("mdd"));

    if is_mdd {
        let mdd = Mdd::new(file).with_context(|| format!("failed to open {}", file.display()))?;
        println!("MDD Resource File Info:");
        println!("  File: {}", mdd.filepath());
        println!("  Version: {}", mdd.meta().version);
        println!("  Encoding: {:?}", mdd.meta().encoding);
        println!("  Resources: {}", mdd.resource_count());
        print_header(mdd.header().iter());
    } else {
        let mdx = Mdx::new(file).with_context(|| format!("failed to open {}", file.display()))?;
        println!("MDX Dictionary Info:");
        println!("  File: {}", mdx.filepath());
        println!("  Title: {}", mdx.title().unwrap_or("-"));
        println!("  Version: {}", mdx.meta().version);
        println!("  Encoding: {:?}", mdx.meta().encoding);
        println!("  Keywords: {}", mdx.keyword_count());
        print_header(mdx.header().iter());
    }
    Ok(())
}

fn print_header<'a>(attributes: impl Iterator<Item = (&'a String, &'a String)>) {
    let mut attributes: Vec<_> = attributes.collect();
    attributes.sort();
    println!();
    println!("Header attributes:");
    for (key, value) in attributes {
        println!("  {}: {}", key, value);
    }
}
