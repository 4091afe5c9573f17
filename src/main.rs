use std::{collections::BTreeSet, process};

use render_cache::{
    cache::{CacheEntry, CacheKey, FileSystemStore, Revalidate, Store, TagIndex},
    config::{self, Command, KeysArgs, PurgeArgs, PurgeTagArgs, Settings, ShowArgs},
    infra::{error::InfraError, telemetry},
};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "render-cache failed");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "render-cache failed");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let store = FileSystemStore::open(&settings.cache.directory).await?;
    info!(directory = %store.root().display(), "opened cache directory");

    match cli_args.command {
        Command::Keys(args) => run_keys(&store, args).await,
        Command::Show(args) => run_show(&store, &settings, args).await,
        Command::Purge(args) => run_purge(&store, args).await,
        Command::PurgeTag(args) => run_purge_tag(&store, args).await,
    }
}

async fn run_keys(store: &FileSystemStore, args: KeysArgs) -> Result<(), InfraError> {
    let mut keys = store.list_keys(&args.prefix).await?;
    keys.sort();
    for key in &keys {
        println!("{key}");
    }
    info!(count = keys.len(), prefix = %args.prefix, "listed keys");
    Ok(())
}

#[derive(Debug, Serialize)]
struct EntryReport<'a> {
    key: &'a str,
    generation: u64,
    created_at: String,
    age_seconds: u64,
    revalidate: Revalidate,
    freshness: &'static str,
    tags: &'a BTreeSet<String>,
    body_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

impl<'a> EntryReport<'a> {
    fn new(entry: &'a CacheEntry, settings: &Settings, include_body: bool) -> Self {
        let now = OffsetDateTime::now_utc();
        let freshness = settings.cache.policy().classify(Some(entry), now);
        Self {
            key: entry.key.as_str(),
            generation: entry.generation,
            created_at: entry
                .created_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| entry.created_at.to_string()),
            age_seconds: entry.age(now).as_secs(),
            revalidate: entry.revalidate,
            freshness: freshness.as_str(),
            tags: &entry.tags,
            body_bytes: entry.body.len(),
            body: include_body.then(|| String::from_utf8_lossy(&entry.body).into_owned()),
        }
    }
}

async fn run_show(
    store: &FileSystemStore,
    settings: &Settings,
    args: ShowArgs,
) -> Result<(), InfraError> {
    let key = CacheKey::from(args.key);
    let Some(entry) = store.get(&key).await? else {
        println!("{key}: not cached");
        return Ok(());
    };

    let report = EntryReport::new(&entry, settings, args.body);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_purge(store: &FileSystemStore, args: PurgeArgs) -> Result<(), InfraError> {
    let key = CacheKey::from(args.key);
    let removed = store.delete(&key).await?;
    info!(%key, removed, "purged key");
    println!("{key}: {}", if removed { "purged" } else { "not cached" });
    Ok(())
}

async fn run_purge_tag(store: &FileSystemStore, args: PurgeTagArgs) -> Result<(), InfraError> {
    let index = TagIndex::new();
    let indexed = index.rebuild(store).await?;
    info!(indexed, tags = index.tag_count(), "rebuilt tag index from disk");

    let purged = index.purge_tag(&args.tag, store).await?;
    println!("{}: purged {purged} entries", args.tag);
    Ok(())
}
