//! DocChat Indexer
//!
//! Offline maintenance for the document index:
//! - `seed`: load or build the index of every stored document
//! - `upsert <manifest.json>`: insert or merge clinical guideline documents

mod manifest;
mod seed;

use clap::{Parser, Subcommand};
use docchat_common::{
    config::AppConfig, db::DbPool, metrics::register_metrics, storage::open_object_store,
    Repository, VERSION,
};
use docchat_index::{
    CategoryProfiles, EmbedderSet, HttpContentFetcher, IndexBuilder, ObjectStoreFetcher,
    SchemeContentFetcher, StorageContextCache, VectorStoreRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "indexer", version, about = "DocChat document index maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Load or build the index of every stored document
    Seed,

    /// Insert or merge the clinical guidelines listed in a manifest
    Upsert {
        /// JSON array of `{ "url": ..., "metadata": { ... } }` entries
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.observability.log_level))
        .with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting DocChat Indexer v{}", VERSION);
    register_metrics();

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    db.migrate().await?;
    let repository = Repository::new(db.clone());

    match cli.command {
        Command::Upsert { manifest } => {
            let raw = tokio::fs::read_to_string(&manifest).await?;
            let documents = manifest::upsert_manifest(&repository, &raw).await?;
            println!("Upserted {} guideline(s)", documents.len());
            for document in &documents {
                let title = manifest::guideline_title(document).unwrap_or_default();
                println!("  {} {} ({})", document.id, title, document.url);
            }
        }
        Command::Seed => {
            let fs = open_object_store(&config.storage).await?;
            let profiles = CategoryProfiles::from_config(&config.embedding);
            let fetcher = SchemeContentFetcher::new(
                Arc::new(HttpContentFetcher::new(config.download_timeout())?),
                Arc::new(ObjectStoreFetcher::new(fs.clone())),
            );
            let builder = IndexBuilder::new(
                Arc::new(VectorStoreRegistry::postgres(
                    db.primary_sqlx_pool().clone(),
                    config.vector_store.table_name.clone(),
                )),
                Arc::new(StorageContextCache::from_config(&config.cache)),
                Arc::new(fetcher),
                EmbedderSet::from_config(&config.embedding, &profiles)?,
                profiles,
                config.storage.index_bucket.clone(),
            )?
            .with_embedding_limits(config.embedding_timeout(), config.embedding.batch_size);

            let report = seed::seed_indices(&repository, &builder, fs.clone(), fs).await?;
            println!("{}", report.summary());
            if !report.failed.is_empty() {
                error!(failed = report.failed.len(), "Some documents could not be indexed");
                return Err(format!("{} document(s) failed to index", report.failed.len()).into());
            }
        }
    }

    info!("Indexer finished");
    Ok(())
}
