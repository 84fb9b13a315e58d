//! Content CLI - Command-line interface for the content mirror.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

use content_controller::{ContentController, InstallItemPackageResult, UpdateCatalogResult};
use content_core::{CatalogSource, ContentConfig, InstallPriority};
use content_sync::Progress;

/// Content - Local mirror of a versioned content catalog
#[derive(Parser)]
#[command(name = "content")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Installation root (overrides the configured one)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file (default: the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the latest published catalog version
    Version,

    /// Download the latest catalogs and rebuild the merged catalog
    Update {
        /// Secondary catalog as NAME=URL (repeatable)
        #[arg(short, long = "secondary", value_parser = parse_source)]
        secondary: Vec<CatalogSource>,
    },

    /// Install the package for an item
    Install {
        /// Item id
        id: i64,

        /// Skip the download queue
        #[arg(long)]
        high_priority: bool,
    },

    /// Uninstall the package for an item
    Uninstall {
        /// Item id
        id: i64,
    },

    /// List installed item packages
    Installed,

    /// List catalog items
    Items,

    /// Search an installed item package
    Search {
        /// Item id
        id: i64,

        /// Search query (quote it for an exact phrase)
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,
    },
}

fn parse_source(value: &str) -> Result<CatalogSource, String> {
    match value.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => {
            Ok(CatalogSource::new(name, url))
        }
        _ => Err(format!("expected NAME=URL, got '{}'", value)),
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(cli: &Cli) -> Result<ContentConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ContentConfig::load(path)?,
        None => ContentConfig::load_default()?,
    };
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }
    Ok(config)
}

fn progress_logger(label: String) -> Progress {
    Arc::new(move |fraction| debug!("{}: {:.0}%", label, fraction * 100.0))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(&cli)?;
    let controller = ContentController::open(&config)?;

    match cli.command {
        Commands::Version => {
            let version = controller.fetch_latest_version().await?;
            println!("{}", version);
        }
        Commands::Update { secondary } => {
            update(&controller, &secondary).await;
        }
        Commands::Install { id, high_priority } => {
            let priority = if high_priority {
                InstallPriority::High
            } else {
                InstallPriority::Default
            };
            install(&controller, id, priority).await?;
        }
        Commands::Uninstall { id } => {
            controller.uninstall_item_package(id).await?;
            println!("Uninstalled item {}", id);
        }
        Commands::Installed => {
            installed(&controller)?;
        }
        Commands::Items => {
            items(&controller)?;
        }
        Commands::Search { id, query, limit } => {
            search(&controller, id, &query, limit)?;
        }
    }

    controller.wait_until_idle().await;
    Ok(())
}

async fn update(controller: &ContentController, secondary: &[CatalogSource]) {
    let result = controller
        .update_catalog(secondary, Some(progress_logger("catalog".to_string())))
        .await;

    match &result {
        UpdateCatalogResult::Success { catalog } => {
            println!("Updated catalog to version {}", catalog_version(catalog));
        }
        UpdateCatalogResult::AlreadyCurrent { catalog } => {
            println!("Catalog already current at version {}", catalog_version(catalog));
        }
        UpdateCatalogResult::PartialSuccess { catalog, failures } => {
            println!("Updated catalog to version {}", catalog_version(catalog));
            for failure in failures {
                eprintln!("  {} - Error: {}", failure.name, failure.error);
            }
        }
        UpdateCatalogResult::Error { errors } => {
            for error in errors {
                eprintln!("Error: {}", error);
            }
            std::process::exit(1);
        }
    }
}

fn catalog_version(catalog: &content_store::Catalog) -> String {
    match catalog.catalog_version() {
        Ok(Some(version)) => version.to_string(),
        _ => "unknown".to_string(),
    }
}

async fn install(
    controller: &ContentController,
    id: i64,
    priority: InstallPriority,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(catalog) = controller.catalog()? else {
        eprintln!("No catalog installed. Run 'content update' first.");
        std::process::exit(1);
    };
    let Some(item) = catalog.item(id)? else {
        eprintln!("Item {} is not in the catalog", id);
        std::process::exit(1);
    };

    let progress = progress_logger(item.external_id.clone());
    match controller
        .install_item_package(&item, priority, Some(progress))
        .await
    {
        InstallItemPackageResult::Success { .. } => {
            println!("Installed {} (version {})", item.title, item.latest_version);
        }
        InstallItemPackageResult::AlreadyInstalled { .. } => {
            println!("{} is already installed", item.title);
        }
        InstallItemPackageResult::Error { errors } => {
            for error in errors {
                eprintln!("Error: {}", error);
            }
            std::process::exit(1);
        }
    }

    Ok(())
}

fn installed(controller: &ContentController) -> Result<(), Box<dyn std::error::Error>> {
    let ids = controller.installed_item_ids()?;
    let inventory = controller.inventory();

    let listing: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| {
            let version = inventory.installed_version(*id).ok().flatten();
            serde_json::json!({
                "item_id": id,
                "schema_version": version.map(|v| v.schema_version),
                "item_package_version": version.map(|v| v.item_package_version),
            })
        })
        .collect();

    let errored = inventory.errored_item_ids()?;
    let installing = inventory.installing_item_ids()?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "installed": listing,
            "installing": installing,
            "errored": errored,
        }))?
    );
    Ok(())
}

fn items(controller: &ContentController) -> Result<(), Box<dyn std::error::Error>> {
    let Some(catalog) = controller.catalog()? else {
        println!("No catalog installed. Run 'content update' first.");
        return Ok(());
    };

    let installed: HashSet<i64> = controller.installed_item_ids()?.into_iter().collect();
    for item in catalog.items()? {
        if item.obsolete {
            continue;
        }
        let marker = if installed.contains(&item.id) { "*" } else { " " };
        println!(
            "{} {:>8}  {}  {} (v{})",
            marker, item.id, item.uri, item.title, item.latest_version
        );
    }
    Ok(())
}

fn search(
    controller: &ContentController,
    id: i64,
    query: &str,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let package = controller.require_item_package(id)?;

    let results = package.search(query, limit)?;
    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{}. {} ({})", i + 1, result.title, result.uri);
        println!("   {}", result.snippet);
        let ranges: Vec<String> = result
            .match_ranges
            .iter()
            .map(|range| format!("{}..{}", range.location, range.end()))
            .collect();
        println!("   matches: {}", ranges.join(", "));
    }
    Ok(())
}
